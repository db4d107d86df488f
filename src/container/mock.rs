//! In-memory `ContainerRuntime` used by this crate's own tests (spec §6's
//! abstract contract, minus any real daemon). Not behind a feature flag
//! since the rest of the crate's test suite exercises the executor and
//! orchestrator against it directly.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{internal_inconsistency_err, Result};

use super::runtime::{ContainerId, ContainerInspect, ContainerRuntime, ExecChunk, ExecOutcome, ExecSpec};

#[derive(Debug, Clone)]
struct MockContainer {
    running: bool,
    image: String,
    files: BTreeMap<String, Vec<u8>>,
}

/// Scriptable responder for a `RUN` command: tests register canned exit
/// codes/output for command prefixes (e.g. `"test -d"`) without needing a
/// real shell.
pub type CommandResponder = Box<dyn Fn(&[String]) -> (i64, Vec<u8>) + Send + Sync>;

pub struct MockRuntime {
    containers: Mutex<BTreeMap<ContainerId, MockContainer>>,
    responder: Option<CommandResponder>,
    next_id: Mutex<u64>,
    pub recorded_execs: Mutex<Vec<(ContainerId, Vec<String>)>>,
    pub killed: Mutex<Vec<ContainerId>>,
    pub started: Mutex<Vec<ContainerId>>,
    pub removed: Mutex<Vec<ContainerId>>,
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self {
            containers: Mutex::new(BTreeMap::new()),
            responder: None,
            next_id: Mutex::new(0),
            recorded_execs: Mutex::new(Vec::new()),
            killed: Mutex::new(Vec::new()),
            started: Mutex::new(Vec::new()),
            removed: Mutex::new(Vec::new()),
        }
    }
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_responder(responder: CommandResponder) -> Self {
        Self {
            responder: Some(responder),
            ..Self::default()
        }
    }

    /// Registers a running container under a caller-chosen id, for tests
    /// that want to preseed the orchestrator's container map.
    pub fn seed_running(&self, id: impl Into<ContainerId>, image: impl Into<String>) {
        let id = id.into();
        self.containers.lock().unwrap().insert(
            id,
            MockContainer {
                running: true,
                image: image.into(),
                files: BTreeMap::new(),
            },
        );
    }

    pub fn set_running(&self, id: &ContainerId, running: bool) {
        if let Some(c) = self.containers.lock().unwrap().get_mut(id) {
            c.running = running;
        }
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn inspect(&self, container: &ContainerId) -> Result<ContainerInspect> {
        let containers = self.containers.lock().unwrap();
        let c = containers
            .get(container)
            .ok_or_else(|| internal_inconsistency_err(format!("unknown container {container}")))?;
        Ok(ContainerInspect {
            running: c.running,
            image: c.image.clone(),
        })
    }

    async fn start_container_from_image(
        &self,
        image: &str,
        _entrypoint: &[String],
    ) -> Result<ContainerId> {
        let mut next_id = self.next_id.lock().unwrap();
        let id = ContainerId(format!("mock-{next_id}"));
        *next_id += 1;
        self.containers.lock().unwrap().insert(
            id.clone(),
            MockContainer {
                running: true,
                image: image.to_string(),
                files: BTreeMap::new(),
            },
        );
        Ok(id)
    }

    async fn put_archive(&self, container: &ContainerId, tar_bytes: Vec<u8>, dest_path: &str) -> Result<()> {
        let mut containers = self.containers.lock().unwrap();
        let c = containers
            .get_mut(container)
            .ok_or_else(|| internal_inconsistency_err(format!("unknown container {container}")))?;
        let mut archive = tar::Archive::new(std::io::Cursor::new(tar_bytes));
        for entry in archive
            .entries()
            .map_err(|e| internal_inconsistency_err(format!("bad tar stream: {e}")))?
        {
            let mut entry = entry.map_err(|e| internal_inconsistency_err(format!("bad tar entry: {e}")))?;
            let path = entry
                .path()
                .map_err(|e| internal_inconsistency_err(format!("bad tar entry path: {e}")))?
                .to_string_lossy()
                .to_string();
            let mut data = Vec::new();
            std::io::Read::read_to_end(&mut entry, &mut data)
                .map_err(|e| internal_inconsistency_err(format!("bad tar entry body: {e}")))?;
            let full_path = format!("{}/{}", dest_path.trim_end_matches('/'), path);
            c.files.insert(full_path, data);
        }
        Ok(())
    }

    async fn get_archive(&self, container: &ContainerId, src_path: &str) -> Result<Vec<u8>> {
        let containers = self.containers.lock().unwrap();
        let c = containers
            .get(container)
            .ok_or_else(|| internal_inconsistency_err(format!("unknown container {container}")))?;
        let mut bytes = Vec::new();
        {
            let mut builder = tar::Builder::new(&mut bytes);
            for (path, data) in c.files.range(src_path.to_string()..) {
                if path != src_path && !path.starts_with(&format!("{src_path}/")) {
                    break;
                }
                let mut header = tar::Header::new_gnu();
                header.set_size(data.len() as u64);
                header.set_mode(0o644);
                header.set_cksum();
                builder
                    .append_data(&mut header, path, std::io::Cursor::new(data.clone()))
                    .map_err(|e| internal_inconsistency_err(format!("tar append failed: {e}")))?;
            }
            builder
                .finish()
                .map_err(|e| internal_inconsistency_err(format!("tar finish failed: {e}")))?;
        }
        Ok(bytes)
    }

    async fn exec(&self, container: &ContainerId, spec: ExecSpec) -> Result<ExecOutcome> {
        self.recorded_execs
            .lock()
            .unwrap()
            .push((container.clone(), spec.cmd.clone()));
        let (code, data) = match &self.responder {
            Some(r) => r(&spec.cmd),
            None => (0, Vec::new()),
        };
        Ok(ExecOutcome {
            chunks: if data.is_empty() {
                Vec::new()
            } else {
                vec![ExecChunk { data, is_stderr: false }]
            },
            exit_code: code,
        })
    }

    async fn kill(&self, container: &ContainerId) -> Result<()> {
        self.killed.lock().unwrap().push(container.clone());
        self.set_running(container, false);
        Ok(())
    }

    async fn start(&self, container: &ContainerId) -> Result<()> {
        self.started.lock().unwrap().push(container.clone());
        self.set_running(container, true);
        Ok(())
    }

    async fn remove(&self, container: &ContainerId, _force: bool) -> Result<()> {
        self.removed.lock().unwrap().push(container.clone());
        self.containers.lock().unwrap().remove(container);
        Ok(())
    }
}
