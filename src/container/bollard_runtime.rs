//! Bollard-backed [`ContainerRuntime`] (feature `bollard`), grounded on
//! `devc-provider`'s `DockerProvider::exec`/`copy_into`/`copy_from` and on
//! `super_orchestrator`'s `docker_network.rs` for error-stacking idiom.

use bollard::container::{
    DownloadFromContainerOptions, KillContainerOptions, RemoveContainerOptions,
    StartContainerOptions, UploadToContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::Docker;
use futures::StreamExt;
use tracing::instrument;

use crate::error::{internal_inconsistency_err, runtime_err, Result, StackableErr};

use super::runtime::{ContainerId, ContainerInspect, ContainerRuntime, ExecChunk, ExecOutcome, ExecSpec};

pub struct BollardRuntime {
    client: Docker,
}

impl BollardRuntime {
    /// Connects using the local Docker defaults (`DOCKER_HOST`, or the
    /// platform socket).
    pub fn connect_local() -> Result<Self> {
        let client = Docker::connect_with_local_defaults()
            .stack_err_locationless(|| "BollardRuntime::connect_local")?;
        Ok(Self { client })
    }

    pub fn from_client(client: Docker) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl ContainerRuntime for BollardRuntime {
    #[instrument(skip(self))]
    async fn inspect(&self, container: &ContainerId) -> Result<ContainerInspect> {
        let inspect = self
            .client
            .inspect_container(&container.0, None)
            .await
            .stack_err_locationless(|| format!("inspect_container({container})"))?;
        let running = inspect
            .state
            .as_ref()
            .and_then(|s| s.running)
            .unwrap_or(false);
        let image = inspect.image.unwrap_or_default();
        Ok(ContainerInspect { running, image })
    }

    #[instrument(skip(self, entrypoint))]
    async fn start_container_from_image(
        &self,
        image: &str,
        entrypoint: &[String],
    ) -> Result<ContainerId> {
        let options = bollard::container::CreateContainerOptions {
            name: "",
            platform: None,
        };
        let config = bollard::container::Config {
            image: Some(image.to_string()),
            entrypoint: Some(entrypoint.to_vec()),
            tty: Some(true),
            ..Default::default()
        };
        let created = self
            .client
            .create_container(Some(options), config)
            .await
            .stack_err_locationless(|| format!("create_container({image})"))?;
        let id = ContainerId(created.id);
        self.client
            .start_container(&id.0, None::<StartContainerOptions<String>>)
            .await
            .stack_err_locationless(|| format!("start_container({id})"))?;
        Ok(id)
    }

    #[instrument(skip(self, tar_bytes))]
    async fn put_archive(&self, container: &ContainerId, tar_bytes: Vec<u8>, dest_path: &str) -> Result<()> {
        let options = UploadToContainerOptions {
            path: dest_path,
            ..Default::default()
        };
        self.client
            .upload_to_container(&container.0, Some(options), tar_bytes.into())
            .await
            .stack_err_locationless(|| format!("upload_to_container({container}, {dest_path})"))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_archive(&self, container: &ContainerId, src_path: &str) -> Result<Vec<u8>> {
        let options = DownloadFromContainerOptions { path: src_path };
        let mut stream = self.client.download_from_container(&container.0, Some(options));
        let mut bytes = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.stack_err_locationless(|| {
                format!("download_from_container({container}, {src_path})")
            })?;
            bytes.extend_from_slice(&chunk);
        }
        Ok(bytes)
    }

    #[instrument(skip(self, spec))]
    async fn exec(&self, container: &ContainerId, spec: ExecSpec) -> Result<ExecOutcome> {
        let options = CreateExecOptions {
            cmd: Some(spec.cmd.clone()),
            env: Some(spec.env.clone()),
            attach_stdout: Some(spec.attach_stdout),
            attach_stderr: Some(spec.attach_stderr),
            ..Default::default()
        };
        let created = self
            .client
            .create_exec(&container.0, options)
            .await
            .stack_err_locationless(|| format!("create_exec({container})"))?;

        let mut chunks = Vec::new();
        match self
            .client
            .start_exec(&created.id, None)
            .await
            .stack_err_locationless(|| format!("start_exec({container})"))?
        {
            StartExecResults::Attached { mut output, .. } => {
                while let Some(chunk) = output.next().await {
                    let chunk =
                        chunk.stack_err_locationless(|| format!("exec output stream({container})"))?;
                    match chunk {
                        bollard::container::LogOutput::StdOut { message } => chunks.push(ExecChunk {
                            data: message.to_vec(),
                            is_stderr: false,
                        }),
                        bollard::container::LogOutput::StdErr { message } => chunks.push(ExecChunk {
                            data: message.to_vec(),
                            is_stderr: true,
                        }),
                        _ => {}
                    }
                }
            }
            StartExecResults::Detached => {
                return Err(runtime_err(format!("exec detached unexpectedly ({container})")));
            }
        }

        let inspected = self
            .client
            .inspect_exec(&created.id)
            .await
            .stack_err_locationless(|| format!("inspect_exec({container})"))?;
        let exit_code = inspected
            .exit_code
            .ok_or_else(|| internal_inconsistency_err(format!("exec {container} has no exit code")))?;

        Ok(ExecOutcome { chunks, exit_code })
    }

    #[instrument(skip(self))]
    async fn kill(&self, container: &ContainerId) -> Result<()> {
        self.client
            .kill_container(&container.0, None::<KillContainerOptions<String>>)
            .await
            .stack_err_locationless(|| format!("kill_container({container})"))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn start(&self, container: &ContainerId) -> Result<()> {
        self.client
            .start_container(&container.0, None::<StartContainerOptions<String>>)
            .await
            .stack_err_locationless(|| format!("start_container({container})"))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove(&self, container: &ContainerId, force: bool) -> Result<()> {
        let options = RemoveContainerOptions {
            force,
            ..Default::default()
        };
        self.client
            .remove_container(&container.0, Some(options))
            .await
            .stack_err_locationless(|| format!("remove_container({container})"))?;
        Ok(())
    }
}
