//! Abstract container-runtime contract (spec §6 "Runtime-client operations
//! required"), grounded on the `ContainerProvider` trait pattern: a single
//! `#[async_trait]` abstraction the rest of the crate programs against, with
//! a bollard-backed implementation behind a feature flag and a
//! recording-mock implementation for tests.

use async_trait::async_trait;

use crate::error::Result;

/// Opaque handle to a remote container, from the runtime's point of view.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContainerId(pub String);

impl std::fmt::Display for ContainerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ContainerId {
    fn from(s: String) -> Self {
        ContainerId(s)
    }
}

impl From<&str> for ContainerId {
    fn from(s: &str) -> Self {
        ContainerId(s.to_string())
    }
}

/// What `inspect` reports (spec §6: `{state: {running}, image}`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInspect {
    pub running: bool,
    pub image: String,
}

/// Parameters for a single exec (spec §6, §4.6.2).
#[derive(Debug, Clone, Default)]
pub struct ExecSpec {
    pub cmd: Vec<String>,
    pub env: Vec<String>,
    pub attach_stdout: bool,
    pub attach_stderr: bool,
}

/// One chunk demultiplexed from the combined exec output stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecChunk {
    pub data: Vec<u8>,
    pub is_stderr: bool,
}

/// The result of draining an exec's output stream to completion and
/// inspecting its exit code (spec §5 "both must be drained to termination
/// before inspecting the exit code").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutcome {
    pub chunks: Vec<ExecChunk>,
    pub exit_code: i64,
}

/// Abstract contract every container backend must satisfy (spec §6). All
/// operations are suspension points (spec §5): they may be interleaved with
/// cancellation checks by callers.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn inspect(&self, container: &ContainerId) -> Result<ContainerInspect>;

    /// Starts a helper container from `image` with a long-running idle
    /// entrypoint (spec §6), returning its id.
    async fn start_container_from_image(
        &self,
        image: &str,
        entrypoint: &[String],
    ) -> Result<ContainerId>;

    /// Streaming upload of a tar archive, rooted at `dest_path`.
    async fn put_archive(
        &self,
        container: &ContainerId,
        tar_bytes: Vec<u8>,
        dest_path: &str,
    ) -> Result<()>;

    /// Streaming download of a tar archive rooted at `src_path`.
    async fn get_archive(&self, container: &ContainerId, src_path: &str) -> Result<Vec<u8>>;

    /// Runs `spec` to completion, demultiplexing its output stream, and
    /// returns the full outcome. Real backends stream output incrementally;
    /// this abstraction collects it, and the executor re-emits each chunk
    /// as a `commandOutput` event as it is produced.
    async fn exec(&self, container: &ContainerId, spec: ExecSpec) -> Result<ExecOutcome>;

    async fn kill(&self, container: &ContainerId) -> Result<()>;
    async fn start(&self, container: &ContainerId) -> Result<()>;
    async fn remove(&self, container: &ContainerId, force: bool) -> Result<()>;
}
