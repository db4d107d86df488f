//! Container-facing subsystem (spec §4.5 "Stage-copy engine", §4.6
//! "Container executor", §6 "Runtime-client operations required"): the
//! abstract runtime contract, its bollard-backed and in-memory
//! implementations, and the stage-copy engine built on top of it.

pub mod runtime;
pub mod stage_copy;

#[cfg(feature = "bollard")]
pub mod bollard_runtime;

#[cfg(test)]
pub mod mock;

pub use runtime::{ContainerId, ContainerInspect, ContainerRuntime, ExecChunk, ExecOutcome, ExecSpec};

#[cfg(feature = "bollard")]
pub use bollard_runtime::BollardRuntime;
