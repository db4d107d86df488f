//! Livepush keeps a running container in sync with a developer's source
//! tree by interpreting a Dockerfile as a dependency graph and replaying
//! only the affected copy-and-command steps inside the already-running
//! container, instead of rebuilding the image from scratch.
//!
//! The crate is organized leaf-first, the way `super_orchestrator` lays out
//! its own Docker-facing subsystem:
//!
//! - [`recipe`] -- the directive-aware parser (spec §4.1): recipe text to a
//!   canonical, line-ordered instruction stream.
//! - [`stage`] -- the stage builder (spec §4.2): instruction stream to
//!   `Stage`/`ActionGroup` model.
//! - [`graph`] and [`invalidate`] -- the action-graph compiler and
//!   invalidation engine (spec §4.3, §4.4): changed files to the ordered
//!   `{stage -> [ActionGroup]}` map, preserving longest-affected-suffix
//!   semantics across stage-dependency edges.
//! - [`container`] -- the abstract runtime contract, the stage-copy engine
//!   (spec §4.5), and backend implementations (spec §6).
//! - [`executor`] -- the container executor (spec §4.6): materializes one
//!   stage's invalidated groups against its container.
//! - [`orchestrator`] -- [`Livepush`], the top-level entry point (spec
//!   §4.7): owns container handles and single-writer/cancellation state.
//! - [`live_rewrite`] -- the live-recipe rewriter (spec §4.8).

mod error;
mod events;
mod executor;
mod graph;
mod invalidate;
mod live_rewrite;
mod matcher;
mod orchestrator;
mod pathutil;
mod recipe;
mod stage;
mod types;

pub mod container;

pub use container::{ContainerId, ContainerInspect, ContainerRuntime, ExecChunk, ExecOutcome, ExecSpec};
pub use error::{LivepushErrorKind, Result};
pub use events::{Event, EventSink, OutputChunk, RecordingSink};
pub use live_rewrite::rewrite_live;
pub use orchestrator::{Livepush, LivepushOptions};
pub use recipe::parse_recipe;
pub use stage::{build_stages, ActionGroup, LocalCopy, LocalGroup, Stage, StageCopy, StageGroup};
pub use types::{Args, ChangedFiles};
