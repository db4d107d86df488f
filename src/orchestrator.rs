//! Orchestrator (spec §4.7): owns per-stage container handles, dispatches
//! changed-file batches into stage order, and enforces at-most-one-in-flight
//! livepush with cancel-and-replace semantics (spec §5 "Cancellation").

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as AsyncMutex;

use crate::container::runtime::{ContainerId, ContainerRuntime};
use crate::container::stage_copy::PathKindCache;
use crate::error::{container_not_running_err, invalid_argument_err, Result, StackableErr};
use crate::events::{Event, EventSink};
use crate::executor::{self, ExecutorContext};
use crate::invalidate::invalidate;
use crate::recipe::parse_recipe;
use crate::stage::{build_stages, Stage};
use crate::types::ChangedFiles;

/// The long-running idle entrypoint helper containers are started with
/// (spec §6 "a long-running idle entrypoint for helper containers").
const IDLE_ENTRYPOINT: &[&str] = &["sleep", "infinity"];

/// How often the cancelling caller polls for the prior run's acknowledgment
/// (spec §5 "polling at ~1s").
const CANCEL_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Caller-configurable knobs (spec §6 "Options"), mirroring
/// `super_orchestrator`'s `ImageBuildOptions`/`WriteOptions` `serde`-derived
/// option structs so a host CLI can deserialize this from a config file
/// without this crate needing to know about config file formats itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LivepushOptions {
    /// Suppresses the terminal-container restart (spec §6).
    #[serde(default)]
    pub skip_container_restart: bool,
}

/// Owns the per-stage container map and the single-writer state machine that
/// makes `perform_livepush` safe to call concurrently (spec §4.7, §5).
pub struct Livepush {
    stages: Vec<Stage>,
    context_root: PathBuf,
    runtime: Arc<dyn ContainerRuntime>,
    event_sink: Arc<dyn EventSink>,
    containers: AsyncMutex<BTreeMap<usize, ContainerId>>,
    path_cache: PathKindCache,
    build_arguments: std::sync::Mutex<BTreeMap<String, String>>,
    options: std::sync::Mutex<LivepushOptions>,
    running: AtomicBool,
    cancel_requested: AtomicBool,
}

impl Livepush {
    /// Parses `recipe_text` into the stage model (spec §4.1, §4.2), starts
    /// one helper container per intermediate stage from `stage_images` (spec
    /// §6), and adopts `final_container` as the terminal stage's container.
    ///
    /// `stage_images` must have exactly `stages - 1` entries; a mismatch is
    /// an [`crate::error::LivepushErrorKind::InvalidArgument`] (spec §7).
    #[tracing::instrument(skip_all)]
    pub async fn new(
        recipe_text: &str,
        context_root: impl Into<PathBuf>,
        final_container: ContainerId,
        stage_images: Vec<String>,
        runtime: Arc<dyn ContainerRuntime>,
        event_sink: Arc<dyn EventSink>,
    ) -> Result<Self> {
        let entries = parse_recipe(recipe_text)?;
        let stages = build_stages(&entries)?;

        let expected_images = stages.len().saturating_sub(1);
        if stage_images.len() != expected_images {
            return Err(invalid_argument_err(format!(
                "recipe has {} stage(s), expected {expected_images} intermediate stage image(s), got {}",
                stages.len(),
                stage_images.len()
            )));
        }

        let mut containers = BTreeMap::new();
        let entrypoint: Vec<String> = IDLE_ENTRYPOINT.iter().map(|s| s.to_string()).collect();
        for (idx, image) in stage_images.iter().enumerate() {
            let id = runtime
                .start_container_from_image(image, &entrypoint)
                .await
                .stack_err_locationless(|| format!("starting helper container for stage {idx}"))?;
            containers.insert(idx, id);
        }
        if let Some(last) = stages.last() {
            containers.insert(last.index, final_container);
        }

        Ok(Self {
            stages,
            context_root: context_root.into(),
            runtime,
            event_sink,
            containers: AsyncMutex::new(containers),
            path_cache: PathKindCache::new(),
            build_arguments: std::sync::Mutex::new(BTreeMap::new()),
            options: std::sync::Mutex::new(LivepushOptions::default()),
            running: AtomicBool::new(false),
            cancel_requested: AtomicBool::new(false),
        })
    }

    /// Replaces this instance's options (spec §4.7's `Options` surface,
    /// configured before the first `perform_livepush` call).
    pub fn with_options(self, options: LivepushOptions) -> Self {
        *self.options.lock().expect("options mutex poisoned") = options;
        self
    }

    /// Sets the build arguments passed as exec env on subsequent commands
    /// (spec §6 `setBuildArguments`). Callers must not mutate them mid-run
    /// (spec §5 "Shared resources").
    pub fn set_build_arguments(&self, args: BTreeMap<String, String>) {
        *self.build_arguments.lock().expect("build arguments mutex poisoned") = args;
    }

    /// Cheap predicate: would `perform_livepush(added, deleted)` do
    /// anything (spec §4.7 `livepushNeeded`)?
    pub fn livepush_needed(&self, added: &[String], deleted: &[String]) -> Result<bool> {
        let changed = ChangedFiles::new(added.to_vec(), deleted.to_vec());
        let files: Vec<String> = changed.union_paths().into_iter().collect();
        Ok(!invalidate(&self.stages, &files)?.is_empty())
    }

    /// Computes the invalidated action groups for `added`/`deleted` and
    /// replays them stage by stage (spec §4.7 `performLivepush`). A no-op
    /// change set returns immediately with no exec, no restart, and no
    /// events (spec §8).
    #[tracing::instrument(skip_all, fields(added = added.len(), deleted = deleted.len()))]
    pub async fn perform_livepush(&self, added: Vec<String>, deleted: Vec<String>) -> Result<()> {
        let changed = ChangedFiles::new(added, deleted);
        let files: Vec<String> = changed.union_paths().into_iter().collect();
        let tasks = invalidate(&self.stages, &files)?;
        if tasks.is_empty() {
            return Ok(());
        }

        if self.running.load(Ordering::SeqCst) {
            self.cancel_requested.store(true, Ordering::SeqCst);
            self.event_sink.on_event(Event::Cancel);
            while self.running.load(Ordering::SeqCst) {
                tokio::time::sleep(CANCEL_POLL_INTERVAL).await;
            }
            self.cancel_requested.store(false, Ordering::SeqCst);
        }

        self.running.store(true, Ordering::SeqCst);
        let result = self.run_tasks(&tasks, &changed).await;
        self.running.store(false, Ordering::SeqCst);
        self.cancel_requested.store(false, Ordering::SeqCst);
        result
    }

    async fn run_tasks<'a>(
        &self,
        tasks: &BTreeMap<usize, &'a [crate::stage::ActionGroup]>,
        changed: &ChangedFiles,
    ) -> Result<()> {
        let containers = self.containers.lock().await.clone();
        let build_arguments = self.build_arguments.lock().expect("build arguments mutex poisoned").clone();
        let skip_container_restart = self.options.lock().expect("options mutex poisoned").skip_container_restart;

        for (&stage_idx, groups) in tasks {
            if self.cancel_requested.load(Ordering::SeqCst) {
                break;
            }
            let container = containers
                .get(&stage_idx)
                .cloned()
                .ok_or_else(|| container_not_running_err(stage_idx))?;
            let restart_enabled = self.stages.get(stage_idx).map(|s| s.is_last).unwrap_or(false);

            let ctx = ExecutorContext {
                runtime: self.runtime.as_ref(),
                path_cache: &self.path_cache,
                stage_idx,
                container: &container,
                stage_containers: &containers,
                context_root: &self.context_root,
                build_arguments: &build_arguments,
                restart_enabled,
                skip_container_restart,
                cancel_requested: &self.cancel_requested,
                event_sink: self.event_sink.as_ref(),
            };
            executor::execute_action_groups(&ctx, groups, changed).await?;
        }
        Ok(())
    }

    /// Removes every helper (non-terminal) container (spec §4.7
    /// `cleanupIntermediateContainers`). After this, a `perform_livepush`
    /// call whose invalidated tasks require one of them fails with
    /// [`crate::error::LivepushErrorKind::ContainerNotRunning`].
    #[tracing::instrument(skip_all)]
    pub async fn cleanup_intermediate_containers(&self) -> Result<()> {
        let last_idx = self.stages.last().map(|s| s.index);
        let mut containers = self.containers.lock().await;
        let to_remove: Vec<usize> = containers.keys().copied().filter(|idx| Some(*idx) != last_idx).collect();
        for idx in to_remove {
            if let Some(id) = containers.remove(&idx) {
                self.runtime
                    .remove(&id, true)
                    .await
                    .stack_err_locationless(|| format!("removing helper container for stage {idx}"))?;
            }
        }
        Ok(())
    }
}
