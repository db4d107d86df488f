//! Container executor (spec §4.6): materializes a stage's invalidated
//! action groups against its container -- uploading changed files, deleting
//! removed ones, running commands, and restarting the container at the end
//! if any applied group crossed the restart boundary.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use path_clean::PathClean;

use crate::container::runtime::{ContainerId, ContainerRuntime, ExecSpec};
use crate::container::stage_copy::{self, shell_quote, PathKindCache};
use crate::error::{container_not_running_err, internal_inconsistency_err, runtime_err, Result, StackableErr};
use crate::events::{Event, EventSink, OutputChunk};
use crate::matcher::SourceMatcher;
use crate::pathutil::{posix_join, relative_to};
use crate::stage::{ActionGroup, LocalGroup};
use crate::types::ChangedFiles;

/// Everything the executor needs to materialize one stage's groups that is
/// not itself part of the recipe model (spec §4.6, §4.6.1).
pub struct ExecutorContext<'a> {
    pub runtime: &'a dyn ContainerRuntime,
    pub path_cache: &'a PathKindCache,
    pub stage_idx: usize,
    pub container: &'a ContainerId,
    /// Every stage's current container, keyed by stage index, for stage-copy
    /// sub-steps (spec §4.5) that pull from an earlier stage's helper.
    pub stage_containers: &'a BTreeMap<usize, ContainerId>,
    pub context_root: &'a Path,
    pub build_arguments: &'a BTreeMap<String, String>,
    /// `false` for every intermediate (helper) stage container, per spec §3
    /// "Intermediate containers always have restart disabled."
    pub restart_enabled: bool,
    pub skip_container_restart: bool,
    pub cancel_requested: &'a AtomicBool,
    pub event_sink: &'a dyn EventSink,
}

/// Runs `groups` against `ctx.container` in order (spec §4.6 step 2),
/// restarting the container at the end if eligible (step 3).
#[tracing::instrument(skip_all, fields(stage = ctx.stage_idx, groups = groups.len()))]
pub async fn execute_action_groups(ctx: &ExecutorContext<'_>, groups: &[ActionGroup], changed: &ChangedFiles) -> Result<()> {
    if groups.is_empty() {
        return Ok(());
    }

    let inspect = ctx
        .runtime
        .inspect(ctx.container)
        .await
        .stack_err_locationless(|| format!("inspect(stage {})", ctx.stage_idx))?;
    if !inspect.running {
        return Err(container_not_running_err(ctx.stage_idx));
    }

    let mut should_restart = false;

    for group in groups {
        match group {
            ActionGroup::Stage(g) => {
                for copy in &g.copies {
                    let source_container = ctx.stage_containers.get(&g.stage_dependency).ok_or_else(|| {
                        container_not_running_err(g.stage_dependency)
                    })?;
                    stage_copy::copy_between_containers(
                        ctx.runtime,
                        ctx.path_cache,
                        source_container,
                        ctx.container,
                        copy,
                    )
                    .await?;
                }
            }
            ActionGroup::Local(g) => {
                let (to_add, to_delete) = resolve_local_ops(ctx, g, changed).await?;
                if !to_add.is_empty() {
                    let tar_bytes = build_upload_tar(&to_add)?;
                    ctx.runtime
                        .put_archive(ctx.container, tar_bytes, "/")
                        .await
                        .stack_err_locationless(|| format!("put_archive(stage {}, /)", ctx.stage_idx))?;
                }
                for path in &to_delete {
                    ctx.runtime
                        .exec(
                            ctx.container,
                            ExecSpec {
                                cmd: vec!["/bin/sh".to_string(), "-c".to_string(), format!("rm -f {}", shell_quote(path))],
                                env: Vec::new(),
                                attach_stdout: false,
                                attach_stderr: false,
                            },
                        )
                        .await
                        .stack_err_locationless(|| format!("rm -f {path} (stage {})", ctx.stage_idx))?;
                }
            }
        }

        let mut halted = false;
        for command in group.commands() {
            ctx.event_sink.on_event(Event::CommandExecute {
                stage_idx: ctx.stage_idx,
                command: command.clone(),
            });

            let env: Vec<String> = ctx.build_arguments.iter().map(|(k, v)| format!("{k}={v}")).collect();
            let outcome = ctx
                .runtime
                .exec(
                    ctx.container,
                    ExecSpec {
                        cmd: vec!["/bin/sh".to_string(), "-c".to_string(), command.clone()],
                        env,
                        attach_stdout: true,
                        attach_stderr: true,
                    },
                )
                .await
                .stack_err_locationless(|| format!("exec `{command}` (stage {})", ctx.stage_idx))?;

            for chunk in outcome.chunks {
                ctx.event_sink.on_event(Event::CommandOutput {
                    stage_idx: ctx.stage_idx,
                    output: OutputChunk {
                        data: chunk.data,
                        is_stderr: chunk.is_stderr,
                    },
                });
            }
            ctx.event_sink.on_event(Event::CommandReturn {
                stage_idx: ctx.stage_idx,
                return_code: outcome.exit_code,
                command: command.clone(),
            });

            if ctx.cancel_requested.load(Ordering::SeqCst) {
                return Ok(());
            }
            if outcome.exit_code != 0 {
                halted = true;
                break;
            }
        }

        if group.restart() {
            should_restart = true;
        }
        if halted {
            break;
        }
    }

    if !ctx.skip_container_restart && ctx.restart_enabled && should_restart {
        ctx.runtime
            .kill(ctx.container)
            .await
            .stack_err_locationless(|| format!("kill(stage {})", ctx.stage_idx))?;
        ctx.runtime
            .start(ctx.container)
            .await
            .stack_err_locationless(|| format!("start(stage {})", ctx.stage_idx))?;
        ctx.event_sink.on_event(Event::ContainerRestart {
            container_id: ctx.container.0.clone(),
        });
    }

    Ok(())
}

/// A host file to upload, paired with the in-container destination path it
/// resolves to.
type UploadEntry = (PathBuf, String);

/// §4.6.1 "Local operation resolution": for each changed file retained by
/// the group's copies, resolves the in-container destination path, split
/// into files to upload and paths to delete.
async fn resolve_local_ops(
    ctx: &ExecutorContext<'_>,
    group: &LocalGroup,
    changed: &ChangedFiles,
) -> Result<(Vec<UploadEntry>, Vec<String>)> {
    let mut to_add: Vec<UploadEntry> = Vec::new();
    let mut to_delete: Vec<String> = Vec::new();

    for copy in &group.copies {
        let matcher = SourceMatcher::compile(&copy.source)?;
        let dest_is_dir = copy.dest.ends_with('/')
            || ctx
                .path_cache
                .path_is_directory(ctx.runtime, ctx.container, &copy.dest)
                .await?;

        let (host_exists, host_is_dir) = host_stat(&host_join(ctx.context_root, &copy.source));

        for f in &changed.added_or_updated {
            if !matcher.matches(f) {
                continue;
            }
            let to_path = resolve_dest_path(copy.dest.as_str(), &copy.source, f, dest_is_dir, host_exists, host_is_dir);
            let host_file = host_join(ctx.context_root, f);
            to_add.push((host_file, to_path));
        }

        for f in &changed.deleted {
            if !matcher.matches(f) {
                continue;
            }
            let to_path = resolve_dest_path(copy.dest.as_str(), &copy.source, f, dest_is_dir, host_exists, host_is_dir);
            to_delete.push(to_path);
        }
    }

    Ok((to_add, to_delete))
}

/// Computes the in-container destination for one changed file `f` matched
/// against one `copy`, per spec §4.6.1's formula.
fn resolve_dest_path(dest: &str, source: &str, f: &str, dest_is_dir: bool, host_exists: bool, host_is_dir: bool) -> String {
    if !dest_is_dir {
        return dest.to_string();
    }
    let is_single_file_copy = host_exists && !host_is_dir && source != f;
    if is_single_file_copy {
        posix_join(dest, &relative_to(source, f))
    } else {
        posix_join(dest, f)
    }
}

/// Joins a recipe-relative (POSIX) path onto the host build context root and
/// collapses any `.`/`..` segments, the way a real filesystem would resolve
/// them, without touching the disk.
fn host_join(context_root: &Path, recipe_relative: &str) -> PathBuf {
    context_root.join(recipe_relative.trim_start_matches('/')).clean()
}

fn host_stat(p: &Path) -> (bool, bool) {
    match std::fs::metadata(p) {
        Ok(m) => (true, m.is_dir()),
        Err(_) => (false, false),
    }
}

/// Packs `entries` into a single tar archive rooted at `/`, ready for
/// `put_archive` (spec §4.6 step 2: "upload one tar archive rooted at `/`
/// containing all `toAdd` entries").
fn build_upload_tar(entries: &[UploadEntry]) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    {
        let mut builder = tar::Builder::new(&mut bytes);
        for (host_path, dest) in entries {
            let data = std::fs::read(host_path)
                .map_err(|e| runtime_err(format!("reading `{}` for upload: {e}", host_path.display())))?;
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            let name = dest.trim_start_matches('/');
            if name.is_empty() {
                return Err(internal_inconsistency_err(format!(
                    "upload destination `{dest}` resolved to an empty archive entry name"
                )));
            }
            builder
                .append_data(&mut header, name, std::io::Cursor::new(data))
                .map_err(|e| internal_inconsistency_err(format!("tar append failed: {e}")))?;
        }
        builder
            .finish()
            .map_err(|e| internal_inconsistency_err(format!("tar finish failed: {e}")))?;
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::mock::MockRuntime;
    use crate::events::RecordingSink;
    use crate::recipe::parse_recipe;
    use crate::stage::build_stages;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn seeded_ctx<'a>(
        runtime: &'a MockRuntime,
        container: &'a ContainerId,
        path_cache: &'a PathKindCache,
        stage_containers: &'a BTreeMap<usize, ContainerId>,
        context_root: &'a Path,
        build_arguments: &'a BTreeMap<String, String>,
        cancel_requested: &'a AtomicBool,
        event_sink: &'a dyn EventSink,
    ) -> ExecutorContext<'a> {
        ExecutorContext {
            runtime,
            path_cache,
            stage_idx: 0,
            container,
            stage_containers,
            context_root,
            build_arguments,
            restart_enabled: true,
            skip_container_restart: false,
            cancel_requested,
            event_sink,
        }
    }

    #[tokio::test]
    async fn single_file_copy_uploads_and_restarts_without_running_commands() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.ts"), b"hello").unwrap();

        let runtime = MockRuntime::with_responder(Box::new(|cmd| {
            if cmd.join(" ").contains("test -d") {
                (1, Vec::new())
            } else {
                (0, Vec::new())
            }
        }));
        let container = runtime.start_container_from_image("img", &[]).await.unwrap();
        let stages = build_stages(&parse_recipe("FROM alpine\nCOPY a.ts /b.ts\n").unwrap()).unwrap();

        let path_cache = PathKindCache::new();
        let stage_containers = BTreeMap::new();
        let build_arguments = BTreeMap::new();
        let cancel_requested = AtomicBool::new(false);
        let sink = RecordingSink::new();

        let ctx = seeded_ctx(
            &runtime,
            &container,
            &path_cache,
            &stage_containers,
            dir.path(),
            &build_arguments,
            &cancel_requested,
            &sink,
        );

        let changed = ChangedFiles::new(["a.ts"], Vec::<String>::new());
        execute_action_groups(&ctx, &stages[0].action_groups, &changed).await.unwrap();

        assert_eq!(runtime.started.lock().unwrap().len(), 1);
        assert_eq!(runtime.killed.lock().unwrap().len(), 1);
        assert!(sink.events().iter().any(|e| matches!(e, Event::ContainerRestart { .. })));
        assert!(!sink.events().iter().any(|e| matches!(e, Event::CommandExecute { .. })));

        let uploaded = runtime.get_archive(&container, "/b.ts").await.unwrap();
        let mut archive = tar::Archive::new(std::io::Cursor::new(uploaded));
        let mut found = false;
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            let mut data = Vec::new();
            std::io::Read::read_to_end(&mut entry, &mut data).unwrap();
            assert_eq!(data, b"hello");
            found = true;
        }
        assert!(found);
    }

    #[tokio::test]
    async fn non_zero_exit_halts_remaining_commands_and_groups() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("y"), b"1").unwrap();
        std::fs::write(dir.path().join("z"), b"1").unwrap();

        let runtime = MockRuntime::with_responder(Box::new(|cmd| {
            let joined = cmd.join(" ");
            if joined.contains("test -d") {
                (1, Vec::new())
            } else if joined.contains("cmd1") {
                (1, Vec::new())
            } else {
                (0, Vec::new())
            }
        }));
        let container = runtime.start_container_from_image("img", &[]).await.unwrap();
        let text = "FROM alpine\nWORKDIR /x\nCOPY y .\nRUN cmd1\nCOPY z .\nRUN cmd2\n";
        let stages = build_stages(&parse_recipe(text).unwrap()).unwrap();

        let path_cache = PathKindCache::new();
        let stage_containers = BTreeMap::new();
        let build_arguments = BTreeMap::new();
        let cancel_requested = AtomicBool::new(false);
        let sink = RecordingSink::new();

        let ctx = seeded_ctx(
            &runtime,
            &container,
            &path_cache,
            &stage_containers,
            dir.path(),
            &build_arguments,
            &cancel_requested,
            &sink,
        );

        let changed = ChangedFiles::new(["y".to_string(), "z".to_string()], Vec::<String>::new());
        execute_action_groups(&ctx, &stages[0].action_groups, &changed).await.unwrap();

        let returns: Vec<&str> = sink
            .events()
            .iter()
            .filter_map(|e| match e {
                Event::CommandReturn { command, .. } => Some(command.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(returns, vec!["cmd1"]);
    }

    #[tokio::test]
    async fn intermediate_stage_never_restarts() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.ts"), b"hello").unwrap();

        let runtime = MockRuntime::with_responder(Box::new(|cmd| {
            if cmd.join(" ").contains("test -d") {
                (1, Vec::new())
            } else {
                (0, Vec::new())
            }
        }));
        let container = runtime.start_container_from_image("img", &[]).await.unwrap();
        let stages = build_stages(&parse_recipe("FROM alpine\nCOPY a.ts /b.ts\n").unwrap()).unwrap();

        let path_cache = PathKindCache::new();
        let stage_containers = BTreeMap::new();
        let build_arguments = BTreeMap::new();
        let cancel_requested = AtomicBool::new(false);
        let sink = RecordingSink::new();

        let mut ctx = seeded_ctx(
            &runtime,
            &container,
            &path_cache,
            &stage_containers,
            dir.path(),
            &build_arguments,
            &cancel_requested,
            &sink,
        );
        ctx.restart_enabled = false;

        let changed = ChangedFiles::new(["a.ts"], Vec::<String>::new());
        execute_action_groups(&ctx, &stages[0].action_groups, &changed).await.unwrap();

        assert!(runtime.killed.lock().unwrap().is_empty());
        assert!(!sink.events().iter().any(|e| matches!(e, Event::ContainerRestart { .. })));
    }

    #[tokio::test]
    async fn stopped_container_fails_with_container_not_running() {
        let runtime = MockRuntime::new();
        let container = runtime.start_container_from_image("img", &[]).await.unwrap();
        runtime.set_running(&container, false);
        let stages = build_stages(&parse_recipe("FROM alpine\nCOPY a.ts /b.ts\n").unwrap()).unwrap();

        let path_cache = PathKindCache::new();
        let stage_containers = BTreeMap::new();
        let build_arguments = BTreeMap::new();
        let cancel_requested = AtomicBool::new(false);
        let sink = RecordingSink::new();
        let dir = tempdir().unwrap();

        let ctx = seeded_ctx(
            &runtime,
            &container,
            &path_cache,
            &stage_containers,
            dir.path(),
            &build_arguments,
            &cancel_requested,
            &sink,
        );

        let changed = ChangedFiles::new(["a.ts"], Vec::<String>::new());
        let err = execute_action_groups(&ctx, &stages[0].action_groups, &changed)
            .await
            .unwrap_err();
        assert!(format!("{err:?}").contains("not running") || format!("{err}").contains("not running"));
    }
}
