//! Stage-copy engine (spec §4.5): moves a `COPY --from=<stage>` between two
//! containers by downloading, rewriting, and re-uploading a tar archive (or,
//! for a single file, a `cat`+`stat` exec pair).

use std::collections::BTreeMap;
use std::sync::Mutex;

use tar::{Archive, Builder, EntryType, Header};

use crate::error::{internal_inconsistency_err, runtime_err, Result, StackableErr};
use crate::pathutil::basename;
use crate::stage::StageCopy;

use super::runtime::{ContainerId, ContainerRuntime, ExecSpec};

/// Per-container, monotone memoization of `pathIsDirectory` results (spec
/// §9 "Memoization"). Not reset between runs on purpose: once a path has
/// been observed as a directory it stays one for the lifetime of this
/// engine instance, which is acceptable because livepush never turns a
/// directory destination back into a file.
#[derive(Default)]
pub struct PathKindCache {
    is_dir: Mutex<BTreeMap<(ContainerId, String), bool>>,
}

impl PathKindCache {
    pub fn new() -> Self {
        Self::default()
    }

    #[tracing::instrument(skip(self, runtime))]
    pub async fn path_is_directory(
        &self,
        runtime: &dyn ContainerRuntime,
        container: &ContainerId,
        path: &str,
    ) -> Result<bool> {
        let key = (container.clone(), path.to_string());
        if let Some(known) = self.is_dir.lock().unwrap().get(&key).copied() {
            return Ok(known);
        }
        let outcome = runtime
            .exec(
                container,
                ExecSpec {
                    cmd: vec![
                        "/bin/sh".to_string(),
                        "-c".to_string(),
                        format!("test -d {}", shell_quote(path)),
                    ],
                    env: Vec::new(),
                    attach_stdout: true,
                    attach_stderr: true,
                },
            )
            .await
            .stack_err_locationless(|| format!("path_is_directory({container}, {path})"))?;
        let is_dir = outcome.exit_code == 0;
        self.is_dir.lock().unwrap().insert(key, is_dir);
        Ok(is_dir)
    }
}

/// Wraps `s` in single quotes, escaping any embedded single quote, for safe
/// inclusion in a `/bin/sh -c` command line (spec §4.6.2).
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

/// Executes one `StageCopy` between two containers (spec §4.5).
#[tracing::instrument(skip(runtime, cache))]
pub async fn copy_between_containers(
    runtime: &dyn ContainerRuntime,
    cache: &PathKindCache,
    source_container: &ContainerId,
    dest_container: &ContainerId,
    copy: &StageCopy,
) -> Result<()> {
    let source_is_dir = cache
        .path_is_directory(runtime, source_container, &copy.source)
        .await?;

    if source_is_dir {
        copy_directory(runtime, cache, source_container, dest_container, copy).await
    } else {
        copy_file(runtime, source_container, dest_container, copy).await
    }
}

async fn copy_directory(
    runtime: &dyn ContainerRuntime,
    cache: &PathKindCache,
    source_container: &ContainerId,
    dest_container: &ContainerId,
    copy: &StageCopy,
) -> Result<()> {
    let dest_is_dir = copy.dest.ends_with('/')
        || cache
            .path_is_directory(runtime, dest_container, &copy.dest)
            .await?;
    if !dest_is_dir {
        return Err(internal_inconsistency_err(format!(
            "stage-copy of directory `{}` into non-directory destination `{}`",
            copy.source, copy.dest
        )));
    }

    let archive_bytes = runtime
        .get_archive(source_container, &copy.source)
        .stack_err_locationless(|| format!("get_archive({source_container}, {})", copy.source))
        .await?;

    let last_segment = basename(copy.source.trim_end_matches('/'));
    let rewritten = rewrite_archive(&archive_bytes, last_segment, copy.dest.trim_end_matches('/'))?;

    runtime
        .put_archive(dest_container, rewritten, "/")
        .await
        .stack_err_locationless(|| format!("put_archive({dest_container}, /)"))?;
    Ok(())
}

/// Re-packs a downloaded archive (spec §4.5 step 2): keeps only regular
/// files and directories, and rewrites each entry's name by stripping the
/// archive's leading path segment (the source directory's own name) and
/// prepending `dest_prefix`.
fn rewrite_archive(archive_bytes: &[u8], strip_segment: &str, dest_prefix: &str) -> Result<Vec<u8>> {
    let mut archive = Archive::new(std::io::Cursor::new(archive_bytes));
    let mut out = Vec::new();
    {
        let mut builder = Builder::new(&mut out);
        for entry in archive
            .entries()
            .map_err(|e| internal_inconsistency_err(format!("bad archive stream: {e}")))?
        {
            let mut entry = entry.map_err(|e| internal_inconsistency_err(format!("bad archive entry: {e}")))?;
            let entry_type = entry.header().entry_type();
            if !matches!(entry_type, EntryType::Regular | EntryType::Directory) {
                continue;
            }
            let path = entry
                .path()
                .map_err(|e| internal_inconsistency_err(format!("bad archive entry path: {e}")))?
                .to_string_lossy()
                .to_string();

            let rest = if let Some((first, tail)) = path.split_once('/') {
                if first == strip_segment {
                    tail.to_string()
                } else {
                    path.clone()
                }
            } else if path == strip_segment {
                String::new()
            } else {
                path.clone()
            };

            let new_name = if rest.is_empty() {
                dest_prefix.trim_start_matches('/').to_string()
            } else {
                format!("{}/{rest}", dest_prefix.trim_start_matches('/'))
            };
            if new_name.is_empty() {
                continue;
            }

            let mode = entry.header().mode().unwrap_or(0o644);
            let mtime = entry.header().mtime().unwrap_or(0);
            let mut data = Vec::new();
            std::io::Read::read_to_end(&mut entry, &mut data)
                .map_err(|e| internal_inconsistency_err(format!("bad archive entry body: {e}")))?;

            let mut header = Header::new_gnu();
            if entry_type == EntryType::Directory {
                header.set_entry_type(EntryType::Directory);
                header.set_size(0);
            } else {
                header.set_entry_type(EntryType::Regular);
                header.set_size(data.len() as u64);
            }
            header.set_mode(mode);
            header.set_mtime(mtime);
            header.set_cksum();
            builder
                .append_data(&mut header, &new_name, std::io::Cursor::new(data))
                .map_err(|e| internal_inconsistency_err(format!("tar append failed: {e}")))?;
        }
        builder
            .finish()
            .map_err(|e| internal_inconsistency_err(format!("tar finish failed: {e}")))?;
    }
    Ok(out)
}

async fn copy_file(
    runtime: &dyn ContainerRuntime,
    source_container: &ContainerId,
    dest_container: &ContainerId,
    copy: &StageCopy,
) -> Result<()> {
    let cat = runtime
        .exec(
            source_container,
            ExecSpec {
                cmd: vec![
                    "/bin/sh".to_string(),
                    "-c".to_string(),
                    format!("cat {}", shell_quote(&copy.source)),
                ],
                env: Vec::new(),
                attach_stdout: true,
                attach_stderr: true,
            },
        )
        .await
        .stack_err_locationless(|| format!("cat({source_container}, {})", copy.source))?;
    if cat.exit_code != 0 {
        return Err(runtime_err(format!(
            "reading `{}` from {source_container} failed with exit code {}",
            copy.source, cat.exit_code
        )));
    }
    let data: Vec<u8> = cat.chunks.into_iter().flat_map(|c| c.data).collect();

    let stat = runtime
        .exec(
            source_container,
            ExecSpec {
                cmd: vec![
                    "/bin/sh".to_string(),
                    "-c".to_string(),
                    format!("stat -c %a {}", shell_quote(&copy.source)),
                ],
                env: Vec::new(),
                attach_stdout: true,
                attach_stderr: true,
            },
        )
        .await
        .stack_err_locationless(|| format!("stat({source_container}, {})", copy.source))?;
    let mode_str: String = stat.chunks.into_iter().flat_map(|c| c.data).map(|b| b as char).collect();
    let mode = u32::from_str_radix(mode_str.trim(), 8).unwrap_or(0o644);

    if !copy.dest.starts_with('/') {
        return Err(internal_inconsistency_err(format!(
            "stage-copy destination `{}` is not absolute",
            copy.dest
        )));
    }

    let (dir, name) = if copy.dest.ends_with('/') {
        (copy.dest.trim_end_matches('/').to_string(), basename(&copy.source).to_string())
    } else {
        let dir = copy.dest.rsplit_once('/').map(|(d, _)| d).unwrap_or("");
        let dir = if dir.is_empty() { "/" } else { dir };
        (dir.to_string(), basename(&copy.dest).to_string())
    };

    let mut bytes = Vec::new();
    {
        let mut builder = Builder::new(&mut bytes);
        let mut header = Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(mode);
        header.set_cksum();
        builder
            .append_data(&mut header, &name, std::io::Cursor::new(data))
            .map_err(|e| internal_inconsistency_err(format!("tar append failed: {e}")))?;
        builder
            .finish()
            .map_err(|e| internal_inconsistency_err(format!("tar finish failed: {e}")))?;
    }

    runtime
        .put_archive(dest_container, bytes, &dir)
        .await
        .stack_err_locationless(|| format!("put_archive({dest_container}, {dir})"))?;
    Ok(())
}
