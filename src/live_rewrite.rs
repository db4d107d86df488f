//! Live-recipe rewriter (spec §4.8): turns the live-directive-annotated
//! recipe into a plain, buildable dev-mode Dockerfile text, suitable for
//! constructing the initial development image. The rewritten text carries
//! no more live-directive pseudo-entries once re-parsed; restart-boundary
//! bookkeeping belongs to the stage model built from the *original* recipe,
//! not to this artifact.

use crate::error::Result;
use crate::recipe::parse_recipe;
use crate::types::Entry;

/// Rewrites `text` into its dev-mode equivalent (spec §4.8). Idempotent:
/// rewriting the output again returns the same text, since no live
/// directives survive the first pass.
pub fn rewrite_live(text: &str) -> Result<String> {
    let entries = parse_recipe(text)?;
    let total_stages = entries.iter().filter(|e| e.name == "FROM").count();

    let mut out_lines: Vec<String> = Vec::new();
    let mut stage_idx: isize = -1;
    let mut has_live_cmd = false;
    let mut cutoff_stage: Option<usize> = None;

    for entry in &entries {
        if entry.name == "FROM" {
            stage_idx += 1;
        }
        if let Some(cutoff) = cutoff_stage {
            if stage_idx >= 0 && stage_idx as usize > cutoff {
                continue;
            }
        }

        match entry.name.as_str() {
            "LIVECMD" => {
                has_live_cmd = true;
                out_lines.push(format!("CMD {}", entry.args.to_shell_string()));
                if total_stages > 0 && stage_idx >= 0 && (stage_idx as usize) < total_stages - 1 {
                    cutoff_stage = Some(stage_idx as usize);
                }
            }
            // The restart-boundary marker is a stage-model concept (built
            // from the original recipe); it has nothing to contribute to a
            // plain dev-mode Dockerfile and is dropped here.
            "LIVECMD_MARKER" => {}
            "LIVERUN" => out_lines.push(format!("RUN {}", entry.args.to_shell_string())),
            "LIVECOPY" => out_lines.push(format!("COPY {}", entry.args.to_shell_string())),
            "LIVEENV" => out_lines.push(format!("ENV {}", entry.args.to_shell_string())),
            "ESCAPE" => out_lines.push(format!("#escape={}", entry.args.to_shell_string())),
            "CMD" if has_live_cmd => {
                // suppressed: the live cmd stands in for it
            }
            _ => out_lines.push(entry.raw.clone()),
        }
    }

    let mut rewritten = out_lines.join("\n");
    rewritten.push('\n');
    Ok(rewritten)
}

/// Re-parses `rewrite_live`'s output and confirms no live-directive
/// pseudo-entries remain, per spec §8's round-trip invariant.
pub fn rewrite_and_reparse(text: &str) -> Result<Vec<Entry>> {
    let rewritten = rewrite_live(text)?;
    parse_recipe(&rewritten)
}
