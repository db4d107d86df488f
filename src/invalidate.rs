//! Invalidation engine (spec §4.4): two-phase "files -> groups -> stages ->
//! groups" closure over the stage-dependency DAG, producing the final
//! `{stage -> [ActionGroup]}` map.

use std::collections::BTreeMap;

use tracing::debug;

use crate::error::Result;
use crate::graph::{groups_for_changed_files, groups_for_changed_stage};
use crate::stage::{ActionGroup, Stage};

/// `stages[idx]` must be `stage.index == idx` for the dependency walk below
/// to index correctly; this holds for any `Vec<Stage>` produced by
/// [`crate::stage::build_stages`].
#[tracing::instrument(skip_all, fields(changed_files = files.len()))]
pub fn invalidate<'a>(
    stages: &'a [Stage],
    files: &[String],
) -> Result<BTreeMap<usize, &'a [ActionGroup]>> {
    let mut recorded: BTreeMap<usize, &'a [ActionGroup]> = BTreeMap::new();
    let mut frontier = Vec::new();

    // Phase one: direct per-stage file matches.
    for stage in stages {
        let suffix = groups_for_changed_files(stage, files)?;
        if !suffix.is_empty() {
            debug!(stage = stage.index, groups = suffix.len(), "direct file match");
            recorded.insert(stage.index, suffix);
            frontier.push(stage.index);
        }
    }

    // Phase two: frontier expansion across `dependent_on_stages` edges.
    // Stage dependencies always point to strictly lower indices, so this
    // terminates; "longest suffix wins" makes the order frontier items are
    // processed in irrelevant to the final result.
    while let Some(source_idx) = frontier.pop() {
        for stage in stages {
            if !stage.dependent_on_stages.contains(&source_idx) {
                continue;
            }
            let suffix = groups_for_changed_stage(stage, source_idx);
            if suffix.is_empty() {
                continue;
            }
            let is_longer = recorded
                .get(&stage.index)
                .map(|existing| suffix.len() > existing.len())
                .unwrap_or(true);
            if is_longer {
                debug!(
                    stage = stage.index,
                    via = source_idx,
                    groups = suffix.len(),
                    "stage-dependency invalidation"
                );
                recorded.insert(stage.index, suffix);
                frontier.push(stage.index);
            }
        }
    }

    Ok(recorded)
}
