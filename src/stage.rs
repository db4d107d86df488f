//! Stage and action-group types (spec §3), and the stage builder (spec §4.2)
//! that walks the parsed entry stream into `Vec<Stage>`.

use std::collections::BTreeSet;

use tracing::debug;

use crate::error::{recipe_parse_err, runtime_err, Result};
use crate::pathutil::{posix_join, posix_normalize};
use crate::types::Entry;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalCopy {
    pub source: String,
    pub dest: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageCopy {
    pub source: String,
    pub dest: String,
    pub source_stage: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LocalGroup {
    pub workdir: String,
    pub copies: Vec<LocalCopy>,
    pub commands: Vec<String>,
    pub restart: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageGroup {
    pub workdir: String,
    pub stage_dependency: usize,
    pub copies: Vec<StageCopy>,
    pub commands: Vec<String>,
    pub restart: bool,
}

/// A bundle of copies (all of the same kind) plus the subsequent commands
/// that share its working directory (spec §3 "Action group").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionGroup {
    Local(LocalGroup),
    Stage(StageGroup),
}

impl ActionGroup {
    pub fn workdir(&self) -> &str {
        match self {
            ActionGroup::Local(g) => &g.workdir,
            ActionGroup::Stage(g) => &g.workdir,
        }
    }

    pub fn commands(&self) -> &[String] {
        match self {
            ActionGroup::Local(g) => &g.commands,
            ActionGroup::Stage(g) => &g.commands,
        }
    }

    pub fn restart(&self) -> bool {
        match self {
            ActionGroup::Local(g) => g.restart,
            ActionGroup::Stage(g) => g.restart,
        }
    }

    pub fn set_restart(&mut self, restart: bool) {
        match self {
            ActionGroup::Local(g) => g.restart = restart,
            ActionGroup::Stage(g) => g.restart = restart,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            ActionGroup::Local(g) => g.copies.is_empty() && g.commands.is_empty(),
            ActionGroup::Stage(g) => g.copies.is_empty() && g.commands.is_empty(),
        }
    }

    pub fn as_local(&self) -> Option<&LocalGroup> {
        match self {
            ActionGroup::Local(g) => Some(g),
            _ => None,
        }
    }

    pub fn as_stage(&self) -> Option<&StageGroup> {
        match self {
            ActionGroup::Stage(g) => Some(g),
            _ => None,
        }
    }
}

/// A `FROM`-delimited section of the recipe (spec §3 "Stage").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    pub index: usize,
    pub name: Option<String>,
    pub dependent_on_stages: BTreeSet<usize>,
    pub is_last: bool,
    pub action_groups: Vec<ActionGroup>,
    pub working_dir: String,
}

/// In-progress state for the stage currently being built.
struct Building {
    index: usize,
    name: Option<String>,
    dependent_on_stages: BTreeSet<usize>,
    groups: Vec<ActionGroup>,
    workdir: String,
    ungrouped_commands: Vec<String>,
    last_step_was_copy: bool,
    past_marker: bool,
}

impl Building {
    fn new(index: usize) -> Self {
        let mut groups = Vec::new();
        groups.push(ActionGroup::Local(LocalGroup {
            workdir: "/".to_string(),
            copies: Vec::new(),
            commands: Vec::new(),
            restart: true,
        }));
        Self {
            index,
            name: None,
            dependent_on_stages: BTreeSet::new(),
            groups,
            workdir: "/".to_string(),
            ungrouped_commands: Vec::new(),
            last_step_was_copy: false,
            past_marker: false,
        }
    }

    fn flush_commands_into_tail(&mut self) {
        if self.ungrouped_commands.is_empty() {
            return;
        }
        let commands = std::mem::take(&mut self.ungrouped_commands);
        if let Some(tail) = self.groups.last_mut() {
            match tail {
                ActionGroup::Local(g) => g.commands.extend(commands),
                ActionGroup::Stage(g) => g.commands.extend(commands),
            }
        }
    }

    fn finalize(mut self, is_last: bool) -> Stage {
        self.flush_commands_into_tail();
        let action_groups = self
            .groups
            .into_iter()
            .filter(|g| !g.is_empty())
            .collect();
        Stage {
            index: self.index,
            name: self.name,
            dependent_on_stages: self.dependent_on_stages,
            is_last,
            action_groups,
            working_dir: self.workdir,
        }
    }
}

/// Resolves a `COPY --from=<ref>` reference against already-completed
/// stages: first by `AS` alias, then as a decimal stage index. Per spec §3,
/// an unresolved name is a parse error.
fn resolve_stage_ref(reference: &str, stages: &[Stage], lineno: usize) -> Result<usize> {
    if let Some(stage) = stages.iter().find(|s| s.name.as_deref() == Some(reference)) {
        return Ok(stage.index);
    }
    match reference.parse::<usize>() {
        Ok(idx) if idx < stages.len() => Ok(idx),
        _ => Err(recipe_parse_err(
            lineno,
            format!("COPY --from references unknown stage `{reference}`"),
        )),
    }
}

struct CopyTokens {
    from_ref: Option<String>,
    sources: Vec<String>,
    dest: String,
}

fn parse_copy_tokens(tokens: &[String], lineno: usize) -> Result<CopyTokens> {
    let mut from_ref = None;
    let mut paths = Vec::new();
    for t in tokens {
        if let Some(v) = t.strip_prefix("--from=") {
            from_ref = Some(v.to_string());
        } else if t.starts_with("--") {
            // other flags (--chown=, --chmod=, ...) do not affect the
            // action graph and are intentionally ignored.
        } else {
            paths.push(t.clone());
        }
    }
    if paths.len() < 2 {
        return Err(recipe_parse_err(
            lineno,
            "COPY requires at least one source and a destination",
        ));
    }
    let dest = paths.pop().unwrap();
    Ok(CopyTokens {
        from_ref,
        sources: paths,
        dest,
    })
}

/// Walks the parsed entries into an ordered `Vec<Stage>` (spec §4.2).
#[tracing::instrument(skip_all)]
pub fn build_stages(entries: &[Entry]) -> Result<Vec<Stage>> {
    let mut finished: Vec<Stage> = Vec::new();
    let mut current: Option<Building> = None;

    for entry in entries {
        match entry.name.as_str() {
            "FROM" => {
                if let Some(building) = current.take() {
                    finished.push(building.finalize(false));
                }
                let tokens = entry.args.as_tokens();
                let mut building = Building::new(finished.len());
                if tokens.len() == 3 {
                    building.name = Some(tokens[2].clone());
                }
                current = Some(building);
            }
            "WORKDIR" => {
                let building = current_mut(&mut current, entry.lineno)?;
                building.flush_commands_into_tail();
                let path = posix_normalize(&entry.args.to_shell_string());
                let path = if path.starts_with('/') {
                    path
                } else {
                    posix_join(&building.workdir, &path)
                };
                building.workdir = path.clone();
                building.groups.push(ActionGroup::Local(LocalGroup {
                    workdir: path,
                    copies: Vec::new(),
                    commands: Vec::new(),
                    restart: !building.past_marker,
                }));
                building.last_step_was_copy = false;
            }
            "RUN" => {
                let building = current_mut(&mut current, entry.lineno)?;
                building
                    .ungrouped_commands
                    .push(entry.args.to_shell_string());
                building.last_step_was_copy = false;
            }
            "COPY" => {
                handle_copy(&mut current, &finished, entry)?;
            }
            "LIVECMD_MARKER" => {
                let building = current_mut(&mut current, entry.lineno)?;
                building.past_marker = true;
                debug!(stage = building.index, "restart boundary crossed");
            }
            _ => {
                // LIVECMD, LIVECOPY, LIVEENV, ESCAPE, and ordinary passthrough
                // instructions (ENV, LABEL, EXPOSE, ...) do not affect the
                // action graph; the live-recipe rewriter and stage-copy
                // engine consult the raw entry stream directly for those.
            }
        }
    }

    if let Some(building) = current.take() {
        finished.push(building.finalize(true));
    } else if let Some(last) = finished.last_mut() {
        last.is_last = true;
    }

    Ok(finished)
}

fn current_mut<'a>(current: &'a mut Option<Building>, lineno: usize) -> Result<&'a mut Building> {
    current
        .as_mut()
        .ok_or_else(|| recipe_parse_err(lineno, "instruction appears before any FROM"))
}

fn handle_copy(current: &mut Option<Building>, finished: &[Stage], entry: &Entry) -> Result<()> {
    let building = current_mut(current, entry.lineno)?;
    let tokens = entry.args.as_tokens();
    let parsed = parse_copy_tokens(&tokens, entry.lineno)?;

    let dest = posix_join(&building.workdir, &parsed.dest);

    // spec §7 RuntimeError: "ambiguous COPY (multiple files to non-directory
    // destination)". A directory destination is only knowable for certain at
    // parse time via the trailing-slash convention; the container-side
    // directory check happens later, at resolve time, against a single
    // already-validated destination.
    if parsed.sources.len() > 1 && !parsed.dest.ends_with('/') {
        return Err(runtime_err(format!(
            "ambiguous COPY at line {}: multiple sources ({}) into non-directory destination `{}`",
            entry.lineno,
            parsed.sources.join(", "),
            parsed.dest
        )));
    }

    if let Some(reference) = parsed.from_ref {
        let source_stage = resolve_stage_ref(&reference, finished, entry.lineno)?;
        building.dependent_on_stages.insert(source_stage);
        let copies: Vec<StageCopy> = parsed
            .sources
            .iter()
            .map(|s| StageCopy {
                source: posix_normalize(s),
                dest: dest.clone(),
                source_stage,
            })
            .collect();

        let can_coalesce = building.last_step_was_copy
            && matches!(
                building.groups.last(),
                Some(ActionGroup::Stage(g)) if g.stage_dependency == source_stage
            );
        if can_coalesce {
            if let Some(ActionGroup::Stage(g)) = building.groups.last_mut() {
                g.copies.extend(copies);
            }
        } else {
            building.flush_commands_into_tail();
            building.groups.push(ActionGroup::Stage(StageGroup {
                workdir: building.workdir.clone(),
                stage_dependency: source_stage,
                copies,
                commands: Vec::new(),
                restart: !building.past_marker,
            }));
        }
    } else {
        let copies: Vec<LocalCopy> = parsed
            .sources
            .iter()
            .map(|s| LocalCopy {
                source: posix_normalize(s),
                dest: dest.clone(),
            })
            .collect();

        let can_coalesce =
            building.last_step_was_copy && matches!(building.groups.last(), Some(ActionGroup::Local(_)));
        if can_coalesce {
            if let Some(ActionGroup::Local(g)) = building.groups.last_mut() {
                g.copies.extend(copies);
            }
        } else {
            building.flush_commands_into_tail();
            building.groups.push(ActionGroup::Local(LocalGroup {
                workdir: building.workdir.clone(),
                copies,
                commands: Vec::new(),
                restart: !building.past_marker,
            }));
        }
    }

    building.last_step_was_copy = true;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipe::parse_recipe;
    use pretty_assertions::assert_eq;

    fn stages_for(text: &str) -> Vec<Stage> {
        build_stages(&parse_recipe(text).unwrap()).unwrap()
    }

    #[test]
    fn single_copy_group() {
        let stages = stages_for("FROM alpine\nCOPY a.ts /b.ts\n");
        assert_eq!(stages.len(), 1);
        assert_eq!(stages[0].action_groups.len(), 1);
        let g = stages[0].action_groups[0].as_local().unwrap();
        assert_eq!(g.copies, vec![LocalCopy { source: "a.ts".into(), dest: "/b.ts".into() }]);
        assert!(g.commands.is_empty());
        assert!(g.restart);
    }

    #[test]
    fn workdir_then_two_copy_run_pairs_produce_two_groups() {
        let text = "FROM alpine\nWORKDIR /x\nCOPY y .\nRUN cmd\nCOPY z .\nRUN cmd2\n";
        let stages = stages_for(text);
        assert_eq!(stages[0].action_groups.len(), 2);
        let g0 = stages[0].action_groups[0].as_local().unwrap();
        let g1 = stages[0].action_groups[1].as_local().unwrap();
        assert_eq!(g0.copies[0].source, "y");
        assert_eq!(g0.commands, vec!["cmd".to_string()]);
        assert_eq!(g1.copies[0].source, "z");
        assert_eq!(g1.commands, vec!["cmd2".to_string()]);
    }

    #[test]
    fn consecutive_copies_coalesce() {
        let text = "FROM alpine\nCOPY a /app/a\nCOPY b /app/b\nRUN echo hi\n";
        let stages = stages_for(text);
        assert_eq!(stages[0].action_groups.len(), 1);
        let g = stages[0].action_groups[0].as_local().unwrap();
        assert_eq!(g.copies.len(), 2);
        assert_eq!(g.commands, vec!["echo hi".to_string()]);
    }

    #[test]
    fn copy_after_run_starts_new_group() {
        let text = "FROM alpine\nCOPY a /app/a\nRUN echo hi\nCOPY b /app/b\n";
        let stages = stages_for(text);
        assert_eq!(stages[0].action_groups.len(), 2);
    }

    #[test]
    fn multi_stage_copy_from_tracks_dependency() {
        let text = "\
FROM node:18 AS build
COPY . .
RUN npm run build

FROM nginx
COPY --from=build /app/dist /usr/share/nginx/html
";
        let stages = stages_for(text);
        assert_eq!(stages.len(), 2);
        assert_eq!(stages[1].dependent_on_stages, BTreeSet::from([0]));
        let g = stages[1].action_groups[0].as_stage().unwrap();
        assert_eq!(g.stage_dependency, 0);
        assert!(stages[1].is_last);
        assert!(!stages[0].is_last);
    }

    #[test]
    fn restart_marker_splits_groups() {
        let text = "FROM alpine\nCOPY a /app/a\n#dev-cmd-live=serve\nRUN setup\nCOPY b /app/b\n";
        let stages = stages_for(text);
        assert_eq!(stages[0].action_groups.len(), 2);
        assert!(stages[0].action_groups[0].restart());
        assert!(!stages[0].action_groups[1].restart());
    }

    #[test]
    fn unresolved_stage_reference_is_a_parse_error() {
        let text = "FROM alpine\nCOPY --from=missing /x /y\n";
        assert!(build_stages(&parse_recipe(text).unwrap()).is_err());
    }

    #[test]
    fn multiple_sources_into_non_directory_destination_is_ambiguous() {
        let text = "FROM alpine\nCOPY a b /app/dest\n";
        let err = build_stages(&parse_recipe(text).unwrap()).unwrap_err();
        assert!(format!("{err:?}").contains("ambiguous") || format!("{err}").contains("ambiguous"));
    }

    #[test]
    fn multiple_sources_into_trailing_slash_destination_is_allowed() {
        let stages = stages_for("FROM alpine\nCOPY a b /app/dest/\n");
        let g = stages[0].action_groups[0].as_local().unwrap();
        assert_eq!(g.copies.len(), 2);
    }

    #[test]
    fn multiple_stage_sources_into_non_directory_destination_is_ambiguous() {
        let text = "FROM node AS build\nCOPY . .\n\nFROM nginx\nCOPY --from=build a b /app/dest\n";
        assert!(build_stages(&parse_recipe(text).unwrap()).is_err());
    }

    #[test]
    fn empty_groups_are_elided() {
        let stages = stages_for("FROM alpine\nWORKDIR /x\nWORKDIR /y\n");
        assert!(stages[0].action_groups.is_empty());
    }
}
