//! Action-graph compiler (spec §4.3): per-stage queries over changed files
//! and changed upstream stages, both returning a "suffix from first match".

use crate::error::Result;
use crate::matcher::SourceMatcher;
use crate::stage::{ActionGroup, Stage};

/// Walks `stage`'s local groups in order; the first group with a copy whose
/// `source` matches any of `files` determines the cut point. Returns the
/// suffix `groups[k..]`, or an empty slice if nothing matched.
pub fn groups_for_changed_files<'a>(stage: &'a Stage, files: &[String]) -> Result<&'a [ActionGroup]> {
    for (idx, group) in stage.action_groups.iter().enumerate() {
        let Some(local) = group.as_local() else {
            continue;
        };
        for copy in &local.copies {
            let matcher = SourceMatcher::compile(&copy.source)?;
            if files.iter().any(|f| matcher.matches(f)) {
                return Ok(&stage.action_groups[idx..]);
            }
        }
    }
    Ok(&[])
}

/// Same walk, restricted to stage groups whose `stage_dependency ==
/// source_idx`.
pub fn groups_for_changed_stage(stage: &Stage, source_idx: usize) -> &[ActionGroup] {
    for (idx, group) in stage.action_groups.iter().enumerate() {
        if matches!(group.as_stage(), Some(g) if g.stage_dependency == source_idx) {
            return &stage.action_groups[idx..];
        }
    }
    &[]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipe::parse_recipe;
    use crate::stage::build_stages;
    use pretty_assertions::assert_eq;

    #[test]
    fn first_matching_group_invalidates_the_suffix() {
        let text = "FROM alpine\nWORKDIR /x\nCOPY y .\nRUN cmd\nCOPY z .\nRUN cmd2\n";
        let stages = build_stages(&parse_recipe(text).unwrap()).unwrap();
        let stage = &stages[0];

        let hit_first = groups_for_changed_files(stage, &["y".to_string()]).unwrap();
        assert_eq!(hit_first.len(), 2);

        let hit_second = groups_for_changed_files(stage, &["z".to_string()]).unwrap();
        assert_eq!(hit_second.len(), 1);

        let hit_none = groups_for_changed_files(stage, &["unrelated.txt".to_string()]).unwrap();
        assert!(hit_none.is_empty());
    }

    #[test]
    fn stage_dependency_query_restricts_to_matching_stage_groups() {
        let text = "\
FROM node AS build
COPY . .
RUN npm run build

FROM golang AS build2
COPY --from=build /app/dist /dist

FROM nginx
COPY --from=build2 /dist /usr/share/nginx/html
";
        let stages = build_stages(&parse_recipe(text).unwrap()).unwrap();
        let last = &stages[2];
        assert!(groups_for_changed_stage(last, 0).is_empty());
        assert_eq!(groups_for_changed_stage(last, 1).len(), 1);
    }
}
