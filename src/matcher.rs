//! Copy-source match rule (spec §4.3): does a changed file `f` match a
//! `copy.source` glob/path?

use globset::{Glob, GlobMatcher};

use crate::error::Result;
use crate::pathutil::{is_posix_absolute, is_strict_prefix};

/// Compiles `source` into a matcher usable against context-relative,
/// forward-slash paths.
pub struct SourceMatcher {
    source: String,
    glob: GlobMatcher,
}

impl SourceMatcher {
    pub fn compile(source: &str) -> Result<Self> {
        // a trailing slash marks a directory prefix and has no special glob
        // meaning of its own; strip it before handing to globset.
        let pattern = source.trim_end_matches('/');
        let pattern = if pattern.is_empty() { "." } else { pattern };
        let glob = Glob::new(pattern)
            .map_err(|e| crate::error::invalid_argument_err(format!("bad copy source `{source}`: {e}")))?
            .compile_matcher();
        Ok(Self {
            source: source.to_string(),
            glob,
        })
    }

    /// True iff `f` (a context-relative, `/`-separated path) matches this
    /// copy's `source` under spec §4.3's rule: minimatch OR strict
    /// directory-prefix, with `.` matching any relative path and a
    /// trailing-`/` or absolute source matching only by prefix.
    pub fn matches(&self, f: &str) -> bool {
        if self.source == "." {
            return f != ".";
        }
        if self.source.ends_with('/') || is_posix_absolute(&self.source) {
            return is_strict_prefix(&self.source, f);
        }
        if self.glob.is_match(f) {
            return true;
        }
        is_strict_prefix(&self.source, f)
    }
}

/// True iff `f` matches `source` under spec §4.3's rule. Convenience
/// one-shot wrapper over [`SourceMatcher`] for call sites that don't need to
/// amortize compilation across many files.
pub fn matches(source: &str, f: &str) -> Result<bool> {
    Ok(SourceMatcher::compile(source)?.matches(f))
}
