//! Shared value types used across the parser, stage builder, and graph
//! compiler (spec §3 "Data model" and §3 "Changed files").

use std::collections::BTreeSet;

/// The payload carried by a parsed instruction or directive entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Args {
    /// A single string payload: `WORKDIR /x`, `CMD foo bar`, `#escape=\``,
    /// directive text after the `=`.
    Str(String),
    /// JSON/exec-array form: `CMD ["a", "b"]`.
    List(Vec<String>),
    /// Whitespace/quote tokenized form used by `COPY`, `RUN` (shell form),
    /// and `FROM`.
    Tokens(Vec<String>),
    /// No payload (`LIVECMD_MARKER`).
    None,
}

impl Args {
    /// Renders the args back to a single shell-ish string, the way the
    /// live-recipe rewriter needs to when re-emitting an instruction line.
    pub fn to_shell_string(&self) -> String {
        match self {
            Args::Str(s) => s.clone(),
            Args::List(v) => v.join(" "),
            Args::Tokens(v) => v.join(" "),
            Args::None => String::new(),
        }
    }

    pub fn as_tokens(&self) -> Vec<String> {
        match self {
            Args::Tokens(v) | Args::List(v) => v.clone(),
            Args::Str(s) => tokenize(s),
            Args::None => Vec::new(),
        }
    }
}

/// Splits on unquoted whitespace, honoring double-quoted substrings. Used for
/// `COPY`/`RUN`/`FROM` token lists and for re-tokenizing a directive's raw
/// string payload.
pub fn tokenize(s: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut cur = String::new();
    let mut in_quotes = false;
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' => in_quotes = !in_quotes,
            c if c.is_whitespace() && !in_quotes => {
                if !cur.is_empty() {
                    tokens.push(std::mem::take(&mut cur));
                }
            }
            _ => cur.push(c),
        }
    }
    if !cur.is_empty() {
        tokens.push(cur);
    }
    tokens
}

/// A single parsed entry in the canonical instruction stream (spec §3
/// "Recipe"). `name` is the uppercased instruction name for ordinary
/// Dockerfile instructions (`FROM`, `COPY`, `RUN`, `WORKDIR`, `CMD`) or one
/// of the live-directive pseudo-names (`LIVECMD`, `LIVERUN`, `LIVECOPY`,
/// `LIVEENV`, `LIVECMD_MARKER`, `ESCAPE`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub name: String,
    pub args: Args,
    /// The line on which the instruction *ends* (spec §4.1 step 2).
    pub lineno: usize,
    pub raw: String,
}

impl Entry {
    pub fn new(name: impl Into<String>, args: Args, lineno: usize, raw: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args,
            lineno,
            raw: raw.into(),
        }
    }
}

/// Two unordered sets of context-relative, forward-slash-normalized paths
/// (spec §3 "Changed files").
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangedFiles {
    pub added_or_updated: BTreeSet<String>,
    pub deleted: BTreeSet<String>,
}

impl ChangedFiles {
    pub fn new(
        added_or_updated: impl IntoIterator<Item = impl Into<String>>,
        deleted: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            added_or_updated: added_or_updated
                .into_iter()
                .map(|s| normalize_path(&s.into()))
                .collect(),
            deleted: deleted.into_iter().map(|s| normalize_path(&s.into())).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added_or_updated.is_empty() && self.deleted.is_empty()
    }

    /// The union used by the invalidation engine, which does not care
    /// whether a file was added, updated, or deleted -- only that its path
    /// might invalidate a copy.
    pub fn union_paths(&self) -> BTreeSet<String> {
        self.added_or_updated
            .union(&self.deleted)
            .cloned()
            .collect()
    }
}

/// Normalizes a context-relative path to use forward slashes, per spec §4.2
/// "tie-breaks" and §4.6 "on non-POSIX hosts, convert `f`... to `/`-separated
/// for matching against recipe paths".
pub fn normalize_path(p: &str) -> String {
    p.replace('\\', "/")
}
