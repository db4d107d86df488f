//! Recognition of comment-embedded live directives (spec §4.1 step 1,
//! §6 "Live directive surface").

/// A recognized `#<directive>=<args>` comment. Anything else (including
/// plain comments) is dropped during scanning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// `#dev-cmd-live=<cmd>`
    DevCmdLive(String),
    /// `#dev-run=<args>`
    DevRun(String),
    /// `#dev-copy=<args>`
    DevCopy(String),
    /// `#dev-env=<K=V ...>`
    DevEnv(String),
    /// `#escape=<char>`
    Escape(char),
    /// `#livecmd-marker` (args are ignored if present) -- an explicit
    /// restart-boundary marker independent of `dev-cmd-live`.
    LivecmdMarker,
}

/// The set of directive keywords recognized in comment bodies, matched in
/// order against `^\s*<directive>=(.*)$`.
const KEYWORDS: &[&str] = &[
    "dev-cmd-live",
    "dev-run",
    "dev-copy",
    "dev-env",
    "escape",
    "livecmd-marker",
];

/// Tries to classify a comment's body (the text following the leading `#`,
/// not including the `#` itself) as a live directive. Returns `None` for a
/// plain comment.
pub fn classify_comment(body: &str) -> Option<Directive> {
    let trimmed = body.trim_start();
    for kw in KEYWORDS {
        if let Some(rest) = trimmed.strip_prefix(kw) {
            let rest = rest.trim_start();
            let Some(args) = rest.strip_prefix('=') else {
                continue;
            };
            let args = args.to_string();
            return Some(match *kw {
                "dev-cmd-live" => Directive::DevCmdLive(args),
                "dev-run" => Directive::DevRun(args),
                "dev-copy" => Directive::DevCopy(args),
                "dev-env" => Directive::DevEnv(args),
                "escape" => Directive::Escape(args.trim().chars().next().unwrap_or('\\')),
                "livecmd-marker" => Directive::LivecmdMarker,
                _ => unreachable!(),
            });
        }
    }
    None
}
