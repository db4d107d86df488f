//! Pure POSIX path string manipulation for recipe-side path math (spec §4.2
//! tie-breaks, §4.6 "all recipe-side path math is POSIX"). This deliberately
//! does not use `std::path::Path`, which is platform-separator-aware and
//! would be wrong here: an in-container destination path is always POSIX
//! regardless of the host this crate runs on. Host filesystem lookups (an
//! existing concern, not this module's) go through `path-clean` over
//! `std::path::Path` instead, since those really are platform paths.

/// Collapses `.`/`..` segments and repeated slashes, POSIX-style. Does not
/// touch the host filesystem -- this is string surgery only.
pub fn posix_normalize(p: &str) -> String {
    let is_abs = p.starts_with('/');
    let mut out: Vec<&str> = Vec::new();
    for seg in p.split('/') {
        match seg {
            "" | "." => continue,
            ".." => {
                if matches!(out.last(), Some(last) if *last != "..") {
                    out.pop();
                } else if !is_abs {
                    out.push("..");
                }
                // for absolute paths, ".." above the root is simply dropped
            }
            _ => out.push(seg),
        }
    }
    let joined = out.join("/");
    match (is_abs, joined.is_empty()) {
        (true, true) => "/".to_string(),
        (true, false) => format!("/{joined}"),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}

pub fn is_posix_absolute(p: &str) -> bool {
    p.starts_with('/')
}

/// Joins `rel` onto `base` the way a Dockerfile `WORKDIR`-relative
/// destination resolves, then normalizes the result.
pub fn posix_join(base: &str, rel: &str) -> String {
    if is_posix_absolute(rel) {
        return posix_normalize(rel);
    }
    if base.ends_with('/') {
        posix_normalize(&format!("{base}{rel}"))
    } else {
        posix_normalize(&format!("{base}/{rel}"))
    }
}

/// True if `ancestor` is a strict directory-prefix ancestor of `path`, per
/// the `source` directory-prefix matching rule in spec §4.3.
pub fn is_strict_prefix(ancestor: &str, path: &str) -> bool {
    let ancestor = posix_normalize(ancestor);
    let path = posix_normalize(path);
    if ancestor == "." {
        // the root of the build context is a prefix of everything but itself
        return path != ".";
    }
    let prefix = format!("{ancestor}/");
    path.starts_with(&prefix) && path != ancestor
}

pub fn basename(p: &str) -> &str {
    p.rsplit('/').next().unwrap_or(p)
}

/// Path of `path` relative to `base`, assuming `base` is a prefix of `path`
/// (used to rebuild a destination under a directory destination in §4.6.1).
pub fn relative_to(base: &str, path: &str) -> String {
    let base = posix_normalize(base);
    let path = posix_normalize(path);
    if base == "." {
        return path;
    }
    path.strip_prefix(&base)
        .map(|s| s.trim_start_matches('/').to_string())
        .unwrap_or(path)
}
