//! Line scanning and escape-aware continuation joining (spec §4.1 steps 1-2).

use super::directive::{classify_comment, Directive};
use crate::error::{recipe_parse_err, Result};

pub const DEFAULT_ESCAPE: char = '\\';

/// One physical-line-joined logical line, ready for lexing into an
/// instruction, together with the line number it ends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalLine {
    pub text: String,
    pub lineno: usize,
}

/// What scanning produced for a single source line, before continuation
/// joining.
enum Classified {
    Blank,
    Directive(Directive, usize),
    Content(String),
}

fn classify_line(line: &str) -> Classified {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Classified::Blank;
    }
    if let Some(body) = trimmed.strip_prefix('#') {
        return match classify_comment(body) {
            Some(d) => Classified::Directive(d, 0),
            None => Classified::Blank,
        };
    }
    Classified::Content(line.to_string())
}

/// Scans `text` into directive entries (with line numbers) and logical
/// (continuation-joined) content lines. The escape character starts as
/// `\` and may be updated mid-scan by an `#escape=` directive, which also
/// must have its line preserved in the stripped text per spec §4.1 step 1.
pub fn scan(text: &str) -> Result<(Vec<(Directive, usize)>, Vec<LogicalLine>)> {
    let lines: Vec<&str> = text.lines().collect();
    let mut directives = Vec::new();
    let mut logical_lines = Vec::new();
    let mut escape = DEFAULT_ESCAPE;

    let mut i = 0usize;
    while i < lines.len() {
        let lineno = i + 1;
        match classify_line(lines[i]) {
            Classified::Blank => {
                i += 1;
            }
            Classified::Directive(d, _) => {
                if let Directive::Escape(c) = d {
                    escape = c;
                }
                directives.push((d, lineno));
                i += 1;
            }
            Classified::Content(first) => {
                let mut joined = first;
                let mut end_lineno = lineno;
                while ends_with_escape(&joined, escape) {
                    // strip exactly the trailing escape character
                    joined.pop();
                    i += 1;
                    if i >= lines.len() {
                        return Err(recipe_parse_err(
                            end_lineno,
                            "unterminated line continuation at end of file",
                        ));
                    }
                    end_lineno = i + 1;
                    // the continuation line's leading whitespace is preserved
                    // literally, per spec §4.1 step 2
                    joined.push_str(lines[i]);
                }
                logical_lines.push(LogicalLine {
                    text: joined,
                    lineno: end_lineno,
                });
                i += 1;
            }
        }
    }

    Ok((directives, logical_lines))
}

fn ends_with_escape(line: &str, escape: char) -> bool {
    // trailing whitespace after the escape character does not defeat the
    // continuation in real Dockerfiles, but this spec's surface is simpler:
    // the escape must be the literal last non-newline character.
    line.trim_end_matches(|c: char| c == '\r').ends_with(escape)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_continuations_preserving_leading_whitespace() {
        let text = "RUN apt-get update && \\\n    apt-get install -y curl";
        let (directives, lines) = scan(text).unwrap();
        assert!(directives.is_empty());
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].lineno, 2);
        assert_eq!(lines[0].text, "RUN apt-get update &&     apt-get install -y curl");
    }

    #[test]
    fn unterminated_continuation_is_a_parse_error() {
        let text = "RUN foo \\";
        assert!(scan(text).is_err());
    }

    #[test]
    fn escape_directive_changes_continuation_char_mid_scan() {
        let text = "#escape=`\nRUN foo `\nbar";
        let (directives, lines) = scan(text).unwrap();
        assert_eq!(directives.len(), 1);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].text, "RUN foo bar");
    }

    #[test]
    fn plain_comments_are_dropped_not_directives() {
        let text = "# just a note\nFROM alpine";
        let (directives, lines) = scan(text).unwrap();
        assert!(directives.is_empty());
        assert_eq!(lines.len(), 1);
    }
}
