//! Directive-aware parser (spec §4.1): turns recipe text into the canonical,
//! line-ordered [`Entry`] stream that the stage builder walks.

use tracing::trace;

use super::directive::Directive;
use super::lexer::{scan, LogicalLine};
use crate::error::{recipe_parse_err, unsupported_instruction_err, Result};
use crate::types::{tokenize, Args, Entry};

/// Parses `text` into the canonical instruction stream.
///
/// Live directives (from comments) are merged with ordinary instructions,
/// sorted by the line number they were recognized or ended on, so that the
/// stage builder sees them interleaved exactly as written (spec §4.1 step 4).
#[tracing::instrument(skip_all)]
pub fn parse_recipe(text: &str) -> Result<Vec<Entry>> {
    let (directives, logical_lines) = scan(text)?;

    let mut entries = Vec::with_capacity(directives.len() * 2 + logical_lines.len());
    let mut live_cmd_seen = false;

    for (directive, lineno) in directives {
        match directive {
            Directive::DevCmdLive(cmd) => {
                if live_cmd_seen {
                    return Err(recipe_parse_err(
                        lineno,
                        "duplicate `#dev-cmd-live` directive; only one is allowed per recipe",
                    ));
                }
                live_cmd_seen = true;
                trace!(lineno, "recognized #dev-cmd-live directive");
                entries.push(Entry::new(
                    "LIVECMD",
                    Args::Str(cmd.trim().to_string()),
                    lineno,
                    format!("#dev-cmd-live={cmd}"),
                ));
                entries.push(Entry::new(
                    "LIVECMD_MARKER",
                    Args::None,
                    lineno,
                    "#dev-cmd-live (implicit restart boundary)",
                ));
            }
            Directive::DevRun(args) => {
                trace!(lineno, "recognized #dev-run directive");
                entries.push(Entry::new(
                    "LIVERUN",
                    Args::Str(args.trim().to_string()),
                    lineno,
                    format!("#dev-run={args}"),
                ));
            }
            Directive::DevCopy(args) => {
                trace!(lineno, "recognized #dev-copy directive");
                entries.push(Entry::new(
                    "LIVECOPY",
                    Args::Tokens(tokenize(&args)),
                    lineno,
                    format!("#dev-copy={args}"),
                ));
            }
            Directive::DevEnv(args) => {
                trace!(lineno, "recognized #dev-env directive");
                entries.push(Entry::new(
                    "LIVEENV",
                    Args::Str(args.trim().to_string()),
                    lineno,
                    format!("#dev-env={args}"),
                ));
            }
            Directive::Escape(c) => {
                entries.push(Entry::new(
                    "ESCAPE",
                    Args::Str(c.to_string()),
                    lineno,
                    format!("#escape={c}"),
                ));
            }
            Directive::LivecmdMarker => {
                trace!(lineno, "recognized explicit #livecmd-marker directive");
                entries.push(Entry::new(
                    "LIVECMD_MARKER",
                    Args::None,
                    lineno,
                    "#livecmd-marker",
                ));
            }
        }
    }

    for line in &logical_lines {
        entries.push(lex_instruction(line)?);
    }

    entries.sort_by_key(|e| e.lineno);
    Ok(entries)
}

fn lex_instruction(line: &LogicalLine) -> Result<Entry> {
    let trimmed = line.text.trim_start();
    let (name, rest) = trimmed
        .split_once(char::is_whitespace)
        .unwrap_or((trimmed, ""));
    let name = name.to_uppercase();
    let args_str = rest.trim();

    if name == "ADD" {
        return Err(unsupported_instruction_err("ADD", line.lineno));
    }

    let args = match name.as_str() {
        "FROM" => {
            let tokens = tokenize(args_str);
            validate_from_tokens(&tokens, line.lineno)?;
            Args::Tokens(tokens)
        }
        "COPY" => {
            if args_str.starts_with('[') {
                Args::List(parse_json_array(args_str, line.lineno)?)
            } else {
                Args::Tokens(tokenize(args_str))
            }
        }
        "RUN" => {
            if args_str.starts_with('{') {
                return Err(recipe_parse_err(
                    line.lineno,
                    "object-form RUN is not supported",
                ));
            }
            if args_str.starts_with('[') {
                let tokens = parse_json_array(args_str, line.lineno)?;
                Args::Str(tokens.join(" "))
            } else {
                Args::Str(args_str.to_string())
            }
        }
        "CMD" => {
            if args_str.starts_with('[') {
                Args::List(parse_json_array(args_str, line.lineno)?)
            } else {
                Args::Str(args_str.to_string())
            }
        }
        "WORKDIR" => Args::Str(args_str.to_string()),
        _ => Args::Str(args_str.to_string()),
    };

    Ok(Entry::new(name, args, line.lineno, line.text.clone()))
}

fn validate_from_tokens(tokens: &[String], lineno: usize) -> Result<()> {
    match tokens.len() {
        1 => Ok(()),
        3 if tokens[1].eq_ignore_ascii_case("AS") => Ok(()),
        _ => Err(recipe_parse_err(
            lineno,
            format!(
                "malformed FROM: expected `FROM <name>` or `FROM <name> AS <alias>`, got `{}`",
                tokens.join(" ")
            ),
        )),
    }
}

fn parse_json_array(s: &str, lineno: usize) -> Result<Vec<String>> {
    serde_json::from_str::<Vec<String>>(s)
        .map_err(|e| recipe_parse_err(lineno, format!("malformed exec-form array: {e}")))
}
