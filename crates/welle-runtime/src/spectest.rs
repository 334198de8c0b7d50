//! Test-expectation harness
//!
//! Programs declare expectations in leading `//` comments:
//!
//! ```text
//! // expect: ok | error | error contains "<str>"
//! // expect: stdout "<str>" | stdout contains "<str>" | stdout file "<path>"
//! ```
//!
//! `expect:` is case-insensitive; strings use standard quoted-string
//! escapes. At most one outcome and one stdout expectation are allowed.
//! Stdout comparison normalizes CRLF to LF on both sides; `stdout file`
//! paths resolve relative to the test file.

use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
#[error("invalid expect directive at line {line}: {message}")]
pub struct DirectiveError {
    pub line: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Ok,
    Error,
    ErrorContains(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum StdoutMatch {
    Exact(String),
    Contains(String),
    File(PathBuf),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expectation {
    pub outcome: Outcome,
    pub stdout: Option<StdoutMatch>,
}

/// Parse the leading comment block of a source file. Returns `None` when it
/// declares no expectations.
pub fn parse_directives(source: &str) -> Result<Option<Expectation>, DirectiveError> {
    let mut outcome: Option<Outcome> = None;
    let mut stdout: Option<StdoutMatch> = None;

    for (index, line) in source.lines().enumerate() {
        let line_no = index + 1;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let Some(comment) = trimmed.strip_prefix("//") else {
            break; // directives only live in the leading comment block
        };
        let comment = comment.trim();
        let lowered = comment.to_lowercase();
        let Some(rest) = lowered.strip_prefix("expect:") else {
            continue;
        };
        // Work on the original casing, offset past "expect:".
        let Some(body) = comment.get(comment.len() - rest.len()..) else {
            continue;
        };
        let body = body.trim();

        if body == "ok" {
            set_outcome(&mut outcome, Outcome::Ok, line_no)?;
        } else if body == "error" {
            set_outcome(&mut outcome, Outcome::Error, line_no)?;
        } else if let Some(tail) = body.strip_prefix("error contains") {
            let text = parse_quoted(tail.trim(), line_no)?;
            set_outcome(&mut outcome, Outcome::ErrorContains(text), line_no)?;
        } else if let Some(tail) = body.strip_prefix("stdout contains") {
            let text = parse_quoted(tail.trim(), line_no)?;
            set_stdout(&mut stdout, StdoutMatch::Contains(text), line_no)?;
        } else if let Some(tail) = body.strip_prefix("stdout file") {
            let text = parse_quoted(tail.trim(), line_no)?;
            set_stdout(&mut stdout, StdoutMatch::File(PathBuf::from(text)), line_no)?;
        } else if let Some(tail) = body.strip_prefix("stdout") {
            let text = parse_quoted(tail.trim(), line_no)?;
            set_stdout(&mut stdout, StdoutMatch::Exact(text), line_no)?;
        } else {
            return Err(DirectiveError {
                line: line_no,
                message: format!("unknown expectation \"{body}\""),
            });
        }
    }

    match (outcome, stdout) {
        (None, None) => Ok(None),
        (outcome, stdout) => Ok(Some(Expectation {
            outcome: outcome.unwrap_or(Outcome::Ok),
            stdout,
        })),
    }
}

fn set_outcome(
    slot: &mut Option<Outcome>,
    value: Outcome,
    line: usize,
) -> Result<(), DirectiveError> {
    if slot.is_some() {
        return Err(DirectiveError {
            line,
            message: "multiple outcome expectations".to_string(),
        });
    }
    *slot = Some(value);
    Ok(())
}

fn set_stdout(
    slot: &mut Option<StdoutMatch>,
    value: StdoutMatch,
    line: usize,
) -> Result<(), DirectiveError> {
    if slot.is_some() {
        return Err(DirectiveError {
            line,
            message: "multiple stdout expectations".to_string(),
        });
    }
    *slot = Some(value);
    Ok(())
}

/// Parse a double-quoted string with `\n \t \r \" \\` escapes; trailing
/// content after the closing quote is rejected.
fn parse_quoted(input: &str, line: usize) -> Result<String, DirectiveError> {
    let error = |message: &str| DirectiveError {
        line,
        message: message.to_string(),
    };
    let mut chars = input.chars();
    if chars.next() != Some('"') {
        return Err(error("expected a quoted string"));
    }
    let mut text = String::new();
    loop {
        match chars.next() {
            None => return Err(error("unterminated string")),
            Some('"') => break,
            Some('\\') => match chars.next() {
                Some('n') => text.push('\n'),
                Some('t') => text.push('\t'),
                Some('r') => text.push('\r'),
                Some('"') => text.push('"'),
                Some('\\') => text.push('\\'),
                _ => return Err(error("unknown escape sequence")),
            },
            Some(c) => text.push(c),
        }
    }
    if chars.next().is_some() {
        return Err(error("unexpected content after closing quote"));
    }
    Ok(text)
}

/// Normalize line endings for comparison.
pub fn normalize_newlines(text: &str) -> String {
    text.replace("\r\n", "\n")
}

/// Check a run against an expectation. `result` is `Ok(())` for a clean run
/// or `Err(message)` for a failed one; `base_dir` anchors `stdout file`
/// paths.
pub fn check(
    expectation: &Expectation,
    result: Result<(), &str>,
    stdout: &str,
    base_dir: &Path,
) -> Result<(), String> {
    match (&expectation.outcome, &result) {
        (Outcome::Ok, Err(message)) => {
            return Err(format!("expected success, got error: {message}"));
        }
        (Outcome::Error | Outcome::ErrorContains(_), Ok(())) => {
            return Err("expected an error, program succeeded".to_string());
        }
        (Outcome::ErrorContains(needle), Err(message)) => {
            if !message.contains(needle.as_str()) {
                return Err(format!(
                    "error does not contain {needle:?}: {message}"
                ));
            }
        }
        _ => {}
    }

    if let Some(matcher) = &expectation.stdout {
        let actual = normalize_newlines(stdout);
        match matcher {
            StdoutMatch::Exact(expected) => {
                let expected = normalize_newlines(expected);
                if actual != expected {
                    return Err(format!(
                        "stdout mismatch: expected {expected:?}, got {actual:?}"
                    ));
                }
            }
            StdoutMatch::Contains(needle) => {
                let needle = normalize_newlines(needle);
                if !actual.contains(&needle) {
                    return Err(format!(
                        "stdout does not contain {needle:?}: got {actual:?}"
                    ));
                }
            }
            StdoutMatch::File(path) => {
                let full = if path.is_absolute() {
                    path.clone()
                } else {
                    base_dir.join(path)
                };
                let expected = std::fs::read_to_string(&full)
                    .map_err(|e| format!("cannot read expected stdout {}: {e}", full.display()))?;
                let expected = normalize_newlines(&expected);
                if actual != expected {
                    return Err(format!(
                        "stdout mismatch against {}: expected {expected:?}, got {actual:?}",
                        full.display()
                    ));
                }
            }
        }
    }
    Ok(())
}
