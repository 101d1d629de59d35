//! Pulls the `[{title, url, summary}, ...]` array out of free-form agent text.
//!
//! The agent is asked for a bare JSON array but frequently wraps it in a fenced
//! code block, surrounds it with prose, or leaves quotation marks unescaped
//! inside string values. Extraction strips fences, takes the greedy `[` .. `]`
//! span, and parses it; on failure it runs [`repair_quotes`] once and retries.

use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;
use thiserror::Error;

use crate::core::wire::null_as_default;

static FENCE_OPEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*```(?:json)?\s*").expect("valid regex"));
static FENCE_CLOSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)\s*```\s*").expect("valid regex"));
static ARRAY_SPAN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\[.*\]").expect("valid regex"));

/// Bytes inspected after a quote to decide whether it terminates the string.
const LOOKAHEAD: usize = 20;

/// A result record proposed by the agent, not yet fetched or persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ArticleCandidate {
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub url: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub summary: String,
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("no JSON array found in response")]
    NoArray,
    #[error("parse JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

pub fn extract_candidates(text: &str) -> Result<Vec<ArticleCandidate>, ExtractError> {
    let span = extract_array_span(text)?;
    match serde_json::from_str::<Vec<ArticleCandidate>>(&span) {
        Ok(items) => Ok(items),
        Err(_) => {
            let repaired = repair_quotes(&span);
            Ok(serde_json::from_str(&repaired)?)
        }
    }
}

/// Strips code fences and returns the greedy first-`[` to last-`]` substring.
pub fn extract_array_span(text: &str) -> Result<String, ExtractError> {
    let text = FENCE_OPEN.replace_all(text, "");
    let text = FENCE_CLOSE.replace_all(&text, "");
    ARRAY_SPAN
        .find(text.trim())
        .map(|m| m.as_str().to_string())
        .ok_or(ExtractError::NoArray)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    /// Between tokens. `"` enters `InString`.
    Outside,
    /// Inside a string literal. `\` enters `Escaped`; `"` either closes the
    /// string (when it looks like a terminator) or is escaped in place.
    InString,
    /// The previous byte was a backslash; the current byte is copied verbatim
    /// and scanning resumes in the state held by `in_string`.
    Escaped { in_string: bool },
}

/// Escapes quotation marks that appear inside a string value but do not end it.
///
/// A quote seen while inside a string closes the string only if the next
/// non-whitespace byte within [`LOOKAHEAD`] bytes is `,` `}` `]` `:` or the
/// input ends. Any other quote is rewritten as `\"`. Valid JSON is returned
/// unchanged, so the pass is idempotent.
pub fn repair_quotes(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out: Vec<u8> = Vec::with_capacity(bytes.len() + 8);
    let mut state = ScanState::Outside;

    for (i, &c) in bytes.iter().enumerate() {
        state = match (state, c) {
            (ScanState::Escaped { in_string }, _) => {
                out.push(c);
                if in_string {
                    ScanState::InString
                } else {
                    ScanState::Outside
                }
            }
            (s, b'\\') => {
                out.push(c);
                ScanState::Escaped {
                    in_string: s == ScanState::InString,
                }
            }
            (ScanState::Outside, b'"') => {
                out.push(c);
                ScanState::InString
            }
            (ScanState::InString, b'"') => {
                if closes_string(&bytes[i + 1..]) {
                    out.push(c);
                    ScanState::Outside
                } else {
                    out.extend_from_slice(b"\\\"");
                    ScanState::InString
                }
            }
            (s, _) => {
                out.push(c);
                s
            }
        };
    }

    // Only ASCII bytes were inserted, so the output is still UTF-8.
    String::from_utf8(out).unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
}

fn closes_string(rest: &[u8]) -> bool {
    let window = &rest[..rest.len().min(LOOKAHEAD - 1)];
    match window.iter().find(|b| !matches!(b, b' ' | b'\t' | b'\n' | b'\r')) {
        None => true,
        Some(b) => matches!(b, b',' | b'}' | b']' | b':'),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_array_from_surrounding_prose() {
        let text = "Here are results:\n[{\"title\":\"A\",\"url\":\"http://x\",\"summary\":\"s\"}]\nDone";
        let items = extract_candidates(text).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "A");
        assert_eq!(items[0].url, "http://x");
        assert_eq!(items[0].summary, "s");
    }

    #[test]
    fn null_fields_read_as_empty_strings() {
        let text = r#"[{"title":"A","url":null,"summary":"s"},{"title":"B","url":"http://b","summary":null},{"title":null}]"#;
        let items = extract_candidates(text).unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].url, "");
        assert_eq!(items[0].summary, "s");
        assert_eq!(items[1].url, "http://b");
        assert_eq!(items[1].summary, "");
        assert_eq!(items[2], ArticleCandidate::default());
    }

    #[test]
    fn strips_fenced_code_blocks() {
        let text = "```json\n[{\"title\": \"Test\"}]\n```";
        assert_eq!(extract_array_span(text).unwrap(), r#"[{"title": "Test"}]"#);

        let bare_fence = "Sure!\n```\n[{\"title\": \"Fenced\", \"url\": \"https://a.example\"}]\n```\nEnjoy.";
        let items = extract_candidates(bare_fence).unwrap();
        assert_eq!(items[0].title, "Fenced");
        assert_eq!(items[0].summary, "");
    }

    #[test]
    fn embedded_array_matches_bare_extraction() {
        let bare = r#"[{"title":"One","url":"https://one.example","summary":"first"},{"title":"Two","url":"https://two.example","summary":"second"}]"#;
        let expected = extract_candidates(bare).unwrap();
        for wrapped in [
            format!("Intro text\n{bare}\nOutro"),
            format!("```json\n{bare}\n```"),
            format!("  \n{bare}  "),
        ] {
            assert_eq!(extract_candidates(&wrapped).unwrap(), expected);
        }
    }

    #[test]
    fn missing_array_is_an_error() {
        assert!(matches!(
            extract_candidates("No articles found."),
            Err(ExtractError::NoArray)
        ));
    }

    #[test]
    fn unrepairable_input_reports_parse_error() {
        assert!(matches!(
            extract_candidates("[{\"title\": }]"),
            Err(ExtractError::Parse(_))
        ));
    }

    #[test]
    fn repairs_embedded_quotes() {
        let input = r#"[{"title": "He said "hi" to me"}]"#;
        assert_eq!(repair_quotes(input), r#"[{"title": "He said \"hi\" to me"}]"#);

        let items = extract_candidates(input).unwrap();
        assert_eq!(items[0].title, r#"He said "hi" to me"#);
    }

    #[test]
    fn repairs_quotes_around_non_latin_text() {
        let input = r#"[{"title": "专家称"新政策"将生效", "url": "https://news.example/cn", "summary": "摘要"}]"#;
        let items = extract_candidates(input).unwrap();
        assert_eq!(items[0].title, "专家称\"新政策\"将生效");
        assert_eq!(items[0].url, "https://news.example/cn");
    }

    #[test]
    fn repair_is_idempotent_on_valid_json() {
        let valid = r#"[{"title": "Escaped \"quote\" and \\ slash", "url": "https://x.example", "summary": "a, b"}]"#;
        let once = repair_quotes(valid);
        assert_eq!(once, valid);
        assert_eq!(repair_quotes(&once), once);
    }

    #[test]
    fn closing_quote_followed_by_long_whitespace_still_closes() {
        let input = format!("[\"value\"{}]", " ".repeat(40));
        assert_eq!(repair_quotes(&input), input);
    }
}
