//! Resilient decoder for semi-structured transform-service responses.
//!
//! Model output is "JSON-shaped" at best: wrapped in Markdown fences,
//! prefixed with prose, sprinkled with trailing commas or smart quotes.
//! `decode` sanitizes and parses it, applying light repairs on a first
//! failure before giving up with a positioned diagnostic. All repair
//! heuristics live here so call sites only ever branch on the `Result`.

use crate::error::{LongformError, Result};
use serde_json::Value;

/// Bytes of context included on each side of a failure offset.
const SNIPPET_RADIUS: usize = 40;

/// Decodes raw response text into a JSON value.
///
/// Steps: strip Markdown code fences, slice from the first to the last
/// structural bracket, strict parse; on failure, repair trailing commas and
/// smart quotes and retry once. Never panics.
pub fn decode(raw: &str) -> Result<Value> {
    let stripped = strip_fences(raw);
    let candidate = extract_structural(&stripped).unwrap_or(stripped.as_str());

    match serde_json::from_str(candidate) {
        Ok(value) => Ok(value),
        Err(first_err) => {
            let repaired = normalize_quotes(&remove_trailing_commas(candidate));
            serde_json::from_str(&repaired)
                .map_err(|_| decode_error(candidate, &first_err))
        }
    }
}

/// Removes Markdown code-fence lines (```json … ```), keeping their content.
fn strip_fences(raw: &str) -> String {
    raw.lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Slices the substring between the first and last structural bracket.
fn extract_structural(text: &str) -> Option<&str> {
    let open = text.find(['{', '['])?;
    let close = text.rfind(['}', ']'])?;
    if close < open {
        return None;
    }
    Some(&text[open..=close])
}

/// Removes commas that directly precede a closing bracket.
fn remove_trailing_commas(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;
    for ch in text.chars() {
        if in_string {
            out.push(ch);
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => {
                in_string = true;
                out.push(ch);
            }
            '}' | ']' => {
                // Drop a comma left dangling before this close bracket.
                let trimmed_len = out.trim_end().len();
                if out[..trimmed_len].ends_with(',') {
                    out.truncate(trimmed_len - 1);
                }
                out.push(ch);
            }
            _ => out.push(ch),
        }
    }
    out
}

/// Replaces typographic quotes with their ASCII equivalents.
fn normalize_quotes(text: &str) -> String {
    text.chars()
        .map(|ch| match ch {
            '\u{201C}' | '\u{201D}' => '"',
            '\u{2018}' | '\u{2019}' => '\'',
            other => other,
        })
        .collect()
}

/// Builds the failure descriptor: original message, byte offset, bounded
/// context snippet around that offset.
fn decode_error(candidate: &str, err: &serde_json::Error) -> LongformError {
    let offset = byte_offset(candidate, err.line(), err.column());
    LongformError::Decode {
        message: err.to_string(),
        offset,
        snippet: snippet_around(candidate, offset),
    }
}

/// Converts serde_json's 1-based line/column into a byte offset.
fn byte_offset(text: &str, line: usize, column: usize) -> usize {
    let mut remaining_lines = line.saturating_sub(1);
    let mut offset = 0;
    for (i, ch) in text.char_indices() {
        if remaining_lines == 0 {
            return (i + column.saturating_sub(1)).min(text.len());
        }
        if ch == '\n' {
            remaining_lines -= 1;
            offset = i + 1;
        }
    }
    (offset + column.saturating_sub(1)).min(text.len())
}

/// A char-boundary-safe excerpt around `offset`.
fn snippet_around(text: &str, offset: usize) -> String {
    let mut start = offset.saturating_sub(SNIPPET_RADIUS);
    while start > 0 && !text.is_char_boundary(start) {
        start -= 1;
    }
    let mut end = (offset + SNIPPET_RADIUS).min(text.len());
    while end < text.len() && !text.is_char_boundary(end) {
        end += 1;
    }
    text[start..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_clean_json() {
        let value = decode(r#"{"a": 1, "b": [2, 3]}"#).unwrap();
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn strips_markdown_fences() {
        let raw = "```json\n{\"ok\": true}\n```";
        let value = decode(raw).unwrap();
        assert_eq!(value["ok"], true);
    }

    #[test]
    fn ignores_prose_around_the_payload() {
        let raw = "Here is the refined script you asked for:\n{\"items\": []}\nLet me know!";
        let value = decode(raw).unwrap();
        assert!(value["items"].as_array().unwrap().is_empty());
    }

    #[test]
    fn repairs_trailing_commas() {
        let raw = r#"{"list": [1, 2, 3,], "flag": true,}"#;
        let value = decode(raw).unwrap();
        assert_eq!(value["list"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn repairs_smart_quotes() {
        let raw = "{\u{201C}key\u{201D}: \u{201C}value\u{201D}}";
        let value = decode(raw).unwrap();
        assert_eq!(value["key"], "value");
    }

    #[test]
    fn trailing_comma_inside_string_is_preserved() {
        let raw = r#"{"text": "one, two,"}"#;
        let value = decode(raw).unwrap();
        assert_eq!(value["text"], "one, two,");
    }

    #[test]
    fn failure_carries_offset_and_snippet() {
        let raw = r#"{"a": 1, "b": }"#;
        let err = decode(raw).unwrap_err();
        match err {
            LongformError::Decode {
                message,
                offset,
                snippet,
            } => {
                assert!(!message.is_empty());
                assert!(offset <= raw.len());
                assert!(snippet.contains("\"b\""));
            }
            other => panic!("expected Decode error, got {other:?}"),
        }
    }

    #[test]
    fn unsalvageable_input_fails_without_panicking() {
        assert!(decode("not json at all").is_err());
        assert!(decode("").is_err());
        assert!(decode("}{").is_err());
    }

    #[test]
    fn snippet_respects_multibyte_boundaries() {
        let raw = format!("{}{}", "é".repeat(60), r#"{"a": }"#);
        let err = decode(&raw).unwrap_err();
        // Reaching here without a slice panic is the property under test.
        assert!(matches!(err, LongformError::Decode { .. }));
    }

    #[test]
    fn nested_brackets_survive_extraction() {
        let raw = "prefix {\"outer\": {\"inner\": [1, 2]}} suffix";
        let value = decode(raw).unwrap();
        assert_eq!(value["outer"]["inner"][1], 2);
    }
}
