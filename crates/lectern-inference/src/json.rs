//! Recovery of structured JSON from free-form model output.
//!
//! Generation engines are asked for JSON but frequently wrap it in markdown
//! fences, prepend reasoning, or add a closing remark. Callers go through
//! [`parse_json_lenient`] so that a reply is only rejected when no JSON object
//! can be found in it at all.

use std::sync::OnceLock;

use regex::Regex;
use serde::de::DeserializeOwned;

use lectern_core::{Error, Result};

fn fence_regex() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| {
        Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)```").expect("fence regex is valid")
    })
}

/// Remove `<think>...</think>` blocks. An unclosed block swallows the rest.
pub fn strip_thinking(response: &str) -> String {
    let mut answer = String::with_capacity(response.len());
    let mut rest = response;
    while let Some(start) = rest.find("<think>") {
        answer.push_str(&rest[..start]);
        let after = &rest[start + "<think>".len()..];
        match after.find("</think>") {
            Some(end) => rest = &after[end + "</think>".len()..],
            None => {
                rest = "";
                break;
            }
        }
    }
    answer.push_str(rest);
    answer.trim().to_string()
}

/// Return the first balanced `{...}` object in `text`, if any.
///
/// Braces inside JSON string literals are ignored.
pub fn extract_first_json_object(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let mut search_from = 0;

    while let Some(offset) = text[search_from..].find('{') {
        let start = search_from + offset;
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;

        for (i, &b) in bytes.iter().enumerate().skip(start) {
            if in_string {
                match b {
                    _ if escaped => escaped = false,
                    b'\\' => escaped = true,
                    b'"' => in_string = false,
                    _ => {}
                }
                continue;
            }
            match b {
                b'"' => in_string = true,
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        let candidate = &text[start..=i];
                        if serde_json::from_str::<serde_json::Value>(candidate).is_ok() {
                            return Some(candidate);
                        }
                        break;
                    }
                }
                _ => {}
            }
        }
        search_from = start + 1;
    }
    None
}

/// Parse `raw` as `T`, falling back to fenced blocks and then to the first
/// embedded JSON object.
pub fn parse_json_lenient<T: DeserializeOwned>(raw: &str) -> Result<T> {
    let cleaned = strip_thinking(raw);

    let direct_err = match serde_json::from_str::<T>(&cleaned) {
        Ok(v) => return Ok(v),
        Err(e) => e,
    };

    if let Some(caps) = fence_regex().captures(&cleaned) {
        if let Ok(v) = serde_json::from_str::<T>(caps[1].trim()) {
            return Ok(v);
        }
    }

    if let Some(object) = extract_first_json_object(&cleaned) {
        return serde_json::from_str::<T>(object).map_err(|e| {
            Error::Serialization(format!("embedded JSON has unexpected shape: {}", e))
        });
    }

    Err(Error::Serialization(format!(
        "no JSON object in model response: {}",
        direct_err
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Summary {
        summary: String,
        keywords: Vec<String>,
    }

    #[test]
    fn test_parse_direct() {
        let s: Summary = parse_json_lenient(r#"{"summary":"s","keywords":["a"]}"#).unwrap();
        assert_eq!(s.summary, "s");
        assert_eq!(s.keywords, vec!["a"]);
    }

    #[test]
    fn test_parse_fenced_block() {
        let raw = "Here you go:\n```json\n{\"summary\": \"x\", \"keywords\": []}\n```\nThanks";
        let s: Summary = parse_json_lenient(raw).unwrap();
        assert_eq!(s.summary, "x");
    }

    #[test]
    fn test_parse_embedded_in_prose() {
        let raw = "Sure! {\"summary\": \"y {nested}\", \"keywords\": [\"k\"]} hope it helps";
        let s: Summary = parse_json_lenient(raw).unwrap();
        assert_eq!(s.summary, "y {nested}");
    }

    #[test]
    fn test_parse_after_thinking_block() {
        let raw = "<think>the user wants {json}</think>{\"summary\":\"z\",\"keywords\":[]}";
        let s: Summary = parse_json_lenient(raw).unwrap();
        assert_eq!(s.summary, "z");
    }

    #[test]
    fn test_parse_failure_is_serialization_error() {
        let err = parse_json_lenient::<Summary>("no structure here").unwrap_err();
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[test]
    fn test_parse_wrong_shape_is_error() {
        let err = parse_json_lenient::<Summary>("text {\"other\": 1} text").unwrap_err();
        assert!(err.to_string().contains("unexpected shape"));
    }

    #[test]
    fn test_extract_skips_unbalanced_prefix() {
        let text = "{ broken then {\"a\": 1}";
        assert_eq!(extract_first_json_object(text), Some("{\"a\": 1}"));
    }

    #[test]
    fn test_extract_none() {
        assert_eq!(extract_first_json_object("plain text"), None);
    }

    #[test]
    fn test_strip_thinking_unclosed() {
        assert_eq!(strip_thinking("answer <think>never ends"), "answer");
        assert_eq!(strip_thinking("no tags"), "no tags");
    }
}
