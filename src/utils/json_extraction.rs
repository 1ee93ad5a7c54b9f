//! Pulling a JSON object out of a model reply.
//!
//! Models wrap structured output in prose, markdown fences or reasoning text.
//! Extraction tries, in order:
//! 1. A ```json fenced block
//! 2. Any fenced block containing an object
//! 3. The largest parseable object in the reply, later ones winning ties
//!
//! A reply whose braces never close is reported as truncated so callers can
//! tell a cut-off completion from one that contained no JSON at all.

use regex::Regex;
use serde::de::DeserializeOwned;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum JsonExtractionError {
    #[error("JSON appears truncated ({unclosed} unclosed braces): {preview}...")]
    Truncated { preview: String, unclosed: usize },

    #[error("No JSON object found in reply starting with '{preview}'")]
    NotFound { preview: String },

    #[error("JSON did not match the expected shape: {0}")]
    Shape(String),
}

const JSON_FENCE: &str = r"```json\s*\n?([\s\S]*?)\n?```";
const ANY_FENCE: &str = r"```(?:\w+)?\s*\n?([\s\S]*?)\n?```";

/// Extracts the JSON object carried by `content`.
pub fn extract_json_object(content: &str) -> Result<String, JsonExtractionError> {
    let trimmed = content.trim();

    for pattern in [JSON_FENCE, ANY_FENCE] {
        let Ok(fence) = Regex::new(pattern) else {
            continue;
        };
        if let Some(block) = fence.captures(trimmed).and_then(|c| c.get(1)) {
            if let Some(json) = first_valid_object(block.as_str()) {
                return Ok(json);
            }
        }
    }

    if let Some(json) = largest_valid_object(trimmed) {
        return Ok(json);
    }

    if let Some(start) = trimmed.find('{') {
        let unclosed = unclosed_braces(&trimmed[start..]);
        if unclosed > 0 {
            return Err(JsonExtractionError::Truncated {
                preview: preview(&trimmed[start..], 100),
                unclosed,
            });
        }
    }

    Err(JsonExtractionError::NotFound {
        preview: preview(trimmed, 50),
    })
}

/// Extracts and deserializes the JSON object carried by `content`.
pub fn parse_json_reply<T: DeserializeOwned>(content: &str) -> Result<T, JsonExtractionError> {
    let json = extract_json_object(content)?;
    serde_json::from_str(&json).map_err(|e| JsonExtractionError::Shape(e.to_string()))
}

/// Index of the `}` closing the object that starts at the beginning of `s`.
///
/// Braces inside string literals, including escaped quotes, are ignored.
pub fn find_matching_brace(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, c) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn unclosed_braces(s: &str) -> usize {
    let mut depth: isize = 0;
    let mut in_string = false;
    let mut escape_next = false;

    for c in s.chars() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => depth -= 1,
            _ => {}
        }
    }
    depth.max(0) as usize
}

fn object_at(content: &str, start: usize) -> Option<&str> {
    let substr = &content[start..];
    let end = find_matching_brace(substr)?;
    let candidate = &substr[..=end];
    serde_json::from_str::<serde_json::Value>(candidate)
        .ok()
        .filter(|v| v.is_object())
        .map(|_| candidate)
}

fn first_valid_object(content: &str) -> Option<String> {
    content
        .match_indices('{')
        .find_map(|(start, _)| object_at(content, start))
        .map(str::to_string)
}

fn largest_valid_object(content: &str) -> Option<String> {
    content
        .match_indices('{')
        .filter_map(|(start, _)| object_at(content, start).map(|json| (start, json)))
        .max_by(|(pos_a, a), (pos_b, b)| a.len().cmp(&b.len()).then(pos_a.cmp(pos_b)))
        .map(|(_, json)| json.to_string())
}

fn preview(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_direct_object() {
        let json = extract_json_object(r#"{"summary": "ok"}"#).unwrap();
        assert_eq!(json, r#"{"summary": "ok"}"#);
    }

    #[test]
    fn test_fenced_block_wins_over_prose() {
        let reply = "Here you go {not json}\n```json\n{\"a\": 1}\n```\nthanks";
        assert_eq!(extract_json_object(reply).unwrap(), "{\"a\": 1}");
    }

    #[test]
    fn test_reasoning_before_answer() {
        let reply = r#"Let me think. Maybe {"a": 1}? Final: {"a": 1, "b": {"c": [1, 2]}}"#;
        let json = extract_json_object(reply).unwrap();
        assert!(json.contains("\"c\""));
    }

    #[test]
    fn test_braces_inside_strings() {
        let reply = r#"{"text": "a } tricky { value \" quote"}"#;
        assert_eq!(extract_json_object(reply).unwrap(), reply);
    }

    #[test]
    fn test_truncated_reply() {
        let err = extract_json_object(r#"{"questions": [{"q": "Who"#).unwrap_err();
        assert!(matches!(err, JsonExtractionError::Truncated { unclosed: 2, .. }));
    }

    #[test]
    fn test_not_found() {
        let err = extract_json_object("I cannot help with that.").unwrap_err();
        assert!(matches!(err, JsonExtractionError::NotFound { .. }));
        assert!(err.to_string().contains("I cannot"));
    }

    #[test]
    fn test_parse_json_reply_shape() {
        #[derive(Deserialize)]
        struct Reply {
            summary: String,
        }

        let reply: Reply = parse_json_reply("```json\n{\"summary\": \"done\"}\n```").unwrap();
        assert_eq!(reply.summary, "done");

        let err = parse_json_reply::<Reply>(r#"{"other": 1}"#).err().unwrap();
        assert!(matches!(err, JsonExtractionError::Shape(_)));
    }

    #[test]
    fn test_find_matching_brace() {
        assert_eq!(find_matching_brace("{}"), Some(1));
        assert_eq!(find_matching_brace("{\"a\": {\"b\": 1}} tail"), Some(14));
        assert_eq!(find_matching_brace("{\"a\": 1"), None);
    }
}
