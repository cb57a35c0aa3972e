//! Tolerant JSON object extraction.

use serde_json::Value;
use thiserror::Error;

const PREVIEW_CHARS: usize = 200;

/// Which strategy produced the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionStrategy {
    /// The whole text parsed.
    Direct,
    /// A fenced code block was stripped first.
    FencedBlock,
    /// The outermost `{...}` span parsed.
    BraceScan,
}

/// An extracted object and how it was found.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedJson {
    /// The parsed object.
    pub value: Value,
    /// The strategy that succeeded.
    pub strategy: ExtractionStrategy,
}

/// No strategy found a JSON object.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{reason}")]
pub struct JsonExtractError {
    /// Why extraction failed.
    pub reason: String,
    /// Leading characters of the text.
    pub preview: String,
}

/// Extracts a JSON object from generator text.
///
/// Tries, in order: a direct parse of the trimmed text; the contents of a
/// leading/trailing fenced block; the span from the first `{` to the last
/// `}`. Only objects are accepted.
pub fn extract_json(text: &str) -> Result<ExtractedJson, JsonExtractError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(failure("empty response", text));
    }

    if let Some(value) = parse_object(trimmed) {
        return Ok(ExtractedJson {
            value,
            strategy: ExtractionStrategy::Direct,
        });
    }

    if let Some(value) = strip_fence(trimmed).and_then(parse_object) {
        return Ok(ExtractedJson {
            value,
            strategy: ExtractionStrategy::FencedBlock,
        });
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            if let Some(value) = parse_object(&trimmed[start..=end]) {
                return Ok(ExtractedJson {
                    value,
                    strategy: ExtractionStrategy::BraceScan,
                });
            }
            return Err(failure("outermost brace span is not valid JSON", text));
        }
    }

    Err(failure("no JSON object found", text))
}

fn parse_object(candidate: &str) -> Option<Value> {
    serde_json::from_str::<Value>(candidate)
        .ok()
        .filter(Value::is_object)
}

fn strip_fence(text: &str) -> Option<&str> {
    let rest = text.strip_prefix("```")?;
    // Drop the info string ("json", "JSON", ...) on the opening line.
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    let body = body.trim_end();
    let body = body.strip_suffix("```").unwrap_or(body);
    Some(body.trim())
}

fn failure(reason: &str, text: &str) -> JsonExtractError {
    JsonExtractError {
        reason: reason.to_string(),
        preview: text.chars().take(PREVIEW_CHARS).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_direct_parse() {
        let extracted = extract_json(r#"  {"a": 1}  "#).unwrap();
        assert_eq!(extracted.value, json!({"a": 1}));
        assert_eq!(extracted.strategy, ExtractionStrategy::Direct);
    }

    #[test]
    fn test_fenced_block() {
        let text = "```json\n{\"periods\": []}\n```";
        let extracted = extract_json(text).unwrap();
        assert_eq!(extracted.value, json!({"periods": []}));
        assert_eq!(extracted.strategy, ExtractionStrategy::FencedBlock);
    }

    #[test]
    fn test_fence_without_language_tag() {
        let text = "```\n{\"x\": true}\n```";
        assert_eq!(extract_json(text).unwrap().value, json!({"x": true}));
    }

    #[test]
    fn test_brace_scan_with_prose() {
        let text = "Here is the analysis:\n{\"risk\": {\"level\": \"low\"}}\nLet me know.";
        let extracted = extract_json(text).unwrap();
        assert_eq!(extracted.value, json!({"risk": {"level": "low"}}));
        assert_eq!(extracted.strategy, ExtractionStrategy::BraceScan);
    }

    #[test]
    fn test_non_object_is_rejected() {
        assert!(extract_json("[1, 2, 3]").is_err());
        assert!(extract_json("42").is_err());
    }

    #[test]
    fn test_garbage_reports_preview() {
        let err = extract_json("I could not produce the data").unwrap_err();
        assert_eq!(err.reason, "no JSON object found");
        assert!(err.preview.starts_with("I could not"));
    }

    #[test]
    fn test_broken_braces() {
        let err = extract_json("prefix {\"a\": } suffix").unwrap_err();
        assert!(err.reason.contains("brace span"));
    }

    #[test]
    fn test_empty() {
        assert!(extract_json("   ").is_err());
    }
}
