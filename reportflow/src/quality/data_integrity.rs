//! Serialization artifacts that must never reach a report.

use super::finding::{CheckCategory, ValidationFinding};

/// Literal tokens left behind by broken templating or serialization.
#[must_use]
pub fn default_forbidden_tokens() -> Vec<String> {
    ["[object Object]", "undefined", "NaN", "null", "Infinity", "{{", "}}"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn is_word_char(c: Option<char>) -> bool {
    c.is_some_and(|c| c.is_alphanumeric() || c == '_')
}

/// Counts occurrences of `token`; alphanumeric edges must sit on word
/// boundaries so `null` does not match `nullify`.
fn count_token(text: &str, token: &str) -> usize {
    let first_is_word = token.chars().next().is_some_and(char::is_alphanumeric);
    let last_is_word = token.chars().next_back().is_some_and(char::is_alphanumeric);
    text.match_indices(token)
        .filter(|(start, _)| {
            let before = text[..*start].chars().next_back();
            let after = text[start + token.len()..].chars().next();
            !(first_is_word && is_word_char(before)) && !(last_is_word && is_word_char(after))
        })
        .count()
}

/// Reports each forbidden token present in `raw` as a blocking error.
#[must_use]
pub fn check_forbidden_tokens(raw: &str, tokens: &[String]) -> Vec<ValidationFinding> {
    tokens
        .iter()
        .filter(|token| !token.is_empty())
        .filter_map(|token| {
            let count = count_token(raw, token);
            (count > 0).then(|| {
                ValidationFinding::error(
                    CheckCategory::DataIntegrity,
                    "forbidden_token",
                    format!("Report contains '{token}' {count} time(s)"),
                )
            })
        })
        .collect()
}
