//! Presentation checks on the rendered report.

use super::finding::{CheckCategory, ValidationFinding};
use regex::Regex;
use std::sync::LazyLock;

static RAW_AMOUNT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\d{5,}\b").expect("raw amount pattern is valid"));

static NOT_AVAILABLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bn/?a\b").expect("n/a pattern is valid"));

/// Characters after a field label that are treated as its value.
const FIELD_VALUE_CHARS: usize = 80;

/// Labels whose values must always be present.
#[must_use]
pub fn default_critical_fields() -> Vec<String> {
    ["fair market value", "concluded value", "final value", "value range", "valuation date"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Flags `N/A` next to a critical field label (error) and dollar amounts
/// written without thousands separators (warning).
#[must_use]
pub fn check_formatting(raw: &str, critical_fields: &[String]) -> Vec<ValidationFinding> {
    let mut findings = Vec::new();

    for line in raw.lines() {
        let lower = line.to_ascii_lowercase();
        for field in critical_fields {
            let needle = field.to_ascii_lowercase();
            let flagged = lower.match_indices(needle.as_str()).any(|(start, _)| {
                let value: String = lower[start + needle.len()..]
                    .chars()
                    .take(FIELD_VALUE_CHARS)
                    .collect();
                NOT_AVAILABLE.is_match(&value)
            });
            if flagged {
                findings.push(ValidationFinding::error(
                    CheckCategory::Formatting,
                    "na_in_critical_field",
                    format!("Critical field '{field}' is reported as N/A"),
                ));
            }
        }
    }

    let unformatted: Vec<&str> = RAW_AMOUNT.find_iter(raw).map(|m| m.as_str()).collect();
    if !unformatted.is_empty() {
        findings.push(ValidationFinding::warning(
            CheckCategory::Formatting,
            "unformatted_amount",
            format!(
                "{} amount(s) lack thousands separators: {}",
                unformatted.len(),
                unformatted.join(", ")
            ),
        ));
    }

    findings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_na_in_critical_field_is_blocking() {
        let raw = "Fair Market Value: N/A\nRevenue: N/A\nValuation date: NA";
        let findings = check_formatting(raw, &default_critical_fields());
        assert_eq!(findings.len(), 2);
        assert!(findings.iter().all(ValidationFinding::is_blocking));
    }

    #[test]
    fn test_na_on_another_line_is_ignored() {
        let raw = "Fair market value: $1,234,567\nComparable data: N/A";
        assert!(check_formatting(raw, &default_critical_fields()).is_empty());
    }

    #[test]
    fn test_unformatted_amounts_warn() {
        let findings = check_formatting("Paid $1234567 and $12,500.", &default_critical_fields());
        assert_eq!(findings.len(), 1);
        assert!(!findings[0].is_blocking());
        assert!(findings[0].message.contains("$1234567"));
    }
}
