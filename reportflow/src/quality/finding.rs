//! Validation findings shared by every check.

use crate::valuation::Metric;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How serious a finding is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Blocks release.
    Error,
    /// Lowers the score only.
    Warning,
}

/// The four gate categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckCategory {
    /// Serialization artifacts and numeric consistency.
    DataIntegrity,
    /// Valuation sanity rules.
    BusinessRules,
    /// Required sections and their length.
    Completeness,
    /// Presentation of critical fields.
    Formatting,
}

impl CheckCategory {
    /// Every category, in report order.
    pub const ALL: [Self; 4] = [
        Self::DataIntegrity,
        Self::BusinessRules,
        Self::Completeness,
        Self::Formatting,
    ];

    /// Returns the snake-case key.
    #[must_use]
    pub fn key(self) -> &'static str {
        match self {
            Self::DataIntegrity => "data_integrity",
            Self::BusinessRules => "business_rules",
            Self::Completeness => "completeness",
            Self::Formatting => "formatting",
        }
    }
}

impl fmt::Display for CheckCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Where in the narrative a finding was raised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindingLocation {
    /// Section id.
    pub section_id: String,
    /// Byte offset of the match in the section text.
    pub start: usize,
    /// Byte offset one past the match.
    pub end: usize,
    /// The matched text.
    pub text: String,
}

/// One problem reported by a check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationFinding {
    /// The gate category.
    pub category: CheckCategory,
    /// A stable machine-readable code.
    pub code: String,
    /// Error or warning.
    pub severity: Severity,
    /// A human-readable description.
    pub message: String,
    /// The metric involved, for numeric findings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric: Option<Metric>,
    /// The canonical value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authoritative: Option<f64>,
    /// The value found in the text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub found: Option<f64>,
    /// Where the finding was raised.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<FindingLocation>,
}

impl ValidationFinding {
    /// Creates a finding.
    #[must_use]
    pub fn new(
        category: CheckCategory,
        severity: Severity,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            severity,
            message: message.into(),
            metric: None,
            authoritative: None,
            found: None,
            location: None,
        }
    }

    /// Creates an error finding.
    #[must_use]
    pub fn error(category: CheckCategory, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(category, Severity::Error, code, message)
    }

    /// Creates a warning finding.
    #[must_use]
    pub fn warning(category: CheckCategory, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(category, Severity::Warning, code, message)
    }

    /// Attaches the metric and both values.
    #[must_use]
    pub fn with_values(mut self, metric: Metric, authoritative: f64, found: f64) -> Self {
        self.metric = Some(metric);
        self.authoritative = Some(authoritative);
        self.found = Some(found);
        self
    }

    /// Attaches a location.
    #[must_use]
    pub fn at(mut self, location: FindingLocation) -> Self {
        self.location = Some(location);
        self
    }

    /// Moves the finding to another category with the given severity.
    #[must_use]
    pub fn reclassified(mut self, category: CheckCategory, severity: Severity) -> Self {
        self.category = category;
        self.severity = severity;
        self
    }

    /// True for errors.
    #[must_use]
    pub fn is_blocking(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for ValidationFinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.category, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_category() {
        let finding = ValidationFinding::error(
            CheckCategory::BusinessRules,
            "final_value_nonpositive",
            "Final value must be positive",
        );
        assert!(finding.is_blocking());
        assert_eq!(finding.to_string(), "[business_rules] Final value must be positive");
    }

    #[test]
    fn test_reclassified() {
        let finding = ValidationFinding::error(CheckCategory::Formatting, "x", "y")
            .reclassified(CheckCategory::DataIntegrity, Severity::Warning);
        assert_eq!(finding.category, CheckCategory::DataIntegrity);
        assert!(!finding.is_blocking());
    }
}
