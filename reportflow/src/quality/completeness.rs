//! Required sections and their minimum length.

use super::finding::{CheckCategory, ValidationFinding};
use super::narrative::NarrativeSection;
use serde::{Deserialize, Serialize};

/// A section the report must contain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredSection {
    /// Section id.
    pub id: String,
    /// Display title used in messages.
    pub title: String,
    /// Minimum word count.
    pub min_words: usize,
}

impl RequiredSection {
    /// Creates a requirement.
    #[must_use]
    pub fn new(id: impl Into<String>, title: impl Into<String>, min_words: usize) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            min_words,
        }
    }
}

/// The sections of a standard valuation report.
#[must_use]
pub fn default_required_sections() -> Vec<RequiredSection> {
    vec![
        RequiredSection::new("executive_summary", "Executive Summary", 40),
        RequiredSection::new("company_overview", "Company Overview", 30),
        RequiredSection::new("financial_analysis", "Financial Analysis", 40),
        RequiredSection::new("valuation_approaches", "Valuation Approaches", 40),
        RequiredSection::new("risk_factors", "Risk Factors", 30),
        RequiredSection::new("valuation_conclusion", "Valuation Conclusion", 20),
    ]
}

/// Reports missing (error) and under-length (warning) sections.
///
/// A section with only whitespace counts as missing.
#[must_use]
pub fn check_completeness(sections: &[NarrativeSection], required: &[RequiredSection]) -> Vec<ValidationFinding> {
    required
        .iter()
        .filter_map(|requirement| {
            let section = sections
                .iter()
                .find(|s| s.id == requirement.id && !s.text.trim().is_empty());
            match section {
                None => Some(ValidationFinding::error(
                    CheckCategory::Completeness,
                    "section_missing",
                    format!("Required section '{}' is missing", requirement.title),
                )),
                Some(section) if section.word_count() < requirement.min_words => {
                    Some(ValidationFinding::warning(
                        CheckCategory::Completeness,
                        "section_too_short",
                        format!(
                            "Section '{}' has {} words, expected at least {}",
                            requirement.title,
                            section.word_count(),
                            requirement.min_words
                        ),
                    ))
                }
                Some(_) => None,
            }
        })
        .collect()
}
