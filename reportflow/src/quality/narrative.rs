//! Narrative sections produced by the synthesis stage.

use crate::core::StageOutput;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// One titled block of report prose.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NarrativeSection {
    /// Stable section id, e.g. `executive_summary`.
    pub id: String,
    /// Display title.
    #[serde(default)]
    pub title: String,
    /// Section prose.
    #[serde(default)]
    pub text: String,
}

impl NarrativeSection {
    /// Creates a section.
    #[must_use]
    pub fn new(id: impl Into<String>, title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            text: text.into(),
        }
    }

    /// Number of whitespace-separated words.
    #[must_use]
    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }
}

/// Reads the `sections` array of a narrative stage output.
///
/// Entries without an `id` are skipped; a missing title falls back to the id.
#[must_use]
pub fn sections_from_output(output: &StageOutput) -> Vec<NarrativeSection> {
    let Some(entries) = output.data.get("sections").and_then(Value::as_array) else {
        warn!(stage_id = %output.stage_id, "Stage output has no sections array");
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|entry| {
            let id = entry.get("id").and_then(Value::as_str)?;
            let title = entry.get("title").and_then(Value::as_str).unwrap_or(id);
            let text = entry.get("text").and_then(Value::as_str).unwrap_or_default();
            Some(NarrativeSection::new(id, title, text))
        })
        .collect()
}

/// Renders sections as the plain-text report body.
#[must_use]
pub fn render_sections(sections: &[NarrativeSection]) -> String {
    sections
        .iter()
        .map(|s| format!("## {}\n\n{}\n", s.title, s.text.trim_end()))
        .collect::<Vec<_>>()
        .join("\n")
}
