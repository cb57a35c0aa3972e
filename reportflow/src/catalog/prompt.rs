//! Deterministic prompt projections.

use crate::core::{SourceDocument, StageId};
use crate::errors::PassError;
use crate::pipeline::{DependencyOutputs, DocumentPosition, PromptBuilder};
use serde_json::{Map, Value};

fn default_max_document_chars() -> usize {
    20_000
}

#[derive(Debug, Clone)]
struct Projection {
    stage: StageId,
    label: String,
    fields: Vec<String>,
}

/// Builds a prompt from fixed instructions plus selected dependency fields.
///
/// The projected inputs are rendered as pretty JSON with sorted keys, so the
/// same dependency outputs always yield byte-identical prompts. Missing or
/// null fields are left out.
#[derive(Debug, Clone)]
pub struct ProjectionPrompt {
    instructions: String,
    projections: Vec<Projection>,
    max_document_chars: usize,
}

impl ProjectionPrompt {
    /// Creates a prompt with no projected inputs.
    #[must_use]
    pub fn new(instructions: impl Into<String>) -> Self {
        Self {
            instructions: instructions.into(),
            projections: Vec::new(),
            max_document_chars: default_max_document_chars(),
        }
    }

    /// Projects `fields` of `stage`'s output under `label`. An empty field
    /// list projects the whole output.
    #[must_use]
    pub fn project(mut self, stage: StageId, label: impl Into<String>, fields: &[&str]) -> Self {
        self.projections.push(Projection {
            stage,
            label: label.into(),
            fields: fields.iter().map(|f| (*f).to_string()).collect(),
        });
        self
    }

    /// Limits the extracted document text included per document.
    #[must_use]
    pub fn with_max_document_chars(mut self, max_chars: usize) -> Self {
        self.max_document_chars = max_chars;
        self
    }

    fn inputs(&self, inputs: &DependencyOutputs) -> Value {
        let mut root = Map::new();
        for projection in &self.projections {
            let data = inputs.data(projection.stage);
            let projected = if projection.fields.is_empty() {
                data.clone()
            } else {
                let selected: Map<String, Value> = projection
                    .fields
                    .iter()
                    .filter_map(|f| {
                        data.get(f)
                            .filter(|v| !v.is_null())
                            .map(|v| (f.clone(), v.clone()))
                    })
                    .collect();
                Value::Object(selected)
            };
            root.insert(projection.label.clone(), projected);
        }
        Value::Object(root)
    }
}

impl PromptBuilder for ProjectionPrompt {
    fn build(&self, inputs: &DependencyOutputs) -> Result<String, PassError> {
        if self.projections.is_empty() {
            return Ok(self.instructions.clone());
        }
        let rendered = serde_json::to_string_pretty(&self.inputs(inputs))
            .map_err(|e| PassError::Prompt(format!("could not render inputs: {e}")))?;
        Ok(format!("{}\n\nInputs:\n{rendered}", self.instructions))
    }

    fn build_for_document(
        &self,
        inputs: &DependencyOutputs,
        document: &SourceDocument,
        position: DocumentPosition,
    ) -> Result<String, PassError> {
        let mut prompt = format!(
            "Document {} of {}: {}\n\n",
            position.index + 1,
            position.total,
            document.name
        );
        if let Some(extraction) = &document.extraction {
            prompt.push_str("Extracted content:\n");
            prompt.push_str(&extraction.render_for_prompt(self.max_document_chars));
            prompt.push('\n');
        }
        prompt.push_str(&self.build(inputs)?);
        Ok(prompt)
    }
}
