//! Static stage definitions and their inputs.

use super::merge::MergePolicy;
use crate::core::{SourceDocument, StageId, StageOutput};
use crate::errors::PassError;
use crate::parsing::{AcceptAny, ShapeValidator};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

static NULL: Value = Value::Null;

fn default_max_tokens() -> u32 {
    4096
}

fn default_temperature() -> f32 {
    0.2
}

/// Generation limits for one stage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Output budget.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

impl GenerationConfig {
    /// Creates a generation config.
    #[must_use]
    pub fn new(max_tokens: u32, temperature: f32) -> Self {
        Self {
            max_tokens,
            temperature,
        }
    }
}

/// Position of a document within a fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocumentPosition {
    /// Zero-based index in submission order.
    pub index: usize,
    /// Number of documents.
    pub total: usize,
}

/// Completed outputs of a stage's declared dependencies.
#[derive(Debug, Clone, Default)]
pub struct DependencyOutputs {
    outputs: BTreeMap<StageId, Arc<StageOutput>>,
    defaulted: BTreeSet<StageId>,
}

impl DependencyOutputs {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a completed dependency output.
    pub fn insert(&mut self, output: Arc<StageOutput>) {
        self.defaulted.remove(&output.stage_id);
        self.outputs.insert(output.stage_id, output);
    }

    /// Records a dependency that was missing and is treated as empty.
    pub fn mark_defaulted(&mut self, stage_id: StageId) {
        if !self.outputs.contains_key(&stage_id) {
            self.defaulted.insert(stage_id);
        }
    }

    /// Returns the output of a dependency.
    #[must_use]
    pub fn get(&self, stage_id: StageId) -> Option<&StageOutput> {
        self.outputs.get(&stage_id).map(AsRef::as_ref)
    }

    /// Returns a dependency's data, or `null` when it is missing.
    #[must_use]
    pub fn data(&self, stage_id: StageId) -> &Value {
        self.get(stage_id).map_or(&NULL, |o| &o.data)
    }

    /// Returns a top-level field of a dependency's data.
    #[must_use]
    pub fn field(&self, stage_id: StageId, key: &str) -> &Value {
        self.data(stage_id).get(key).unwrap_or(&NULL)
    }

    /// Dependencies substituted with empty data.
    #[must_use]
    pub fn missing(&self) -> Vec<StageId> {
        self.defaulted.iter().copied().collect()
    }

    /// Number of available outputs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    /// Returns true if no outputs are available.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }
}

/// Builds a stage's user prompt from its dependency outputs.
///
/// Implementations must be pure projections: the same inputs always produce
/// the same prompt.
pub trait PromptBuilder: Send + Sync + fmt::Debug {
    /// Builds the prompt for a whole-job stage.
    fn build(&self, inputs: &DependencyOutputs) -> Result<String, PassError>;

    /// Builds the prompt for one document of a fan-out stage.
    fn build_for_document(
        &self,
        inputs: &DependencyOutputs,
        document: &SourceDocument,
        position: DocumentPosition,
    ) -> Result<String, PassError> {
        Ok(format!(
            "Document {} of {}: {}\n\n{}",
            position.index + 1,
            position.total,
            document.name,
            self.build(inputs)?
        ))
    }
}

/// A prompt builder backed by a function.
pub struct FnPromptBuilder<F>
where
    F: Fn(&DependencyOutputs) -> String + Send + Sync,
{
    func: F,
}

impl<F> FnPromptBuilder<F>
where
    F: Fn(&DependencyOutputs) -> String + Send + Sync,
{
    /// Wraps `func`.
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F> fmt::Debug for FnPromptBuilder<F>
where
    F: Fn(&DependencyOutputs) -> String + Send + Sync,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnPromptBuilder").finish_non_exhaustive()
    }
}

impl<F> PromptBuilder for FnPromptBuilder<F>
where
    F: Fn(&DependencyOutputs) -> String + Send + Sync,
{
    fn build(&self, inputs: &DependencyOutputs) -> Result<String, PassError> {
        Ok((self.func)(inputs))
    }
}

/// A statically defined stage.
#[derive(Debug, Clone)]
pub struct StageDefinition {
    /// Stage id.
    pub id: StageId,
    /// Stage name, also the request label.
    pub name: String,
    /// Declared dependencies.
    pub dependencies: BTreeSet<StageId>,
    /// Whether the stage runs once per source document.
    pub requires_documents: bool,
    /// Whether document bytes are attached to per-document requests.
    pub attach_documents: bool,
    /// Generation limits.
    pub generation: GenerationConfig,
    /// System prompt.
    pub system_prompt: String,
    /// User prompt projection.
    pub prompt: Arc<dyn PromptBuilder>,
    /// Output shape validator.
    pub shape: Arc<dyn ShapeValidator>,
    /// How per-document results are merged.
    pub merge: MergePolicy,
}

impl StageDefinition {
    /// Creates a stage with no dependencies.
    #[must_use]
    pub fn new(id: StageId, name: impl Into<String>, prompt: Arc<dyn PromptBuilder>) -> Self {
        Self {
            id,
            name: name.into(),
            dependencies: BTreeSet::new(),
            requires_documents: false,
            attach_documents: false,
            generation: GenerationConfig::default(),
            system_prompt: String::new(),
            prompt,
            shape: Arc::new(AcceptAny),
            merge: MergePolicy::default(),
        }
    }

    /// Adds a dependency.
    #[must_use]
    pub fn with_dependency(mut self, dependency: StageId) -> Self {
        self.dependencies.insert(dependency);
        self
    }

    /// Adds several dependencies.
    #[must_use]
    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<StageId>,
    {
        self.dependencies
            .extend(dependencies.into_iter().map(Into::into));
        self
    }

    /// Runs the stage once per document, merging with `merge`.
    #[must_use]
    pub fn per_document(mut self, merge: MergePolicy) -> Self {
        self.requires_documents = true;
        self.merge = merge;
        self
    }

    /// Attaches document bytes to per-document requests.
    #[must_use]
    pub fn with_attachments(mut self) -> Self {
        self.attach_documents = true;
        self
    }

    /// Sets the generation limits.
    #[must_use]
    pub fn with_generation(mut self, generation: GenerationConfig) -> Self {
        self.generation = generation;
        self
    }

    /// Sets the system prompt.
    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Sets the shape validator.
    #[must_use]
    pub fn with_shape(mut self, shape: Arc<dyn ShapeValidator>) -> Self {
        self.shape = shape;
        self
    }
}
