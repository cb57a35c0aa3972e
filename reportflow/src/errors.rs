//! Error types for the reportflow pipeline.
//!
//! One crate-level enum, [`PipelineError`], wraps the focused error structs
//! raised by graph validation, stage execution, persistence and the quality
//! gate. Structured errors carry an [`ErrorInfo`] with a stable code.

use crate::core::{JobId, StageId};
use crate::generator::Usage;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Stable error codes surfaced through [`ErrorInfo`].
pub mod codes {
    /// A dependency stage output is missing.
    pub const PREREQUISITE_MISSING: &str = "PIPELINE-001-PREREQ";
    /// A stage failed after exhausting retries.
    pub const STAGE_FAILED: &str = "PIPELINE-002-STAGE";
    /// One document of a fan-out stage failed.
    pub const DOCUMENT_FAILED: &str = "PIPELINE-003-DOCUMENT";
    /// A document stage ran with no documents.
    pub const NO_DOCUMENTS: &str = "PIPELINE-004-NO_DOCUMENTS";
    /// A stage's inputs, output or checkpoint could not be persisted or read.
    pub const STAGE_STORE: &str = "PIPELINE-005-STORE";
    /// The stage graph contains a cycle.
    pub const GRAPH_CYCLE: &str = "GRAPH-001-CYCLE";
    /// A stage depends on a stage that is not declared.
    pub const GRAPH_MISSING_DEP: &str = "GRAPH-002-MISSING_DEP";
    /// Two stages share an id.
    pub const GRAPH_DUPLICATE: &str = "GRAPH-003-DUPLICATE";
    /// The stage graph has no stages.
    pub const GRAPH_EMPTY: &str = "GRAPH-004-EMPTY";
    /// The quality gate refused release.
    pub const GATE_BLOCKED: &str = "GATE-001-BLOCKED";
}

/// The main error type for reportflow operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The stage graph definition is invalid.
    #[error("{0}")]
    Validation(#[from] PipelineValidationError),

    /// A stage ran before one of its dependencies completed.
    #[error("{0}")]
    PrerequisiteMissing(#[from] PrerequisiteMissing),

    /// A stage failed after exhausting its retries.
    #[error("{0}")]
    StageExecution(#[from] StageExecutionError),

    /// A single document of a fan-out stage failed.
    #[error("{0}")]
    DocumentStage(#[from] DocumentStageFailure),

    /// A document stage was reached for a job without documents.
    #[error("Job '{job_id}': stage {stage_id} requires source documents but none were submitted")]
    NoDocuments {
        /// The job.
        job_id: JobId,
        /// The stage that needed documents.
        stage_id: StageId,
    },

    /// Reading inputs or persisting the output or checkpoint of a stage failed.
    #[error("Stage {stage_id}: store operation failed: {source}")]
    StageStore {
        /// The stage being executed or checkpointed.
        stage_id: StageId,
        /// The store failure.
        #[source]
        source: StoreError,
    },

    /// The quality gate refused release.
    #[error("{0}")]
    QualityGateBlocked(#[from] QualityGateBlocked),

    /// A persistence operation failed.
    #[error("{0}")]
    Store(#[from] StoreError),

    /// The job does not exist.
    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    /// The stage is not part of the graph.
    #[error("Unknown stage: {0}")]
    UnknownStage(StageId),

    /// Another run of the job is in progress.
    #[error("Job '{0}' is already running")]
    JobAlreadyRunning(JobId),
}

impl PipelineError {
    /// Returns the stable error code, when one is assigned.
    #[must_use]
    pub fn code(&self) -> Option<&'static str> {
        match self {
            Self::Validation(e) => Some(e.code),
            Self::PrerequisiteMissing(_) => Some(codes::PREREQUISITE_MISSING),
            Self::StageExecution(_) => Some(codes::STAGE_FAILED),
            Self::DocumentStage(_) => Some(codes::DOCUMENT_FAILED),
            Self::NoDocuments { .. } => Some(codes::NO_DOCUMENTS),
            Self::StageStore { .. } => Some(codes::STAGE_STORE),
            Self::QualityGateBlocked(_) => Some(codes::GATE_BLOCKED),
            Self::Store(_)
            | Self::JobNotFound(_)
            | Self::UnknownStage(_)
            | Self::JobAlreadyRunning(_) => None,
        }
    }

    /// Returns the stage this error is attributed to, if any.
    #[must_use]
    pub fn failed_stage(&self) -> Option<StageId> {
        match self {
            Self::PrerequisiteMissing(e) => Some(e.stage_id),
            Self::StageExecution(e) => Some(e.stage_id),
            Self::DocumentStage(e) => Some(e.stage_id),
            Self::NoDocuments { stage_id, .. }
            | Self::StageStore { stage_id, .. }
            | Self::UnknownStage(stage_id) => Some(*stage_id),
            _ => None,
        }
    }

    /// Returns structured diagnostics for API and CLI surfaces.
    #[must_use]
    pub fn error_info(&self) -> Option<ErrorInfo> {
        match self {
            Self::Validation(e) => Some(e.error_info()),
            Self::PrerequisiteMissing(e) => Some(e.error_info()),
            Self::StageExecution(e) => Some(e.error_info()),
            Self::DocumentStage(e) => Some(e.error_info()),
            Self::NoDocuments { job_id, stage_id } => Some(
                ErrorInfo::new(codes::NO_DOCUMENTS, "Document stage reached without documents")
                    .with_fix_hint("Submit at least one source document with the job")
                    .with_context_entry("job_id", job_id.as_str())
                    .with_context_entry("stage_id", stage_id.to_string()),
            ),
            Self::StageStore { stage_id, source } => Some(
                ErrorInfo::new(codes::STAGE_STORE, "Stage data could not be persisted")
                    .with_fix_hint("Check the store backend, then resume the job")
                    .with_context_entry("stage_id", stage_id.to_string())
                    .with_context_entry("cause", source.to_string()),
            ),
            Self::QualityGateBlocked(e) => Some(e.error_info()),
            Self::Store(_)
            | Self::JobNotFound(_)
            | Self::UnknownStage(_)
            | Self::JobAlreadyRunning(_) => None,
        }
    }
}

/// Metadata about an error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ErrorInfo {
    /// Error code (e.g., "PIPELINE-001-PREREQ").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ErrorInfo {
    /// Creates a new error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut map = serde_json::Map::new();
        map.insert("code".to_string(), self.code.clone().into());
        map.insert("summary".to_string(), self.summary.clone().into());
        if let Some(ref hint) = self.fix_hint {
            map.insert("fix_hint".to_string(), hint.clone().into());
        }
        if !self.context.is_empty() {
            let context: serde_json::Map<String, serde_json::Value> = self
                .context
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                .collect();
            map.insert("context".to_string(), serde_json::Value::Object(context));
        }
        map
    }
}

/// Error raised when a stage graph definition is invalid.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct PipelineValidationError {
    /// The error message.
    pub message: String,
    /// The stage error code.
    pub code: &'static str,
    /// The stages involved in the error.
    pub stages: Vec<StageId>,
}

impl PipelineValidationError {
    /// Creates a new validation error.
    #[must_use]
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code,
            stages: Vec::new(),
        }
    }

    /// Sets the involved stages.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<StageId>) -> Self {
        self.stages = stages;
        self
    }

    /// Returns structured diagnostics.
    #[must_use]
    pub fn error_info(&self) -> ErrorInfo {
        let stages = self
            .stages
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        ErrorInfo::new(self.code, self.message.clone())
            .with_fix_hint("Review the stage ids and dependency declarations of the graph")
            .with_context_entry("stages", stages)
    }
}

/// A stage's declared dependency has no completed output.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Job '{job_id}': stage {stage_id} requires stage {missing}, which has no completed output")]
pub struct PrerequisiteMissing {
    /// The job being run.
    pub job_id: JobId,
    /// The stage that could not start.
    pub stage_id: StageId,
    /// The dependency without output.
    pub missing: StageId,
}

impl PrerequisiteMissing {
    /// Returns structured diagnostics.
    #[must_use]
    pub fn error_info(&self) -> ErrorInfo {
        ErrorInfo::new(codes::PREREQUISITE_MISSING, "Dependency stage output missing")
            .with_fix_hint("Resume the job so the dependency runs first, or run in force mode")
            .with_context_entry("job_id", self.job_id.as_str())
            .with_context_entry("stage_id", self.stage_id.to_string())
            .with_context_entry("missing_stage", self.missing.to_string())
    }
}

/// A single content-generation pass failed.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PassError {
    /// The generator could not be reached or returned a transport failure.
    #[error("Transport failure: {0}")]
    Transport(String),

    /// The generator did not answer within the per-call timeout.
    #[error("Content generation timed out after {after_ms}ms")]
    Timeout {
        /// Elapsed milliseconds.
        after_ms: u64,
    },

    /// The generator answered with text that holds no structured object.
    #[error("Malformed output: {reason} (preview: {preview:?})")]
    MalformedOutput {
        /// Why parsing failed.
        reason: String,
        /// The first characters of the offending text.
        preview: String,
    },

    /// The stage prompt could not be built from its inputs.
    #[error("Prompt construction failed: {0}")]
    Prompt(String),
}

impl PassError {
    /// Returns true when another attempt may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Prompt(_))
    }
}

/// A stage failed after exhausting its retries.
#[derive(Debug, Clone, Error)]
#[error("Stage {stage_id} ({stage_name}) failed after {attempts} attempt(s): {last_error}")]
pub struct StageExecutionError {
    /// The failing stage.
    pub stage_id: StageId,
    /// The failing stage's name.
    pub stage_name: String,
    /// Attempts made, including the first.
    pub attempts: usize,
    /// The error of the final attempt.
    #[source]
    pub last_error: PassError,
    /// Units spent across all attempts.
    pub usage: Usage,
}

impl StageExecutionError {
    /// Returns structured diagnostics.
    #[must_use]
    pub fn error_info(&self) -> ErrorInfo {
        ErrorInfo::new(codes::STAGE_FAILED, "Stage failed after retries")
            .with_fix_hint("Inspect the last error, then resume the job once the cause is fixed")
            .with_context_entry("stage_id", self.stage_id.to_string())
            .with_context_entry("stage_name", self.stage_name.clone())
            .with_context_entry("attempts", self.attempts.to_string())
    }
}

/// One document of a fan-out stage failed, failing the whole stage.
#[derive(Debug, Clone, Error)]
#[error("Stage {stage_id}: document #{document_index} ({document_id}) failed: {cause}")]
pub struct DocumentStageFailure {
    /// The fan-out stage.
    pub stage_id: StageId,
    /// Position of the failing document in submission order.
    pub document_index: usize,
    /// Identifier of the failing document.
    pub document_id: String,
    /// The per-document failure.
    #[source]
    pub cause: StageExecutionError,
    /// Units spent across every document of the stage.
    pub usage: Usage,
}

impl DocumentStageFailure {
    /// Returns structured diagnostics.
    #[must_use]
    pub fn error_info(&self) -> ErrorInfo {
        ErrorInfo::new(codes::DOCUMENT_FAILED, "Fan-out document failed after retries")
            .with_fix_hint("Check the failing document's content, then resume the job")
            .with_context_entry("stage_id", self.stage_id.to_string())
            .with_context_entry("document_index", self.document_index.to_string())
            .with_context_entry("document_id", self.document_id.clone())
    }
}

/// The quality gate refused to release an artifact.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("Quality gate blocked release (score {score:.1}) with {} blocking error(s):\n{}", .errors.len(), numbered(.errors))]
pub struct QualityGateBlocked {
    /// Blocking error messages in report order.
    pub errors: Vec<String>,
    /// The overall gate score.
    pub score: f64,
}

impl QualityGateBlocked {
    /// Returns structured diagnostics.
    #[must_use]
    pub fn error_info(&self) -> ErrorInfo {
        ErrorInfo::new(codes::GATE_BLOCKED, "Quality gate blocked release")
            .with_fix_hint("Resolve every blocking error and evaluate the gate again")
            .with_context_entry("blocking_errors", self.errors.len().to_string())
            .with_context_entry("score", format!("{:.1}", self.score))
    }
}

fn numbered(errors: &[String]) -> String {
    errors
        .iter()
        .enumerate()
        .map(|(i, e)| format!("  {}. {e}", i + 1))
        .collect::<Vec<_>>()
        .join("\n")
}

/// A persistence operation failed.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem failure.
    #[error("Store IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A persisted record could not be encoded or decoded.
    #[error("Store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The backend rejected the operation.
    #[error("Store backend error: {0}")]
    Backend(String),
}
