//! Typed lifecycle events emitted while a job runs.

use super::{JobId, StageId};
use serde::{Deserialize, Serialize};

/// A lifecycle event for one job.
///
/// Events are consumed by [`crate::events::EventSink`] implementations for
/// logging, progress reporting and tests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineEvent {
    /// When the event occurred (ISO 8601).
    pub timestamp: String,
    /// The job the event belongs to.
    pub job_id: JobId,
    /// What happened.
    #[serde(flatten)]
    pub kind: EventKind,
}

/// The kinds of pipeline events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EventKind {
    /// A run (fresh, resumed or forced) started.
    #[serde(rename = "job.started")]
    JobStarted {
        /// Execution index the run starts from.
        start_index: usize,
        /// Whether missing dependencies are tolerated.
        forced: bool,
    },
    /// A stage started executing.
    #[serde(rename = "stage.started")]
    StageStarted {
        /// The stage.
        stage_id: StageId,
        /// The stage name.
        stage_name: String,
    },
    /// A pass failed and will be attempted again.
    #[serde(rename = "stage.retrying")]
    StageRetrying {
        /// The stage.
        stage_id: StageId,
        /// Document index for fan-out passes.
        document_index: Option<usize>,
        /// The retry number about to run (1-based).
        attempt: usize,
        /// Backoff before the retry.
        delay_ms: u64,
        /// The error that triggered the retry.
        error: String,
    },
    /// A parsed output did not match its stage's expected shape.
    #[serde(rename = "stage.shape_warning")]
    ShapeWarning {
        /// The stage.
        stage_id: StageId,
        /// Document index for fan-out passes.
        document_index: Option<usize>,
        /// Rendered shape problems.
        problems: Vec<String>,
    },
    /// A dependency was missing and force mode substituted an empty value.
    #[serde(rename = "stage.dependency_defaulted")]
    DependencyDefaulted {
        /// The stage that ran degraded.
        stage_id: StageId,
        /// The missing dependency.
        missing: StageId,
    },
    /// One document of a fan-out stage completed.
    #[serde(rename = "document.completed")]
    DocumentCompleted {
        /// The fan-out stage.
        stage_id: StageId,
        /// Position of the document.
        document_index: usize,
        /// Retries used for this document.
        retry_count: usize,
    },
    /// A stage output was persisted and the checkpoint advanced.
    #[serde(rename = "stage.completed")]
    StageCompleted {
        /// The stage.
        stage_id: StageId,
        /// The stage name.
        stage_name: String,
        /// Wall-clock duration of the stage.
        duration_ms: f64,
        /// Retries used.
        retry_count: usize,
        /// Job progress after the checkpoint.
        progress_percent: f64,
    },
    /// A stage failed after exhausting retries.
    #[serde(rename = "stage.failed")]
    StageFailed {
        /// The stage.
        stage_id: StageId,
        /// The stage name.
        stage_name: String,
        /// The error message.
        error: String,
    },
    /// Every stage completed.
    #[serde(rename = "job.completed")]
    JobCompleted {
        /// Duration of this run.
        duration_ms: f64,
    },
    /// The run stopped on an error.
    #[serde(rename = "job.failed")]
    JobFailed {
        /// The stage the failure is attributed to.
        stage_id: Option<StageId>,
        /// The error message.
        error: String,
    },
}

impl PipelineEvent {
    /// Creates an event stamped with the current time.
    #[must_use]
    pub fn new(job_id: JobId, kind: EventKind) -> Self {
        Self {
            timestamp: crate::utils::iso_timestamp(),
            job_id,
            kind,
        }
    }

    /// Returns the dotted event type (e.g. "stage.started").
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        self.kind.event_type()
    }

    /// Returns the stage the event concerns, if any.
    #[must_use]
    pub fn stage_id(&self) -> Option<StageId> {
        match &self.kind {
            EventKind::StageStarted { stage_id, .. }
            | EventKind::StageRetrying { stage_id, .. }
            | EventKind::ShapeWarning { stage_id, .. }
            | EventKind::DependencyDefaulted { stage_id, .. }
            | EventKind::DocumentCompleted { stage_id, .. }
            | EventKind::StageCompleted { stage_id, .. }
            | EventKind::StageFailed { stage_id, .. } => Some(*stage_id),
            EventKind::JobFailed { stage_id, .. } => *stage_id,
            EventKind::JobStarted { .. } | EventKind::JobCompleted { .. } => None,
        }
    }
}

impl EventKind {
    /// Returns the dotted event type.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::JobStarted { .. } => "job.started",
            Self::StageStarted { .. } => "stage.started",
            Self::StageRetrying { .. } => "stage.retrying",
            Self::ShapeWarning { .. } => "stage.shape_warning",
            Self::DependencyDefaulted { .. } => "stage.dependency_defaulted",
            Self::DocumentCompleted { .. } => "document.completed",
            Self::StageCompleted { .. } => "stage.completed",
            Self::StageFailed { .. } => "stage.failed",
            Self::JobCompleted { .. } => "job.completed",
            Self::JobFailed { .. } => "job.failed",
        }
    }
}
