//! Core domain model types for reportflow.
//!
//! This module contains the fundamental types shared across the pipeline:
//! - Job and stage identifiers
//! - Job state, status and the status surface
//! - Source documents with their extraction metadata
//! - Stage outputs and lifecycle events

mod document;
mod event;
mod ids;
mod job;
mod output;
mod status;

pub use document::{DocumentExtraction, ExtractedTable, ExtractionMethod, SourceDocument};
pub use event::{EventKind, PipelineEvent};
pub use ids::{JobId, StageId};
pub use job::{Job, JobStatusView};
pub use output::StageOutput;
pub use status::JobStatus;
