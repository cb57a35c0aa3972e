//! # Reportflow
//!
//! Checkpointed, multi-pass generation of business valuation reports.
//!
//! A report is produced by a fixed graph of generation stages (financial
//! extraction, earnings normalization, industry analysis, risk assessment,
//! valuation inputs and narrative synthesis). Every stage output is
//! persisted as soon as it completes, so an interrupted job resumes where it
//! stopped. Stages that read source documents fan out one pass per document
//! and merge the partial results deterministically.
//!
//! The finished narrative then goes through a quality gate that compares
//! every dollar figure, multiple and rate against the calculated values,
//! checks business rules, required sections and formatting, and decides
//! whether the report may be released.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use reportflow::prelude::*;
//!
//! let graph = default_report_pipeline()?;
//! let config = ReportflowConfig::from_path("reportflow.json")?.with_env_overrides()?;
//! let orchestrator = PipelineOrchestrator::builder(graph, generator, store)
//!     .with_config(&config)
//!     .build();
//!
//! let job = orchestrator.submit(documents).await?;
//! let outcome = orchestrator.run(job).await?;
//! let narrative = outcome.output(stages::NARRATIVE_SYNTHESIS).expect("narrative stage ran");
//! let sections = sections_from_output(narrative);
//!
//! let values = CanonicalValueStore::new(snapshot)?;
//! let gate = QualityGate::new(config.gate.clone());
//! gate.evaluate(&values, &sections, &render_sections(&sections)).ensure_releasable()?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod catalog;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod generator;
pub mod observability;
pub mod parsing;
pub mod pipeline;
pub mod quality;
pub mod store;
pub mod testing;
pub mod utils;
pub mod valuation;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::catalog::{default_report_pipeline, default_stages, stages, ProjectionPrompt};
    pub use crate::config::{ConfigError, GeneratorConfig, ReportflowConfig};
    pub use crate::core::{Job, JobId, JobStatus, PipelineEvent, SourceDocument, StageId, StageOutput};
    pub use crate::errors::{
        PassError, PipelineError, PipelineValidationError, QualityGateBlocked, StoreError,
    };
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::generator::{ContentGenerator, GenerationRequest, GenerationResponse, Usage};
    pub use crate::pipeline::{
        FanoutMode, PipelineBuilder, PipelineOrchestrator, RetryPolicy, RunOutcome,
        StageDefinition, StageGraph,
    };
    pub use crate::quality::{
        render_sections, sections_from_output, GateConfig, GateResult, NarrativeSection,
        QualityGate,
    };
    pub use crate::store::{FileStore, InMemoryStore, PipelineStore};
    pub use crate::valuation::{CalculationSnapshot, CanonicalValueStore};
}
