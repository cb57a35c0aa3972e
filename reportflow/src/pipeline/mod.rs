//! Stage graph definition and checkpointed execution.
//!
//! This module provides:
//! - Stage definitions and the validated [`StageGraph`]
//! - [`PassExecutor`], which runs one generation pass with retries
//! - [`DocumentFanoutMerger`], which runs a stage per document and merges
//! - [`PipelineOrchestrator`], which drives a job stage by stage

mod builder;
mod executor;
mod fanout;
mod graph;
mod merge;
mod orchestrator;
mod retry;
mod stage;

#[cfg(test)]
mod integration_tests;

pub use builder::PipelineBuilder;
pub use executor::{PassExecutor, PassResult};
pub use fanout::{DocumentFanoutMerger, FanoutMode};
pub use graph::StageGraph;
pub use merge::{
    numeric_value, period_key, FinancialSummarizer, MergePolicy, PeriodAverageSummarizer,
    PeriodicField, Summarizer,
};
pub use orchestrator::{
    OrchestratorBuilder, PipelineOrchestrator, RunFailure, RunOutcome, StageOutputs,
};
pub use retry::{
    should_retry, with_retry, with_retry_observed, BackoffStrategy, JitterStrategy, Retried,
    RetryDecision, RetryExhausted, RetryNotice, RetryPolicy, RetryState, Retryable, MAX_RETRIES,
};
pub use stage::{
    DependencyOutputs, DocumentPosition, FnPromptBuilder, GenerationConfig, PromptBuilder,
    StageDefinition,
};
