//! Single-pass stage execution.

use super::retry::{with_retry_observed, RetryPolicy};
use super::stage::{DependencyOutputs, StageDefinition};
use crate::core::{EventKind, JobId, PipelineEvent, StageOutput};
use crate::errors::{PassError, StageExecutionError};
use crate::events::{EventSink, NoOpEventSink};
use crate::generator::{Attachment, ContentGenerator, GenerationRequest, Usage};
use crate::parsing::{extract_json, normalize_generated, ShapeError};
use crate::utils::now_utc;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// The accepted result of one pass, before it becomes a [`StageOutput`].
#[derive(Debug, Clone)]
pub struct PassResult {
    /// Parsed, migrated data.
    pub data: Value,
    /// Units spent across all attempts.
    pub usage: Usage,
    /// Retries used.
    pub retry_count: usize,
    /// Shape validator findings.
    pub shape_problems: Vec<ShapeError>,
    /// Fingerprint of the request payload.
    pub fingerprint: String,
}

/// Executes one stage (or one document of a fan-out stage) against the
/// content generator.
///
/// Each attempt calls the generator once and parses the text with the
/// tolerant JSON extractor. Transport failures, timeouts and malformed
/// output are retried with backoff; shape problems are logged and kept on
/// the output.
pub struct PassExecutor {
    generator: Arc<dyn ContentGenerator>,
    retry: RetryPolicy,
    events: Arc<dyn EventSink>,
}

impl std::fmt::Debug for PassExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PassExecutor")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl PassExecutor {
    /// Creates an executor.
    #[must_use]
    pub fn new(generator: Arc<dyn ContentGenerator>, retry: RetryPolicy) -> Self {
        Self {
            generator,
            retry,
            events: Arc::new(NoOpEventSink),
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Returns the retry policy.
    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Executes a whole-job stage from its dependency outputs.
    ///
    /// # Errors
    ///
    /// Returns the last error and attempt count once retries are exhausted,
    /// or immediately when the prompt cannot be built.
    pub async fn execute(
        &self,
        job_id: &JobId,
        stage: &StageDefinition,
        inputs: &DependencyOutputs,
    ) -> Result<StageOutput, StageExecutionError> {
        let started = Instant::now();
        let prompt = stage
            .prompt
            .build(inputs)
            .map_err(|e| prompt_failure(stage, e))?;
        let request = build_request(stage, &stage.name, prompt, Vec::new());
        let pass = self.run_pass(job_id, stage, None, request).await?;

        let mut output = StageOutput::new(stage.id, stage.name.clone(), pass.data);
        output.shape_problems = pass.shape_problems;
        output.usage = pass.usage;
        output.retry_count = pass.retry_count;
        output.input_fingerprint = pass.fingerprint;
        output.missing_dependencies = inputs.missing();
        output.duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        output.completed_at = now_utc();
        Ok(output)
    }

    /// Runs one request through retry, parsing, migration and shape checks.
    pub(crate) async fn run_pass(
        &self,
        job_id: &JobId,
        stage: &StageDefinition,
        document_index: Option<usize>,
        request: GenerationRequest,
    ) -> Result<PassResult, StageExecutionError> {
        let fingerprint = request.fingerprint();
        let spent = Mutex::new(Usage::default());
        let key = request.label.clone();

        let outcome = with_retry_observed(
            &self.retry,
            &key,
            |attempt| {
                let generator = Arc::clone(&self.generator);
                let request = request.clone();
                let spent = &spent;
                async move {
                    debug!(label = %request.label, attempt, "Calling content generator");
                    let response = generator.generate(request).await?;
                    spent.lock().accumulate(&response.usage);
                    extract_json(&response.text).map_err(|e| PassError::MalformedOutput {
                        reason: e.reason,
                        preview: e.preview,
                    })
                }
            },
            |notice| {
                warn!(
                    job_id = %job_id,
                    stage_id = %stage.id,
                    document_index = ?document_index,
                    attempt = notice.attempt,
                    delay_ms = u64::try_from(notice.delay.as_millis()).unwrap_or(u64::MAX),
                    error = %notice.error,
                    "Stage pass failed, retrying"
                );
                self.events.try_emit(&PipelineEvent::new(
                    job_id.clone(),
                    EventKind::StageRetrying {
                        stage_id: stage.id,
                        document_index,
                        attempt: notice.attempt,
                        delay_ms: u64::try_from(notice.delay.as_millis()).unwrap_or(u64::MAX),
                        error: notice.error.to_string(),
                    },
                ));
            },
        )
        .await;

        let usage = *spent.lock();
        let retried = outcome.map_err(|exhausted| StageExecutionError {
            stage_id: stage.id,
            stage_name: stage.name.clone(),
            attempts: exhausted.attempts,
            last_error: exhausted.error,
            usage,
        })?;

        let data = normalize_generated(retried.value.value);
        let shape_problems = match stage.shape.validate(&data) {
            Ok(()) => Vec::new(),
            Err(problems) => {
                let rendered: Vec<String> = problems.iter().map(ToString::to_string).collect();
                warn!(
                    job_id = %job_id,
                    stage_id = %stage.id,
                    document_index = ?document_index,
                    problems = ?rendered,
                    "Stage output does not match expected shape"
                );
                self.events
                    .emit(PipelineEvent::new(
                        job_id.clone(),
                        EventKind::ShapeWarning {
                            stage_id: stage.id,
                            document_index,
                            problems: rendered,
                        },
                    ))
                    .await;
                problems
            }
        };

        Ok(PassResult {
            data,
            usage,
            retry_count: retried.retry_count,
            shape_problems,
            fingerprint,
        })
    }
}

/// Builds a generation request for a stage.
pub(crate) fn build_request(
    stage: &StageDefinition,
    label: &str,
    user_prompt: String,
    attachments: Vec<Attachment>,
) -> GenerationRequest {
    GenerationRequest {
        label: label.to_string(),
        system_prompt: stage.system_prompt.clone(),
        user_prompt,
        attachments,
        max_tokens: stage.generation.max_tokens,
        temperature: stage.generation.temperature,
    }
}

pub(crate) fn prompt_failure(stage: &StageDefinition, error: PassError) -> StageExecutionError {
    StageExecutionError {
        stage_id: stage.id,
        stage_name: stage.name.clone(),
        attempts: 0,
        last_error: error,
        usage: Usage::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StageId;
    use crate::events::CollectingEventSink;
    use crate::generator::GenerationResponse;
    use crate::parsing::{FieldKind, ObjectShape};
    use crate::pipeline::{FnPromptBuilder, MAX_RETRIES};
    use crate::testing::ScriptedGenerator;
    use async_trait::async_trait;
    use mockall::mock;
    use mockall::predicate::function;
    use serde_json::json;

    mock! {
        pub Generator {}

        #[async_trait]
        impl ContentGenerator for Generator {
            async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, PassError>;
        }
    }

    fn stage() -> StageDefinition {
        StageDefinition::new(
            StageId(1),
            "extraction",
            Arc::new(FnPromptBuilder::new(|_| "extract the statements".to_string())),
        )
        .with_shape(Arc::new(
            ObjectShape::new().require("periods", FieldKind::NonEmptyArray),
        ))
    }

    #[tokio::test]
    async fn test_execute_parses_fenced_output() {
        let generator = ScriptedGenerator::new();
        generator.reply("extraction", "```json\n{\"periods\": [{\"year\": 2023}]}\n```");
        let executor = PassExecutor::new(Arc::new(generator), RetryPolicy::immediate());

        let output = executor
            .execute(&JobId::from("j"), &stage(), &DependencyOutputs::new())
            .await
            .unwrap();

        // Legacy "year" is migrated to "period" at ingestion.
        assert_eq!(output.data, json!({"periods": [{"period": 2023}]}));
        assert_eq!(output.retry_count, 0);
        assert!(output.is_shape_valid());
        assert_eq!(output.input_fingerprint.len(), 64);
    }

    #[tokio::test]
    async fn test_shape_problems_are_kept_not_fatal() {
        let generator = ScriptedGenerator::new();
        generator.reply("extraction", r#"{"periods": []}"#);
        let sink = Arc::new(CollectingEventSink::new());
        let executor = PassExecutor::new(Arc::new(generator), RetryPolicy::immediate())
            .with_events(sink.clone());

        let output = executor
            .execute(&JobId::from("j"), &stage(), &DependencyOutputs::new())
            .await
            .unwrap();

        assert_eq!(output.shape_problems.len(), 1);
        assert_eq!(sink.events_of_type("stage.shape_warning").len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_output_is_retried_then_fails() {
        let mut generator = MockGenerator::new();
        generator
            .expect_generate()
            .times(MAX_RETRIES + 1)
            .returning(|_| Ok(GenerationResponse::new("not json", Usage::new(10, 5))));
        let sink = Arc::new(CollectingEventSink::new());
        let executor = PassExecutor::new(Arc::new(generator), RetryPolicy::immediate())
            .with_events(sink.clone());

        let err = executor
            .execute(&JobId::from("j"), &stage(), &DependencyOutputs::new())
            .await
            .unwrap_err();

        assert_eq!(err.attempts, MAX_RETRIES + 1);
        assert!(matches!(err.last_error, PassError::MalformedOutput { .. }));
        assert_eq!(err.usage, Usage::new(30, 15));
        assert_eq!(sink.events_of_type("stage.retrying").len(), MAX_RETRIES);
    }

    #[tokio::test]
    async fn test_request_carries_stage_generation_config() {
        let mut generator = MockGenerator::new();
        generator
            .expect_generate()
            .with(function(|r: &GenerationRequest| {
                r.max_tokens == 1234 && r.system_prompt == "be precise" && r.label == "extraction"
            }))
            .times(1)
            .returning(|_| Ok(GenerationResponse::new(r#"{"periods": [1]}"#, Usage::default())));
        let stage = stage()
            .with_generation(crate::pipeline::GenerationConfig::new(1234, 0.0))
            .with_system_prompt("be precise");
        let executor = PassExecutor::new(Arc::new(generator), RetryPolicy::immediate());

        let output = executor
            .execute(&JobId::from("j"), &stage, &DependencyOutputs::new())
            .await;
        tokio_test::assert_ok!(output);
    }

    #[tokio::test]
    async fn test_degraded_inputs_recorded() {
        let generator = ScriptedGenerator::new();
        generator.reply("extraction", r#"{"periods": [1]}"#);
        let executor = PassExecutor::new(Arc::new(generator), RetryPolicy::immediate());
        let mut inputs = DependencyOutputs::new();
        inputs.mark_defaulted(StageId(9));

        let output = executor
            .execute(&JobId::from("j"), &stage(), &inputs)
            .await
            .unwrap();
        assert_eq!(output.missing_dependencies, vec![StageId(9)]);
        assert!(output.is_degraded());
    }
}
