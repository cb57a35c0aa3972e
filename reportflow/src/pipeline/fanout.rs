//! Per-document fan-out and merge.

use super::executor::{build_request, prompt_failure, PassExecutor, PassResult};
use super::stage::{DependencyOutputs, DocumentPosition, StageDefinition};
use crate::core::{EventKind, JobId, PipelineEvent, SourceDocument, StageOutput};
use crate::errors::{DocumentStageFailure, StageExecutionError};
use crate::events::{EventSink, NoOpEventSink};
use crate::generator::Usage;
use crate::utils::{now_utc, Fingerprinter};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// How per-document passes are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum FanoutMode {
    /// One document at a time, stopping at the first failure.
    Sequential,
    /// Up to `limit` documents in flight; every pass runs to completion.
    Concurrent {
        /// Maximum passes in flight.
        limit: usize,
    },
}

impl Default for FanoutMode {
    fn default() -> Self {
        Self::Concurrent { limit: 4 }
    }
}

/// Runs a stage once per source document and merges the partial results.
pub struct DocumentFanoutMerger {
    executor: Arc<PassExecutor>,
    mode: FanoutMode,
    events: Arc<dyn EventSink>,
}

impl std::fmt::Debug for DocumentFanoutMerger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentFanoutMerger")
            .field("executor", &self.executor)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

impl DocumentFanoutMerger {
    /// Creates a merger over an executor.
    #[must_use]
    pub fn new(executor: Arc<PassExecutor>, mode: FanoutMode) -> Self {
        Self {
            executor,
            mode,
            events: Arc::new(NoOpEventSink),
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Returns the scheduling mode.
    #[must_use]
    pub fn mode(&self) -> FanoutMode {
        self.mode
    }

    /// Executes `stage` for every document and merges the results.
    ///
    /// Each document gets its own prompt variant that also sees the merged
    /// outputs of earlier stages. The merge waits for every pass; if any
    /// document fails after retries the stage fails, naming the lowest
    /// failing document index.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStageFailure`] for the failing document.
    pub async fn execute_per_document(
        &self,
        job_id: &JobId,
        stage: &StageDefinition,
        inputs: &DependencyOutputs,
        documents: &[SourceDocument],
    ) -> Result<StageOutput, DocumentStageFailure> {
        let started = Instant::now();
        let total = documents.len();
        info!(
            job_id = %job_id,
            stage_id = %stage.id,
            documents = total,
            mode = ?self.mode,
            "Fanning out stage over documents"
        );

        let passes: Vec<_> = documents
            .iter()
            .enumerate()
            .map(|(index, document)| {
                let position = DocumentPosition { index, total };
                async move {
                    let result = self.run_document(job_id, stage, inputs, document, position).await;
                    (index, result)
                }
            })
            .collect();

        let mut results: Vec<(usize, Result<PassResult, StageExecutionError>)> = match self.mode {
            FanoutMode::Sequential => {
                let mut results = Vec::with_capacity(total);
                for pass in passes {
                    let (index, result) = pass.await;
                    let failed = result.is_err();
                    results.push((index, result));
                    if failed {
                        break;
                    }
                }
                results
            }
            FanoutMode::Concurrent { limit } => {
                stream::iter(passes)
                    .buffer_unordered(limit.max(1))
                    .collect()
                    .await
            }
        };
        results.sort_by_key(|(index, _)| *index);

        let usage: Usage = results
            .iter()
            .map(|(_, r)| match r {
                Ok(pass) => pass.usage,
                Err(e) => e.usage,
            })
            .sum();

        let mut partials = Vec::with_capacity(total);
        for (index, result) in results {
            match result {
                Ok(pass) => partials.push(pass),
                Err(cause) => {
                    warn!(
                        job_id = %job_id,
                        stage_id = %stage.id,
                        document_index = index,
                        error = %cause,
                        "Document pass failed, failing stage"
                    );
                    return Err(DocumentStageFailure {
                        stage_id: stage.id,
                        document_index: index,
                        document_id: documents[index].id.clone(),
                        cause,
                        usage,
                    });
                }
            }
        }

        let values: Vec<_> = partials.iter().map(|p| p.data.clone()).collect();
        let merged = stage.merge.merge(&values);

        let mut fingerprints: Vec<&str> = partials.iter().map(|p| p.fingerprint.as_str()).collect();
        fingerprints.sort_unstable();
        let input_fingerprint = fingerprints
            .into_iter()
            .fold(Fingerprinter::new(), |fp, part| fp.part(part))
            .finish();

        let mut output = StageOutput::new(stage.id, stage.name.clone(), merged);
        output.shape_problems = partials
            .iter()
            .flat_map(|p| p.shape_problems.iter().cloned())
            .collect();
        output.usage = usage;
        output.retry_count = partials.iter().map(|p| p.retry_count).sum();
        output.document_count = Some(total);
        output.input_fingerprint = input_fingerprint;
        output.missing_dependencies = inputs.missing();
        output.duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        output.completed_at = now_utc();
        Ok(output)
    }

    async fn run_document(
        &self,
        job_id: &JobId,
        stage: &StageDefinition,
        inputs: &DependencyOutputs,
        document: &SourceDocument,
        position: DocumentPosition,
    ) -> Result<PassResult, StageExecutionError> {
        let prompt = stage
            .prompt
            .build_for_document(inputs, document, position)
            .map_err(|e| prompt_failure(stage, e))?;
        let attachments = if stage.attach_documents && !document.content.is_empty() {
            vec![document.as_attachment()]
        } else {
            Vec::new()
        };
        let label = format!("{}:{}", stage.name, document.id);
        let request = build_request(stage, &label, prompt, attachments);

        let pass = self
            .executor
            .run_pass(job_id, stage, Some(position.index), request)
            .await?;

        self.events
            .emit(PipelineEvent::new(
                job_id.clone(),
                EventKind::DocumentCompleted {
                    stage_id: stage.id,
                    document_index: position.index,
                    retry_count: pass.retry_count,
                },
            ))
            .await;
        Ok(pass)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StageId;
    use crate::events::CollectingEventSink;
    use crate::errors::PassError;
    use crate::pipeline::{FnPromptBuilder, MergePolicy, RetryPolicy};
    use crate::testing::{ScriptedGenerator, ScriptedReply};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn documents() -> Vec<SourceDocument> {
        vec![
            SourceDocument::new("2022.pdf", "application/pdf", b"return 2022".to_vec()),
            SourceDocument::new("2023-draft.pdf", "application/pdf", b"draft 2023".to_vec()),
            SourceDocument::new("2023-final.pdf", "application/pdf", b"final 2023".to_vec()),
        ]
    }

    fn stage() -> StageDefinition {
        StageDefinition::new(
            StageId(1),
            "financial_extraction",
            Arc::new(FnPromptBuilder::new(|_| "extract".to_string())),
        )
        .per_document(MergePolicy::financial_statements())
        .with_attachments()
    }

    fn scripted(docs: &[SourceDocument]) -> ScriptedGenerator {
        let generator = ScriptedGenerator::new();
        generator.reply(
            format!("financial_extraction:{}", docs[0].id),
            r#"{"periods": [{"period": "2022", "revenue": 450000}]}"#,
        );
        generator.reply(
            format!("financial_extraction:{}", docs[1].id),
            r#"{"periods": [{"period": "FY2023", "revenue": 500000, "net_income": 40000}]}"#,
        );
        generator.reply(
            format!("financial_extraction:{}", docs[2].id),
            r#"{"periods": [{"period": "2023", "revenue": 620000, "net_income": 62000}]}"#,
        );
        generator
    }

    fn merger(generator: ScriptedGenerator, mode: FanoutMode) -> DocumentFanoutMerger {
        let executor = Arc::new(PassExecutor::new(Arc::new(generator), RetryPolicy::immediate()));
        DocumentFanoutMerger::new(executor, mode)
    }

    #[tokio::test]
    async fn test_merge_independent_of_document_order() {
        let docs = documents();
        let mut reversed = docs.clone();
        reversed.reverse();

        let forward = merger(scripted(&docs), FanoutMode::Concurrent { limit: 3 })
            .execute_per_document(&JobId::from("j"), &stage(), &DependencyOutputs::new(), &docs)
            .await
            .unwrap();
        let backward = merger(scripted(&docs), FanoutMode::Sequential)
            .execute_per_document(&JobId::from("j"), &stage(), &DependencyOutputs::new(), &reversed)
            .await
            .unwrap();

        assert_eq!(forward.data, backward.data);
        assert_eq!(forward.input_fingerprint, backward.input_fingerprint);
        assert_eq!(forward.document_count, Some(3));
        assert_eq!(forward.data["periods"][1]["revenue"], json!(620000));
        assert_eq!(forward.data["periods"][1]["net_margin"], json!(0.1));
    }

    #[tokio::test]
    async fn test_attachments_are_sent() {
        let docs = documents();
        let generator = Arc::new(scripted(&docs));
        let executor = Arc::new(PassExecutor::new(generator.clone(), RetryPolicy::immediate()));
        DocumentFanoutMerger::new(executor, FanoutMode::Sequential)
            .execute_per_document(&JobId::from("j"), &stage(), &DependencyOutputs::new(), &docs)
            .await
            .unwrap();

        let calls = generator.calls();
        assert_eq!(calls.len(), 3);
        assert!(calls.iter().all(|c| c.attachments.len() == 1));
        assert!(calls[0].user_prompt.starts_with("Document 1 of 3"));
    }

    #[tokio::test]
    async fn test_failing_document_reports_index() {
        let docs = documents();
        let generator = scripted(&docs);
        let failing = format!("financial_extraction:{}", docs[1].id);
        for _ in 0..3 {
            generator.enqueue(&failing, ScriptedReply::Transport("upstream 503".into()));
        }
        let sink = Arc::new(CollectingEventSink::new());
        let merger = merger(generator, FanoutMode::Concurrent { limit: 2 }).with_events(sink.clone());

        let err = merger
            .execute_per_document(&JobId::from("j"), &stage(), &DependencyOutputs::new(), &docs)
            .await
            .unwrap_err();

        assert_eq!(err.document_index, 1);
        assert_eq!(err.document_id, docs[1].id);
        assert_eq!(err.cause.attempts, 3);
        assert!(matches!(err.cause.last_error, PassError::Transport(_)));
        // The barrier waits for the other documents.
        assert_eq!(sink.events_of_type("document.completed").len(), 2);
    }

    #[tokio::test]
    async fn test_document_retry_then_success_counts_retries() {
        let docs = documents();
        let generator = scripted(&docs);
        generator.enqueue(
            format!("financial_extraction:{}", docs[0].id),
            ScriptedReply::Text("sorry, no data".into()),
        );
        let output = merger(generator, FanoutMode::Sequential)
            .execute_per_document(&JobId::from("j"), &stage(), &DependencyOutputs::new(), &docs)
            .await
            .unwrap();
        assert_eq!(output.retry_count, 1);
    }
}
