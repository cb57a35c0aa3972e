//! End-to-end tests over the default report catalog.

#[cfg(test)]
mod tests {
    use crate::catalog::{default_report_pipeline, stages};
    use crate::config::ReportflowConfig;
    use crate::core::{JobStatus, SourceDocument, StageId};
    use crate::errors::{PassError, PipelineError};
    use crate::events::CollectingEventSink;
    use crate::generator::{ContentGenerator, GenerationRequest, GenerationResponse, Usage};
    use crate::pipeline::{FanoutMode, PipelineOrchestrator, RetryPolicy, MAX_RETRIES};
    use crate::quality::{render_sections, sections_from_output, QualityGate};
    use crate::store::{FileStore, InMemoryStore, PipelineStore, StageResultStore};
    use crate::testing::{
        assert_gate_releasable, assert_job_completed, assert_job_failed_at, assert_same_outputs,
        assert_stage_order, sample_documents, sample_store, scripted_report_generator,
        ScriptedGenerator,
    };
    use async_trait::async_trait;
    use mockall::mock;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;
    use tokio_test::{assert_err, assert_ok};

    const ALL_STAGES: [StageId; 6] = [
        stages::FINANCIAL_EXTRACTION,
        stages::EARNINGS_NORMALIZATION,
        stages::INDUSTRY_ANALYSIS,
        stages::RISK_ASSESSMENT,
        stages::VALUATION_INPUTS,
        stages::NARRATIVE_SYNTHESIS,
    ];

    fn report_orchestrator<S: PipelineStore + 'static>(
        generator: Arc<ScriptedGenerator>,
        store: Arc<S>,
    ) -> anyhow::Result<PipelineOrchestrator> {
        Ok(
            PipelineOrchestrator::builder(default_report_pipeline()?, generator, store)
                .with_retry(RetryPolicy::immediate())
                .build(),
        )
    }

    #[tokio::test]
    async fn test_full_report_run_passes_gate() -> anyhow::Result<()> {
        let store = Arc::new(InMemoryStore::new());
        let sink = Arc::new(CollectingEventSink::new());
        let generator = Arc::new(scripted_report_generator());
        let orchestrator = PipelineOrchestrator::builder(default_report_pipeline()?, generator.clone(), store)
            .with_retry(RetryPolicy::immediate())
            .with_events(sink.clone())
            .build();

        let job = orchestrator.submit(sample_documents(2)).await?;
        let outcome = orchestrator.run(job).await?;

        assert_job_completed(&outcome.job);
        assert_stage_order(&sink.events(), &ALL_STAGES);
        // Two fan-out stages over two documents plus four single passes.
        assert_eq!(generator.call_count(), 8);
        assert_eq!(outcome.job.usage, Usage::new(800, 400));

        let narrative = outcome
            .output(stages::NARRATIVE_SYNTHESIS)
            .ok_or_else(|| anyhow::anyhow!("narrative output missing"))?;
        let sections = sections_from_output(narrative);
        assert_eq!(sections.len(), 6);

        let result = QualityGate::default().evaluate(&sample_store(), &sections, &render_sections(&sections));
        assert_gate_releasable(&result);
        assert!(result.passed);
        assert!(result.warnings.is_empty(), "unexpected warnings: {:?}", result.warnings);
        Ok(())
    }

    #[tokio::test]
    async fn test_resume_after_failure_matches_uninterrupted_run() -> anyhow::Result<()> {
        let documents = sample_documents(2);

        let clean_store = Arc::new(InMemoryStore::new());
        let clean = report_orchestrator(Arc::new(scripted_report_generator()), clean_store)?;
        let job = clean.submit(documents.clone()).await?;
        let uninterrupted = clean.run(job).await?;

        let store = Arc::new(InMemoryStore::new());
        let generator = Arc::new(scripted_report_generator());
        generator.fail_times("risk_assessment", MAX_RETRIES + 1);
        let interrupted = report_orchestrator(generator.clone(), store.clone())?;
        let job = interrupted.submit(documents).await?;

        let failure = assert_err!(interrupted.run(job.clone()).await);
        assert_eq!(failure.error.failed_stage(), Some(stages::RISK_ASSESSMENT));
        assert_eq!(failure.outputs.len(), 3);
        let failed_job = failure.job.ok_or_else(|| anyhow::anyhow!("failed job not returned"))?;
        assert_job_failed_at(&failed_job, stages::RISK_ASSESSMENT);

        let resumed = assert_ok!(interrupted.resume(&job.id).await);
        assert_eq!(resumed.executed, ALL_STAGES[3..].to_vec());
        assert_job_completed(&resumed.job);
        assert_same_outputs(&resumed.outputs, &uninterrupted.outputs);
        Ok(())
    }

    #[tokio::test]
    async fn test_retry_boundary() -> anyhow::Result<()> {
        let generator = Arc::new(scripted_report_generator());
        generator.fail_times("industry_analysis", MAX_RETRIES);
        let orchestrator = report_orchestrator(generator, Arc::new(InMemoryStore::new()))?;
        let job = orchestrator.submit(sample_documents(1)).await?;
        let outcome = orchestrator.run(job).await?;
        let industry = outcome
            .output(stages::INDUSTRY_ANALYSIS)
            .ok_or_else(|| anyhow::anyhow!("industry output missing"))?;
        assert_eq!(industry.retry_count, MAX_RETRIES);

        let generator = Arc::new(scripted_report_generator());
        generator.fail_times("industry_analysis", MAX_RETRIES + 1);
        let orchestrator = report_orchestrator(generator, Arc::new(InMemoryStore::new()))?;
        let job = orchestrator.submit(sample_documents(1)).await?;
        let failure = assert_err!(orchestrator.run(job).await);
        match failure.error {
            PipelineError::StageExecution(e) => {
                assert_eq!(e.stage_id, stages::INDUSTRY_ANALYSIS);
                assert_eq!(e.attempts, MAX_RETRIES + 1);
                assert!(matches!(e.last_error, PassError::Transport(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_fan_out_merges_duplicate_fiscal_years() -> anyhow::Result<()> {
        let documents = vec![
            SourceDocument::new("2022-return.pdf", "application/pdf", b"return 2022".to_vec()),
            SourceDocument::new("2023-draft.pdf", "application/pdf", b"draft 2023".to_vec()),
            SourceDocument::new("2023-final.pdf", "application/pdf", b"final 2023".to_vec()),
        ];
        let generator = Arc::new(scripted_report_generator());
        generator.reply(
            format!("financial_extraction:{}", documents[0].id),
            json!({"periods": [{"period": "2022", "revenue": 450_000}]}).to_string(),
        );
        generator.reply(
            format!("financial_extraction:{}", documents[1].id),
            json!({"periods": [{"fiscal_year": "FY2023", "revenue": 500_000}]}).to_string(),
        );
        generator.reply(
            format!("financial_extraction:{}", documents[2].id),
            json!({"periods": [{"period": "2023", "revenue": 620_000, "net_income": 62_000}]}).to_string(),
        );

        let orchestrator = PipelineOrchestrator::builder(
            default_report_pipeline()?,
            generator.clone(),
            Arc::new(InMemoryStore::new()),
        )
        .with_retry(RetryPolicy::immediate())
        .with_fanout_mode(FanoutMode::Sequential)
        .build();
        let job = orchestrator.submit(documents).await?;
        let outcome = orchestrator.run(job).await?;

        let extraction = outcome
            .output(stages::FINANCIAL_EXTRACTION)
            .ok_or_else(|| anyhow::anyhow!("extraction output missing"))?;
        let periods = extraction.data["periods"]
            .as_array()
            .ok_or_else(|| anyhow::anyhow!("periods is not an array"))?;
        assert_eq!(periods.len(), 2);
        assert_eq!(periods[0]["revenue"], json!(450_000));
        // The more complete 2023 statement wins.
        assert_eq!(periods[1]["revenue"], json!(620_000));
        assert_eq!(extraction.document_count, Some(3));
        assert_eq!(generator.calls_for("financial_extraction"), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_file_store_survives_restart() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let generator = Arc::new(scripted_report_generator());
        generator.fail_times("narrative_synthesis", MAX_RETRIES + 1);

        let first = report_orchestrator(generator.clone(), Arc::new(FileStore::new(dir.path())))?;
        let job = first.submit(sample_documents(1)).await?;
        assert_err!(first.run(job.clone()).await);
        drop(first);

        // A fresh process sees the checkpoint and the five persisted outputs.
        let store = Arc::new(FileStore::new(dir.path()));
        assert_eq!(store.list_completed(&job.id).await?, ALL_STAGES[..5].to_vec());
        let second = report_orchestrator(generator.clone(), store)?;
        let status = second.status(&job.id).await?;
        assert_eq!(status.status, JobStatus::Failed);

        let before = generator.call_count();
        let outcome = second.resume(&job.id).await?;
        assert_eq!(outcome.executed, vec![stages::NARRATIVE_SYNTHESIS]);
        assert_eq!(generator.call_count(), before + 1);
        assert_job_completed(&outcome.job);
        Ok(())
    }

    #[tokio::test]
    async fn test_config_drives_orchestrator() -> anyhow::Result<()> {
        let config: ReportflowConfig = r#"{
            "retry": {"max_retries": 0, "base_delay_ms": 0},
            "fanout": {"mode": "concurrent", "limit": 2},
            "generator": {"timeout_secs": 5}
        }"#
        .parse()?;
        let generator = Arc::new(scripted_report_generator());
        generator.fail_times("valuation_inputs", 1);
        let orchestrator = PipelineOrchestrator::builder(
            default_report_pipeline()?,
            generator,
            Arc::new(InMemoryStore::new()),
        )
        .with_config(&config)
        .build();

        let job = orchestrator.submit(sample_documents(3)).await?;
        let failure = assert_err!(orchestrator.run(job).await);
        assert_eq!(failure.error.failed_stage(), Some(stages::VALUATION_INPUTS));
        Ok(())
    }

    mock! {
        pub Generator {}

        #[async_trait]
        impl ContentGenerator for Generator {
            async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, PassError>;
        }
    }

    #[test]
    fn test_completed_stages_are_never_regenerated() {
        tokio_test::block_on(async {
            let store = Arc::new(InMemoryStore::new());
            let scripted = Arc::new(scripted_report_generator());
            let first = report_orchestrator(scripted, store.clone()).unwrap();
            let job = first.submit(sample_documents(1)).await.unwrap();
            let outcome = first.run(job).await.unwrap();

            // Re-running narrative synthesis only calls the generator once.
            let mut generator = MockGenerator::new();
            generator
                .expect_generate()
                .withf(|request| request.label == "narrative_synthesis")
                .times(1)
                .returning(|_| {
                    let text = json!({
                        "sections": [{"id": "executive_summary", "title": "Summary", "text": "Rewritten."}]
                    });
                    Ok(GenerationResponse::new(text.to_string(), Usage::new(10, 5)))
                });
            let second = PipelineOrchestrator::builder(
                default_report_pipeline().unwrap(),
                Arc::new(generator),
                store,
            )
            .with_retry(RetryPolicy::immediate())
            .build();

            let rerun = second
                .rerun_from(&outcome.job.id, stages::NARRATIVE_SYNTHESIS)
                .await
                .unwrap();
            assert_eq!(rerun.executed, vec![stages::NARRATIVE_SYNTHESIS]);
            let sections = sections_from_output(rerun.output(stages::NARRATIVE_SYNTHESIS).unwrap());
            assert_eq!(sections.len(), 1);
            assert_eq!(sections[0].text, "Rewritten.");
            for stage_id in &ALL_STAGES[..5] {
                assert!(rerun.outputs[stage_id].same_content(&outcome.outputs[stage_id]));
            }
        });
    }

    #[tokio::test]
    async fn test_concurrent_run_of_same_job_is_rejected() -> anyhow::Result<()> {
        let generator = Arc::new(
            scripted_report_generator().with_delay(std::time::Duration::from_millis(50)),
        );
        let orchestrator = Arc::new(report_orchestrator(generator, Arc::new(InMemoryStore::new()))?);
        let job = orchestrator.submit(sample_documents(1)).await?;

        let background = {
            let orchestrator = Arc::clone(&orchestrator);
            let job = job.clone();
            tokio::spawn(async move { orchestrator.run(job).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        let failure = assert_err!(orchestrator.resume(&job.id).await);
        assert!(matches!(failure.error, PipelineError::JobAlreadyRunning(_)));

        assert_ok!(background.await?);
        Ok(())
    }
}
