//! Checkpointed, resumable execution of a stage graph for one job.

use super::executor::PassExecutor;
use super::fanout::{DocumentFanoutMerger, FanoutMode};
use super::graph::StageGraph;
use super::retry::RetryPolicy;
use super::stage::{DependencyOutputs, StageDefinition};
use crate::config::ReportflowConfig;
use crate::core::{
    EventKind, Job, JobId, JobStatusView, PipelineEvent, SourceDocument, StageId, StageOutput,
};
use crate::errors::{PipelineError, PrerequisiteMissing};
use crate::events::{EventSink, NoOpEventSink};
use crate::generator::{ContentGenerator, CostModel, TimeoutGenerator, Usage};
use crate::observability::{SpanTimer, StageSpanAttributes};
use crate::store::{JobStore, PipelineStore, StageResultStore};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn, Instrument};

/// Persisted outputs keyed by stage.
pub type StageOutputs = BTreeMap<StageId, Arc<StageOutput>>;

/// A run that reached the end of the graph.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// The completed job.
    pub job: Job,
    /// Every persisted output of the job.
    pub outputs: StageOutputs,
    /// Stages executed by this run, in order.
    pub executed: Vec<StageId>,
    /// Wall-clock duration of this run.
    pub duration_ms: f64,
}

impl RunOutcome {
    /// Returns the output of a stage.
    #[must_use]
    pub fn output(&self, stage_id: StageId) -> Option<&StageOutput> {
        self.outputs.get(&stage_id).map(AsRef::as_ref)
    }
}

/// A run that stopped on an error, with everything completed before it.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct RunFailure {
    /// Why the run stopped.
    #[source]
    pub error: PipelineError,
    /// The job as persisted with its error status, when it could be loaded.
    pub job: Option<Job>,
    /// Outputs persisted before the failure.
    pub outputs: StageOutputs,
    /// Wall-clock duration of this run.
    pub duration_ms: f64,
}

impl RunFailure {
    fn early(error: impl Into<PipelineError>) -> Self {
        Self {
            error: error.into(),
            job: None,
            outputs: StageOutputs::new(),
            duration_ms: 0.0,
        }
    }
}

/// Builds a [`PipelineOrchestrator`].
pub struct OrchestratorBuilder {
    graph: Arc<StageGraph>,
    generator: Arc<dyn ContentGenerator>,
    store: Arc<dyn PipelineStore>,
    events: Arc<dyn EventSink>,
    retry: RetryPolicy,
    fanout: FanoutMode,
    cost: CostModel,
    timeout: Option<Duration>,
    force: bool,
}

impl std::fmt::Debug for OrchestratorBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestratorBuilder")
            .field("pipeline", &self.graph.name())
            .field("retry", &self.retry)
            .field("fanout", &self.fanout)
            .field("timeout", &self.timeout)
            .field("force", &self.force)
            .finish_non_exhaustive()
    }
}

impl OrchestratorBuilder {
    /// Sets the event sink.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Sets the retry policy used for every pass.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets how fan-out stages schedule their documents.
    #[must_use]
    pub fn with_fanout_mode(mut self, mode: FanoutMode) -> Self {
        self.fanout = mode;
        self
    }

    /// Sets the cost model.
    #[must_use]
    pub fn with_cost_model(mut self, cost: CostModel) -> Self {
        self.cost = cost;
        self
    }

    /// Bounds every generator call with a timeout.
    #[must_use]
    pub fn with_generator_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Tolerates missing dependencies, treating their data as empty.
    #[must_use]
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Applies retry, fan-out, timeout, cost and force settings.
    #[must_use]
    pub fn with_config(mut self, config: &ReportflowConfig) -> Self {
        self.retry = config.retry.clone();
        self.fanout = config.fanout;
        self.cost = config.cost;
        self.timeout = config.generator.timeout();
        self.force = config.force;
        self
    }

    /// Builds the orchestrator.
    #[must_use]
    pub fn build(self) -> PipelineOrchestrator {
        let generator: Arc<dyn ContentGenerator> = match self.timeout {
            Some(timeout) => Arc::new(TimeoutGenerator::new(self.generator, timeout)),
            None => self.generator,
        };
        let executor = Arc::new(
            PassExecutor::new(generator, self.retry).with_events(Arc::clone(&self.events)),
        );
        let fanout = DocumentFanoutMerger::new(Arc::clone(&executor), self.fanout)
            .with_events(Arc::clone(&self.events));
        PipelineOrchestrator {
            graph: self.graph,
            store: self.store,
            executor,
            fanout,
            events: self.events,
            cost: self.cost,
            force: self.force,
            active: DashMap::new(),
        }
    }
}

/// Drives a job through the stage graph, one stage at a time.
///
/// After each stage the output is persisted first and the job checkpoint
/// second, so at most one stage is ever in flight and not durably recorded.
/// A failed run leaves every earlier output in place; [`resume`] continues
/// from the first stage without a persisted output.
///
/// [`resume`]: PipelineOrchestrator::resume
pub struct PipelineOrchestrator {
    graph: Arc<StageGraph>,
    store: Arc<dyn PipelineStore>,
    executor: Arc<PassExecutor>,
    fanout: DocumentFanoutMerger,
    events: Arc<dyn EventSink>,
    cost: CostModel,
    force: bool,
    active: DashMap<JobId, ()>,
}

impl std::fmt::Debug for PipelineOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineOrchestrator")
            .field("pipeline", &self.graph.name())
            .field("stages", &self.graph.len())
            .field("fanout", &self.fanout)
            .field("force", &self.force)
            .finish_non_exhaustive()
    }
}

/// Releases the per-job run slot when dropped.
struct ActiveRun<'a> {
    active: &'a DashMap<JobId, ()>,
    job_id: JobId,
}

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        self.active.remove(&self.job_id);
    }
}

impl PipelineOrchestrator {
    /// Starts building an orchestrator.
    pub fn builder<S>(
        graph: StageGraph,
        generator: Arc<dyn ContentGenerator>,
        store: Arc<S>,
    ) -> OrchestratorBuilder
    where
        S: PipelineStore + 'static,
    {
        OrchestratorBuilder {
            graph: Arc::new(graph),
            generator,
            store,
            events: Arc::new(NoOpEventSink),
            retry: RetryPolicy::default(),
            fanout: FanoutMode::default(),
            cost: CostModel::default(),
            timeout: None,
            force: false,
        }
    }

    /// Returns the stage graph.
    #[must_use]
    pub fn graph(&self) -> &StageGraph {
        &self.graph
    }

    /// Returns true if missing dependencies are tolerated.
    #[must_use]
    pub fn is_forced(&self) -> bool {
        self.force
    }

    /// Creates and persists a pending job for the documents.
    ///
    /// # Errors
    ///
    /// Returns a store error if the checkpoint cannot be written.
    pub async fn submit(&self, documents: Vec<SourceDocument>) -> Result<Job, PipelineError> {
        let job = Job::new(documents, self.graph.len());
        self.store.save_job(&job).await?;
        info!(
            job_id = %job.id,
            pipeline = self.graph.name(),
            documents = job.documents.len(),
            "Job submitted"
        );
        Ok(job)
    }

    /// Runs a job from its checkpoint to the end of the graph.
    ///
    /// # Errors
    ///
    /// Returns a [`RunFailure`] carrying the error and every output persisted
    /// before it.
    pub async fn run(&self, job: Job) -> Result<RunOutcome, RunFailure> {
        let start = job.current_stage;
        self.drive(job, start).await
    }

    /// Continues a stored job from its first stage without a persisted
    /// output.
    ///
    /// # Errors
    ///
    /// Fails if the job does not exist or a stage fails.
    pub async fn resume(&self, job_id: &JobId) -> Result<RunOutcome, RunFailure> {
        let job = self.load(job_id).await.map_err(RunFailure::early)?;
        let completed = self
            .store
            .list_completed(job_id)
            .await
            .map_err(RunFailure::early)?;
        let start = self
            .graph
            .execution_order()
            .iter()
            .position(|id| !completed.contains(id))
            .unwrap_or(self.graph.len());
        info!(
            job_id = %job_id,
            checkpoint = job.current_stage,
            start_index = start,
            "Resuming job"
        );
        self.drive(job, start).await
    }

    /// Discards the outputs of `stage_id` and every later stage, then runs
    /// from `stage_id`.
    ///
    /// This is the only operation that moves a job's checkpoint backwards.
    ///
    /// # Errors
    ///
    /// Fails if the job or stage does not exist or a stage fails.
    pub async fn rerun_from(&self, job_id: &JobId, stage_id: StageId) -> Result<RunOutcome, RunFailure> {
        let mut job = self.load(job_id).await.map_err(RunFailure::early)?;
        let index = self
            .graph
            .position(stage_id)
            .ok_or(PipelineError::UnknownStage(stage_id))
            .map_err(RunFailure::early)?;
        let discarded = &self.graph.execution_order()[index..];
        self.store
            .invalidate(job_id, discarded)
            .await
            .map_err(RunFailure::early)?;
        job.rewind_to(index);
        self.store.save_job(&job).await.map_err(RunFailure::early)?;
        warn!(
            job_id = %job_id,
            stage_id = %stage_id,
            discarded = discarded.len(),
            "Forced re-run, discarded later outputs"
        );
        self.drive(job, index).await
    }

    /// Returns the job's status surface.
    ///
    /// # Errors
    ///
    /// Fails if the job does not exist.
    pub async fn status(&self, job_id: &JobId) -> Result<JobStatusView, PipelineError> {
        Ok(self.load(job_id).await?.status_view())
    }

    /// Returns every persisted output of a job.
    ///
    /// # Errors
    ///
    /// Returns a store error if an output cannot be read.
    pub async fn outputs(&self, job_id: &JobId) -> Result<StageOutputs, PipelineError> {
        let mut outputs = StageOutputs::new();
        for stage_id in self.store.list_completed(job_id).await? {
            if let Some(output) = self.store.get(job_id, stage_id).await? {
                outputs.insert(stage_id, output);
            }
        }
        Ok(outputs)
    }

    async fn load(&self, job_id: &JobId) -> Result<Job, PipelineError> {
        self.store
            .load_job(job_id)
            .await?
            .ok_or_else(|| PipelineError::JobNotFound(job_id.clone()))
    }

    async fn drive(&self, job: Job, start: usize) -> Result<RunOutcome, RunFailure> {
        if self.active.insert(job.id.clone(), ()).is_some() {
            return Err(RunFailure::early(PipelineError::JobAlreadyRunning(job.id)));
        }
        let _slot = ActiveRun {
            active: &self.active,
            job_id: job.id.clone(),
        };
        let span = tracing::info_span!("job", job_id = %job.id, pipeline = self.graph.name());
        self.drive_stages(job, start).instrument(span).await
    }

    async fn drive_stages(&self, mut job: Job, start: usize) -> Result<RunOutcome, RunFailure> {
        let timer = SpanTimer::start("job");
        let total = self.graph.len();

        job.mark_running(format!("Running from stage {} of {total}", (start + 1).min(total)));
        if let Err(e) = self.store.save_job(&job).await {
            return Err(self.fail(job, e.into(), &timer).await);
        }
        self.events
            .emit(PipelineEvent::new(
                job.id.clone(),
                EventKind::JobStarted {
                    start_index: start,
                    forced: self.force,
                },
            ))
            .await;
        info!(start_index = start, total, forced = self.force, "Job run started");

        let mut executed = Vec::new();
        for index in start..total {
            let Some(stage) = self.graph.stage_at(index).cloned() else {
                break;
            };
            let attrs = StageSpanAttributes::new(&job.id, stage.id, stage.name.clone())
                .with_fan_out(stage.requires_documents);
            let stage_timer = SpanTimer::start(stage.name.clone());

            self.events
                .emit(PipelineEvent::new(
                    job.id.clone(),
                    EventKind::StageStarted {
                        stage_id: stage.id,
                        stage_name: stage.name.clone(),
                    },
                ))
                .await;

            let result = self
                .execute_stage(&job, &stage)
                .instrument(attrs.span())
                .await
                .map_err(|e| match e {
                    PipelineError::Store(source) => PipelineError::StageStore {
                        stage_id: stage.id,
                        source,
                    },
                    other => other,
                });

            let output = match result {
                Ok(output) => output,
                Err(error) => {
                    job.record_usage(&error_usage(&error), self.cost.cost(&error_usage(&error)));
                    let attrs = attrs.failed(stage_timer.finish(), error.to_string());
                    error!(
                        stage_id = %stage.id,
                        stage_name = %stage.name,
                        attributes = ?attrs.to_attributes(),
                        error = %error,
                        "Stage failed"
                    );
                    self.events
                        .emit(PipelineEvent::new(
                            job.id.clone(),
                            EventKind::StageFailed {
                                stage_id: stage.id,
                                stage_name: stage.name.clone(),
                                error: error.to_string(),
                            },
                        ))
                        .await;
                    return Err(self.fail(job, error, &timer).await);
                }
            };

            let retry_count = output.retry_count;
            let usage = output.usage;
            if let Err(source) = self.store.put(&job.id, stage.id, output).await {
                let error = PipelineError::StageStore {
                    stage_id: stage.id,
                    source,
                };
                return Err(self.fail(job, error, &timer).await);
            }
            job.record_usage(&usage, self.cost.cost(&usage));
            job.checkpoint(
                index,
                format!("Completed stage {} of {total}: {}", index + 1, stage.name),
            );
            if let Err(source) = self.store.save_job(&job).await {
                let error = PipelineError::StageStore {
                    stage_id: stage.id,
                    source,
                };
                return Err(self.fail(job, error, &timer).await);
            }

            let duration_ms = stage_timer.finish();
            debug!(
                attributes = ?attrs.completed(duration_ms, retry_count).to_attributes(),
                "Stage checkpointed"
            );
            self.events
                .emit(PipelineEvent::new(
                    job.id.clone(),
                    EventKind::StageCompleted {
                        stage_id: stage.id,
                        stage_name: stage.name.clone(),
                        duration_ms,
                        retry_count,
                        progress_percent: job.progress_percent,
                    },
                ))
                .await;
            executed.push(stage.id);
        }

        job.mark_completed();
        if let Err(e) = self.store.save_job(&job).await {
            return Err(self.fail(job, e.into(), &timer).await);
        }
        let outputs = match self.outputs(&job.id).await {
            Ok(outputs) => outputs,
            Err(e) => return Err(self.fail(job, e, &timer).await),
        };
        let duration_ms = timer.finish();
        self.events
            .emit(PipelineEvent::new(
                job.id.clone(),
                EventKind::JobCompleted { duration_ms },
            ))
            .await;
        info!(
            executed = executed.len(),
            duration_ms,
            cost_usd = job.cost_usd,
            "Job completed"
        );
        Ok(RunOutcome {
            job,
            outputs,
            executed,
            duration_ms,
        })
    }

    async fn execute_stage(
        &self,
        job: &Job,
        stage: &StageDefinition,
    ) -> Result<StageOutput, PipelineError> {
        let inputs = self.load_dependencies(job, stage).await?;
        if stage.requires_documents {
            if job.documents.is_empty() {
                return Err(PipelineError::NoDocuments {
                    job_id: job.id.clone(),
                    stage_id: stage.id,
                });
            }
            Ok(self
                .fanout
                .execute_per_document(&job.id, stage, &inputs, &job.documents)
                .await?)
        } else {
            Ok(self.executor.execute(&job.id, stage, &inputs).await?)
        }
    }

    async fn load_dependencies(
        &self,
        job: &Job,
        stage: &StageDefinition,
    ) -> Result<DependencyOutputs, PipelineError> {
        let mut inputs = DependencyOutputs::new();
        for dependency in &stage.dependencies {
            match self.store.get(&job.id, *dependency).await? {
                Some(output) => inputs.insert(output),
                None if self.force => {
                    warn!(
                        stage_id = %stage.id,
                        missing = %dependency,
                        "Dependency output missing, continuing with empty data"
                    );
                    inputs.mark_defaulted(*dependency);
                    self.events
                        .emit(PipelineEvent::new(
                            job.id.clone(),
                            EventKind::DependencyDefaulted {
                                stage_id: stage.id,
                                missing: *dependency,
                            },
                        ))
                        .await;
                }
                None => {
                    return Err(PrerequisiteMissing {
                        job_id: job.id.clone(),
                        stage_id: stage.id,
                        missing: *dependency,
                    }
                    .into());
                }
            }
        }
        Ok(inputs)
    }

    async fn fail(&self, mut job: Job, error: PipelineError, timer: &SpanTimer) -> RunFailure {
        let stage = error.failed_stage();
        job.mark_failed(stage, error.to_string());
        if let Err(e) = self.store.save_job(&job).await {
            warn!(error = %e, "Could not persist failed job status");
        }
        self.events
            .emit(PipelineEvent::new(
                job.id.clone(),
                EventKind::JobFailed {
                    stage_id: stage,
                    error: error.to_string(),
                },
            ))
            .await;
        let outputs = match self.outputs(&job.id).await {
            Ok(outputs) => outputs,
            Err(e) => {
                warn!(error = %e, "Could not collect partial outputs");
                StageOutputs::new()
            }
        };
        RunFailure {
            error,
            job: Some(job),
            outputs,
            duration_ms: timer.elapsed_ms(),
        }
    }
}

fn error_usage(error: &PipelineError) -> Usage {
    match error {
        PipelineError::StageExecution(e) => e.usage,
        PipelineError::DocumentStage(e) => e.usage,
        _ => Usage::default(),
    }
}
