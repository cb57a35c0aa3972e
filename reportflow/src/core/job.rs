//! Job state and the status surface.

use super::{JobId, JobStatus, SourceDocument, StageId};
use crate::generator::Usage;
use crate::utils::{now_utc, Timestamp};
use serde::{Deserialize, Serialize};

/// One report-generation run.
///
/// Created on submission and mutated only by the orchestrator. The
/// `current_stage` pointer is the execution index of the next stage to run
/// and only moves backwards through [`Job::rewind_to`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// The job id.
    pub id: JobId,
    /// Submitted source documents in submission order.
    pub documents: Vec<SourceDocument>,
    /// Lifecycle status.
    pub status: JobStatus,
    /// Execution index of the next stage to run.
    pub current_stage: usize,
    /// Number of stages in the pipeline.
    pub total_stages: usize,
    /// Completion percentage, one decimal.
    pub progress_percent: f64,
    /// Human readable status message.
    pub message: String,
    /// Generator units consumed across every run of this job.
    #[serde(default)]
    pub usage: Usage,
    /// Accumulated cost in USD.
    #[serde(default)]
    pub cost_usd: f64,
    /// Stage a failure is attributed to.
    #[serde(default)]
    pub failed_stage: Option<StageId>,
    /// Last error message.
    #[serde(default)]
    pub error: Option<String>,
    /// When the job was submitted.
    pub created_at: Timestamp,
    /// When the job last changed.
    pub updated_at: Timestamp,
}

impl Job {
    /// Creates a pending job.
    #[must_use]
    pub fn new(documents: Vec<SourceDocument>, total_stages: usize) -> Self {
        let now = now_utc();
        Self {
            id: JobId::generate(),
            documents,
            status: JobStatus::Pending,
            current_stage: 0,
            total_stages,
            progress_percent: 0.0,
            message: "Queued".to_string(),
            usage: Usage::default(),
            cost_usd: 0.0,
            failed_stage: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Sets a specific id.
    #[must_use]
    pub fn with_id(mut self, id: JobId) -> Self {
        self.id = id;
        self
    }

    /// Marks the job running.
    pub fn mark_running(&mut self, message: impl Into<String>) {
        self.status = JobStatus::Running;
        self.failed_stage = None;
        self.error = None;
        self.touch(message);
    }

    /// Records that the stage at `index` completed. The pointer never moves
    /// backwards here.
    pub fn checkpoint(&mut self, index: usize, message: impl Into<String>) {
        self.current_stage = self.current_stage.max(index + 1);
        self.progress_percent = progress(self.current_stage, self.total_stages);
        self.touch(message);
    }

    /// Moves the pointer back to `index` for an explicit forced re-run.
    pub fn rewind_to(&mut self, index: usize) {
        self.current_stage = index.min(self.current_stage);
        self.progress_percent = progress(self.current_stage, self.total_stages);
        self.touch(format!("Re-running from stage index {index}"));
    }

    /// Adds generator usage and its cost.
    pub fn record_usage(&mut self, usage: &Usage, cost_usd: f64) {
        self.usage.accumulate(usage);
        self.cost_usd += cost_usd;
    }

    /// Marks the job completed.
    pub fn mark_completed(&mut self) {
        self.status = JobStatus::Completed;
        self.progress_percent = 100.0;
        self.touch("Report pipeline completed");
    }

    /// Marks the job failed, naming the failing stage.
    pub fn mark_failed(&mut self, stage: Option<StageId>, error: impl Into<String>) {
        let error = error.into();
        self.status = JobStatus::Failed;
        self.failed_stage = stage;
        let message = match stage {
            Some(stage) => format!("Stage {stage} failed: {error}"),
            None => format!("Failed: {error}"),
        };
        self.error = Some(error);
        self.touch(message);
    }

    /// Returns the status surface.
    #[must_use]
    pub fn status_view(&self) -> JobStatusView {
        JobStatusView {
            status: self.status,
            current_stage: self.current_stage,
            progress_percent: self.progress_percent,
            message: self.message.clone(),
            failed_stage: self.failed_stage,
        }
    }

    fn touch(&mut self, message: impl Into<String>) {
        self.message = message.into();
        self.updated_at = now_utc();
    }
}

fn progress(done: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let pct = done.min(total) as f64 / total as f64 * 100.0;
    (pct * 10.0).round() / 10.0
}

/// What callers polling a job see.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusView {
    /// Lifecycle status.
    pub status: JobStatus,
    /// Execution index of the next stage to run.
    pub current_stage: usize,
    /// Completion percentage.
    pub progress_percent: f64,
    /// Human readable message.
    pub message: String,
    /// Stage a failure is attributed to.
    pub failed_stage: Option<StageId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_job_is_pending() {
        let job = Job::new(Vec::new(), 6);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.current_stage, 0);
        assert!((job.progress_percent - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_checkpoint_never_regresses() {
        let mut job = Job::new(Vec::new(), 6);
        job.checkpoint(2, "done 3");
        assert_eq!(job.current_stage, 3);
        job.checkpoint(0, "late write");
        assert_eq!(job.current_stage, 3);
        assert!((job.progress_percent - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_rewind_is_explicit() {
        let mut job = Job::new(Vec::new(), 4);
        job.checkpoint(3, "done");
        job.rewind_to(1);
        assert_eq!(job.current_stage, 1);
        assert!((job.progress_percent - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_mark_failed_names_stage() {
        let mut job = Job::new(Vec::new(), 6);
        job.mark_failed(Some(StageId(4)), "generator down");
        let view = job.status_view();
        assert_eq!(view.status, JobStatus::Failed);
        assert_eq!(view.failed_stage, Some(StageId(4)));
        assert!(view.message.contains("Stage 4"));
    }

    #[test]
    fn test_progress_rounds_to_one_decimal() {
        assert!((progress(1, 3) - 33.3).abs() < 1e-9);
        assert!((progress(0, 0) - 0.0).abs() < f64::EPSILON);
    }
}
