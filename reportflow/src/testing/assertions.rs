//! Assertions for pipeline runs and gate results.

use crate::core::{EventKind, Job, JobStatus, PipelineEvent, StageId};
use crate::pipeline::StageOutputs;
use crate::quality::GateResult;

/// Asserts that the job completed with full progress.
pub fn assert_job_completed(job: &Job) {
    assert_eq!(
        job.status,
        JobStatus::Completed,
        "Expected job {} to complete, got {:?}: {}",
        job.id,
        job.status,
        job.message
    );
    assert!(
        (job.progress_percent - 100.0).abs() < f64::EPSILON,
        "Expected 100% progress, got {}",
        job.progress_percent
    );
}

/// Asserts that the job failed at `stage`.
pub fn assert_job_failed_at(job: &Job, stage: StageId) {
    assert_eq!(job.status, JobStatus::Failed, "Expected job {} to fail", job.id);
    assert_eq!(job.failed_stage, Some(stage), "Unexpected failing stage: {}", job.message);
}

/// Asserts that stages completed in exactly `expected` order.
pub fn assert_stage_order(events: &[PipelineEvent], expected: &[StageId]) {
    let completed: Vec<StageId> = events
        .iter()
        .filter_map(|e| match &e.kind {
            EventKind::StageCompleted { stage_id, .. } => Some(*stage_id),
            _ => None,
        })
        .collect();
    assert_eq!(completed, expected, "Unexpected stage completion order");
}

/// Asserts that two output sets carry the same content, ignoring timing.
pub fn assert_same_outputs(left: &StageOutputs, right: &StageOutputs) {
    assert_eq!(
        left.keys().collect::<Vec<_>>(),
        right.keys().collect::<Vec<_>>(),
        "Output sets cover different stages"
    );
    for (stage_id, output) in left {
        assert!(
            output.same_content(&right[stage_id]),
            "Stage {stage_id} differs:\n left: {}\nright: {}",
            output.data,
            right[stage_id].data
        );
    }
}

/// Asserts that the gate allows release.
pub fn assert_gate_releasable(result: &GateResult) {
    assert!(
        result.can_proceed,
        "Expected release to be allowed, blocking errors: {:#?}",
        result.blocking_errors
    );
}
