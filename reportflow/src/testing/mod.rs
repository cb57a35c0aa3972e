//! Test support for reportflow pipelines.
//!
//! - [`ScriptedGenerator`]: deterministic replies keyed by stage and document
//! - fixture builders for snapshots, narratives, documents and full runs
//! - assertions for jobs, event order and gate results

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{
    assert_gate_releasable, assert_job_completed, assert_job_failed_at, assert_same_outputs,
    assert_stage_order,
};
pub use fixtures::{
    sample_documents, sample_snapshot, sample_store, scripted_report_generator, sections_json,
    standard_report, standard_sections,
};
pub use mocks::{ScriptedGenerator, ScriptedReply};
