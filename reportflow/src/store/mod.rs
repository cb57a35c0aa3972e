//! Durable storage for stage outputs and job checkpoints.
//!
//! Writes are whole-value overwrites keyed by stage id, so a reader sees
//! either a fully written output or none at all.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::InMemoryStore;

use crate::core::{Job, JobId, StageId, StageOutput};
use crate::errors::StoreError;
use async_trait::async_trait;
use std::sync::Arc;

/// Keyed store of stage outputs, addressable by (job, stage).
#[async_trait]
pub trait StageResultStore: Send + Sync {
    /// Returns the output of a stage, if one was persisted.
    async fn get(&self, job_id: &JobId, stage_id: StageId) -> Result<Option<Arc<StageOutput>>, StoreError>;

    /// Persists an output, replacing any previous output of the stage.
    async fn put(
        &self,
        job_id: &JobId,
        stage_id: StageId,
        output: StageOutput,
    ) -> Result<Arc<StageOutput>, StoreError>;

    /// Returns the stages with a persisted output, in id order.
    async fn list_completed(&self, job_id: &JobId) -> Result<Vec<StageId>, StoreError>;

    /// Removes the outputs of the given stages.
    async fn invalidate(&self, job_id: &JobId, stage_ids: &[StageId]) -> Result<(), StoreError>;
}

/// Store of job checkpoints.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persists the job, replacing any previous checkpoint.
    async fn save_job(&self, job: &Job) -> Result<(), StoreError>;

    /// Loads a job checkpoint.
    async fn load_job(&self, job_id: &JobId) -> Result<Option<Job>, StoreError>;
}

/// A store holding both stage outputs and job checkpoints.
pub trait PipelineStore: StageResultStore + JobStore {}

impl<T: StageResultStore + JobStore> PipelineStore for T {}
