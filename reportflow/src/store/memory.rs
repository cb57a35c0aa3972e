//! In-process store.

use super::{JobStore, StageResultStore};
use crate::core::{Job, JobId, StageId, StageOutput};
use crate::errors::StoreError;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Keeps outputs and checkpoints in memory.
///
/// Used by tests and single-process deployments; nothing survives a
/// restart.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    outputs: DashMap<JobId, BTreeMap<StageId, Arc<StageOutput>>>,
    jobs: DashMap<JobId, Job>,
}

impl InMemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of jobs with a checkpoint.
    #[must_use]
    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }
}

#[async_trait]
impl StageResultStore for InMemoryStore {
    async fn get(&self, job_id: &JobId, stage_id: StageId) -> Result<Option<Arc<StageOutput>>, StoreError> {
        Ok(self
            .outputs
            .get(job_id)
            .and_then(|stages| stages.get(&stage_id).cloned()))
    }

    async fn put(
        &self,
        job_id: &JobId,
        stage_id: StageId,
        output: StageOutput,
    ) -> Result<Arc<StageOutput>, StoreError> {
        let output = Arc::new(output);
        self.outputs
            .entry(job_id.clone())
            .or_default()
            .insert(stage_id, Arc::clone(&output));
        Ok(output)
    }

    async fn list_completed(&self, job_id: &JobId) -> Result<Vec<StageId>, StoreError> {
        Ok(self
            .outputs
            .get(job_id)
            .map(|stages| stages.keys().copied().collect())
            .unwrap_or_default())
    }

    async fn invalidate(&self, job_id: &JobId, stage_ids: &[StageId]) -> Result<(), StoreError> {
        if let Some(mut stages) = self.outputs.get_mut(job_id) {
            for stage_id in stage_ids {
                stages.remove(stage_id);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl JobStore for InMemoryStore {
    async fn save_job(&self, job: &Job) -> Result<(), StoreError> {
        self.jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn load_job(&self, job_id: &JobId) -> Result<Option<Job>, StoreError> {
        Ok(self.jobs.get(job_id).map(|job| job.clone()))
    }
}
