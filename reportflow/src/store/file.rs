//! JSON files on disk.

use super::{JobStore, StageResultStore};
use crate::core::{Job, JobId, SourceDocument, StageId, StageOutput};
use crate::errors::StoreError;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

/// Persists checkpoints and outputs as JSON files.
///
/// Layout:
///
/// ```text
/// <root>/jobs/<job_id>/job.json
/// <root>/jobs/<job_id>/documents.json
/// <root>/jobs/<job_id>/stages/<stage_id>.json
/// ```
///
/// Every write goes to a temporary sibling, is flushed to disk and is
/// renamed into place. Source documents never change after submission,
/// so they are written once and `job.json` carries only metadata.
/// Outputs written by older schema versions are migrated on load.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Creates a store rooted at `root`. Directories are created lazily.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn job_dir(&self, job_id: &JobId) -> Result<PathBuf, StoreError> {
        let id = job_id.as_str();
        if id.is_empty() || id.contains(['/', '\\']) || id.starts_with('.') {
            return Err(StoreError::Backend(format!("invalid job id for file store: '{id}'")));
        }
        Ok(self.root.join("jobs").join(id))
    }

    fn stages_dir(&self, job_id: &JobId) -> Result<PathBuf, StoreError> {
        Ok(self.job_dir(job_id)?.join("stages"))
    }

    fn documents_path(&self, job_id: &JobId) -> Result<PathBuf, StoreError> {
        Ok(self.job_dir(job_id)?.join("documents.json"))
    }

    fn stage_path(&self, job_id: &JobId, stage_id: StageId) -> Result<PathBuf, StoreError> {
        Ok(self.stages_dir(job_id)?.join(format!("{:03}.json", stage_id.0)))
    }
}

async fn write_atomic(path: &Path, bytes: Vec<u8>) -> Result<(), StoreError> {
    let parent = path
        .parent()
        .ok_or_else(|| StoreError::Backend(format!("no parent directory for {}", path.display())))?;
    tokio::fs::create_dir_all(parent).await?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = parent.join(format!(".{file_name}.{}.tmp", Uuid::new_v4().simple()));
    if let Err(err) = write_durable(&tmp, &bytes).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(err.into());
    }
    if let Err(err) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(err.into());
    }
    sync_dir(parent).await?;
    debug!(path = %path.display(), "Wrote store file");
    Ok(())
}

/// Writes `bytes` and waits until the data has reached the disk.
async fn write_durable(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await
}

/// Persists the directory entry created by a rename.
#[cfg(unix)]
async fn sync_dir(dir: &Path) -> std::io::Result<()> {
    tokio::fs::File::open(dir).await?.sync_all().await
}

#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Copies every field of the job except its documents.
fn metadata_only(job: &Job) -> Job {
    Job {
        id: job.id.clone(),
        documents: Vec::new(),
        status: job.status,
        current_stage: job.current_stage,
        total_stages: job.total_stages,
        progress_percent: job.progress_percent,
        message: job.message.clone(),
        usage: job.usage,
        cost_usd: job.cost_usd,
        failed_stage: job.failed_stage,
        error: job.error.clone(),
        created_at: job.created_at,
        updated_at: job.updated_at,
    }
}

async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, StoreError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

#[async_trait]
impl StageResultStore for FileStore {
    async fn get(&self, job_id: &JobId, stage_id: StageId) -> Result<Option<Arc<StageOutput>>, StoreError> {
        let Some(bytes) = read_optional(&self.stage_path(job_id, stage_id)?).await? else {
            return Ok(None);
        };
        let mut output: StageOutput = serde_json::from_slice(&bytes)?;
        output.upgrade();
        Ok(Some(Arc::new(output)))
    }

    async fn put(
        &self,
        job_id: &JobId,
        stage_id: StageId,
        output: StageOutput,
    ) -> Result<Arc<StageOutput>, StoreError> {
        let bytes = serde_json::to_vec_pretty(&output)?;
        write_atomic(&self.stage_path(job_id, stage_id)?, bytes).await?;
        Ok(Arc::new(output))
    }

    async fn list_completed(&self, job_id: &JobId) -> Result<Vec<StageId>, StoreError> {
        let mut entries = match tokio::fs::read_dir(self.stages_dir(job_id)?).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut completed = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(".json")) else {
                continue;
            };
            // Temporary files start with a dot and never parse.
            if let Ok(id) = stem.parse::<u32>() {
                completed.push(StageId(id));
            }
        }
        completed.sort_unstable();
        Ok(completed)
    }

    async fn invalidate(&self, job_id: &JobId, stage_ids: &[StageId]) -> Result<(), StoreError> {
        for stage_id in stage_ids {
            match tokio::fs::remove_file(self.stage_path(job_id, *stage_id)?).await {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl JobStore for FileStore {
    async fn save_job(&self, job: &Job) -> Result<(), StoreError> {
        let documents_path = self.documents_path(&job.id)?;
        if !job.documents.is_empty() && !tokio::fs::try_exists(&documents_path).await? {
            let bytes = serde_json::to_vec(&job.documents)?;
            write_atomic(&documents_path, bytes).await?;
        }
        let bytes = serde_json::to_vec_pretty(&metadata_only(job))?;
        write_atomic(&self.job_dir(&job.id)?.join("job.json"), bytes).await
    }

    async fn load_job(&self, job_id: &JobId) -> Result<Option<Job>, StoreError> {
        let Some(bytes) = read_optional(&self.job_dir(job_id)?.join("job.json")).await? else {
            return Ok(None);
        };
        let mut job: Job = serde_json::from_slice(&bytes)?;
        // Older checkpoints embed the documents in job.json.
        if job.documents.is_empty() {
            if let Some(bytes) = read_optional(&self.documents_path(job_id)?).await? {
                job.documents = serde_json::from_slice::<Vec<SourceDocument>>(&bytes)?;
            }
        }
        Ok(Some(job))
    }
}
