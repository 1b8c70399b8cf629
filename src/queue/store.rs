//! Directory-backed persistence for queued jobs.
//!
//! One JSON file per job, named after the queue id. A record is written before the job is
//! dispatched and removed once its handler has finished, so whatever is left in the directory at
//! startup is exactly the work that never completed.

use crate::queue::QueueError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

const RECORD_EXTENSION: &str = "json";

/// A job as it sits in the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedJob {
    pub id: String,
    pub name: String,
    pub payload: Value,
    pub scheduled_at: DateTime<Utc>,
}

impl QueuedJob {
    pub fn new(name: &str, payload: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            payload,
            scheduled_at: Utc::now(),
        }
    }

    /// The caller-facing `job_id` inside the payload, if it carries one.
    pub fn job_id(&self) -> Option<&str> {
        self.payload.get("job_id").and_then(Value::as_str)
    }
}

#[derive(Debug, Clone)]
pub struct JobStore {
    dir: PathBuf,
}

impl JobStore {
    /// Open (and create if needed) the state directory.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, QueueError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| QueueError::Store(format!("Cannot create {}: {}", dir.display(), e)))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", id, RECORD_EXTENSION))
    }

    /// Persist a record. Written to a temporary name first and renamed into place.
    pub async fn save(&self, job: &QueuedJob) -> Result<(), QueueError> {
        let body = serde_json::to_vec_pretty(job)?;
        let path = self.record_path(&job.id);
        let partial = path.with_extension("partial");

        fs::write(&partial, body)
            .await
            .map_err(|e| QueueError::Store(format!("Cannot write {}: {}", partial.display(), e)))?;
        fs::rename(&partial, &path)
            .await
            .map_err(|e| QueueError::Store(format!("Cannot move {} into place: {}", path.display(), e)))?;

        debug!(id = %job.id, path = %path.display(), "Job record saved");
        Ok(())
    }

    pub async fn remove(&self, id: &str) -> Result<(), QueueError> {
        let path = self.record_path(id);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(QueueError::Store(format!("Cannot remove {}: {}", path.display(), e))),
        }
    }

    /// All persisted records, oldest first. Unreadable files are skipped with a warning.
    pub async fn load_all(&self) -> Result<Vec<QueuedJob>, QueueError> {
        let mut entries = fs::read_dir(&self.dir)
            .await
            .map_err(|e| QueueError::Store(format!("Cannot list {}: {}", self.dir.display(), e)))?;

        let mut jobs = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| QueueError::Store(format!("Cannot list {}: {}", self.dir.display(), e)))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }

            let parsed = fs::read(&path)
                .await
                .map_err(|e| e.to_string())
                .and_then(|bytes| serde_json::from_slice::<QueuedJob>(&bytes).map_err(|e| e.to_string()));
            match parsed {
                Ok(job) => jobs.push(job),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable job record"),
            }
        }

        jobs.sort_by(|a, b| a.scheduled_at.cmp(&b.scheduled_at));
        Ok(jobs)
    }
}
