//! Lifecycle hooks for queued jobs.
//!
//! Listeners are registered on a [`JobQueue`](crate::queue::JobQueue) explicitly; there is no
//! global registry. Every method has an empty default so a listener only implements what it needs.

use crate::queue::store::QueuedJob;
use tracing::{error, info};

pub trait JobEvents: Send + Sync {
    /// A worker picked the job up.
    fn on_start(&self, _job: &QueuedJob) {}

    /// The handler finished without error and the record is gone.
    fn on_complete(&self, _job: &QueuedJob) {}

    /// The handler reported a failure. The record is gone as well; nothing is retried.
    fn on_fail(&self, _job: &QueuedJob, _error: &anyhow::Error) {}
}

/// Logs every lifecycle event.
pub struct LogEvents;

impl JobEvents for LogEvents {
    fn on_start(&self, job: &QueuedJob) {
        info!(name = %job.name, id = %job.id, job_id = job.job_id().unwrap_or("-"), "Job started");
    }

    fn on_complete(&self, job: &QueuedJob) {
        info!(name = %job.name, id = %job.id, job_id = job.job_id().unwrap_or("-"), "Job completed");
    }

    fn on_fail(&self, job: &QueuedJob, error: &anyhow::Error) {
        error!(
            name = %job.name,
            id = %job.id,
            job_id = job.job_id().unwrap_or("-"),
            error = %error,
            "Job failed"
        );
    }
}
