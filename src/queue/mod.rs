//! # Durable Job Queue
//!
//! A small at-least-once queue backed by a state directory:
//!
//! - **enqueue** persists a [`QueuedJob`] record and schedules it on the worker pool
//! - **define** binds a job name to the [`JobHandler`] that runs it
//! - **start** redelivers every record left over from a previous process
//!
//! Parallelism is bounded by a semaphore sized from `queue.concurrency`. A record is removed once
//! its handler returns, whether it succeeded or failed; a process that dies mid-job leaves the
//! record behind and the job runs again on the next start.

pub mod hooks;
pub mod store;

pub use hooks::{JobEvents, LogEvents};
pub use store::{JobStore, QueuedJob};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{RwLock, Semaphore};
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue storage error: {0}")]
    Store(String),

    #[error("Queue serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// What `enqueue` hands back to the submitter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobHandle {
    pub id: String,
    pub name: String,
    /// The `job_id` carried by the payload, when there is one.
    pub job_id: Option<String>,
    pub scheduled_at: DateTime<Utc>,
}

impl From<&QueuedJob> for JobHandle {
    fn from(job: &QueuedJob) -> Self {
        Self {
            id: job.id.clone(),
            name: job.name.clone(),
            job_id: job.job_id().map(str::to_string),
            scheduled_at: job.scheduled_at,
        }
    }
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &QueuedJob) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Enqueued and not yet finished, running jobs included.
    pub pending: usize,
    pub running: usize,
    pub concurrency: usize,
}

#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<Inner>,
}

struct Inner {
    store: JobStore,
    handlers: RwLock<HashMap<String, Arc<dyn JobHandler>>>,
    events: RwLock<Vec<Arc<dyn JobEvents>>>,
    permits: Arc<Semaphore>,
    concurrency: usize,
    pending: AtomicUsize,
    running: AtomicUsize,
}

impl JobQueue {
    pub fn new(store: JobStore, concurrency: usize) -> Self {
        let concurrency = concurrency.max(1);
        Self {
            inner: Arc::new(Inner {
                store,
                handlers: RwLock::new(HashMap::new()),
                events: RwLock::new(Vec::new()),
                permits: Arc::new(Semaphore::new(concurrency)),
                concurrency,
                pending: AtomicUsize::new(0),
                running: AtomicUsize::new(0),
            }),
        }
    }

    /// Bind `name` to `handler`. A later definition replaces an earlier one.
    pub async fn define(&self, name: &str, handler: Arc<dyn JobHandler>) {
        info!(name, "Job handler defined");
        self.inner.handlers.write().await.insert(name.to_string(), handler);
    }

    /// Register a lifecycle listener.
    pub async fn on_events(&self, listener: Arc<dyn JobEvents>) {
        self.inner.events.write().await.push(listener);
    }

    /// Persist the job, then schedule it.
    pub async fn enqueue(&self, name: &str, payload: serde_json::Value) -> Result<JobHandle, QueueError> {
        let job = QueuedJob::new(name, payload);
        self.inner.store.save(&job).await?;

        let handle = JobHandle::from(&job);
        info!(
            name,
            id = %handle.id,
            job_id = handle.job_id.as_deref().unwrap_or("-"),
            "Job enqueued"
        );

        self.inner.pending.fetch_add(1, Ordering::SeqCst);
        self.dispatch(job);
        Ok(handle)
    }

    /// Redeliver every persisted record. Call once, after all handlers are defined.
    pub async fn start(&self) -> Result<usize, QueueError> {
        let jobs = self.inner.store.load_all().await?;
        let count = jobs.len();
        if count > 0 {
            info!(count, dir = %self.inner.store.dir().display(), "Redelivering persisted jobs");
        }

        for job in jobs {
            self.inner.pending.fetch_add(1, Ordering::SeqCst);
            self.dispatch(job);
        }
        Ok(count)
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            pending: self.inner.pending.load(Ordering::SeqCst),
            running: self.inner.running.load(Ordering::SeqCst),
            concurrency: self.inner.concurrency,
        }
    }

    fn dispatch(&self, job: QueuedJob) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let _permit = match inner.permits.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    error!(id = %job.id, error = %e, "Worker pool closed, job left for redelivery");
                    inner.pending.fetch_sub(1, Ordering::SeqCst);
                    return;
                }
            };
            inner.run(job).await;
        });
    }
}

impl Inner {
    async fn run(&self, job: QueuedJob) {
        let handler = self.handlers.read().await.get(&job.name).cloned();
        let Some(handler) = handler else {
            warn!(name = %job.name, id = %job.id, "No handler defined, job left for redelivery");
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return;
        };

        self.running.fetch_add(1, Ordering::SeqCst);
        for listener in self.events.read().await.iter() {
            listener.on_start(&job);
        }

        let result = handler.handle(&job).await;

        if let Err(e) = self.store.remove(&job.id).await {
            error!(id = %job.id, error = %e, "Finished job could not be removed and may run again");
        }
        self.running.fetch_sub(1, Ordering::SeqCst);
        self.pending.fetch_sub(1, Ordering::SeqCst);
        debug!(id = %job.id, "Job record released");

        let listeners = self.events.read().await;
        match &result {
            Ok(()) => listeners.iter().for_each(|l| l.on_complete(&job)),
            Err(e) => listeners.iter().for_each(|l| l.on_fail(&job, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc;

    enum Event {
        Completed(String),
        Failed(String, String),
    }

    struct ChannelEvents(mpsc::UnboundedSender<Event>);

    impl JobEvents for ChannelEvents {
        fn on_complete(&self, job: &QueuedJob) {
            let _ = self.0.send(Event::Completed(job.id.clone()));
        }

        fn on_fail(&self, job: &QueuedJob, error: &anyhow::Error) {
            let _ = self.0.send(Event::Failed(job.id.clone(), error.to_string()));
        }
    }

    /// Fails when the payload says so, and tracks how many run at once.
    #[derive(Default)]
    struct TestHandler {
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl JobHandler for TestHandler {
        async fn handle(&self, job: &QueuedJob) -> anyhow::Result<()> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            if job.payload["fail"] == json!(true) {
                anyhow::bail!("ProbeError: Bad codec: opus");
            }
            Ok(())
        }
    }

    async fn setup(dir: &std::path::Path, concurrency: usize) -> (JobQueue, Arc<TestHandler>, mpsc::UnboundedReceiver<Event>) {
        let queue = JobQueue::new(JobStore::open(dir).await.unwrap(), concurrency);
        let handler = Arc::new(TestHandler::default());
        let (tx, rx) = mpsc::unbounded_channel();
        queue.define("waveform", handler.clone()).await;
        queue.on_events(Arc::new(ChannelEvents(tx))).await;
        queue.on_events(Arc::new(LogEvents)).await;
        (queue, handler, rx)
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<Event>) -> Event {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for a job event")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn test_enqueue_runs_handler_and_removes_record() {
        let dir = tempfile::tempdir().unwrap();
        let (queue, _, mut rx) = setup(dir.path(), 2).await;

        let handle = queue.enqueue("waveform", json!({"job_id": "j-1"})).await.unwrap();
        assert_eq!(handle.name, "waveform");
        assert_eq!(handle.job_id.as_deref(), Some("j-1"));

        match next(&mut rx).await {
            Event::Completed(id) => assert_eq!(id, handle.id),
            Event::Failed(_, e) => panic!("unexpected failure: {}", e),
        }
        assert!(!dir.path().join(format!("{}.json", handle.id)).exists());
        assert_eq!(queue.stats().pending, 0);
    }

    #[tokio::test]
    async fn test_failed_job_fires_on_fail_and_is_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let (queue, _, mut rx) = setup(dir.path(), 1).await;

        let handle = queue.enqueue("waveform", json!({"fail": true})).await.unwrap();
        match next(&mut rx).await {
            Event::Failed(id, message) => {
                assert_eq!(id, handle.id);
                assert!(message.contains("Bad codec"));
            }
            Event::Completed(_) => panic!("job should have failed"),
        }
        assert!(!dir.path().join(format!("{}.json", handle.id)).exists());
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let (queue, handler, mut rx) = setup(dir.path(), 2).await;

        for i in 0..6 {
            queue.enqueue("waveform", json!({ "n": i })).await.unwrap();
        }
        for _ in 0..6 {
            next(&mut rx).await;
        }
        assert!(handler.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(queue.stats().concurrency, 2);
    }

    #[tokio::test]
    async fn test_start_redelivers_persisted_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let store = JobStore::open(dir.path()).await.unwrap();
        let leftover = QueuedJob::new("waveform", json!({"job_id": "from-last-run"}));
        store.save(&leftover).await.unwrap();

        let (queue, _, mut rx) = setup(dir.path(), 1).await;
        assert_eq!(queue.start().await.unwrap(), 1);

        match next(&mut rx).await {
            Event::Completed(id) => assert_eq!(id, leftover.id),
            Event::Failed(_, e) => panic!("unexpected failure: {}", e),
        }
        assert!(store.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_job_name_stays_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let (queue, _, _rx) = setup(dir.path(), 1).await;

        let handle = queue.enqueue("thumbnail", json!({})).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while queue.stats().pending > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        assert!(dir.path().join(format!("{}.json", handle.id)).exists());
    }
}
