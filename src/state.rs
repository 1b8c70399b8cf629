//! # Application State Management
//!
//! Shared state handed to every HTTP handler through `web::Data`.
//!
//! ## What lives here:
//! - **config**: the startup configuration, read-only for the lifetime of the process
//! - **validator**: the request schema with the configured host allow-list
//! - **queue**: handle to the durable job queue
//! - **metrics**: per-endpoint HTTP counters, updated by middleware
//! - **jobs**: job lifecycle counters, fed by queue hooks
//!
//! ## Arc<RwLock<T>> Pattern
//! HTTP metrics are a map that every request writes to, so they sit behind a lock. Job counters
//! are plain atomics: the queue workers only ever add to them.

use crate::config::AppConfig;
use crate::job::Validator;
use crate::queue::{JobEvents, JobQueue, QueuedJob};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

/// The main application state that's shared across all HTTP request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration, fixed at startup
    pub config: Arc<AppConfig>,

    /// Schema checker for submissions
    pub validator: Validator,

    /// Where accepted submissions go
    pub queue: JobQueue,

    /// Performance metrics (constantly being updated by requests)
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// Job lifecycle counters
    pub jobs: Arc<JobCounters>,

    /// When the server started
    pub start_time: Instant,
}

/// HTTP metrics collected across all requests.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// Total number of errors encountered since server start
    pub error_count: u64,

    /// Detailed metrics for each API endpoint
    /// Key: endpoint name (e.g., "POST /v1/create")
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Detailed performance metrics for a specific API endpoint.
///
/// ## Performance calculations:
/// - **Average response time**: total_duration_ms / request_count
/// - **Error rate**: error_count / request_count
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

/// Counts of job lifecycle events since startup.
#[derive(Debug, Default)]
pub struct JobCounters {
    submitted: AtomicU64,
    rejected: AtomicU64,
    started: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct JobCountersSnapshot {
    pub submitted: u64,
    pub rejected: u64,
    pub started: u64,
    pub completed: u64,
    pub failed: u64,
}

impl JobCounters {
    pub fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    /// A submission that failed validation and was never enqueued.
    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> JobCountersSnapshot {
        JobCountersSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            started: self.started.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

impl JobEvents for JobCounters {
    fn on_start(&self, _job: &QueuedJob) {
        self.started.fetch_add(1, Ordering::Relaxed);
    }

    fn on_complete(&self, _job: &QueuedJob) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    fn on_fail(&self, _job: &QueuedJob, _error: &anyhow::Error) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }
}

impl AppState {
    /// Create a new AppState around an already running queue.
    ///
    /// `jobs` should be the same counters registered as queue listeners, so the health endpoints
    /// see what the workers did.
    pub fn new(config: AppConfig, validator: Validator, queue: JobQueue, jobs: Arc<JobCounters>) -> Self {
        Self {
            config: Arc::new(config),
            validator,
            queue,
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            jobs,
            start_time: Instant::now(),
        }
    }

    pub fn increment_request_count(&self) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        metrics.request_count += 1;
    }

    /// Increment the total error counter (4xx and 5xx responses).
    pub fn increment_error_count(&self) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        metrics.error_count += 1;
    }

    /// Record detailed metrics for a specific endpoint.
    ///
    /// The first request to an endpoint creates its entry with zeroed counters.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);

        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();
        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;

        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Get a snapshot of current metrics (used for the /metrics endpoint).
    ///
    /// Clones so the lock is not held while the response is serialized.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Error rate between 0.0 and 1.0.
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::job::DomainMatcher;
    use crate::queue::JobStore;
    use serde_json::json;

    /// State over a fresh queue in `dir`, with no handlers defined.
    pub(crate) async fn test_state(dir: &std::path::Path, allowed: &[&str]) -> AppState {
        let mut config = AppConfig::default();
        config.security.allowed_domains = allowed.iter().map(|s| s.to_string()).collect();
        config.queue.state_dir = dir.to_path_buf();

        let queue = JobQueue::new(JobStore::open(dir).await.unwrap(), 1);
        let validator = Validator::new(DomainMatcher::new(allowed).unwrap());
        AppState::new(config, validator, queue, Arc::new(JobCounters::default()))
    }

    #[tokio::test]
    async fn test_endpoint_metrics() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path(), &["*"]).await;

        state.record_endpoint_request("GET /health", 10, false);
        state.record_endpoint_request("GET /health", 30, true);
        state.increment_request_count();
        state.increment_error_count();

        let snapshot = state.get_metrics_snapshot();
        let metric = &snapshot.endpoint_metrics["GET /health"];
        assert_eq!(metric.request_count, 2);
        assert_eq!(metric.average_duration_ms(), 20.0);
        assert_eq!(metric.error_rate(), 0.5);
        assert_eq!(snapshot.request_count, 1);
        assert_eq!(snapshot.error_count, 1);
    }

    #[test]
    fn test_empty_endpoint_metric() {
        let metric = EndpointMetric::default();
        assert_eq!(metric.average_duration_ms(), 0.0);
        assert_eq!(metric.error_rate(), 0.0);
    }

    #[test]
    fn test_job_counters_follow_queue_events() {
        let counters = JobCounters::default();
        let job = QueuedJob::new("waveform", json!({}));

        counters.record_submitted();
        counters.record_rejected();
        counters.on_start(&job);
        counters.on_complete(&job);
        counters.on_start(&job);
        counters.on_fail(&job, &anyhow::anyhow!("boom"));

        assert_eq!(
            counters.snapshot(),
            JobCountersSnapshot {
                submitted: 1,
                rejected: 1,
                started: 2,
                completed: 1,
                failed: 1,
            }
        );
    }
}
