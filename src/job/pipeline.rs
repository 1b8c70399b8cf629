//! # Waveform Job Pipeline
//!
//! Runs one dequeued job from raw payload to webhook. This is the only place that knows the
//! order of the steps; every collaborator is injected behind a trait so the state machine can
//! be exercised with spies.
//!
//! ## State Machine:
//! ```text
//! Validating → Fetching → Probing → Generating → Uploading → Notifying(success)
//!      └──────────┴──────────┴──────────┴────────────┴──────→ Notifying(failure)
//! ```
//! - A state is entered only after the previous step succeeded
//! - The first failure jumps straight to `Notifying(failure)`; later steps never run
//! - Exactly one notification per invocation, and only after scratch files are gone
//!
//! ## Scratch Files:
//! [`Scratch`] owns the input and output paths for one invocation. Both are `TempPath`s, so
//! they are deleted when `Scratch` drops, whichever `?` returned early.
//!
//! ## Error Boundary:
//! [`JobPipeline::run`] never returns an error; it returns a [`JobOutcome`]. As a queue handler
//! a failed step surfaces as `Err` for the `on_fail` hooks, and a lost webhook does not count
//! as a failure. Neither case is redelivered.

use crate::job::error::{JobError, SerializedError};
use crate::job::notify::{Notification, Notify};
use crate::job::peaks::{GeneratePeaks, PeaksJob};
use crate::job::probe::{AudioFileMeta, Probe};
use crate::job::schema::{InputFormat, JobRequest, OutputFormat, Validator};
use crate::job::transfer::Transfer;
use crate::queue::{JobHandler, QueuedJob};
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempPath;
use tracing::{debug, error, info, warn};
use url::Url;

/// Whether a job reached `Notifying` with a result or with a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Success,
    Failure,
}

/// States a job passes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Validating,
    Fetching,
    Probing,
    Generating,
    Uploading,
    Notifying(Verdict),
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Validating => "validating",
            JobState::Fetching => "fetching",
            JobState::Probing => "probing",
            JobState::Generating => "generating",
            JobState::Uploading => "uploading",
            JobState::Notifying(Verdict::Success) => "notifying_success",
            JobState::Notifying(Verdict::Failure) => "notifying_failure",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The first failure of a job and the state it happened in.
#[derive(Debug, Clone, PartialEq)]
pub struct StepFailure {
    pub stage: JobState,
    pub error: JobError,
}

impl StepFailure {
    fn at(stage: JobState) -> impl FnOnce(JobError) -> StepFailure {
        move |error| StepFailure { stage, error }
    }

    pub fn to_payload(&self) -> SerializedError {
        SerializedError {
            stage: Some(self.stage.as_str().to_string()),
            ..self.error.to_payload()
        }
    }
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.error.kind(), self.stage, self.error)
    }
}

/// Everything the queue learns about one invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutcome {
    pub job_id: Option<String>,
    /// States entered, in order, ending with a `Notifying` state.
    pub trail: Vec<JobState>,
    pub result: Result<AudioFileMeta, StepFailure>,
    /// Whether the webhook accepted the notification.
    pub notified: bool,
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn failure(&self) -> Option<&StepFailure> {
        self.result.as_ref().err()
    }
}

/// Input and output scratch paths for one invocation, removed on drop.
pub struct Scratch {
    input: TempPath,
    output: TempPath,
}

impl Scratch {
    pub fn acquire(
        dir: Option<&Path>,
        input_format: InputFormat,
        output_format: OutputFormat,
    ) -> std::io::Result<Self> {
        Ok(Self {
            input: temp_path(dir, "waveformer-in-", input_format.as_str())?,
            output: temp_path(dir, "waveformer-out-", output_format.as_str())?,
        })
    }

    pub fn input(&self) -> &Path {
        &self.input
    }

    pub fn output(&self) -> &Path {
        &self.output
    }
}

fn temp_path(dir: Option<&Path>, prefix: &str, extension: &str) -> std::io::Result<TempPath> {
    let suffix = format!(".{}", extension);
    let mut builder = tempfile::Builder::new();
    builder.prefix(prefix).suffix(&suffix);
    let file = match dir {
        Some(dir) => builder.tempfile_in(dir)?,
        None => builder.tempfile()?,
    };
    Ok(file.into_temp_path())
}

/// The orchestrator. Cheap to share: every collaborator sits behind an `Arc`.
#[derive(Clone)]
pub struct JobPipeline {
    validator: Validator,
    transfer: Arc<dyn Transfer>,
    prober: Arc<dyn Probe>,
    generator: Arc<dyn GeneratePeaks>,
    notifier: Arc<dyn Notify>,
    scratch_dir: Option<PathBuf>,
}

impl JobPipeline {
    pub fn new(
        validator: Validator,
        transfer: Arc<dyn Transfer>,
        prober: Arc<dyn Probe>,
        generator: Arc<dyn GeneratePeaks>,
        notifier: Arc<dyn Notify>,
    ) -> Self {
        Self {
            validator,
            transfer,
            prober,
            generator,
            notifier,
            scratch_dir: None,
        }
    }

    /// Create scratch files under `dir` instead of the system temp directory.
    pub fn with_scratch_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.scratch_dir = dir;
        self
    }

    /// Run one job payload to a terminal state.
    pub async fn run(&self, payload: &Value) -> JobOutcome {
        let mut trail = vec![JobState::Validating];

        let job = match self.validator.validate_job(payload) {
            Ok(job) => job,
            Err(err) => return self.reject(payload, trail, err).await,
        };

        info!(
            job_id = %job.job_id,
            input_url = %job.request.input_url,
            output_url = %job.request.output_url,
            "Job data validated"
        );

        let result = self.execute(&job, &mut trail).await;

        self.finish(
            Some(job.job_id.as_str()),
            Some(&job.request.notify_url),
            job.request.context.clone(),
            trail,
            result,
        )
        .await
    }

    /// Fetch → probe → generate → upload, inside one scratch scope.
    async fn execute(
        &self,
        job: &JobRequest,
        trail: &mut Vec<JobState>,
    ) -> Result<AudioFileMeta, StepFailure> {
        let request = &job.request;

        trail.push(JobState::Fetching);
        let scratch = Scratch::acquire(
            self.scratch_dir.as_deref(),
            request.input_format,
            request.output_format,
        )
        .map_err(|e| StepFailure {
            stage: JobState::Fetching,
            error: JobError::Transfer(format!("Cannot allocate scratch files: {}", e)),
        })?;

        self.transfer
            .fetch(&request.input_url, scratch.input())
            .await
            .map_err(StepFailure::at(JobState::Fetching))?;

        trail.push(JobState::Probing);
        let probed = self
            .prober
            .probe(scratch.input())
            .await
            .map_err(StepFailure::at(JobState::Probing))?;

        trail.push(JobState::Generating);
        let peaks = PeaksJob {
            input_path: scratch.input(),
            input_format: request.input_format,
            channel_mode: request.channel_mode,
            output_path: scratch.output(),
            output_format: request.output_format,
            source_bit_depth: probed.source_bit_depth,
        };
        self.generator
            .generate(&peaks)
            .await
            .map_err(StepFailure::at(JobState::Generating))?;

        trail.push(JobState::Uploading);
        self.transfer
            .push(scratch.output(), &request.output_url)
            .await
            .map_err(StepFailure::at(JobState::Uploading))?;

        Ok(probed.meta)
    }

    /// Payload failed validation. Notify only if it still names a usable webhook.
    async fn reject(&self, payload: &Value, trail: Vec<JobState>, err: JobError) -> JobOutcome {
        warn!(error = %err, "Job payload rejected");

        let job_id = payload.get("job_id").and_then(Value::as_str);
        let notify_url = payload
            .get("notify_url")
            .and_then(|v| self.validator.validate_url("notify_url", v).ok());
        let context = payload.get("context").cloned().unwrap_or(Value::Null);

        self.finish(
            job_id,
            notify_url.as_ref(),
            context,
            trail,
            Err(StepFailure {
                stage: JobState::Validating,
                error: err,
            }),
        )
        .await
    }

    async fn finish(
        &self,
        job_id: Option<&str>,
        notify_url: Option<&Url>,
        context: Value,
        mut trail: Vec<JobState>,
        result: Result<AudioFileMeta, StepFailure>,
    ) -> JobOutcome {
        let notification = match &result {
            Ok(meta) => {
                trail.push(JobState::Notifying(Verdict::Success));
                info!(job_id = job_id.unwrap_or("-"), "Job finished, notifying success");
                Notification::success(job_id.unwrap_or_default(), context, meta.clone())
            }
            Err(failure) => {
                trail.push(JobState::Notifying(Verdict::Failure));
                error!(job_id = job_id.unwrap_or("-"), failure = %failure, "Job failed");
                Notification::failure(job_id, context, failure.to_payload())
            }
        };

        let notified = match notify_url {
            Some(url) => match self.notifier.notify(url, &notification).await {
                Ok(()) => true,
                Err(e) => {
                    warn!(job_id = job_id.unwrap_or("-"), error = %e, "Notification lost");
                    false
                }
            },
            None => {
                warn!(job_id = job_id.unwrap_or("-"), "No usable notify_url, outcome only logged");
                false
            }
        };

        JobOutcome {
            job_id: job_id.map(str::to_string),
            trail,
            result,
            notified,
        }
    }
}

#[async_trait]
impl JobHandler for JobPipeline {
    /// Runs the payload to completion. A failed job is reported back as an error so the queue's
    /// `on_fail` hooks see it; the webhook has already been tried by then.
    async fn handle(&self, job: &QueuedJob) -> anyhow::Result<()> {
        let outcome = self.run(&job.payload).await;
        debug!(
            queue_id = %job.id,
            success = outcome.is_success(),
            notified = outcome.notified,
            trail = ?outcome.trail,
            "Job outcome"
        );
        match outcome.failure() {
            None => Ok(()),
            Some(failure) => Err(anyhow::anyhow!("{}", failure)),
        }
    }
}
