//! # Job Failure Taxonomy
//!
//! Every step of the waveform pipeline reports failure as a [`JobError`]. The variant tells the
//! webhook receiver *what kind* of thing went wrong:
//!
//! - **Validation**: the request or the dequeued payload broke the closed schema
//! - **Transfer**: a network or filesystem problem while fetching or uploading
//! - **Probe**: the audio file itself was rejected (no audio, too many channels, bad format/codec)
//! - **Generation**: `audiowaveform` failed to spawn or exited non-zero
//!
//! Notification failures are deliberately *not* part of this enum. They are best-effort and only
//! ever logged, so they get their own [`NotificationError`] type that the pipeline never escalates.

use serde::Serialize;
use thiserror::Error;

/// A failure of one pipeline step.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum JobError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Transfer(String),

    #[error("{0}")]
    Probe(String),

    #[error("{0}")]
    Generation(String),
}

impl JobError {
    /// Stable machine-readable name, sent as `err.name` in the webhook payload.
    pub fn kind(&self) -> &'static str {
        match self {
            JobError::Validation(_) => "ValidationError",
            JobError::Transfer(_) => "TransferError",
            JobError::Probe(_) => "ProbeError",
            JobError::Generation(_) => "GenerationError",
        }
    }

    /// Serialized form carried by a failure notification.
    pub fn to_payload(&self) -> SerializedError {
        SerializedError {
            name: self.kind().to_string(),
            message: self.to_string(),
            stage: None,
        }
    }
}

/// The durable part of a failure: its kind and message. Backtraces stay in the logs.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SerializedError {
    pub name: String,
    pub message: String,
    /// Pipeline state the failure happened in.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
}

/// Webhook delivery failure. Logged by the notifier, never propagated to the job outcome.
#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Notification request failed: {0}")]
    Network(String),

    #[error("Notification endpoint answered {0}: {1}")]
    Status(u16, String),
}
