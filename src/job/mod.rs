//! # Waveform Jobs
//!
//! Everything needed to turn a submitted request into a peaks artifact:
//!
//! - [`schema`]: the closed request schema and its [`Validator`]
//! - [`domain`]: wildcard host allow-list used by URL validation
//! - [`transfer`]: streaming download and upload
//! - [`probe`]: `ffprobe` inspection and the codec/format/channel gate
//! - [`peaks`]: `audiowaveform` invocation
//! - [`notify`]: the completion webhook
//! - [`pipeline`]: the state machine tying the steps together

pub mod domain;
pub mod error;
pub mod notify;
pub mod peaks;
pub mod pipeline;
pub mod probe;
pub mod schema;
pub mod transfer;

pub use domain::DomainMatcher;
pub use error::JobError;
pub use notify::WebhookNotifier;
pub use peaks::AudiowaveformGenerator;
pub use pipeline::JobPipeline;
pub use probe::FfprobeProber;
pub use schema::{JobRequest, Validator};
pub use transfer::HttpTransferer;

use std::time::Duration;

/// Outbound client shared by transfers and notifications.
pub fn build_http_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
}
