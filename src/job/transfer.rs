//! # Transfers
//!
//! Moves bytes between remote URLs and the job's scratch files. Both directions stream, so a
//! large source never sits in memory, and both are single attempt: retry policy belongs to
//! whoever re-enqueues the job.
//!
//! ## Completion rule for downloads:
//! The scratch file only counts as complete after the response body has ended cleanly *and*
//! the file has been flushed and synced. Any chunk error or write error fails the step, and the
//! pipeline drops the partially written file with the rest of its scratch space.

use crate::job::error::JobError;
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use std::path::Path;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{error, info};
use url::Url;

#[async_trait]
pub trait Transfer: Send + Sync {
    /// Stream `source` into `destination`, returning the number of bytes written.
    async fn fetch(&self, source: &Url, destination: &Path) -> Result<u64, JobError>;

    /// Upload `source` to `destination` as an opaque octet stream.
    async fn push(&self, source: &Path, destination: &Url) -> Result<(), JobError>;
}

/// [`Transfer`] over plain HTTP(S): `GET` to fetch, `PUT` to push.
#[derive(Clone)]
pub struct HttpTransferer {
    client: Client,
}

impl HttpTransferer {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transfer for HttpTransferer {
    async fn fetch(&self, source: &Url, destination: &Path) -> Result<u64, JobError> {
        info!(source = %source, destination = %destination.display(), "Downloading");

        let response = self
            .client
            .get(source.clone())
            .send()
            .await
            .map_err(|e| transfer_error("Download failed", e))?;

        let status = response.status();
        info!(status = status.as_u16(), "Download response");
        if !status.is_success() {
            return Err(status_error("Download failed", status));
        }

        let mut file = File::create(destination)
            .await
            .map_err(|e| transfer_error("Cannot create scratch file", e))?;

        let mut body = response.bytes_stream();
        let mut written: u64 = 0;
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| transfer_error("Download interrupted", e))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| transfer_error("Cannot write scratch file", e))?;
            written += chunk.len() as u64;
        }

        file.flush()
            .await
            .map_err(|e| transfer_error("Cannot write scratch file", e))?;
        file.sync_all()
            .await
            .map_err(|e| transfer_error("Cannot write scratch file", e))?;

        info!(bytes = written, "Download finished");
        Ok(written)
    }

    async fn push(&self, source: &Path, destination: &Url) -> Result<(), JobError> {
        info!(source = %source.display(), destination = %destination, "Uploading");

        let file = File::open(source)
            .await
            .map_err(|e| transfer_error(&format!("Upload source {} unavailable", source.display()), e))?;
        let length = file
            .metadata()
            .await
            .map_err(|e| transfer_error("Cannot stat upload source", e))?
            .len();

        let response = self
            .client
            .put(destination.clone())
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(CONTENT_LENGTH, length)
            .body(reqwest::Body::wrap_stream(ReaderStream::new(file)))
            .send()
            .await
            .map_err(|e| transfer_error("Upload failed", e))?;

        let status = response.status();
        info!(status = status.as_u16(), bytes = length, "Upload response");
        if !status.is_success() {
            return Err(status_error("Upload failed", status));
        }

        Ok(())
    }
}

fn transfer_error(context: &str, err: impl std::fmt::Display) -> JobError {
    let message = format!("{}: {}", context, err);
    error!("{}", message);
    JobError::Transfer(message)
}

fn status_error(context: &str, status: StatusCode) -> JobError {
    let message = format!(
        "{}: HTTP {} {}",
        context,
        status.as_u16(),
        status.canonical_reason().unwrap_or("")
    );
    error!("{}", message.trim_end());
    JobError::Transfer(message.trim_end().to_string())
}
