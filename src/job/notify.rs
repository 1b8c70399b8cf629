//! Webhook delivery of a job's terminal outcome.
//!
//! The success notification is the only completion record a caller ever receives, but delivery
//! is still single attempt: a failed POST is logged here and reported to the pipeline, which
//! records it and moves on.

use crate::job::error::{NotificationError, SerializedError};
use crate::job::probe::AudioFileMeta;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, warn};
use url::Url;

/// Body of `POST <notify_url>`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub id: Option<String>,
    pub context: Value,
    pub meta: Option<AudioFileMeta>,
    pub err: Option<SerializedError>,
}

impl Notification {
    pub fn success(id: &str, context: Value, meta: AudioFileMeta) -> Self {
        Self {
            id: Some(id.to_string()),
            context,
            meta: Some(meta),
            err: None,
        }
    }

    pub fn failure(id: Option<&str>, context: Value, err: SerializedError) -> Self {
        Self {
            id: id.map(str::to_string),
            context,
            meta: None,
            err: Some(err),
        }
    }

    pub fn is_success(&self) -> bool {
        self.err.is_none()
    }
}

#[async_trait]
pub trait Notify: Send + Sync {
    async fn notify(&self, url: &Url, notification: &Notification) -> Result<(), NotificationError>;
}

pub struct WebhookNotifier {
    client: Client,
}

impl WebhookNotifier {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Notify for WebhookNotifier {
    async fn notify(&self, url: &Url, notification: &Notification) -> Result<(), NotificationError> {
        info!(
            notify_url = %url,
            job_id = notification.id.as_deref().unwrap_or("-"),
            success = notification.is_success(),
            "Notifying"
        );

        let response = match self.client.post(url.clone()).json(notification).send().await {
            Ok(response) => response,
            Err(e) => {
                error!(notify_url = %url, error = %e, "Notification request failed");
                return Err(NotificationError::Network(e.to_string()));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!(notify_url = %url, status = status.as_u16(), "Notification rejected");
            return Err(NotificationError::Status(status.as_u16(), text));
        }

        info!(status = status.as_u16(), "Notification delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::error::JobError;
    use httpmock::prelude::*;
    use serde_json::json;

    fn meta() -> AudioFileMeta {
        AudioFileMeta {
            sample_rate: 44100,
            channels: 2,
            duration: 1.5,
            time_base: "1/44100".into(),
            format_name: "flac".into(),
            codec_name: "flac".into(),
            size: 1000,
            bit_depth: Some(16),
            duration_in_samples: 66150,
        }
    }

    #[test]
    fn test_success_payload_shape() {
        let json = serde_json::to_value(Notification::success("job-1", json!({"a": 1}), meta())).unwrap();
        assert_eq!(json["id"], "job-1");
        assert_eq!(json["context"], json!({"a": 1}));
        assert!(json["err"].is_null());
        assert_eq!(json["meta"]["duration_in_samples"], 66150);
        assert_eq!(json["meta"]["bit_depth"], 16);
    }

    #[test]
    fn test_failure_payload_shape() {
        let err = JobError::Transfer("Download failed: HTTP 404 Not Found".into());
        let json = serde_json::to_value(Notification::failure(Some("job-2"), Value::Null, err.to_payload())).unwrap();
        assert!(json["meta"].is_null());
        assert_eq!(json["err"]["name"], "TransferError");
        assert_eq!(json["err"]["message"], "Download failed: HTTP 404 Not Found");
        assert!(json["context"].is_null());
    }

    #[tokio::test]
    async fn test_posts_json_to_webhook() {
        let server = MockServer::start_async().await;
        let notification = Notification::success("job-3", json!("ctx"), meta());
        let expected = serde_json::to_value(&notification).unwrap();
        let mock = server.mock_async(|when, then| {
            when.method(POST).path("/hook").json_body(expected);
            then.status(200);
        }).await;

        let notifier = WebhookNotifier::new(Client::new());
        let url = Url::parse(&server.url("/hook")).unwrap();
        notifier.notify(&url, &notification).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_non_success_status_is_reported() {
        let server = MockServer::start_async().await;
        server.mock_async(|when, then| {
            when.method(POST).path("/hook");
            then.status(502).body("bad gateway");
        }).await;

        let notifier = WebhookNotifier::new(Client::new());
        let url = Url::parse(&server.url("/hook")).unwrap();
        let err = notifier
            .notify(&url, &Notification::success("job-4", Value::Null, meta()))
            .await
            .unwrap_err();
        assert!(matches!(err, NotificationError::Status(502, ref body) if body == "bad gateway"));
    }
}
