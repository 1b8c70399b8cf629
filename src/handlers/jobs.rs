use crate::error::{AppError, AppResult};
use crate::job::JobRequest;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;
use tracing::{info, warn};

/// `POST /v1/create`: validate a waveform request, assign it a job id and enqueue it.
///
/// ## Responses:
/// - `200 {"success": true, "job": <handle>}` once the job is persisted
/// - `400` when the body is not JSON or breaks the request schema; nothing is enqueued
/// - `500` when the queue cannot persist the job
///
/// The body is parsed by hand rather than through `web::Json` so malformed JSON gets the same
/// error envelope as a schema violation.
pub async fn create_job(state: web::Data<AppState>, body: web::Bytes) -> AppResult<HttpResponse> {
    let body: serde_json::Value = serde_json::from_slice(&body).map_err(|e| {
        state.jobs.record_rejected();
        AppError::from(e)
    })?;

    let request = state.validator.validate_request(&body).map_err(|e| {
        warn!(error = %e, "Submission rejected");
        state.jobs.record_rejected();
        AppError::from(e)
    })?;

    let job = JobRequest::assign(request);
    let handle = state
        .queue
        .enqueue(&state.config.queue.job_name, job.to_payload())
        .await?;
    state.jobs.record_submitted();

    info!(
        job_id = %job.job_id,
        queue_id = %handle.id,
        input_url = %job.request.input_url,
        "Job submitted"
    );

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "job": handle
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Validator;
    use crate::queue::JobStore;
    use crate::state::tests::test_state;
    use actix_web::http::StatusCode;
    use actix_web::{test, App};
    use serde_json::Value;

    fn body() -> Value {
        json!({
            "input_url": "https://media.example.com/talk.wav",
            "input_format": "wav",
            "output_format": "json",
            "output_url": "https://media.example.com/talk.json",
            "channel_mode": "single",
            "bit_depth": 16,
            "notify_url": "https://hooks.example.com/waveform",
            "context": {"episode": 12}
        })
    }

    async fn post(state: AppState, payload: Vec<u8>) -> (StatusCode, Value) {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/v1/create", web::post().to(create_job)),
        )
        .await;

        let request = test::TestRequest::post()
            .uri("/v1/create")
            .insert_header(("content-type", "application/json"))
            .set_payload(payload)
            .to_request();
        let response = test::call_service(&app, request).await;
        let status = response.status();
        let body: Value = test::read_body_json(response).await;
        (status, body)
    }

    fn persisted(dir: &std::path::Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[actix_web::test]
    async fn test_valid_submission_is_enqueued() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path(), &["*.example.com"]).await;
        let jobs = state.jobs.clone();

        let (status, response) = post(state, serde_json::to_vec(&body()).unwrap()).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(response["success"], true);
        assert_eq!(response["job"]["name"], "waveform");
        let job_id = response["job"]["job_id"].as_str().unwrap();
        assert!(uuid::Uuid::parse_str(job_id).is_ok());
        assert_eq!(jobs.snapshot().submitted, 1);

        // no handler is defined in this test, so the record stays on disk
        let records = JobStore::open(dir.path()).await.unwrap().load_all().await.unwrap();
        assert_eq!(records.len(), 1);
        let validator = Validator::new(crate::job::DomainMatcher::new(&["*.example.com"]).unwrap());
        let job = validator.validate_job(&records[0].payload).unwrap();
        assert_eq!(job.job_id, job_id);
        assert_eq!(job.request.context, json!({"episode": 12}));
    }

    #[actix_web::test]
    async fn test_host_outside_allow_list_is_not_enqueued() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path(), &["*.example.com"]).await;
        let jobs = state.jobs.clone();

        let mut payload = body();
        payload["input_url"] = json!("https://evil.net/a.wav");
        let (status, response) = post(state, serde_json::to_vec(&payload).unwrap()).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(response["error"]["type"], "validation_error");
        assert_eq!(
            response["error"]["message"],
            "Invalid domain for 'input_url': host 'evil.net' is not allowed."
        );
        assert_eq!(persisted(dir.path()), 0);
        assert_eq!(jobs.snapshot().rejected, 1);
        assert_eq!(jobs.snapshot().submitted, 0);
    }

    #[actix_web::test]
    async fn test_job_id_in_submission_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path(), &["*"]).await;

        let mut payload = body();
        payload["job_id"] = json!("chosen-by-caller");
        let (status, response) = post(state, serde_json::to_vec(&payload).unwrap()).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            response["error"]["message"],
            "Unrecognized key(s) in object: 'job_id'"
        );
        assert_eq!(persisted(dir.path()), 0);
    }

    #[actix_web::test]
    async fn test_malformed_json_is_a_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path(), &["*"]).await;

        let (status, response) = post(state, b"{\"input_url\":".to_vec()).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(response["error"]["type"], "bad_request");
    }

    #[actix_web::test]
    async fn test_queue_failure_is_a_server_error() {
        let dir = tempfile::tempdir().unwrap();
        let queue_dir = dir.path().join("queue");
        let state = test_state(&queue_dir, &["*"]).await;
        std::fs::remove_dir_all(&queue_dir).unwrap();

        let (status, response) = post(state, serde_json::to_vec(&body()).unwrap()).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response["error"]["type"], "queue_error");
    }
}
