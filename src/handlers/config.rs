use crate::{error::AppResult, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

/// `GET /api/v1/config`: the configuration the service started with.
///
/// There is no update endpoint; changing configuration means restarting.
pub async fn get_config(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let config = &state.config;

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": {
            "server": {
                "host": config.server.host,
                "port": config.server.port
            },
            "security": {
                "allowed_domains": state.validator.domains().patterns()
            },
            "queue": {
                "concurrency": config.queue.concurrency,
                "state_dir": config.queue.state_dir,
                "job_name": config.queue.job_name
            },
            "tools": {
                "ffprobe_bin": config.tools.ffprobe_bin,
                "audiowaveform_bin": config.tools.audiowaveform_bin,
                "scratch_dir": config.tools.scratch_dir
            },
            "http": {
                "timeout_seconds": config.http.timeout_seconds
            }
        }
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::test_state;
    use actix_web::{test, App};

    #[actix_web::test]
    async fn test_config_is_exposed_read_only() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path(), &["*.example.com", "cdn.example.org"]).await;

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/config", web::get().to(get_config)),
        )
        .await;

        let body: serde_json::Value =
            test::call_and_read_body_json(&app, test::TestRequest::get().uri("/config").to_request()).await;
        assert_eq!(
            body["config"]["security"]["allowed_domains"],
            json!(["*.example.com", "cdn.example.org"])
        );
        assert_eq!(body["config"]["queue"]["job_name"], "waveform");

        let response = test::call_service(&app, test::TestRequest::put().uri("/config").to_request()).await;
        assert_eq!(response.status(), actix_web::http::StatusCode::NOT_FOUND);
    }
}
