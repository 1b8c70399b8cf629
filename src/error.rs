//! # Error Handling
//!
//! This module defines the errors the HTTP API can return and how they turn into responses.
//! Job-time failures never come through here: they are reported asynchronously through the job's
//! webhook (see [`crate::job::error`]).
//!
//! ## Error Conversion:
//! - **ResponseError**: every [`AppError`] renders as a JSON body with a matching status code
//! - **From impls**: `?` works on serde_json, validation and queue errors
//! - **Display**: human-readable message used in logs

use crate::job::JobError;
use crate::queue::QueueError;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Custom error types for the application.
///
/// ## Error Categories:
/// - **Internal**: Server-side problems (500 errors)
/// - **BadRequest**: Client sent malformed data (400 errors)
/// - **NotFound**: Requested resource doesn't exist (404 errors)
/// - **ValidationError**: A submission broke the request schema (400 errors)
/// - **QueueError**: The job could not be enqueued (500 errors)
#[derive(Debug)]
pub enum AppError {
    Internal(String),

    BadRequest(String),

    NotFound(String),

    ValidationError(String),

    QueueError(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::QueueError(msg) => write!(f, "Queue error: {}", msg),
        }
    }
}

/// Converts errors into JSON HTTP responses.
///
/// ## JSON Response Format:
/// ```json
/// {
///   "error": {
///     "type": "validation_error",
///     "message": "Unrecognized key(s) in object: 'foo'",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        use actix_web::http::StatusCode;
        match self {
            AppError::BadRequest(_) | AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Internal(_) | AppError::QueueError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let (error_type, message) = match self {
            AppError::Internal(msg) => ("internal_error", msg),
            AppError::BadRequest(msg) => ("bad_request", msg),
            AppError::NotFound(msg) => ("not_found", msg),
            AppError::ValidationError(msg) => ("validation_error", msg),
            AppError::QueueError(msg) => ("queue_error", msg),
        };

        HttpResponse::build(self.status_code()).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

/// JSON parsing errors are almost always the client's fault, so they map to 400.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

/// Only validation failures can happen at submission time; the other kinds are job-time.
impl From<JobError> for AppError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::Validation(msg) => AppError::ValidationError(msg),
            other => AppError::Internal(format!("{}: {}", other.kind(), other)),
        }
    }
}

impl From<QueueError> for AppError {
    fn from(err: QueueError) -> Self {
        AppError::QueueError(err.to_string())
    }
}

/// Shorthand for `Result<T, AppError>`, the return type of every handler.
pub type AppResult<T> = Result<T, AppError>;
