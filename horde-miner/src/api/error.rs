//! API Error Handling
//!
//! Unified error types and conversion for API responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::repository::RepositoryError;
use crate::service::TrackerError;

/// API error type
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Forbidden(String),
    Conflict(String),
    Tracker(TrackerError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Tracker(err) => {
                tracing::error!("Tracker error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<TrackerError> for ApiError {
    fn from(err: TrackerError) -> Self {
        match err {
            TrackerError::NotFound(job_uuid) => {
                ApiError::NotFound(format!("Job {} not found", job_uuid))
            }
            TrackerError::MismatchedJob { .. } => ApiError::BadRequest(err.to_string()),
            TrackerError::InvalidTransition { .. }
            | TrackerError::MissingPayload { .. }
            | TrackerError::PayloadAlreadyAttached { .. }
            | TrackerError::NotReportable { .. }
            | TrackerError::Conflict { .. }
            | TrackerError::Repository(RepositoryError::Conflict(_)) => {
                ApiError::Conflict(err.to_string())
            }
            other => ApiError::Tracker(other),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
