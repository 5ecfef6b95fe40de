use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::services::queue::QueueError;
use crate::services::retry::RetryError;
use crate::services::store::StoreError;

/// Errors returned by HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error("Task queue unavailable")]
    QueueUnavailable,

    #[error("Database error")]
    Store(#[from] StoreError),
}

impl From<RetryError> for ApiError {
    fn from(err: RetryError) -> Self {
        match err {
            RetryError::NotFound(id) => ApiError::NotFound(format!("Request with ID {id} not found")),
            RetryError::Store(e) => ApiError::Store(e),
            RetryError::Queue(_) => ApiError::QueueUnavailable,
        }
    }
}

impl From<QueueError> for ApiError {
    fn from(_: QueueError) -> Self {
        ApiError::QueueUnavailable
    }
}

impl From<garde::Report> for ApiError {
    fn from(report: garde::Report) -> Self {
        ApiError::Validation(report.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::QueueUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Store(e) => {
                tracing::error!(error = %e, "Store error while handling HTTP request");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}
