//! API error types with the structured JSON error body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::auth::AuthError;
use crate::db::DatabaseError;

/// Error response body. `error` carries the canonical reason phrase,
/// `message` the human-readable detail.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub status_code: u16,
    pub timestamp: String,
    pub error: &'static str,
    pub message: String,
}

/// API-level errors with HTTP status mapping.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, message) = match self {
            ApiError::BadRequest(detail) => (StatusCode::BAD_REQUEST, "Bad Request", detail),
            ApiError::Unauthorized(detail) => (StatusCode::UNAUTHORIZED, "Unauthorized", detail),
            ApiError::NotFound(detail) => (StatusCode::NOT_FOUND, "Not Found", detail),
            ApiError::Conflict(detail) => (StatusCode::CONFLICT, "Conflict", detail),
            ApiError::ServiceUnavailable(detail) => {
                (StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable", detail)
            }
            ApiError::Internal(detail) => {
                tracing::error!(detail, "API internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = ErrorBody {
            status_code: status.as_u16(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            error,
            message,
        };

        (status, Json(body)).into_response()
    }
}

impl From<DatabaseError> for ApiError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::NotFound { entity_type, .. } => {
                ApiError::NotFound(format!("{entity_type} not found"))
            }
            DatabaseError::ConstraintViolation(detail) => {
                tracing::debug!(detail, "Constraint violation");
                ApiError::Conflict("Resource already exists".to_string())
            }
            DatabaseError::InvalidEnum { field, value } => {
                ApiError::BadRequest(format!("Invalid value for {field}: {value}"))
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidCredentials | AuthError::AccountDeactivated => {
                ApiError::Unauthorized(err.to_string())
            }
            AuthError::InvalidToken => {
                ApiError::Unauthorized("Invalid or expired token".to_string())
            }
            AuthError::TokenIssue(detail) => ApiError::Internal(detail),
        }
    }
}
