// src/error.rs

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

use crate::store::StoreError;

/// Global Application Error Enum.
/// Centralizes error handling and mapping to HTTP responses.
///
/// Client-input errors (`BadRequest`, `InvalidQuestion`, `SessionNotActive`)
/// reject synchronously with no state mutation. Concurrency errors are
/// retried inside the engine and only surface here once the retry bound is
/// exhausted; the session is then still in its last consistent state.
#[derive(Debug)]
pub enum AppError {
    // 500 Internal Server Error
    InternalServerError(String),

    // 400 Bad Request
    BadRequest(String),

    // 401 Unauthorized
    AuthError(String),

    // 403 Forbidden (capability or ownership check failed)
    Forbidden(String),

    // 404 Not Found
    NotFound(String),

    // 409 Conflict (e.g., duplicate exam id)
    Conflict(String),

    // 422: the question id is not part of the session's exam
    InvalidQuestion(String),

    // 409: operation requires an active session
    SessionNotActive(String),

    // 409: an unterminated attempt already exists for (student, exam)
    DuplicateActiveAttempt,

    // 403: enrollment check rejected the attempt
    AttemptNotAllowed(String),

    // 503: CAS retry bound exhausted; nothing was applied
    ConcurrentUpdateExhausted,
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for AppError {}

/// Implements `IntoResponse` for `AppError`.
/// Converts the error into a JSON response with appropriate HTTP status code.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_string(),
                )
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::AuthError(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::InvalidQuestion(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            AppError::SessionNotActive(msg) => (StatusCode::CONFLICT, msg),
            AppError::DuplicateActiveAttempt => (
                StatusCode::CONFLICT,
                "an active attempt already exists for this exam".to_string(),
            ),
            AppError::AttemptNotAllowed(msg) => (StatusCode::FORBIDDEN, msg),
            AppError::ConcurrentUpdateExhausted => {
                tracing::error!("CAS retry bound exhausted");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "the session is receiving conflicting updates, try again".to_string(),
                )
            }
        };
        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

/// Converts `StoreError` into `AppError`.
/// `Conflict` is normally consumed by the engine's CAS retry loop; one that
/// escapes to a handler maps to 409.
impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => AppError::NotFound("session not found".to_string()),
            StoreError::Conflict { actual } => AppError::SessionNotActive(format!(
                "session state changed concurrently (now {:?})",
                actual
            )),
            StoreError::DuplicateActiveAttempt => AppError::DuplicateActiveAttempt,
            StoreError::AlreadyExists => {
                AppError::Conflict("a record with this id already exists".to_string())
            }
            StoreError::Unavailable(msg) => AppError::InternalServerError(msg),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(err.to_string())
    }
}
