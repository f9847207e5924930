use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Errors raised by the queue engine and its stores.
#[derive(Debug)]
pub enum QueueError {
    TenantNotFound,
    MessageNotFound,
    InvalidState(String),
    /// Input rejected before it reached the store.
    Validation(String),
    Conflict(String),
    Storage(String),
}

impl std::fmt::Display for QueueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueError::TenantNotFound => write!(f, "Tenant not found"),
            QueueError::MessageNotFound => write!(f, "Message not found"),
            QueueError::InvalidState(msg) => write!(f, "Invalid state: {msg}"),
            QueueError::Validation(msg) => write!(f, "Validation error: {msg}"),
            QueueError::Conflict(msg) => write!(f, "Conflict: {msg}"),
            QueueError::Storage(msg) => write!(f, "Storage error: {msg}"),
        }
    }
}

impl std::error::Error for QueueError {}

impl From<sqlx::Error> for QueueError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                QueueError::Conflict(db_err.message().to_string())
            }
            _ => QueueError::Storage(err.to_string()),
        }
    }
}

#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    Unauthorized(String),
    Forbidden(String),
    BadRequest(String),
    Internal(String),
    Queue(QueueError),
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppError::NotFound(msg) => write!(f, "Not Found: {msg}"),
            AppError::Unauthorized(msg) => write!(f, "Unauthorized: {msg}"),
            AppError::Forbidden(msg) => write!(f, "Forbidden: {msg}"),
            AppError::BadRequest(msg) => write!(f, "Bad Request: {msg}"),
            AppError::Internal(msg) => write!(f, "Internal Error: {msg}"),
            AppError::Queue(err) => write!(f, "Queue Error: {err}"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone()),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "unauthorized", msg.clone()),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, "forbidden", msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone()),
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {msg}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal",
                    "Internal server error".to_string(),
                )
            }
            AppError::Queue(err) => match err {
                QueueError::TenantNotFound => {
                    (StatusCode::NOT_FOUND, "tenant_not_found", err.to_string())
                }
                QueueError::MessageNotFound => {
                    (StatusCode::NOT_FOUND, "message_not_found", err.to_string())
                }
                QueueError::InvalidState(msg) => {
                    (StatusCode::CONFLICT, "invalid_state", msg.clone())
                }
                QueueError::Validation(msg) => {
                    (StatusCode::BAD_REQUEST, "bad_request", msg.clone())
                }
                QueueError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg.clone()),
                QueueError::Storage(msg) => {
                    tracing::error!("Storage error: {msg}");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "internal",
                        "Internal server error".to_string(),
                    )
                }
            },
        };

        let body = json!({ "error": message, "code": code });
        (status, axum::Json(body)).into_response()
    }
}

impl From<QueueError> for AppError {
    fn from(err: QueueError) -> Self {
        AppError::Queue(err)
    }
}
