//! Error handling module

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    #[error("Device unreachable: {0}")]
    DeviceUnreachable(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Parse failure: {0}")]
    ParseFailure(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Duplicate: {0}")]
    Duplicate(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Busy: {0}")]
    Busy(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

/// Machine-checkable error kind, reported next to every message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    DeviceUnreachable,
    PermissionDenied,
    Timeout,
    ParseFailure,
    Validation,
    Persistence,
    Duplicate,
    NotFound,
    Busy,
    Transport,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::DeviceUnreachable => "device_unreachable",
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ParseFailure => "parse_failure",
            ErrorKind::Validation => "validation",
            ErrorKind::Persistence => "persistence",
            ErrorKind::Duplicate => "duplicate",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Busy => "busy",
            ErrorKind::Transport => "transport",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::DeviceUnreachable(_) => ErrorKind::DeviceUnreachable,
            AppError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            AppError::Timeout(_) => ErrorKind::Timeout,
            AppError::ParseFailure(_) => ErrorKind::ParseFailure,
            AppError::Validation(_) => ErrorKind::Validation,
            AppError::Persistence(_) => ErrorKind::Persistence,
            AppError::Duplicate(_) => ErrorKind::Duplicate,
            AppError::NotFound(_) => ErrorKind::NotFound,
            AppError::Busy(_) => ErrorKind::Busy,
            AppError::Transport(_) => ErrorKind::Transport,
            AppError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// The message without the kind prefix added by `Display`.
    pub fn message(&self) -> &str {
        match self {
            AppError::DeviceUnreachable(msg)
            | AppError::PermissionDenied(msg)
            | AppError::Timeout(msg)
            | AppError::ParseFailure(msg)
            | AppError::Validation(msg)
            | AppError::Persistence(msg)
            | AppError::Duplicate(msg)
            | AppError::NotFound(msg)
            | AppError::Busy(msg)
            | AppError::Transport(msg)
            | AppError::Internal(msg) => msg,
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Duplicate(_) => StatusCode::CONFLICT,
            AppError::Busy(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::DeviceUnreachable(_)
            | AppError::PermissionDenied(_)
            | AppError::Transport(_) => StatusCode::BAD_GATEWAY,
            AppError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::ParseFailure(_) | AppError::Persistence(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let label = match &self {
            AppError::Validation(_) => "validation_error",
            _ => "error",
        };

        let body = Json(serde_json::json!({
            "status": label,
            "kind": self.kind(),
            "message": self.message(),
        }));

        (status, body).into_response()
    }
}
