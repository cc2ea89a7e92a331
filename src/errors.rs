use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

/// JSON-RPC code used for handler failures that do not carry their own.
pub const HANDLER_FAILURE_CODE: i64 = -32603;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("bad request: {message}")]
    BadRequest { code: &'static str, message: String },
    #[error("unauthorized: {message}")]
    Unauthorized {
        code: &'static str,
        message: &'static str,
    },
    #[error("unknown operation: {name}")]
    UnknownOperation { name: String },
    #[error("handler failure: {message}")]
    HandlerFailure { rpc_code: i64, message: String },
    #[error("internal error")]
    Internal { code: &'static str, message: String },
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    pub details: serde_json::Value,
}

impl AppError {
    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::BadRequest {
            code,
            message: message.into(),
        }
    }

    pub fn unauthorized(code: &'static str, message: &'static str) -> Self {
        Self::Unauthorized { code, message }
    }

    pub fn unknown_operation(name: impl Into<String>) -> Self {
        Self::UnknownOperation { name: name.into() }
    }

    pub fn handler_failure(message: impl Into<String>) -> Self {
        Self::HandlerFailure {
            rpc_code: HANDLER_FAILURE_CODE,
            message: message.into(),
        }
    }

    /// A handler failure that surfaces a handler-chosen JSON-RPC code.
    pub fn handler_failure_with_code(rpc_code: i64, message: impl Into<String>) -> Self {
        Self::HandlerFailure {
            rpc_code,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            code: "internal_error",
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            Self::BadRequest { code, message } => (StatusCode::BAD_REQUEST, code, message),
            Self::Unauthorized { code, message } => {
                (StatusCode::UNAUTHORIZED, code, message.to_string())
            }
            Self::UnknownOperation { name } => (
                StatusCode::NOT_FOUND,
                "unknown_operation",
                format!("unknown operation: {name}"),
            ),
            Self::HandlerFailure { message, .. } => {
                tracing::error!(error = %message, "request failed in handler");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "handler_failure",
                    "internal server error".to_string(),
                )
            }
            Self::Internal { code, message } => {
                tracing::error!(error = %message, "request failed with internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    code,
                    "internal server error".to_string(),
                )
            }
        };

        (
            status,
            Json(ErrorResponse {
                code: code.to_string(),
                message,
                details: json!({}),
            }),
        )
            .into_response()
    }
}
