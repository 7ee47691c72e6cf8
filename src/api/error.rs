//! API Error Types
//!
//! Client errors carry their full message. Server errors answer with a
//! generic message and the request id; the cause is only logged.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::cache::CacheError;
use crate::cluster::ExecError;
use crate::engine::EngineError;

#[derive(Error, Debug)]
pub enum ApiError {
    /// A request parameter is missing or malformed
    #[error("Validation error: {message}")]
    Validation { request_id: String, message: String },

    /// An engine operation failed
    #[error("{source}")]
    Engine {
        request_id: String,
        source: EngineError,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ApiError {
    pub fn validation(request_id: &str, message: impl Into<String>) -> Self {
        ApiError::Validation {
            request_id: request_id.to_string(),
            message: message.into(),
        }
    }

    pub fn engine(request_id: &str, source: EngineError) -> Self {
        ApiError::Engine {
            request_id: request_id.to_string(),
            source,
        }
    }

    fn status(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Validation { .. } => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            ApiError::Engine { source, .. } if source.is_client_error() => {
                (StatusCode::BAD_REQUEST, "BAD_QUERY")
            }
            ApiError::Engine { source, .. } => match source {
                EngineError::Exec(ExecError::DeadlineExceeded)
                | EngineError::Render(crate::render::RenderError::Exec(ExecError::DeadlineExceeded)) => {
                    (StatusCode::GATEWAY_TIMEOUT, "DEADLINE_EXCEEDED")
                }
                EngineError::Cache(CacheError::Shutdown) => {
                    (StatusCode::SERVICE_UNAVAILABLE, "SHUTTING_DOWN")
                }
                EngineError::Exec(ExecError::PoolExhausted { .. }) => {
                    (StatusCode::SERVICE_UNAVAILABLE, "OVERLOADED")
                }
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            },
            ApiError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR"),
        }
    }

    fn request_id(&self) -> String {
        match self {
            ApiError::Validation { request_id, .. } | ApiError::Engine { request_id, .. } => {
                request_id.clone()
            }
            ApiError::Io(_) => uuid::Uuid::new_v4().to_string(),
        }
    }
}

/// Error response body
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
    pub request_id: String,
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status();
        let request_id = self.request_id();

        let message = if status == StatusCode::BAD_REQUEST {
            tracing::debug!(request_id = %request_id, error = %self, "Rejected request");
            self.to_string()
        } else {
            tracing::error!(
                request_id = %request_id,
                error_code = %code,
                error_message = %self,
                "Request failed"
            );
            format!("{} (request id {})", status.canonical_reason().unwrap_or("Error"), request_id)
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
            },
            request_id,
        };

        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
