//! API error type and its JSON rendering.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use fathom_engine::EngineError;
use serde::Serialize;

/// Errors returned by API handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Malformed request that never reached the engine.
    #[error("invalid request: {message}")]
    InvalidRequest {
        /// Description of the problem.
        message: String,
    },

    /// An error from the storage engine.
    #[error("{0}")]
    Engine(#[from] EngineError),
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: String,
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            Self::Engine(e) => match e {
                EngineError::InvalidParameter(_) => StatusCode::BAD_REQUEST,
                EngineError::NotFound(_) => StatusCode::NOT_FOUND,
                EngineError::InsufficientReplicas { .. } => StatusCode::SERVICE_UNAVAILABLE,
                EngineError::QuorumNotReached { .. } => StatusCode::SERVICE_UNAVAILABLE,
                EngineError::Disabled(_) => StatusCode::CONFLICT,
                EngineError::Meta(_) | EngineError::Repair(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest { .. } => "InvalidRequest",
            Self::Engine(e) => match e {
                EngineError::InvalidParameter(_) => "InvalidParameter",
                EngineError::NotFound(_) => "NotFound",
                EngineError::InsufficientReplicas { .. } => "InsufficientReplicas",
                EngineError::QuorumNotReached { .. } => "QuorumNotReached",
                EngineError::Disabled(_) => "Conflict",
                EngineError::Meta(_) | EngineError::Repair(_) => "InternalError",
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::warn!(error = %self, %status, "request failed");
        }
        let body = ErrorBody {
            error: self.code(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
