//! HTTP error mapping.
//!
//! Authorization failures map to 401/404 without revealing which check
//! failed; the response bodies are deliberately uniform.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use storymill::db::DatabaseError;
use storymill::pipeline::PipelineError;
use storymill::{CallbackError, StorymillError};

pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    error_code: &'static str,
    reason: String,
}

impl ApiError {
    pub fn not_found() -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            code: "NOT_FOUND",
            message: "not found".to_string(),
        }
    }

    pub fn bad_request(message: &str) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "BAD_REQUEST",
            message: message.to_string(),
        }
    }

    pub fn conflict(message: &str) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            code: "CONFLICT",
            message: message.to_string(),
        }
    }

    fn internal(message: String) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "INTERNAL",
            message,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(code = self.code, reason = %self.message, "request failed");
        }
        (
            self.status,
            Json(ErrorBody {
                error_code: self.code,
                reason: self.message,
            }),
        )
            .into_response()
    }
}

impl From<CallbackError> for ApiError {
    fn from(err: CallbackError) -> Self {
        match err {
            CallbackError::MissingField(field) => {
                Self::bad_request(&format!("missing required field '{}'", field))
            }
            CallbackError::UnknownJob => Self::not_found(),
            CallbackError::TokenMismatch => Self {
                status: StatusCode::UNAUTHORIZED,
                code: "UNAUTHORIZED",
                message: "unauthorized".to_string(),
            },
            CallbackError::NotAwaiting => Self::conflict("job is not awaiting a callback"),
            CallbackError::SecretGeneration(e) => Self::internal(e),
            CallbackError::Database(e) => e.into(),
        }
    }
}

impl From<DatabaseError> for ApiError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::JobNotFound(_) => Self::not_found(),
            DatabaseError::RequeueWhileRunning(_) => {
                Self::conflict("job is running; requeue refused")
            }
            illegal @ DatabaseError::IllegalTransition { .. } => {
                Self::conflict(&illegal.to_string())
            }
            other => Self::internal(other.to_string()),
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::NotRunnable { .. } => Self::conflict(&err.to_string()),
            PipelineError::Database(e) => e.into(),
            other => Self::internal(other.to_string()),
        }
    }
}

impl From<StorymillError> for ApiError {
    fn from(err: StorymillError) -> Self {
        match err {
            StorymillError::Database(e) => e.into(),
            StorymillError::Callback(e) => e.into(),
            StorymillError::Pipeline(e) => e.into(),
            other => Self::internal(other.to_string()),
        }
    }
}
