use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Token-layer rejections. Always raised before any mutation.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    #[error("malformed token")]
    Malformed,

    #[error("token expired")]
    Expired,

    #[error("unknown token")]
    Unknown,

    #[error("token already used")]
    Replayed,
}

impl ValidationError {
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::Malformed => "malformed",
            ValidationError::Expired => "expired",
            ValidationError::Unknown => "unknown",
            ValidationError::Replayed => "replayed",
        }
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum StateError {
    #[error("request is not pending")]
    NotPending,

    #[error("request not found")]
    NotFound,
}

impl StateError {
    pub fn code(&self) -> &'static str {
        match self {
            StateError::NotPending => "not_pending",
            StateError::NotFound => "not_found",
        }
    }
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("permanent delivery failure: {0}")]
    Permanent(String),

    #[error("delivery failed after {attempts} attempts: {last_error}")]
    TransientExhausted { attempts: u32, last_error: String },
}

#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("role grant failed: {0}")]
    GrantFailed(String),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("storage error: {0}")]
    Backend(String),
}

/// Every failure the approval workflow can surface to a caller.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl WorkflowError {
    pub fn code(&self) -> &'static str {
        match self {
            WorkflowError::Validation(e) => e.code(),
            WorkflowError::State(e) => e.code(),
            WorkflowError::Collaborator(_) => "grant_failed",
            WorkflowError::Storage(_) => "internal_server_error",
        }
    }
}

/// HTTP-facing error for the management API.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<StorageError> for AppError {
    fn from(e: StorageError) -> Self {
        AppError::Workflow(WorkflowError::Storage(e))
    }
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Workflow(WorkflowError::Validation(_)) => StatusCode::BAD_REQUEST,
            AppError::Workflow(WorkflowError::State(StateError::NotFound)) => StatusCode::NOT_FOUND,
            AppError::Workflow(WorkflowError::State(StateError::NotPending)) => StatusCode::CONFLICT,
            AppError::Workflow(WorkflowError::Collaborator(_)) => StatusCode::BAD_GATEWAY,
            AppError::Workflow(WorkflowError::Storage(_)) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let (error_type, code, msg) = match &self {
            AppError::BadRequest(m) => ("invalid_request_error", "bad_request", m.clone()),
            AppError::Workflow(WorkflowError::Validation(e)) => {
                ("token_error", e.code(), e.to_string())
            }
            AppError::Workflow(WorkflowError::State(e)) => ("state_error", e.code(), e.to_string()),
            AppError::Workflow(WorkflowError::Collaborator(e)) => {
                tracing::error!("Collaborator error: {}", e);
                ("upstream_error", "grant_failed", "role assignment failed".to_string())
            }
            AppError::Workflow(WorkflowError::Storage(e)) => {
                tracing::error!("Storage error: {}", e);
                (
                    "internal_error",
                    "internal_server_error",
                    "internal server error".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {}", e);
                (
                    "internal_error",
                    "internal_server_error",
                    "internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "message": msg,
                "type": error_type,
                "code": code,
            }
        }));

        (status, body).into_response()
    }
}
