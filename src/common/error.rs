use axum::http::StatusCode;
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

use crate::common::keys::KeyError;
use crate::infrastructure::runner::RunnerError;
use crate::infrastructure::storage::StoreError;

/// Failure taxonomy shared by every pipeline operation.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("quota exceeded: {0}")]
    Quota(String),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("submission for '{source_key}' failed after {attempts} attempt(s): {last_error}")]
    SubmissionFailed {
        source_key: String,
        attempts: u32,
        last_error: String,
    },

    #[error("canceled: {0}")]
    Canceled(String),

    #[error("job {job_id} was only partially removed: {detail}")]
    PartialFailure {
        job_id: String,
        canceled: bool,
        deleted: Vec<String>,
        detail: String,
    },

    #[error("registry persistence failed: {0}")]
    Persistence(String),
}

/// Machine readable part of an error response.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorDetail {
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub context: Option<serde_json::Value>,
}

impl AppError {
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "ValidationError",
            AppError::Conflict(_) => "ConflictError",
            AppError::NotFound(_) => "NotFoundError",
            AppError::Quota(_) => "QuotaError",
            AppError::Transport(_) => "TransportError",
            AppError::SubmissionFailed { .. } => "SubmissionFailed",
            AppError::Canceled(_) => "Canceled",
            AppError::PartialFailure { .. } => "PartialFailure",
            AppError::Persistence(_) => "PersistenceError",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Quota(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::Transport(_) | AppError::Canceled(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::SubmissionFailed { .. } | AppError::PartialFailure { .. } => {
                StatusCode::BAD_GATEWAY
            }
            AppError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn detail(&self) -> ErrorDetail {
        let context = match self {
            AppError::SubmissionFailed {
                source_key,
                attempts,
                ..
            } => Some(serde_json::json!({ "source_key": source_key, "attempts": attempts })),
            AppError::PartialFailure {
                job_id,
                canceled,
                deleted,
                ..
            } => Some(serde_json::json!({
                "job_id": job_id,
                "canceled": canceled,
                "deleted": deleted,
            })),
            _ => None,
        };
        ErrorDetail {
            kind: self.kind().to_string(),
            context,
        }
    }
}

impl From<KeyError> for AppError {
    fn from(err: KeyError) -> Self {
        AppError::Validation(err.to_string())
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(key) => AppError::NotFound(format!("object '{}'", key)),
            StoreError::InvalidInput(msg) => AppError::Validation(msg),
            StoreError::Transport(msg) => AppError::Transport(msg),
        }
    }
}

impl From<RunnerError> for AppError {
    fn from(err: RunnerError) -> Self {
        match err {
            RunnerError::Validation(msg) => AppError::Validation(msg),
            RunnerError::Quota(msg) => AppError::Quota(msg),
            RunnerError::NotFound(id) => AppError::NotFound(format!("job '{}'", id)),
            RunnerError::Transport(msg) => AppError::Transport(msg),
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                AppError::Conflict(format!("registry constraint violated: {}", db.message()))
            }
            _ => AppError::Persistence(err.to_string()),
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(err.to_string())
    }
}
