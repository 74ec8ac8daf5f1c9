use crate::services::transfer_store::CommitError;
use crate::utils::validation::ValidationError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DepositError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Commit(#[from] CommitError),

    #[error("authentication required")]
    Unauthorized,

    #[error("not authorized for this project")]
    Forbidden,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("upload timed out")]
    UploadTimeout,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for DepositError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            DepositError::Validation(ref e) => (validation_status(e), self.to_string()),
            DepositError::Commit(e) => return e.into_response(),
            DepositError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            DepositError::Forbidden => (StatusCode::FORBIDDEN, self.to_string()),
            DepositError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            DepositError::NotImplemented(msg) => (StatusCode::NOT_IMPLEMENTED, msg),
            DepositError::UploadTimeout => (StatusCode::REQUEST_TIMEOUT, self.to_string()),
            DepositError::Database(e) => {
                tracing::error!("database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_string(),
                )
            }
            DepositError::Internal(e) => {
                tracing::error!("internal error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_string(),
                )
            }
        };

        let body = Json(json!({ "error": message }));
        (status, body).into_response()
    }
}

/// One protocol status per validation failure kind.
fn validation_status(e: &ValidationError) -> StatusCode {
    match e {
        ValidationError::ContentDispositionInvalid => StatusCode::PRECONDITION_FAILED,
        ValidationError::ChecksumMissing => StatusCode::PRECONDITION_FAILED,
        ValidationError::ContentLengthMissing => StatusCode::LENGTH_REQUIRED,
        ValidationError::ContentLengthInvalid => StatusCode::LENGTH_REQUIRED,
        ValidationError::ContentTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        ValidationError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        ValidationError::PackagingInvalid(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
    }
}

impl IntoResponse for CommitError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            CommitError::ChecksumMismatch { .. } | CommitError::Truncated { .. } => {
                (StatusCode::PRECONDITION_FAILED, self.to_string())
            }
            CommitError::Io(e) => {
                tracing::error!("storage i/o error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_string(),
                )
            }
            CommitError::Db(e) => {
                tracing::error!("database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_string(),
                )
            }
        };

        let body = Json(json!({ "error": message }));
        (status, body).into_response()
    }
}
