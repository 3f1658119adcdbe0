//! API error types.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chunkyard_storage::StorageError;
use chunkyard_upload::UploadError;
use serde::Serialize;

/// API error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("{0}")]
    Upload(#[from] UploadError),

    #[error("core error: {0}")]
    Core(#[from] chunkyard_core::Error),
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::Internal(_) => "internal_error",
            Self::Storage(e) => storage_code(e),
            Self::Upload(e) => match e {
                UploadError::Storage(e) => storage_code(e),
                UploadError::SessionStateMismatch { .. } => "session_state_mismatch",
                UploadError::AlreadyMerged { .. } => "already_merged",
                UploadError::ComposeFailed { .. } => "compose_failed",
                UploadError::InvalidRequest(_) => "bad_request",
                UploadError::CorruptRecord { .. } => "corrupt_session",
            },
            Self::Core(_) => "bad_request",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Storage(e) => storage_status(e),
            Self::Upload(e) => match e {
                UploadError::Storage(e) => storage_status(e),
                UploadError::SessionStateMismatch { .. } | UploadError::AlreadyMerged { .. } => {
                    StatusCode::CONFLICT
                }
                UploadError::ComposeFailed { .. } => StatusCode::SERVICE_UNAVAILABLE,
                UploadError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
                UploadError::CorruptRecord { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Core(_) => StatusCode::BAD_REQUEST,
        }
    }
}

fn storage_code(e: &StorageError) -> &'static str {
    match e {
        StorageError::NotFound(_) => "not_found",
        StorageError::BucketNotFound(_) => "bucket_not_found",
        StorageError::BucketAlreadyExists(_) => "bucket_exists",
        StorageError::BucketNotEmpty(_) => "bucket_not_empty",
        StorageError::InvalidBucket(_) | StorageError::InvalidKey(_) => "bad_request",
        StorageError::Unsupported(_) => "unsupported",
        StorageError::Io(_) | StorageError::S3(_) | StorageError::Config(_) => "storage_error",
    }
}

fn storage_status(e: &StorageError) -> StatusCode {
    match e {
        StorageError::NotFound(_) | StorageError::BucketNotFound(_) => StatusCode::NOT_FOUND,
        StorageError::BucketAlreadyExists(_) | StorageError::BucketNotEmpty(_) => {
            StatusCode::CONFLICT
        }
        StorageError::InvalidBucket(_) | StorageError::InvalidKey(_) => StatusCode::BAD_REQUEST,
        StorageError::Unsupported(_) => StatusCode::NOT_IMPLEMENTED,
        StorageError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        StorageError::Io(_) | StorageError::S3(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        let body = ErrorResponse {
            code: self.code().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
