//! Upload protocol errors.

use chunkyard_storage::StorageError;
use thiserror::Error;

/// Errors from the chunked upload protocol.
///
/// A digest mismatch is not an error: it is reported as
/// [`UploadOutcome::IntegrityFailed`](chunkyard_core::UploadOutcome).
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error(
        "session {fingerprint} was started with {recorded} chunks but the request declares {declared}"
    )]
    SessionStateMismatch {
        fingerprint: String,
        declared: u32,
        recorded: u32,
    },

    #[error("session {fingerprint} was already merged; upload under a new fingerprint")]
    AlreadyMerged { fingerprint: String },

    #[error("failed to compose chunks of session {fingerprint}: {source}")]
    ComposeFailed {
        fingerprint: String,
        #[source]
        source: StorageError,
    },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("corrupt session record {key}: {reason}")]
    CorruptRecord { key: String, reason: String },
}

impl UploadError {
    /// Whether the client may retry the same request later.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Storage(e) => !e.is_not_found(),
            Self::ComposeFailed { .. } => true,
            _ => false,
        }
    }
}

/// Result type for upload operations.
pub type UploadResult<T> = std::result::Result<T, UploadError>;
