//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid fingerprint: {0}")]
    InvalidFingerprint(String),

    #[error("invalid object name: {0}")]
    InvalidObjectName(String),

    #[error("invalid bucket name: {0}")]
    InvalidBucketName(String),

    #[error("unknown digest algorithm: {0}")]
    UnknownDigest(String),

    #[error("malformed chunk response: {0:?}")]
    MalformedResponse(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
