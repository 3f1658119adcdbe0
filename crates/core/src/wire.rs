//! Text encoding of chunk responses and the multipart field names of the
//! chunk endpoint.
//!
//! A response body is a single decimal integer: a non-negative value is the
//! next index to send, `-1` means the file was merged and verified, `-2`
//! means verification failed and the upload must restart.

use crate::upload::UploadOutcome;

pub const VERIFIED: &str = "-1";
pub const INTEGRITY_FAILED: &str = "-2";

/// Multipart field names accepted by `POST /objects/chunked`.
pub mod fields {
    pub const FILE: &str = "file";
    pub const SLICE_INDEX: &str = "sliceIndex";
    pub const TOTAL_PIECES: &str = "totalPieces";
    pub const FILE_NAME: &str = "fileName";
    /// Carries the fingerprint whatever digest is configured.
    pub const FINGERPRINT: &str = "md5";
    pub const BUCKET: &str = "bucket";
}

pub fn encode_outcome(outcome: UploadOutcome) -> String {
    match outcome {
        UploadOutcome::NextIndex(n) => n.to_string(),
        UploadOutcome::Verified => VERIFIED.to_string(),
        UploadOutcome::IntegrityFailed => INTEGRITY_FAILED.to_string(),
    }
}

pub fn decode_outcome(body: &str) -> crate::Result<UploadOutcome> {
    let body = body.trim();
    match body {
        VERIFIED => Ok(UploadOutcome::Verified),
        INTEGRITY_FAILED => Ok(UploadOutcome::IntegrityFailed),
        _ => body
            .parse::<u32>()
            .map(UploadOutcome::NextIndex)
            .map_err(|_| crate::Error::MalformedResponse(body.to_string())),
    }
}
