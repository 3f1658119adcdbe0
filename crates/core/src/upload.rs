//! Upload outcomes and the staging records that persist them.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Result of submitting one chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UploadOutcome {
    /// The session is incomplete; the client should send this index next.
    NextIndex(u32),
    /// All chunks were merged and the final object matches the fingerprint.
    Verified,
    /// The merged object did not match the fingerprint and was removed.
    IntegrityFailed,
}

impl UploadOutcome {
    /// True for either terminal outcome.
    pub fn is_complete(&self) -> bool {
        !matches!(self, Self::NextIndex(_))
    }
}

/// Written next to the first chunk so a later submission declaring a
/// different total can be detected.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMarker {
    pub total_chunks: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
}

impl SessionMarker {
    pub fn new(total_chunks: u32) -> Self {
        Self {
            total_chunks,
            started_at: OffsetDateTime::now_utc(),
        }
    }

    pub fn to_bytes(&self) -> crate::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> crate::Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Terminal state of a session after merge and verification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub total_chunks: u32,
    pub bucket: String,
    pub object: String,
    pub verified: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub completed_at: OffsetDateTime,
}

impl OutcomeRecord {
    pub fn new(total_chunks: u32, bucket: &str, object: &str, verified: bool) -> Self {
        Self {
            total_chunks,
            bucket: bucket.to_string(),
            object: object.to_string(),
            verified,
            completed_at: OffsetDateTime::now_utc(),
        }
    }

    /// The outcome this record replays.
    pub fn outcome(&self) -> UploadOutcome {
        if self.verified {
            UploadOutcome::Verified
        } else {
            UploadOutcome::IntegrityFailed
        }
    }

    /// Whether a submission is a retransmission of the chunk that completed
    /// this session: the last index, same total, same destination.
    pub fn is_final_retry(&self, total_chunks: u32, index: u32, bucket: &str, object: &str) -> bool {
        self.total_chunks == total_chunks
            && index + 1 == total_chunks
            && self.bucket == bucket
            && self.object == object
    }

    pub fn to_bytes(&self) -> crate::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> crate::Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
