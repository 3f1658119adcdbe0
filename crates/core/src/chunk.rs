//! Staging key layout for chunked uploads.
//!
//! Every session owns the prefix `<fingerprint>/` in the staging bucket.
//! Chunk bytes live under decimal index keys; the two dot-prefixed markers
//! never parse as an index, so listing-based progress ignores them.

use crate::hash::Fingerprint;

/// Trailing component of the session marker key.
pub const SESSION_MARKER: &str = ".session";

/// Trailing component of the outcome record key.
pub const OUTCOME_RECORD: &str = ".outcome";

/// Key builder for one session's staging namespace.
#[derive(Clone, Copy, Debug)]
pub struct ChunkKey<'a>(&'a Fingerprint);

impl<'a> ChunkKey<'a> {
    pub fn new(fingerprint: &'a Fingerprint) -> Self {
        Self(fingerprint)
    }

    /// Listing prefix covering every object of the session.
    pub fn prefix(&self) -> String {
        format!("{}/", self.0)
    }

    /// Key of the chunk at `index`.
    pub fn chunk(&self, index: u32) -> String {
        format!("{}/{}", self.0, index)
    }

    /// Keys of chunks `0..total` in ascending order.
    pub fn chunks(&self, total: u32) -> Vec<String> {
        (0..total).map(|i| self.chunk(i)).collect()
    }

    pub fn session_marker(&self) -> String {
        format!("{}/{}", self.0, SESSION_MARKER)
    }

    pub fn outcome_record(&self) -> String {
        format!("{}/{}", self.0, OUTCOME_RECORD)
    }
}

/// Extract the chunk index from a staging key.
///
/// Returns `None` unless the trailing path component is a plain decimal
/// integer that fits in a `u32`.
pub fn parse_chunk_index(key: &str) -> Option<u32> {
    let last = key.rsplit('/').next()?;
    if last.is_empty() || !last.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    last.parse().ok()
}

/// Number of chunks needed for `size` bytes. An empty file still takes one.
pub fn chunk_count(size: u64, chunk_size: u64) -> u64 {
    if size == 0 {
        return 1;
    }
    size.div_ceil(chunk_size)
}
