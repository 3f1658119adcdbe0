//! Chunk Tracker: derives session progress from the staging listing.

use crate::error::UploadResult;
use chunkyard_core::{ChunkKey, Fingerprint, parse_chunk_index};
use chunkyard_storage::{ObjectStore, StorageError};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::instrument;

/// Reads which chunk indices of a session are already staged.
#[derive(Clone)]
pub struct ChunkTracker {
    store: Arc<dyn ObjectStore>,
    staging_bucket: String,
}

impl ChunkTracker {
    pub fn new(store: Arc<dyn ObjectStore>, staging_bucket: impl Into<String>) -> Self {
        Self {
            store,
            staging_bucket: staging_bucket.into(),
        }
    }

    /// Every index staged under the session prefix, markers excluded.
    ///
    /// A staging bucket that does not exist yet holds nothing.
    #[instrument(skip(self), fields(fingerprint = %fingerprint))]
    pub async fn present_indices(&self, fingerprint: &Fingerprint) -> UploadResult<BTreeSet<u32>> {
        let prefix = ChunkKey::new(fingerprint).prefix();
        let keys = match self.store.list(&self.staging_bucket, &prefix).await {
            Ok(keys) => keys,
            Err(StorageError::BucketNotFound(_)) => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(keys
            .iter()
            .filter_map(|k| k.strip_prefix(&prefix))
            // Only direct children of the session prefix are chunks.
            .filter(|rest| !rest.contains('/'))
            .filter_map(parse_chunk_index)
            .collect())
    }

    /// Ascending indices in `[0, total_chunks)` that are not staged yet.
    pub async fn missing_indices(
        &self,
        fingerprint: &Fingerprint,
        total_chunks: u32,
    ) -> UploadResult<Vec<u32>> {
        let present = self.present_indices(fingerprint).await?;
        Ok(missing_from(&present, total_chunks))
    }
}

/// Indices in `[0, total_chunks)` absent from `present`.
pub fn missing_from(present: &BTreeSet<u32>, total_chunks: u32) -> Vec<u32> {
    (0..total_chunks).filter(|i| !present.contains(i)).collect()
}
