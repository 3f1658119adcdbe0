//! Merger: composes staged chunks into the final object.

use crate::error::{UploadError, UploadResult};
use chunkyard_core::{ChunkKey, Fingerprint};
use chunkyard_storage::{ObjectRef, ObjectStore};
use std::sync::Arc;
use tracing::instrument;

/// A final object produced by [`Merger::merge`], with the staging keys it
/// was built from.
#[derive(Clone, Debug)]
pub struct MergedObject {
    pub object: ObjectRef,
    pub size: u64,
    pub staged_keys: Vec<String>,
}

#[derive(Clone)]
pub struct Merger {
    store: Arc<dyn ObjectStore>,
    staging_bucket: String,
}

impl Merger {
    pub fn new(store: Arc<dyn ObjectStore>, staging_bucket: impl Into<String>) -> Self {
        Self {
            store,
            staging_bucket: staging_bucket.into(),
        }
    }

    /// Concatenate chunks `0..total_chunks` into `dest_bucket/final_name`.
    ///
    /// The destination bucket is created if absent. On failure staging is
    /// untouched and the merge can be retried.
    #[instrument(skip(self), fields(fingerprint = %fingerprint, total = total_chunks, bucket = %dest_bucket))]
    pub async fn merge(
        &self,
        fingerprint: &Fingerprint,
        total_chunks: u32,
        dest_bucket: &str,
        final_name: &str,
    ) -> UploadResult<MergedObject> {
        self.store.ensure_bucket(dest_bucket).await?;

        let staged_keys = ChunkKey::new(fingerprint).chunks(total_chunks);
        let sources: Vec<ObjectRef> = staged_keys
            .iter()
            .map(|key| ObjectRef::new(&self.staging_bucket, key))
            .collect();

        let size = self
            .store
            .compose(dest_bucket, final_name, &sources)
            .await
            .map_err(|source| UploadError::ComposeFailed {
                fingerprint: fingerprint.to_string(),
                source,
            })?;

        tracing::info!(
            fingerprint = %fingerprint,
            object = %final_name,
            size = size,
            "Merged staged chunks"
        );

        Ok(MergedObject {
            object: ObjectRef::new(dest_bucket, final_name),
            size,
            staged_keys,
        })
    }

    /// Remove the staged chunks of a merged object.
    ///
    /// Best-effort: failures are logged and left for the staging reaper.
    #[instrument(skip(self, merged), fields(object = %merged.object))]
    pub async fn cleanup(&self, merged: &MergedObject) {
        match self
            .store
            .delete_many(&self.staging_bucket, &merged.staged_keys)
            .await
        {
            Ok(failures) => {
                for (key, error) in failures {
                    tracing::warn!(key = %key, error = %error, "Failed to delete staged chunk");
                }
            }
            Err(error) => {
                tracing::warn!(error = %error, "Failed to delete staged chunks");
            }
        }
    }
}
