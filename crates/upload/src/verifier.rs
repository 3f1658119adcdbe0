//! Integrity Verifier: re-digests a merged object against its fingerprint.

use crate::error::UploadResult;
use chunkyard_core::{DigestAlgorithm, Fingerprint};
use chunkyard_storage::{ObjectRef, ObjectStore, StorageError};
use futures::StreamExt;
use std::sync::Arc;
use tracing::instrument;

/// Result of checking a merged object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verification {
    Verified,
    /// The object was removed; `actual` is the digest it had.
    Mismatch { actual: String },
}

impl Verification {
    pub fn is_verified(&self) -> bool {
        matches!(self, Self::Verified)
    }
}

#[derive(Clone)]
pub struct IntegrityVerifier {
    store: Arc<dyn ObjectStore>,
    digest: DigestAlgorithm,
}

impl IntegrityVerifier {
    pub fn new(store: Arc<dyn ObjectStore>, digest: DigestAlgorithm) -> Self {
        Self { store, digest }
    }

    /// Stream `object` through the digest and compare with `expected`.
    ///
    /// On mismatch the object is deleted before returning, so a corrupt
    /// object is never left under its final name.
    #[instrument(skip(self), fields(object = %object, fingerprint = %expected))]
    pub async fn verify(
        &self,
        object: &ObjectRef,
        expected: &Fingerprint,
    ) -> UploadResult<Verification> {
        let mut hasher = self.digest.hasher();
        let mut stream = self.store.get_stream(&object.bucket, &object.key).await?;
        while let Some(chunk) = stream.next().await {
            hasher.update(&chunk?);
        }
        let actual = hasher.finalize();

        if expected.matches(&actual) {
            return Ok(Verification::Verified);
        }

        tracing::warn!(
            object = %object,
            expected = %expected,
            actual = %actual,
            "Merged object does not match its fingerprint, removing it"
        );
        match self.store.delete(&object.bucket, &object.key).await {
            Ok(()) | Err(StorageError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
        Ok(Verification::Mismatch { actual })
    }
}
