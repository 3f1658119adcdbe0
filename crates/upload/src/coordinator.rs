//! Upload Coordinator: the per-chunk protocol state machine.
//!
//! Each submission is answered from what staging currently holds:
//!
//! 1. A session with an outcome record replays that outcome for a retry of
//!    its final chunk. Anything else is rejected once the session verified,
//!    or starts a fresh session when verification failed.
//! 2. A declared total that disagrees with the session marker, or with an
//!    already staged index, is a fatal mismatch: the session's staging is
//!    discarded and the fingerprint starts over from chunk 0.
//! 3. Only the lowest missing index is written; any other index is answered
//!    with that expected index and its bytes are dropped.
//! 4. When nothing is missing the session is finalized under its lock:
//!    compose, verify, record the outcome, then clean up staging.

use crate::error::{UploadError, UploadResult};
use crate::locks::SessionLocks;
use crate::merger::Merger;
use crate::tracker::{ChunkTracker, missing_from};
use crate::verifier::IntegrityVerifier;
use bytes::Bytes;
use chunkyard_core::config::UploadConfig;
use chunkyard_core::{
    ChunkKey, DigestAlgorithm, Fingerprint, OutcomeRecord, SessionMarker, UploadOutcome,
    validate_bucket_name, validate_object_name,
};
use chunkyard_storage::{ObjectStore, StorageError};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::instrument;

/// One chunk as received from a client, before validation.
#[derive(Clone, Debug)]
pub struct ChunkSubmission {
    pub fingerprint: String,
    pub total_chunks: i64,
    pub index: i64,
    pub bytes: Bytes,
    /// Destination bucket; the configured default when `None`.
    pub bucket: Option<String>,
    pub object: String,
}

/// Coordinator settings.
#[derive(Clone, Debug)]
pub struct CoordinatorConfig {
    pub staging_bucket: String,
    pub default_bucket: String,
    pub digest: DigestAlgorithm,
    pub max_chunk_size: u64,
}

impl CoordinatorConfig {
    pub fn from_upload_config(config: &UploadConfig, max_chunk_size: u64) -> Self {
        Self {
            staging_bucket: config.staging_bucket.clone(),
            default_bucket: config.default_bucket.clone(),
            digest: config.digest,
            max_chunk_size,
        }
    }
}

/// A submission that passed validation.
#[derive(Debug)]
struct Session {
    fingerprint: Fingerprint,
    total: u32,
    bucket: String,
    object: String,
}

/// How a finalize call ended.
enum Finalized {
    /// This call merged the session.
    Merged(UploadOutcome),
    /// Another caller recorded an outcome first.
    Recorded(OutcomeRecord),
    /// A chunk went missing before the lock was taken.
    Pending(u32),
}

pub struct UploadCoordinator {
    store: Arc<dyn ObjectStore>,
    config: CoordinatorConfig,
    tracker: ChunkTracker,
    merger: Merger,
    verifier: IntegrityVerifier,
    locks: SessionLocks,
    staging_ready: OnceCell<()>,
}

impl UploadCoordinator {
    pub fn new(store: Arc<dyn ObjectStore>, config: CoordinatorConfig) -> Self {
        Self {
            tracker: ChunkTracker::new(store.clone(), config.staging_bucket.clone()),
            merger: Merger::new(store.clone(), config.staging_bucket.clone()),
            verifier: IntegrityVerifier::new(store.clone(), config.digest),
            locks: SessionLocks::new(),
            staging_ready: OnceCell::new(),
            store,
            config,
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn tracker(&self) -> &ChunkTracker {
        &self.tracker
    }

    /// Create the staging bucket if it does not exist. Runs at most once.
    pub async fn ensure_staging(&self) -> UploadResult<()> {
        self.staging_ready
            .get_or_try_init(|| self.store.ensure_bucket(&self.config.staging_bucket))
            .await?;
        Ok(())
    }

    /// Handle one chunk and tell the client what to do next.
    #[instrument(
        skip(self, submission),
        fields(
            fingerprint = %submission.fingerprint,
            index = submission.index,
            total = submission.total_chunks,
            size = submission.bytes.len()
        )
    )]
    pub async fn accept_chunk(&self, submission: ChunkSubmission) -> UploadResult<UploadOutcome> {
        let (session, index) = self.validate(&submission)?;
        let keys = ChunkKey::new(&session.fingerprint);

        // List before reading the record: the record is written before
        // staging is cleaned, so a listing that saw the cleanup also sees it.
        let mut present = self.tracker.present_indices(&session.fingerprint).await?;
        if let Some(record) = self.read_outcome(&session.fingerprint).await? {
            if record.is_final_retry(session.total, index, &session.bucket, &session.object) {
                tracing::debug!("Replaying recorded outcome for final chunk retry");
                return Ok(record.outcome());
            }
            if record.verified {
                return Err(UploadError::AlreadyMerged {
                    fingerprint: session.fingerprint.to_string(),
                });
            }
            self.restart_failed(&session).await?;
            present = self.tracker.present_indices(&session.fingerprint).await?;
        }

        let marker = self.read_marker(&session.fingerprint).await?;
        if let Err(mismatch) = check_drift(&session, marker.as_ref(), &present) {
            return self.abort(&session, mismatch).await;
        }

        let missing = missing_from(&present, session.total);
        let Some(&expected) = missing.first() else {
            return match self.finalize(&session).await? {
                Finalized::Merged(outcome) => Ok(outcome),
                Finalized::Recorded(record) => self.concluded(&session, &record),
                Finalized::Pending(next) => Ok(UploadOutcome::NextIndex(next)),
            };
        };
        if index != expected {
            tracing::debug!(expected = expected, "Chunk out of order, discarding");
            return Ok(UploadOutcome::NextIndex(expected));
        }

        self.ensure_staging().await?;
        let wrote_marker = match marker {
            Some(_) => false,
            None => match self.claim_session(&session).await {
                Ok(wrote) => wrote,
                Err(mismatch @ UploadError::SessionStateMismatch { .. }) => {
                    return self.abort(&session, mismatch).await;
                }
                Err(e) => return Err(e),
            },
        };
        self.store
            .put(&self.config.staging_bucket, &keys.chunk(index), submission.bytes)
            .await?;

        let missing = self
            .tracker
            .missing_indices(&session.fingerprint, session.total)
            .await?;
        let record = match missing.first() {
            None => match self.finalize(&session).await? {
                Finalized::Merged(outcome) => return Ok(outcome),
                Finalized::Pending(next) => return Ok(UploadOutcome::NextIndex(next)),
                Finalized::Recorded(record) => record,
            },
            Some(&next) => match self.read_outcome(&session.fingerprint).await? {
                Some(record) => record,
                None => return Ok(UploadOutcome::NextIndex(next)),
            },
        };

        // Another caller concluded the session while we were writing, so our
        // write may have landed after its cleanup.
        self.delete_staging_key(&keys.chunk(index)).await?;
        if wrote_marker {
            self.delete_staging_key(&keys.session_marker()).await?;
        }
        self.concluded(&session, &record)
    }

    /// Create the session marker unless a concurrent first chunk did.
    ///
    /// Returns whether this call wrote it. A marker with another total is a
    /// mismatch.
    async fn claim_session(&self, session: &Session) -> UploadResult<bool> {
        let _guard = self.locks.acquire(session.fingerprint.as_str()).await;
        if let Some(marker) = self.read_marker(&session.fingerprint).await? {
            check_drift(session, Some(&marker), &BTreeSet::new())?;
            return Ok(false);
        }

        let key = ChunkKey::new(&session.fingerprint).session_marker();
        let bytes = SessionMarker::new(session.total)
            .to_bytes()
            .map_err(|e| UploadError::CorruptRecord {
                key: key.clone(),
                reason: e.to_string(),
            })?;
        self.store
            .put(&self.config.staging_bucket, &key, Bytes::from(bytes))
            .await?;
        Ok(true)
    }

    /// Drop everything staged for a session whose declared total changed,
    /// then report the mismatch.
    async fn abort(&self, session: &Session, mismatch: UploadError) -> UploadResult<UploadOutcome> {
        let _guard = self.locks.acquire(session.fingerprint.as_str()).await;

        // A session concluded in the meantime keeps its record.
        if self.read_outcome(&session.fingerprint).await?.is_some() {
            return Err(mismatch);
        }

        let prefix = ChunkKey::new(&session.fingerprint).prefix();
        let staged = match self.store.list(&self.config.staging_bucket, &prefix).await {
            Ok(keys) => keys,
            Err(e) if e.is_not_found() => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        if !staged.is_empty() {
            let failures = self
                .store
                .delete_many(&self.config.staging_bucket, &staged)
                .await?;
            for (key, error) in &failures {
                tracing::warn!(key = %key, error = %error, "Failed to delete aborted staging object");
            }
        }

        tracing::warn!(
            fingerprint = %session.fingerprint,
            declared = session.total,
            removed = staged.len(),
            "Aborted session after its declared total changed"
        );
        Err(mismatch)
    }

    /// Clear the outcome of a failed session so it can start over.
    async fn restart_failed(&self, session: &Session) -> UploadResult<()> {
        // Waits out a finalize that is still cleaning up.
        let _guard = self.locks.acquire(session.fingerprint.as_str()).await;
        match self.read_outcome(&session.fingerprint).await? {
            Some(record) if !record.verified => {
                tracing::info!(
                    fingerprint = %session.fingerprint,
                    "Restarting session after failed verification"
                );
                let key = ChunkKey::new(&session.fingerprint).outcome_record();
                self.delete_staging_key(&key).await
            }
            _ => Ok(()),
        }
    }

    /// The answer for a session that already has an outcome record.
    fn concluded(&self, session: &Session, record: &OutcomeRecord) -> UploadResult<UploadOutcome> {
        let same_session = record.total_chunks == session.total
            && record.bucket == session.bucket
            && record.object == session.object;
        if record.verified && !same_session {
            return Err(UploadError::AlreadyMerged {
                fingerprint: session.fingerprint.to_string(),
            });
        }
        Ok(record.outcome())
    }

    /// Merge and verify a fully staged session, at most once per fingerprint.
    async fn finalize(&self, session: &Session) -> UploadResult<Finalized> {
        let _guard = self.locks.acquire(session.fingerprint.as_str()).await;

        // Another caller may have finished while we waited.
        if let Some(record) = self.read_outcome(&session.fingerprint).await? {
            return Ok(Finalized::Recorded(record));
        }

        let missing = self
            .tracker
            .missing_indices(&session.fingerprint, session.total)
            .await?;
        if let Some(&next) = missing.first() {
            return Ok(Finalized::Pending(next));
        }

        let merged = self
            .merger
            .merge(
                &session.fingerprint,
                session.total,
                &session.bucket,
                &session.object,
            )
            .await?;
        let verification = self
            .verifier
            .verify(&merged.object, &session.fingerprint)
            .await?;

        let keys = ChunkKey::new(&session.fingerprint);
        let record = OutcomeRecord::new(
            session.total,
            &session.bucket,
            &session.object,
            verification.is_verified(),
        );
        let bytes = record.to_bytes().map_err(|e| UploadError::CorruptRecord {
            key: keys.outcome_record(),
            reason: e.to_string(),
        })?;
        self.store
            .put(&self.config.staging_bucket, &keys.outcome_record(), Bytes::from(bytes))
            .await?;

        // The record is in place, so late arrivals no longer need the chunks.
        self.merger.cleanup(&merged).await;
        if let Err(e) = self.delete_staging_key(&keys.session_marker()).await {
            tracing::warn!(error = %e, "Failed to delete session marker");
        }

        tracing::info!(
            fingerprint = %session.fingerprint,
            bucket = %session.bucket,
            object = %session.object,
            size = merged.size,
            verified = record.verified,
            "Session finalized"
        );
        Ok(Finalized::Merged(record.outcome()))
    }

    fn validate(&self, submission: &ChunkSubmission) -> UploadResult<(Session, u32)> {
        let invalid = |msg: String| Err(UploadError::InvalidRequest(msg));

        let total = match u32::try_from(submission.total_chunks) {
            Ok(total) if total >= 1 => total,
            _ => {
                return invalid(format!(
                    "total chunk count must be a positive integer, got {}",
                    submission.total_chunks
                ));
            }
        };
        let index = match u32::try_from(submission.index) {
            Ok(index) if index < total => index,
            _ => {
                return invalid(format!(
                    "chunk index {} is outside 0..{total}",
                    submission.index
                ));
            }
        };
        if submission.bytes.len() as u64 > self.config.max_chunk_size {
            return invalid(format!(
                "chunk of {} bytes exceeds the {} byte limit",
                submission.bytes.len(),
                self.config.max_chunk_size
            ));
        }

        let fingerprint = Fingerprint::parse(&submission.fingerprint, self.config.digest)
            .map_err(|e| UploadError::InvalidRequest(e.to_string()))?;
        validate_object_name(&submission.object)
            .map_err(|e| UploadError::InvalidRequest(e.to_string()))?;
        let bucket = match submission.bucket.as_deref().map(str::trim) {
            Some(bucket) if !bucket.is_empty() => bucket.to_string(),
            _ => self.config.default_bucket.clone(),
        };
        validate_bucket_name(&bucket).map_err(|e| UploadError::InvalidRequest(e.to_string()))?;
        if bucket == self.config.staging_bucket {
            return invalid(format!("bucket {bucket:?} is reserved for staging"));
        }

        Ok((
            Session {
                fingerprint,
                total,
                bucket,
                object: submission.object.clone(),
            },
            index,
        ))
    }

    async fn read_outcome(&self, fingerprint: &Fingerprint) -> UploadResult<Option<OutcomeRecord>> {
        let key = ChunkKey::new(fingerprint).outcome_record();
        let Some(bytes) = self.read_staging_key(&key).await? else {
            return Ok(None);
        };
        OutcomeRecord::from_bytes(&bytes)
            .map(Some)
            .map_err(|e| UploadError::CorruptRecord {
                key,
                reason: e.to_string(),
            })
    }

    async fn read_marker(&self, fingerprint: &Fingerprint) -> UploadResult<Option<SessionMarker>> {
        let key = ChunkKey::new(fingerprint).session_marker();
        let Some(bytes) = self.read_staging_key(&key).await? else {
            return Ok(None);
        };
        SessionMarker::from_bytes(&bytes)
            .map(Some)
            .map_err(|e| UploadError::CorruptRecord {
                key,
                reason: e.to_string(),
            })
    }

    async fn read_staging_key(&self, key: &str) -> UploadResult<Option<Bytes>> {
        match self.store.get(&self.config.staging_bucket, key).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_staging_key(&self, key: &str) -> UploadResult<()> {
        match self.store.delete(&self.config.staging_bucket, key).await {
            Ok(()) | Err(StorageError::NotFound(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Reject a declared total that contradicts what the session already holds.
fn check_drift(
    session: &Session,
    marker: Option<&SessionMarker>,
    present: &BTreeSet<u32>,
) -> UploadResult<()> {
    let mismatch = |recorded: u32| UploadError::SessionStateMismatch {
        fingerprint: session.fingerprint.to_string(),
        declared: session.total,
        recorded,
    };

    if let Some(marker) = marker
        && marker.total_chunks != session.total
    {
        return Err(mismatch(marker.total_chunks));
    }
    if let Some(&highest) = present.last()
        && highest >= session.total
    {
        return Err(mismatch(highest + 1));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chunkyard_storage::FilesystemBackend;

    const FP: &str = "5eb63bbbe01eeed093cb22bb8f5acdc3";

    async fn coordinator() -> (tempfile::TempDir, UploadCoordinator) {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn ObjectStore> =
            Arc::new(FilesystemBackend::new(dir.path()).await.unwrap());
        let config = CoordinatorConfig {
            staging_bucket: "temp".to_string(),
            default_bucket: "uploads".to_string(),
            digest: DigestAlgorithm::Md5,
            max_chunk_size: 16,
        };
        (dir, UploadCoordinator::new(store, config))
    }

    fn submission(total: i64, index: i64) -> ChunkSubmission {
        ChunkSubmission {
            fingerprint: FP.to_string(),
            total_chunks: total,
            index,
            bytes: Bytes::from("x"),
            bucket: None,
            object: "a.bin".to_string(),
        }
    }

    #[tokio::test]
    async fn test_validation_rejects_before_storage() {
        let (dir, coordinator) = coordinator().await;

        for bad in [
            submission(0, 0),
            submission(-1, 0),
            submission(2, 2),
            submission(2, -1),
            ChunkSubmission {
                fingerprint: "xyz".to_string(),
                ..submission(1, 0)
            },
            ChunkSubmission {
                object: "../escape".to_string(),
                ..submission(1, 0)
            },
            ChunkSubmission {
                bucket: Some("temp".to_string()),
                ..submission(1, 0)
            },
            ChunkSubmission {
                bytes: Bytes::from(vec![0u8; 17]),
                ..submission(1, 0)
            },
        ] {
            let result = coordinator.accept_chunk(bad).await;
            assert!(
                matches!(result, Err(UploadError::InvalidRequest(_))),
                "expected InvalidRequest, got {result:?}"
            );
        }
        assert!(!dir.path().join("temp").exists());
    }

    #[test]
    fn test_check_drift() {
        let session = Session {
            fingerprint: Fingerprint::parse(FP, DigestAlgorithm::Md5).unwrap(),
            total: 3,
            bucket: "uploads".to_string(),
            object: "a".to_string(),
        };
        let none = BTreeSet::new();
        assert!(check_drift(&session, None, &none).is_ok());
        assert!(check_drift(&session, Some(&SessionMarker::new(3)), &[0, 2].into()).is_ok());
        assert!(matches!(
            check_drift(&session, Some(&SessionMarker::new(4)), &none),
            Err(UploadError::SessionStateMismatch { recorded: 4, declared: 3, .. })
        ));
        assert!(matches!(
            check_drift(&session, None, &[0, 5].into()),
            Err(UploadError::SessionStateMismatch { recorded: 6, .. })
        ));
    }
}
