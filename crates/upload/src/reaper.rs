//! Removal of abandoned staging objects.

use crate::error::UploadResult;
use chunkyard_storage::{ObjectStore, StorageError};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::instrument;

/// Counters from one sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReapStats {
    pub scanned: usize,
    pub removed: usize,
    pub failed: usize,
}

/// Deletes staging objects older than a time-to-live.
///
/// Sessions whose client gave up never reach a merge, so their chunks and
/// markers would otherwise stay forever.
#[derive(Clone)]
pub struct StagingReaper {
    store: Arc<dyn ObjectStore>,
    staging_bucket: String,
    ttl: Duration,
}

impl StagingReaper {
    pub fn new(store: Arc<dyn ObjectStore>, staging_bucket: impl Into<String>, ttl: Duration) -> Self {
        Self {
            store,
            staging_bucket: staging_bucket.into(),
            ttl,
        }
    }

    /// Delete every staging object last modified before `now - ttl`.
    #[instrument(skip(self), fields(bucket = %self.staging_bucket))]
    pub async fn sweep(&self, now: OffsetDateTime) -> UploadResult<ReapStats> {
        let cutoff = now - self.ttl;
        let keys = match self.store.list(&self.staging_bucket, "").await {
            Ok(keys) => keys,
            Err(StorageError::BucketNotFound(_)) => return Ok(ReapStats::default()),
            Err(e) => return Err(e.into()),
        };

        let mut stats = ReapStats {
            scanned: keys.len(),
            ..Default::default()
        };
        let mut expired = Vec::new();
        for key in keys {
            match self.store.head(&self.staging_bucket, &key).await {
                Ok(meta) => {
                    if meta.last_modified.is_some_and(|t| t < cutoff) {
                        expired.push(key);
                    }
                }
                // Deleted since the listing.
                Err(StorageError::NotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }

        if expired.is_empty() {
            return Ok(stats);
        }

        let failures = self
            .store
            .delete_many(&self.staging_bucket, &expired)
            .await?;
        for (key, error) in &failures {
            tracing::warn!(key = %key, error = %error, "Failed to reap staging object");
        }
        stats.failed = failures.len();
        stats.removed = expired.len() - failures.len();
        Ok(stats)
    }

    /// Run [`sweep`](Self::sweep) every `interval` until the task is dropped.
    pub fn spawn(self, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                match self.sweep(OffsetDateTime::now_utc()).await {
                    Ok(stats) if stats.removed > 0 || stats.failed > 0 => {
                        tracing::info!(
                            scanned = stats.scanned,
                            removed = stats.removed,
                            failed = stats.failed,
                            "Staging reaper removed expired objects"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "Staging reaper sweep failed");
                    }
                }
            }
        })
    }
}
