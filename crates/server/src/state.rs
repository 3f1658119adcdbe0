//! Application state shared across handlers.

use crate::error::ApiError;
use chunkyard_core::config::AppConfig;
use chunkyard_storage::ObjectStore;
use chunkyard_upload::{CoordinatorConfig, StagingReaper, UploadCoordinator};
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Object storage backend.
    pub storage: Arc<dyn ObjectStore>,
    /// Chunked upload protocol.
    pub coordinator: Arc<UploadCoordinator>,
}

impl AppState {
    /// Create a new application state.
    ///
    /// The configuration is expected to be validated already.
    pub fn new(config: AppConfig, storage: Arc<dyn ObjectStore>) -> Self {
        let coordinator_config =
            CoordinatorConfig::from_upload_config(&config.upload, config.server.max_chunk_size);
        let coordinator = UploadCoordinator::new(storage.clone(), coordinator_config);

        Self {
            config: Arc::new(config),
            storage,
            coordinator: Arc::new(coordinator),
        }
    }

    /// The staging reaper, if enabled, with its sweep interval.
    pub fn staging_reaper(&self) -> Option<(StagingReaper, std::time::Duration)> {
        let upload = &self.config.upload;
        let interval = upload.reaper_interval()?;
        let reaper = StagingReaper::new(
            self.storage.clone(),
            upload.staging_bucket.clone(),
            upload.staging_ttl(),
        );
        Some((reaper, interval))
    }

    /// The bucket an object route works on: the named one, or the default
    /// when none is given. The staging bucket is off limits.
    pub fn object_bucket(&self, bucket: Option<&str>) -> Result<String, ApiError> {
        let bucket = match bucket.map(str::trim) {
            Some(bucket) if !bucket.is_empty() => bucket.to_string(),
            _ => self.config.upload.default_bucket.clone(),
        };
        if bucket == self.config.upload.staging_bucket {
            return Err(ApiError::BadRequest(format!(
                "bucket {bucket} holds upload staging and is not accessible"
            )));
        }
        Ok(bucket)
    }
}
