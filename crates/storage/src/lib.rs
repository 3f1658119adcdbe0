//! Bucket-aware object storage for chunkyard.
//!
//! This crate provides:
//! - The `ObjectStore` trait: buckets, atomic puts, prefix listing, batch
//!   deletes and server-side compose
//! - Backends: local filesystem and S3-compatible

pub mod backends;
pub mod error;
pub mod traits;

pub use backends::{filesystem::FilesystemBackend, s3::S3Backend};
pub use error::{StorageError, StorageResult};
pub use traits::{
    BucketInfo, ByteStream, ObjectMeta, ObjectRef, ObjectStore, StreamingUpload, stream_compose,
};

use chunkyard_core::config::StorageConfig;
use std::sync::Arc;

/// Create an object store from configuration.
pub async fn from_config(config: &StorageConfig) -> StorageResult<Arc<dyn ObjectStore>> {
    config.validate().map_err(StorageError::Config)?;

    match config {
        StorageConfig::Filesystem { path } => {
            let backend = FilesystemBackend::new(path).await?;
            Ok(Arc::new(backend))
        }
        StorageConfig::S3 {
            endpoint,
            region,
            access_key_id,
            secret_access_key,
            force_path_style,
        } => {
            let backend = S3Backend::new(
                endpoint.clone(),
                region.clone(),
                access_key_id.clone(),
                secret_access_key.clone(),
                *force_path_style,
            )
            .await?;
            Ok(Arc::new(backend))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[tokio::test]
    async fn test_filesystem_store_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let store = from_config(&StorageConfig::Filesystem {
            path: dir.path().join("objects"),
        })
        .await
        .unwrap();
        assert_eq!(store.backend_name(), "filesystem");

        store.ensure_bucket("temp").await.unwrap();
        store
            .put("temp", "fp/0", Bytes::from_static(b"chunk"))
            .await
            .unwrap();
        assert_eq!(store.list("temp", "fp/").await.unwrap(), vec!["fp/0"]);
    }

    #[tokio::test]
    async fn test_s3_store_from_config_is_lazy() {
        // Nothing listens on the endpoint; construction must not connect.
        let store = from_config(&StorageConfig::S3 {
            endpoint: Some("http://127.0.0.1:1".to_string()),
            region: Some("us-east-1".to_string()),
            access_key_id: Some("key".to_string()),
            secret_access_key: Some("secret".to_string()),
            force_path_style: true,
        })
        .await
        .unwrap();
        assert_eq!(store.backend_name(), "s3");
    }

    #[tokio::test]
    async fn test_half_credentials_rejected() {
        let result = from_config(&StorageConfig::S3 {
            endpoint: None,
            region: None,
            access_key_id: None,
            secret_access_key: Some("secret".to_string()),
            force_path_style: false,
        })
        .await;
        assert!(matches!(result, Err(StorageError::Config(_))));
    }
}
