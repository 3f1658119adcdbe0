//! Storage trait definitions.

use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::fmt;
use std::pin::Pin;
use std::time::Duration;

/// A boxed stream of bytes for streaming reads.
pub type ByteStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;

/// A fully qualified object location.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    pub bucket: String,
    pub key: String,
}

impl ObjectRef {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// Metadata about a stored object.
#[derive(Clone, Debug)]
pub struct ObjectMeta {
    /// Object size in bytes.
    pub size: u64,
    /// Last modification time (if available).
    pub last_modified: Option<time::OffsetDateTime>,
    /// Content type (if available).
    pub content_type: Option<String>,
}

/// A bucket as reported by [`ObjectStore::list_buckets`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BucketInfo {
    pub name: String,
    pub created: Option<time::OffsetDateTime>,
}

/// Bucket-aware object store.
///
/// Every call is atomic on its own and reads observe all completed writes.
/// Keys are slash-separated relative paths within a bucket.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Check if a bucket exists.
    async fn bucket_exists(&self, bucket: &str) -> StorageResult<bool>;

    /// Create a bucket. Fails with `BucketAlreadyExists` if it is present.
    async fn create_bucket(&self, bucket: &str) -> StorageResult<()>;

    /// Create a bucket if absent. Concurrent callers all succeed.
    async fn ensure_bucket(&self, bucket: &str) -> StorageResult<()> {
        if self.bucket_exists(bucket).await? {
            return Ok(());
        }
        match self.create_bucket(bucket).await {
            Ok(()) | Err(StorageError::BucketAlreadyExists(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// List all buckets, sorted by name.
    async fn list_buckets(&self) -> StorageResult<Vec<BucketInfo>>;

    /// Delete an empty bucket.
    async fn delete_bucket(&self, bucket: &str) -> StorageResult<()>;

    /// Check if an object exists.
    async fn exists(&self, bucket: &str, key: &str) -> StorageResult<bool>;

    /// Get an object's metadata without fetching content.
    async fn head(&self, bucket: &str, key: &str) -> StorageResult<ObjectMeta>;

    /// Get an object's content.
    async fn get(&self, bucket: &str, key: &str) -> StorageResult<Bytes>;

    /// Get an object as a byte stream.
    async fn get_stream(&self, bucket: &str, key: &str) -> StorageResult<ByteStream>;

    /// Put an object atomically, replacing any previous content.
    async fn put(&self, bucket: &str, key: &str, data: Bytes) -> StorageResult<()>;

    /// Start a streaming upload. Nothing is visible under `key` until `finish`.
    async fn put_stream(&self, bucket: &str, key: &str) -> StorageResult<Box<dyn StreamingUpload>>;

    /// Delete an object.
    async fn delete(&self, bucket: &str, key: &str) -> StorageResult<()>;

    /// Delete several objects, returning the ones that could not be removed.
    ///
    /// Keys that are already gone count as deleted.
    async fn delete_many(
        &self,
        bucket: &str,
        keys: &[String],
    ) -> StorageResult<Vec<(String, StorageError)>> {
        let mut failures = Vec::new();
        for key in keys {
            match self.delete(bucket, key).await {
                Ok(()) | Err(StorageError::NotFound(_)) => {}
                Err(e) => failures.push((key.clone(), e)),
            }
        }
        Ok(failures)
    }

    /// List object keys starting with `prefix`, sorted.
    async fn list(&self, bucket: &str, prefix: &str) -> StorageResult<Vec<String>>;

    /// Write the concatenation of `sources`, in order, to `bucket/key`.
    ///
    /// Returns the size of the composed object. Sources are left in place.
    async fn compose(&self, bucket: &str, key: &str, sources: &[ObjectRef]) -> StorageResult<u64> {
        stream_compose(self, bucket, key, sources).await
    }

    /// A time-limited URL granting GET access to an object.
    async fn presigned_get_url(
        &self,
        _bucket: &str,
        _key: &str,
        _expires_in: Duration,
    ) -> StorageResult<String> {
        Err(StorageError::Unsupported("presigned URLs"))
    }

    /// Get the name of this storage backend.
    ///
    /// Returns a static string identifier for the backend type (e.g., "s3", "filesystem").
    fn backend_name(&self) -> &'static str;

    /// Verify storage backend connectivity.
    ///
    /// Called during server startup and by the health endpoint.
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// Compose by reading every source and writing it through a streaming upload.
///
/// The destination only appears once every byte has been written; a failed
/// source read aborts the upload.
pub async fn stream_compose<S>(
    store: &S,
    bucket: &str,
    key: &str,
    sources: &[ObjectRef],
) -> StorageResult<u64>
where
    S: ObjectStore + ?Sized,
{
    let mut upload = store.put_stream(bucket, key).await?;
    for source in sources {
        let mut stream = match store.get_stream(&source.bucket, &source.key).await {
            Ok(stream) => stream,
            Err(e) => {
                let _ = upload.abort().await;
                return Err(e);
            }
        };
        while let Some(next) = stream.next().await {
            let written = match next {
                Ok(data) => upload.write(data).await,
                Err(e) => Err(e),
            };
            if let Err(e) = written {
                let _ = upload.abort().await;
                return Err(e);
            }
        }
    }
    upload.finish().await
}

/// Trait for streaming uploads.
#[async_trait]
pub trait StreamingUpload: Send {
    /// Write a chunk of data.
    async fn write(&mut self, data: Bytes) -> StorageResult<()>;

    /// Finish the upload and return the total bytes written.
    async fn finish(self: Box<Self>) -> StorageResult<u64>;

    /// Abort the upload.
    async fn abort(self: Box<Self>) -> StorageResult<()>;
}
