//! Shared fixtures for upload protocol tests.
#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use chunkyard_core::{DigestAlgorithm, parse_chunk_index};
use chunkyard_storage::{
    BucketInfo, ByteStream, FilesystemBackend, ObjectMeta, ObjectRef, ObjectStore,
    StorageError, StorageResult, StreamingUpload,
};
use chunkyard_upload::{ChunkSubmission, CoordinatorConfig, UploadCoordinator};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;

pub const STAGING: &str = "temp";
pub const DEST: &str = "uploads";

/// Forwards to a real store while counting the calls the protocol must not
/// repeat.
pub struct InstrumentedStore {
    inner: Arc<dyn ObjectStore>,
    compose_delay: Duration,
    pub compose_calls: AtomicUsize,
    pub delete_many_calls: AtomicUsize,
    pub put_calls: AtomicUsize,
    pub fail_compose: std::sync::atomic::AtomicBool,
    chunk_put_delay: Mutex<Option<Duration>>,
}

impl InstrumentedStore {
    pub fn new(inner: Arc<dyn ObjectStore>) -> Self {
        Self {
            inner,
            compose_delay: Duration::ZERO,
            compose_calls: AtomicUsize::new(0),
            delete_many_calls: AtomicUsize::new(0),
            put_calls: AtomicUsize::new(0),
            fail_compose: std::sync::atomic::AtomicBool::new(false),
            chunk_put_delay: Mutex::new(None),
        }
    }

    /// Hold every compose for `delay` so concurrent callers pile up.
    pub fn with_compose_delay(mut self, delay: Duration) -> Self {
        self.compose_delay = delay;
        self
    }

    /// Stall the next chunk write for `delay` before it reaches the store.
    pub fn delay_next_chunk_put(&self, delay: Duration) {
        *self.chunk_put_delay.lock().unwrap() = Some(delay);
    }

    pub fn composes(&self) -> usize {
        self.compose_calls.load(Ordering::SeqCst)
    }

    pub fn cleanups(&self) -> usize {
        self.delete_many_calls.load(Ordering::SeqCst)
    }

    pub fn puts(&self) -> usize {
        self.put_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for InstrumentedStore {
    async fn bucket_exists(&self, bucket: &str) -> StorageResult<bool> {
        self.inner.bucket_exists(bucket).await
    }

    async fn create_bucket(&self, bucket: &str) -> StorageResult<()> {
        self.inner.create_bucket(bucket).await
    }

    async fn list_buckets(&self) -> StorageResult<Vec<BucketInfo>> {
        self.inner.list_buckets().await
    }

    async fn delete_bucket(&self, bucket: &str) -> StorageResult<()> {
        self.inner.delete_bucket(bucket).await
    }

    async fn exists(&self, bucket: &str, key: &str) -> StorageResult<bool> {
        self.inner.exists(bucket, key).await
    }

    async fn head(&self, bucket: &str, key: &str) -> StorageResult<ObjectMeta> {
        self.inner.head(bucket, key).await
    }

    async fn get(&self, bucket: &str, key: &str) -> StorageResult<Bytes> {
        self.inner.get(bucket, key).await
    }

    async fn get_stream(&self, bucket: &str, key: &str) -> StorageResult<ByteStream> {
        self.inner.get_stream(bucket, key).await
    }

    async fn put(&self, bucket: &str, key: &str, data: Bytes) -> StorageResult<()> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        if parse_chunk_index(key).is_some() {
            let delay = self.chunk_put_delay.lock().unwrap().take();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
        }
        self.inner.put(bucket, key, data).await
    }

    async fn put_stream(&self, bucket: &str, key: &str) -> StorageResult<Box<dyn StreamingUpload>> {
        self.inner.put_stream(bucket, key).await
    }

    async fn delete(&self, bucket: &str, key: &str) -> StorageResult<()> {
        self.inner.delete(bucket, key).await
    }

    async fn delete_many(
        &self,
        bucket: &str,
        keys: &[String],
    ) -> StorageResult<Vec<(String, StorageError)>> {
        self.delete_many_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.delete_many(bucket, keys).await
    }

    async fn list(&self, bucket: &str, prefix: &str) -> StorageResult<Vec<String>> {
        self.inner.list(bucket, prefix).await
    }

    async fn compose(&self, bucket: &str, key: &str, sources: &[ObjectRef]) -> StorageResult<u64> {
        self.compose_calls.fetch_add(1, Ordering::SeqCst);
        if !self.compose_delay.is_zero() {
            tokio::time::sleep(self.compose_delay).await;
        }
        if self.fail_compose.load(Ordering::SeqCst) {
            return Err(StorageError::Io(std::io::Error::other("injected compose failure")));
        }
        self.inner.compose(bucket, key, sources).await
    }

    fn backend_name(&self) -> &'static str {
        "instrumented"
    }
}

pub struct Harness {
    pub _dir: TempDir,
    pub store: Arc<InstrumentedStore>,
    pub coordinator: Arc<UploadCoordinator>,
}

pub async fn harness() -> Harness {
    harness_with(|store| store).await
}

pub async fn harness_with(
    configure: impl FnOnce(InstrumentedStore) -> InstrumentedStore,
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let backend: Arc<dyn ObjectStore> = Arc::new(FilesystemBackend::new(dir.path()).await.unwrap());
    let store = Arc::new(configure(InstrumentedStore::new(backend)));
    let config = CoordinatorConfig {
        staging_bucket: STAGING.to_string(),
        default_bucket: DEST.to_string(),
        digest: DigestAlgorithm::Md5,
        max_chunk_size: 1024 * 1024,
    };
    let coordinator = Arc::new(UploadCoordinator::new(store.clone(), config));
    Harness {
        _dir: dir,
        store,
        coordinator,
    }
}

/// A file split into fixed-size chunks together with its md5 fingerprint.
pub struct TestFile {
    pub content: Vec<u8>,
    pub chunks: Vec<Bytes>,
    pub fingerprint: String,
    pub object: String,
}

impl TestFile {
    pub fn new(len: usize, chunk_size: usize, seed: u8) -> Self {
        let content: Vec<u8> = (0..len)
            .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
            .collect();
        let chunks = content
            .chunks(chunk_size)
            .map(Bytes::copy_from_slice)
            .collect();
        Self {
            fingerprint: DigestAlgorithm::Md5.compute(&content),
            content,
            chunks,
            object: format!("file-{seed}.bin"),
        }
    }

    pub fn total(&self) -> i64 {
        self.chunks.len() as i64
    }

    pub fn submission(&self, index: usize) -> ChunkSubmission {
        ChunkSubmission {
            fingerprint: self.fingerprint.clone(),
            total_chunks: self.total(),
            index: index as i64,
            bytes: self.chunks[index].clone(),
            bucket: None,
            object: self.object.clone(),
        }
    }
}
