use bytes::Bytes;
use chunkyard_storage::FilesystemBackend;
use std::sync::Arc;
use tempfile::TempDir;

/// A filesystem store rooted in a fresh temp dir with the given buckets created.
#[allow(dead_code)]
pub async fn filesystem_store(buckets: &[&str]) -> (TempDir, Arc<FilesystemBackend>) {
    use chunkyard_storage::ObjectStore;

    let temp_dir = TempDir::new().unwrap();
    let backend = FilesystemBackend::new(temp_dir.path()).await.unwrap();
    for bucket in buckets {
        backend.create_bucket(bucket).await.unwrap();
    }
    (temp_dir, Arc::new(backend))
}

/// Deterministic non-repeating test payload.
#[allow(dead_code)]
pub fn patterned_bytes(len: usize, seed: u8) -> Bytes {
    Bytes::from(
        (0..len)
            .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
            .collect::<Vec<u8>>(),
    )
}
