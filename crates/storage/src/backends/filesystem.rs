//! Local filesystem storage backend.
//!
//! Buckets are directories directly under the root. In-flight writes go to
//! `<root>/.tmp` and are renamed into place, so a partially written object is
//! never visible under its key and never shows up in a listing.

use crate::error::{StorageError, StorageResult};
use crate::traits::{BucketInfo, ByteStream, ObjectMeta, ObjectStore, StreamingUpload};
use async_trait::async_trait;
use bytes::Bytes;
use chunkyard_core::validate_bucket_name;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::instrument;
use uuid::Uuid;

/// Default chunk size for streaming reads (64 KiB).
const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// Directory under the root holding in-flight writes.
const TEMP_DIR: &str = ".tmp";

/// Local filesystem object store.
pub struct FilesystemBackend {
    root: PathBuf,
}

fn not_found_or_io(e: std::io::Error, what: impl FnOnce() -> StorageError) -> StorageError {
    if e.kind() == std::io::ErrorKind::NotFound {
        what()
    } else {
        StorageError::Io(e)
    }
}

impl FilesystemBackend {
    /// Create a new filesystem backend.
    pub async fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join(TEMP_DIR)).await?;
        Ok(Self { root })
    }

    fn bucket_dir(&self, bucket: &str) -> StorageResult<PathBuf> {
        validate_bucket_name(bucket).map_err(|e| StorageError::InvalidBucket(e.to_string()))?;
        Ok(self.root.join(bucket))
    }

    /// Directory of an existing bucket.
    async fn existing_bucket_dir(&self, bucket: &str) -> StorageResult<PathBuf> {
        let dir = self.bucket_dir(bucket)?;
        match fs::metadata(&dir).await {
            Ok(meta) if meta.is_dir() => Ok(dir),
            Ok(_) => Err(StorageError::BucketNotFound(bucket.to_string())),
            Err(e) => Err(not_found_or_io(e, || {
                StorageError::BucketNotFound(bucket.to_string())
            })),
        }
    }

    /// Full path of an object, with bucket existence and traversal checks.
    async fn object_path(&self, bucket: &str, key: &str) -> StorageResult<PathBuf> {
        let bucket_dir = self.existing_bucket_dir(bucket).await?;
        let key = key.to_string();
        tokio::task::spawn_blocking(move || Self::key_path_sync(&bucket_dir, &key))
            .await
            .map_err(|e| {
                StorageError::Io(std::io::Error::other(format!("spawn_blocking failed: {e}")))
            })?
    }

    /// Synchronous key path validation with path traversal protection.
    ///
    /// Returns an error if the key would escape `base`, including through a
    /// symlinked file or ancestor directory.
    fn key_path_sync(base: &Path, key: &str) -> StorageResult<PathBuf> {
        if key.contains("..") || key.starts_with('/') || key.starts_with('\\') {
            return Err(StorageError::InvalidKey(format!(
                "path traversal not allowed: {key}"
            )));
        }

        for component in Path::new(key).components() {
            if !matches!(component, std::path::Component::Normal(_)) {
                return Err(StorageError::InvalidKey(format!(
                    "contains unsafe path component: {key}"
                )));
            }
        }

        let path = base.join(key);
        let base_canonical = base.canonicalize().map_err(|e| {
            StorageError::Io(std::io::Error::new(
                e.kind(),
                format!("failed to canonicalize bucket directory: {e}"),
            ))
        })?;

        // Check the path itself if it exists, otherwise its nearest existing ancestor.
        let mut candidate = Some(path.as_path());
        while let Some(current) = candidate {
            match std::fs::symlink_metadata(current) {
                Ok(meta) => {
                    let canonical = current.canonicalize().map_err(|e| {
                        if meta.file_type().is_symlink() {
                            StorageError::InvalidKey(format!(
                                "symlink target missing or invalid: {key}"
                            ))
                        } else {
                            StorageError::Io(std::io::Error::new(
                                e.kind(),
                                format!("failed to canonicalize path: {e}"),
                            ))
                        }
                    })?;
                    if !canonical.starts_with(&base_canonical) {
                        return Err(StorageError::InvalidKey(format!(
                            "resolved path escapes storage root: {key}"
                        )));
                    }
                    return Ok(path);
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    candidate = current.parent();
                }
                Err(err) => {
                    return Err(StorageError::Io(std::io::Error::new(
                        err.kind(),
                        format!("failed to stat path: {err}"),
                    )));
                }
            }
        }

        Ok(path)
    }

    fn temp_path(&self) -> PathBuf {
        self.root.join(TEMP_DIR).join(Uuid::new_v4().to_string())
    }

    /// Rename a finished temp file into place, creating parents as needed.
    ///
    /// A concurrent delete may prune the parent directory between
    /// `create_dir_all` and `rename`, so a missing parent is retried once.
    async fn install(temp_path: &Path, final_path: &Path) -> StorageResult<()> {
        for attempt in 0..2 {
            if let Some(parent) = final_path.parent() {
                fs::create_dir_all(parent).await?;
            }
            match fs::rename(temp_path, final_path).await {
                Ok(()) => return Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound && attempt == 0 => continue,
                Err(e) => {
                    let _ = fs::remove_file(temp_path).await;
                    return Err(StorageError::Io(e));
                }
            }
        }
        Ok(())
    }

    /// Remove now-empty directories between `path` and the bucket directory.
    async fn prune_empty_parents(bucket_dir: &Path, path: &Path) {
        let mut current = path.parent();
        while let Some(dir) = current {
            if dir == bucket_dir || !dir.starts_with(bucket_dir) {
                break;
            }
            if fs::remove_dir(dir).await.is_err() {
                break;
            }
            current = dir.parent();
        }
    }

    /// Walk `dir` recursively, collecting file keys relative to `bucket_dir`.
    async fn walk(bucket_dir: &Path, dir: PathBuf) -> StorageResult<Vec<String>> {
        let mut results = Vec::new();
        let mut stack = vec![dir];
        while let Some(dir) = stack.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e)
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::NotFound | std::io::ErrorKind::NotADirectory
                    ) =>
                {
                    continue;
                }
                Err(e) => return Err(StorageError::Io(e)),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                // file_type() does not follow symlinks; links are skipped.
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    stack.push(path);
                } else if file_type.is_file()
                    && let Ok(rel) = path.strip_prefix(bucket_dir)
                {
                    results.push(rel.to_string_lossy().replace('\\', "/"));
                }
            }
        }
        Ok(results)
    }
}

#[async_trait]
impl ObjectStore for FilesystemBackend {
    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn bucket_exists(&self, bucket: &str) -> StorageResult<bool> {
        match self.existing_bucket_dir(bucket).await {
            Ok(_) => Ok(true),
            Err(StorageError::BucketNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn create_bucket(&self, bucket: &str) -> StorageResult<()> {
        let dir = self.bucket_dir(bucket)?;
        match fs::create_dir(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(StorageError::BucketAlreadyExists(bucket.to_string()))
            }
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn list_buckets(&self) -> StorageResult<Vec<BucketInfo>> {
        let mut buckets = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if validate_bucket_name(&name).is_err() {
                continue;
            }
            let meta = entry.metadata().await?;
            buckets.push(BucketInfo {
                name,
                created: meta.created().or_else(|_| meta.modified()).ok().map(Into::into),
            });
        }
        buckets.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(buckets)
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn delete_bucket(&self, bucket: &str) -> StorageResult<()> {
        let dir = self.existing_bucket_dir(bucket).await?;
        if !Self::walk(&dir, dir.clone()).await?.is_empty() {
            return Err(StorageError::BucketNotEmpty(bucket.to_string()));
        }
        // Only empty directories remain.
        fs::remove_dir_all(&dir).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn exists(&self, bucket: &str, key: &str) -> StorageResult<bool> {
        let path = self.object_path(bucket, key).await?;
        match fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn head(&self, bucket: &str, key: &str) -> StorageResult<ObjectMeta> {
        let path = self.object_path(bucket, key).await?;
        let metadata = fs::metadata(&path)
            .await
            .map_err(|e| not_found_or_io(e, || StorageError::NotFound(key.to_string())))?;
        if !metadata.is_file() {
            return Err(StorageError::NotFound(key.to_string()));
        }

        Ok(ObjectMeta {
            size: metadata.len(),
            last_modified: metadata.modified().ok().map(|t| t.into()),
            content_type: None,
        })
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn get(&self, bucket: &str, key: &str) -> StorageResult<Bytes> {
        let path = self.object_path(bucket, key).await?;
        let data = fs::read(&path)
            .await
            .map_err(|e| not_found_or_io(e, || StorageError::NotFound(key.to_string())))?;
        Ok(Bytes::from(data))
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn get_stream(&self, bucket: &str, key: &str) -> StorageResult<ByteStream> {
        use tokio::io::AsyncReadExt;

        let path = self.object_path(bucket, key).await?;
        let file = fs::File::open(&path)
            .await
            .map_err(|e| not_found_or_io(e, || StorageError::NotFound(key.to_string())))?;

        let stream = async_stream::try_stream! {
            let mut file = file;
            let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
            loop {
                let n = file.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                yield Bytes::copy_from_slice(&buf[..n]);
            }
        };

        Ok(Box::pin(stream))
    }

    #[instrument(skip(self, data), fields(backend = "filesystem", size = data.len()))]
    async fn put(&self, bucket: &str, key: &str, data: Bytes) -> StorageResult<()> {
        let path = self.object_path(bucket, key).await?;
        let temp_path = self.temp_path();
        {
            let mut file = fs::File::create(&temp_path).await?;
            if let Err(e) = file.write_all(&data).await {
                drop(file);
                let _ = fs::remove_file(&temp_path).await;
                return Err(StorageError::Io(e));
            }
            file.sync_all().await?;
        }
        Self::install(&temp_path, &path).await
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn put_stream(&self, bucket: &str, key: &str) -> StorageResult<Box<dyn StreamingUpload>> {
        let path = self.object_path(bucket, key).await?;
        let temp_path = self.temp_path();
        let file = fs::File::create(&temp_path).await?;

        Ok(Box::new(FilesystemUpload {
            file,
            temp_path,
            final_path: path,
            bytes_written: 0,
        }))
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn delete(&self, bucket: &str, key: &str) -> StorageResult<()> {
        let path = self.object_path(bucket, key).await?;
        fs::remove_file(&path)
            .await
            .map_err(|e| not_found_or_io(e, || StorageError::NotFound(key.to_string())))?;
        let bucket_dir = self.root.join(bucket);
        Self::prune_empty_parents(&bucket_dir, &path).await;
        Ok(())
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn list(&self, bucket: &str, prefix: &str) -> StorageResult<Vec<String>> {
        let bucket_dir = self.existing_bucket_dir(bucket).await?;
        // Walk from the deepest directory named by the prefix, then filter.
        let dir_part = prefix.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("");
        let start = if dir_part.is_empty() {
            bucket_dir.clone()
        } else {
            self.object_path(bucket, dir_part).await?
        };

        let mut keys: Vec<String> = Self::walk(&bucket_dir, start)
            .await?
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }

    #[instrument(skip(self), fields(backend = "filesystem"))]
    async fn health_check(&self) -> StorageResult<()> {
        let metadata = fs::metadata(&self.root).await.map_err(|e| {
            StorageError::Io(std::io::Error::new(
                e.kind(),
                format!("storage root not accessible: {e}"),
            ))
        })?;

        if !metadata.is_dir() {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::NotADirectory,
                format!("storage root is not a directory: {:?}", self.root),
            )));
        }

        Ok(())
    }
}

/// Streaming upload for filesystem backend.
struct FilesystemUpload {
    file: fs::File,
    temp_path: PathBuf,
    final_path: PathBuf,
    bytes_written: u64,
}

#[async_trait]
impl StreamingUpload for FilesystemUpload {
    async fn write(&mut self, data: Bytes) -> StorageResult<()> {
        self.file.write_all(&data).await?;
        self.bytes_written += data.len() as u64;
        Ok(())
    }

    async fn finish(self: Box<Self>) -> StorageResult<u64> {
        let this = *self;
        this.file.sync_all().await?;
        drop(this.file);
        FilesystemBackend::install(&this.temp_path, &this.final_path).await?;
        Ok(this.bytes_written)
    }

    async fn abort(self: Box<Self>) -> StorageResult<()> {
        let this = *self;
        drop(this.file);
        let _ = fs::remove_file(&this.temp_path).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::ObjectRef;

    async fn backend_with_bucket(dir: &Path, bucket: &str) -> FilesystemBackend {
        let backend = FilesystemBackend::new(dir).await.unwrap();
        backend.create_bucket(bucket).await.unwrap();
        backend
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend_with_bucket(dir.path(), "files").await;

        let data = Bytes::from("hello world");
        backend.put("files", "test/object", data.clone()).await.unwrap();
        assert!(backend.exists("files", "test/object").await.unwrap());
        assert_eq!(backend.get("files", "test/object").await.unwrap(), data);
        assert_eq!(backend.head("files", "test/object").await.unwrap().size, 11);
    }

    #[tokio::test]
    async fn test_missing_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new(dir.path()).await.unwrap();

        assert!(!backend.bucket_exists("nope").await.unwrap());
        assert!(matches!(
            backend.put("nope", "k", Bytes::from("x")).await,
            Err(StorageError::BucketNotFound(_))
        ));
        assert!(matches!(
            backend.create_bucket("Bad_Name").await,
            Err(StorageError::InvalidBucket(_))
        ));
    }

    #[tokio::test]
    async fn test_bucket_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend_with_bucket(dir.path(), "alpha").await;
        backend.ensure_bucket("alpha").await.unwrap();
        backend.ensure_bucket("beta").await.unwrap();
        assert!(matches!(
            backend.create_bucket("alpha").await,
            Err(StorageError::BucketAlreadyExists(_))
        ));

        let names: Vec<_> = backend
            .list_buckets()
            .await
            .unwrap()
            .into_iter()
            .map(|b| b.name)
            .collect();
        assert_eq!(names, vec!["alpha", "beta"]);

        backend.put("alpha", "a/b", Bytes::from("x")).await.unwrap();
        assert!(matches!(
            backend.delete_bucket("alpha").await,
            Err(StorageError::BucketNotEmpty(_))
        ));
        backend.delete("alpha", "a/b").await.unwrap();
        backend.delete_bucket("alpha").await.unwrap();
        assert!(!backend.bucket_exists("alpha").await.unwrap());
    }

    #[tokio::test]
    async fn test_list_is_string_prefix_and_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend_with_bucket(dir.path(), "files").await;
        for key in ["abc/1", "abc/0", "abd/0", "ab", "2024-05-01/x.txt"] {
            backend.put("files", key, Bytes::from("x")).await.unwrap();
        }

        assert_eq!(
            backend.list("files", "abc/").await.unwrap(),
            vec!["abc/0", "abc/1"]
        );
        assert_eq!(
            backend.list("files", "ab").await.unwrap(),
            vec!["ab", "abc/0", "abc/1", "abd/0"]
        );
        assert_eq!(backend.list("files", "").await.unwrap().len(), 5);
        assert!(backend.list("files", "zzz/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_prunes_directories_and_delete_many_ignores_missing() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend_with_bucket(dir.path(), "files").await;
        backend.put("files", "fp/0", Bytes::from("a")).await.unwrap();
        backend.put("files", "fp/1", Bytes::from("b")).await.unwrap();

        let failures = backend
            .delete_many(
                "files",
                &["fp/0".to_string(), "fp/1".to_string(), "fp/2".to_string()],
            )
            .await
            .unwrap();
        assert!(failures.is_empty());
        assert!(!dir.path().join("files").join("fp").exists());
        assert!(matches!(
            backend.delete("files", "fp/0").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_compose_concatenates_across_buckets() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend_with_bucket(dir.path(), "temp").await;
        backend.create_bucket("files").await.unwrap();
        backend.put("temp", "fp/0", Bytes::from("hello ")).await.unwrap();
        backend.put("temp", "fp/1", Bytes::from("world")).await.unwrap();

        let size = backend
            .compose(
                "files",
                "out.txt",
                &[ObjectRef::new("temp", "fp/0"), ObjectRef::new("temp", "fp/1")],
            )
            .await
            .unwrap();
        assert_eq!(size, 11);
        assert_eq!(
            backend.get("files", "out.txt").await.unwrap(),
            Bytes::from("hello world")
        );
        assert!(backend.exists("temp", "fp/0").await.unwrap());
    }

    #[tokio::test]
    async fn test_compose_missing_source_leaves_no_destination() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend_with_bucket(dir.path(), "temp").await;
        backend.put("temp", "fp/0", Bytes::from("a")).await.unwrap();

        let result = backend
            .compose(
                "temp",
                "out",
                &[ObjectRef::new("temp", "fp/0"), ObjectRef::new("temp", "fp/1")],
            )
            .await;
        assert!(matches!(result, Err(StorageError::NotFound(_))));
        assert!(!backend.exists("temp", "out").await.unwrap());
        assert_eq!(backend.list("temp", "").await.unwrap(), vec!["fp/0"]);
    }

    #[tokio::test]
    async fn test_presign_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend_with_bucket(dir.path(), "files").await;
        let result = backend
            .presigned_get_url("files", "x", std::time::Duration::from_secs(60))
            .await;
        assert!(matches!(result, Err(StorageError::Unsupported(_))));
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend_with_bucket(dir.path(), "files").await;

        assert!(backend.exists("files", "../escape").await.is_err());
        assert!(backend.exists("files", "/absolute/path").await.is_err());
        assert!(backend.exists("files", "foo/../bar").await.is_err());
        assert!(backend.exists("files", "valid/nested/key").await.is_ok());
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_symlink_traversal_rejected() {
        use std::os::unix::fs::symlink;

        let dir = tempfile::tempdir().unwrap();
        let outside_dir = tempfile::tempdir().unwrap();
        let outside_file = outside_dir.path().join("secret.txt");
        std::fs::write(&outside_file, "secret data").unwrap();

        let backend = backend_with_bucket(dir.path(), "files").await;
        symlink(&outside_file, dir.path().join("files").join("link")).unwrap();
        symlink(outside_dir.path(), dir.path().join("files").join("escape")).unwrap();

        match backend.get("files", "link").await {
            Err(StorageError::InvalidKey(msg)) => assert!(msg.contains("escapes storage root")),
            other => panic!("expected InvalidKey error, got: {other:?}"),
        }

        let result = backend
            .put("files", "escape/nested/file.txt", Bytes::from("data"))
            .await;
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));
        assert!(!outside_dir.path().join("nested").exists());
    }
}
