//! S3 backend against a MinIO container. Set SKIP_S3_TESTS to skip.

use bytes::Bytes;
use chunkyard_storage::backends::s3::S3Backend;
use chunkyard_storage::{ObjectRef, ObjectStore, StorageError};
use std::time::Duration;
use testcontainers::core::{IntoContainerPort, WaitFor};
use testcontainers::{ContainerAsync, GenericImage, ImageExt, runners::AsyncRunner};

const MINIO_IMAGE: &str = "minio/minio";
const MINIO_TAG: &str = "RELEASE.2024-02-12T21-36-45Z";
const MIB: usize = 1024 * 1024;

fn should_skip_s3_tests() -> bool {
    std::env::var("SKIP_S3_TESTS").is_ok()
}

struct S3TestHarness {
    _container: ContainerAsync<GenericImage>,
    backend: S3Backend,
}

impl S3TestHarness {
    async fn new() -> Result<Self, String> {
        let access_key = "minio-access-key".to_string();
        let secret_key = "minio-secret-key".to_string();

        let container: ContainerAsync<GenericImage> = GenericImage::new(MINIO_IMAGE, MINIO_TAG)
            .with_exposed_port(9000.tcp())
            .with_wait_for(WaitFor::message_on_stdout("API:"))
            .with_env_var("MINIO_ROOT_USER", access_key.clone())
            .with_env_var("MINIO_ROOT_PASSWORD", secret_key.clone())
            .with_cmd(vec!["server", "/data"])
            .start()
            .await
            .map_err(|e| format!("failed to start MinIO container: {e}"))?;

        let host = container
            .get_host()
            .await
            .map_err(|e| format!("failed to get host: {e}"))?;
        let port = container
            .get_host_port_ipv4(9000.tcp())
            .await
            .map_err(|e| format!("failed to get port: {e}"))?;

        let backend = S3Backend::new(
            Some(format!("http://{host}:{port}")),
            Some("us-east-1".to_string()),
            Some(access_key),
            Some(secret_key),
            true,
        )
        .await
        .map_err(|e| format!("failed to create S3 backend: {e}"))?;

        Ok(Self {
            _container: container,
            backend,
        })
    }
}

macro_rules! harness_or_skip {
    () => {{
        if should_skip_s3_tests() {
            return;
        }
        match S3TestHarness::new().await {
            Ok(harness) => harness,
            Err(err) => {
                eprintln!("Skipping S3 test: {err}");
                return;
            }
        }
    }};
}

#[tokio::test]
async fn test_s3_bucket_lifecycle() {
    let harness = harness_or_skip!();
    let backend = &harness.backend;

    assert!(!backend.bucket_exists("lifecycle").await.unwrap());
    backend.create_bucket("lifecycle").await.unwrap();
    assert!(matches!(
        backend.create_bucket("lifecycle").await,
        Err(StorageError::BucketAlreadyExists(_))
    ));
    backend.ensure_bucket("lifecycle").await.unwrap();

    let names: Vec<String> = backend
        .list_buckets()
        .await
        .unwrap()
        .into_iter()
        .map(|b| b.name)
        .collect();
    assert!(names.contains(&"lifecycle".to_string()));

    backend
        .put("lifecycle", "k", Bytes::from_static(b"v"))
        .await
        .unwrap();
    assert!(matches!(
        backend.delete_bucket("lifecycle").await,
        Err(StorageError::BucketNotEmpty(_))
    ));
    backend.delete("lifecycle", "k").await.unwrap();
    backend.delete_bucket("lifecycle").await.unwrap();

    assert!(matches!(
        backend.list("lifecycle", "").await,
        Err(StorageError::BucketNotFound(_))
    ));
}

#[tokio::test]
async fn test_s3_put_list_delete_many() {
    let harness = harness_or_skip!();
    let backend = &harness.backend;
    backend.create_bucket("staging").await.unwrap();

    for i in 0..5 {
        backend
            .put("staging", &format!("fp/{i}"), Bytes::from(vec![i as u8; 10]))
            .await
            .unwrap();
    }
    backend
        .put("staging", "other/0", Bytes::from_static(b"x"))
        .await
        .unwrap();

    let keys = backend.list("staging", "fp/").await.unwrap();
    assert_eq!(keys, vec!["fp/0", "fp/1", "fp/2", "fp/3", "fp/4"]);

    let meta = backend.head("staging", "fp/3").await.unwrap();
    assert_eq!(meta.size, 10);
    assert!(meta.last_modified.is_some());

    let mut doomed = keys.clone();
    doomed.push("fp/missing".to_string());
    let failures = backend.delete_many("staging", &doomed).await.unwrap();
    assert!(failures.is_empty());
    assert!(backend.list("staging", "fp/").await.unwrap().is_empty());
    assert!(backend.exists("staging", "other/0").await.unwrap());

    assert!(matches!(
        backend.get("staging", "fp/0").await,
        Err(StorageError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_s3_compose_by_part_copy() {
    let harness = harness_or_skip!();
    let backend = &harness.backend;
    backend.create_bucket("temp").await.unwrap();
    backend.create_bucket("uploads").await.unwrap();

    // Non-final parts at the 5 MiB minimum allow server-side copy.
    let parts = [vec![1u8; 5 * MIB], vec![2u8; 5 * MIB], vec![3u8; 1000]];
    let mut sources = Vec::new();
    for (i, part) in parts.iter().enumerate() {
        let key = format!("fp/{i}");
        backend
            .put("temp", &key, Bytes::from(part.clone()))
            .await
            .unwrap();
        sources.push(ObjectRef::new("temp", key));
    }

    let size = backend.compose("uploads", "big.bin", &sources).await.unwrap();
    assert_eq!(size as usize, 10 * MIB + 1000);

    let merged = backend.get("uploads", "big.bin").await.unwrap();
    assert_eq!(merged.len(), 10 * MIB + 1000);
    assert!(merged[..5 * MIB].iter().all(|b| *b == 1));
    assert!(merged[10 * MIB..].iter().all(|b| *b == 3));
}

#[tokio::test]
async fn test_s3_compose_small_parts_streams() {
    let harness = harness_or_skip!();
    let backend = &harness.backend;
    backend.create_bucket("temp").await.unwrap();

    let mut sources = Vec::new();
    for (i, part) in [b"hello ".as_slice(), b"small ", b"world"].iter().enumerate() {
        let key = format!("fp/{i}");
        backend
            .put("temp", &key, Bytes::copy_from_slice(part))
            .await
            .unwrap();
        sources.push(ObjectRef::new("temp", key));
    }

    backend.compose("temp", "merged", &sources).await.unwrap();
    assert_eq!(
        backend.get("temp", "merged").await.unwrap(),
        Bytes::from_static(b"hello small world")
    );
}

#[tokio::test]
async fn test_s3_put_stream_and_presign() {
    let harness = harness_or_skip!();
    let backend = &harness.backend;
    backend.create_bucket("streams").await.unwrap();

    let data = vec![7u8; 6 * MIB];
    let split_at = 3 * MIB;

    let mut upload = backend.put_stream("streams", "streamed.bin").await.unwrap();
    upload
        .write(Bytes::from(data[..split_at].to_vec()))
        .await
        .unwrap();
    upload
        .write(Bytes::from(data[split_at..].to_vec()))
        .await
        .unwrap();
    let total = upload.finish().await.unwrap();
    assert_eq!(total as usize, data.len());
    assert_eq!(
        backend.head("streams", "streamed.bin").await.unwrap().size as usize,
        data.len()
    );

    let url = backend
        .presigned_get_url("streams", "streamed.bin", Duration::from_secs(60))
        .await
        .unwrap();
    assert!(url.contains("streamed.bin"));
    assert!(url.contains("X-Amz-Signature"));
}
