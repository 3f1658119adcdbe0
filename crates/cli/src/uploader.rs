//! Client side of the resumable upload protocol.

use crate::api_client::{ApiClient, ChunkRequest};
use anyhow::{Context, Result};
use bytes::Bytes;
use chunkyard_core::chunk::chunk_count;
use chunkyard_core::{DigestAlgorithm, UploadOutcome};
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

const HASH_BUFFER: usize = 1024 * 1024;

/// What a finished upload sent.
#[derive(Debug, PartialEq, Eq)]
pub struct UploadReport {
    pub fingerprint: String,
    pub total_chunks: u64,
    /// Chunks actually transmitted, including ones the server discarded.
    pub chunks_sent: u64,
}

/// Digest a file without loading it into memory.
pub async fn digest_file(path: &Path, digest: DigestAlgorithm) -> Result<String> {
    let mut file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("failed to open {}", path.display()))?;
    let mut hasher = digest.hasher();
    let mut buf = vec![0u8; HASH_BUFFER];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize())
}

async fn read_chunk(
    file: &mut tokio::fs::File,
    index: u64,
    chunk_size: u64,
    file_size: u64,
) -> Result<Bytes> {
    let offset = index * chunk_size;
    let len = chunk_size.min(file_size.saturating_sub(offset));
    file.seek(std::io::SeekFrom::Start(offset)).await?;
    let mut buf = vec![0u8; len as usize];
    file.read_exact(&mut buf)
        .await
        .with_context(|| format!("failed to read chunk {index}"))?;
    Ok(Bytes::from(buf))
}

/// Drive the protocol for one file: send whichever chunk the server asks
/// for until it reports the merged object verified.
///
/// Restarting an interrupted upload needs nothing special: the first answer
/// names the first chunk the server is missing.
pub async fn upload_file(
    client: &ApiClient,
    path: &Path,
    object_name: &str,
    bucket: Option<&str>,
    chunk_size: u64,
    digest: DigestAlgorithm,
) -> Result<UploadReport> {
    anyhow::ensure!(chunk_size > 0, "chunk size must be positive");

    let file_size = tokio::fs::metadata(path)
        .await
        .with_context(|| format!("failed to stat {}", path.display()))?
        .len();
    let total = chunk_count(file_size, chunk_size);
    let fingerprint = digest_file(path, digest).await?;
    tracing::info!(
        file = %path.display(),
        size = file_size,
        total = total,
        fingerprint = %fingerprint,
        "Starting upload"
    );

    let mut file = tokio::fs::File::open(path).await?;
    // A well-behaved server needs at most one redirect plus one send per chunk.
    let max_requests = total * 2 + 2;
    let mut next = 0u64;
    let mut sent = 0u64;

    while sent < max_requests {
        let data = read_chunk(&mut file, next, chunk_size, file_size).await?;
        let outcome = client
            .upload_chunk(ChunkRequest {
                fingerprint: &fingerprint,
                index: next,
                total,
                file_name: object_name,
                bucket,
                data,
            })
            .await?;
        sent += 1;

        match outcome {
            UploadOutcome::NextIndex(n) => {
                let n = u64::from(n);
                anyhow::ensure!(n < total, "server asked for chunk {n} of {total}");
                tracing::debug!(sent = next, next = n, "Chunk acknowledged");
                next = n;
            }
            UploadOutcome::Verified => {
                tracing::info!(chunks_sent = sent, "Upload verified");
                return Ok(UploadReport {
                    fingerprint,
                    total_chunks: total,
                    chunks_sent: sent,
                });
            }
            UploadOutcome::IntegrityFailed => {
                anyhow::bail!(
                    "server rejected the merged file: content does not match {fingerprint}; \
                     the file may have changed during upload, restart it"
                );
            }
        }
    }

    anyhow::bail!("upload made no progress after {sent} requests")
}
