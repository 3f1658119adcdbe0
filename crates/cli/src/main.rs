//! Command-line client for Chunkyard.

mod api_client;
mod uploader;

use anyhow::{Context, Result};
use api_client::ApiClient;
use bytes::Bytes;
use chunkyard_core::{DEFAULT_CHUNK_SIZE, DigestAlgorithm};
use clap::{Args, Parser, Subcommand};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

#[derive(Parser)]
#[command(name = "chunkyardctl")]
#[command(about = "Command-line client for Chunkyard")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    api: ApiArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct ApiArgs {
    /// Server URL
    #[arg(
        long,
        global = true,
        env = "CHUNKYARD_SERVER",
        default_value = "http://localhost:8080"
    )]
    server: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a file in resumable chunks
    Upload {
        /// File to upload
        path: PathBuf,
        /// Object name on the server (default: the file name)
        #[arg(long)]
        name: Option<String>,
        /// Destination bucket (default: the server's default bucket)
        #[arg(long)]
        bucket: Option<String>,
        /// Chunk size in bytes
        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk_size: u64,
        /// Digest the server is configured with
        #[arg(long, default_value_t = DigestAlgorithm::Md5)]
        digest: DigestAlgorithm,
    },
    /// Upload a small file in a single request
    Put {
        path: PathBuf,
        #[arg(long)]
        bucket: Option<String>,
        /// Store under a random name keeping the extension
        #[arg(long, default_value_t = false)]
        rename: bool,
    },
    /// Download an object
    Download {
        /// Object name
        object: String,
        /// Output path (default: last component of the object name)
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(long)]
        bucket: Option<String>,
    },
    /// List objects in a bucket
    Ls {
        #[arg(long)]
        bucket: Option<String>,
    },
    /// Delete an object
    Rm {
        object: String,
        #[arg(long)]
        bucket: Option<String>,
    },
    /// Show object metadata
    Stat {
        object: String,
        #[arg(long)]
        bucket: Option<String>,
    },
    /// Print a time-limited download URL
    Presign {
        object: String,
        #[arg(long)]
        bucket: Option<String>,
        /// Lifetime in seconds
        #[arg(long, default_value_t = 3600)]
        expires: u64,
    },
    /// List buckets
    Buckets,
    /// Create a bucket
    Mb { bucket: String },
    /// Delete an empty bucket
    Rb { bucket: String },
    /// Check server health
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let client = ApiClient::new(&cli.api.server)?;

    match cli.command {
        Commands::Upload {
            path,
            name,
            bucket,
            chunk_size,
            digest,
        } => {
            let name = match name {
                Some(name) => name,
                None => file_name(&path)?,
            };
            let report = uploader::upload_file(
                &client,
                &path,
                &name,
                bucket.as_deref(),
                chunk_size,
                digest,
            )
            .await?;
            println!(
                "Uploaded {} ({} chunks, {} sent, {} {})",
                name, report.total_chunks, report.chunks_sent, digest, report.fingerprint
            );
        }
        Commands::Put {
            path,
            bucket,
            rename,
        } => {
            let data = tokio::fs::read(&path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?;
            let location = client
                .upload_object(&file_name(&path)?, Bytes::from(data), bucket.as_deref(), rename)
                .await?;
            println!("{}/{}", location.bucket, location.object);
        }
        Commands::Download {
            object,
            output,
            bucket,
        } => {
            let output = match output {
                Some(output) => output,
                None => PathBuf::from(object.rsplit('/').next().unwrap_or(&object)),
            };
            let mut stream = client.download(bucket.as_deref(), &object).await?;
            let mut file = tokio::fs::File::create(&output)
                .await
                .with_context(|| format!("failed to create {}", output.display()))?;
            let mut written = 0u64;
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.context("download interrupted")?;
                file.write_all(&chunk).await?;
                written += chunk.len() as u64;
            }
            file.flush().await?;
            println!("Wrote {} bytes to {}", written, output.display());
        }
        Commands::Ls { bucket } => {
            for key in client.list_objects(bucket.as_deref()).await? {
                println!("{key}");
            }
        }
        Commands::Rm { object, bucket } => {
            client.delete_object(bucket.as_deref(), &object).await?;
            println!("Deleted {object}");
        }
        Commands::Stat { object, bucket } => {
            let stat = client.stat_object(bucket.as_deref(), &object).await?;
            println!("Bucket: {}", stat.bucket);
            println!("Object: {}", stat.object);
            println!("Size: {}", stat.size);
            if let Some(modified) = stat.last_modified {
                println!("Modified: {modified}");
            }
            if let Some(content_type) = stat.content_type {
                println!("Content-Type: {content_type}");
            }
        }
        Commands::Presign {
            object,
            bucket,
            expires,
        } => {
            println!(
                "{}",
                client
                    .presigned_url(bucket.as_deref(), &object, expires)
                    .await?
            );
        }
        Commands::Buckets => {
            let buckets = client.list_buckets().await?;
            if buckets.is_empty() {
                println!("No buckets found.");
            }
            for bucket in buckets {
                println!(
                    "{:<40} {}",
                    bucket.name,
                    bucket.created.as_deref().unwrap_or("-")
                );
            }
        }
        Commands::Mb { bucket } => {
            client.create_bucket(&bucket).await?;
            println!("Bucket created: {bucket}");
        }
        Commands::Rb { bucket } => {
            client.delete_bucket(&bucket).await?;
            println!("Bucket deleted: {bucket}");
        }
        Commands::Health => {
            let health = client.health().await?;
            println!(
                "{} (backend: {}, version: {})",
                health.status, health.backend, health.version
            );
        }
    }

    Ok(())
}

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .with_context(|| format!("{} has no usable file name", path.display()))
}
