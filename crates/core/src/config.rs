//! Configuration types shared across crates.

use crate::hash::DigestAlgorithm;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Maximum size of a single chunk body in bytes.
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: u64,
    /// Maximum size of a single-shot object upload in bytes.
    #[serde(default = "default_max_object_size")]
    pub max_object_size: u64,
    /// Cross-origin policy.
    #[serde(default)]
    pub cors: CorsConfig,
}

/// Cross-origin resource sharing policy.
///
/// The default mirrors any origin and allows credentials, which is what
/// browser-based uploaders served from a different host expect.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Allowed origins. `"*"` mirrors the request origin.
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
    /// Whether cookies and auth headers may accompany cross-origin requests.
    #[serde(default = "default_allow_credentials")]
    pub allow_credentials: bool,
}

impl CorsConfig {
    /// True when every origin is accepted.
    pub fn allows_any_origin(&self) -> bool {
        self.allowed_origins.iter().any(|o| o == "*")
    }
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: default_allowed_origins(),
            allow_credentials: default_allow_credentials(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_max_chunk_size() -> u64 {
    crate::MAX_CHUNK_SIZE
}

fn default_max_object_size() -> u64 {
    crate::MAX_OBJECT_SIZE
}

fn default_allowed_origins() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_allow_credentials() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_chunk_size: default_max_chunk_size(),
            max_object_size: default_max_object_size(),
            cors: CorsConfig::default(),
        }
    }
}

/// Storage backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage. Each bucket is a directory under `path`.
    Filesystem {
        /// Root directory for storage.
        path: PathBuf,
    },
    /// S3-compatible storage (AWS S3, MinIO, ...).
    S3 {
        /// Optional endpoint URL (for MinIO, etc.).
        endpoint: Option<String>,
        /// AWS region.
        region: Option<String>,
        /// AWS access key ID. Falls back to the ambient credential chain if not set.
        /// WARNING: Prefer env vars or IAM roles over storing secrets in config files.
        access_key_id: Option<String>,
        /// AWS secret access key. Falls back to the ambient credential chain if not set.
        secret_access_key: Option<String>,
        /// Force path-style URLs (`endpoint/bucket/key`). Required for MinIO.
        #[serde(default)]
        force_path_style: bool,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/storage"),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            StorageConfig::Filesystem { path } => {
                if path.as_os_str().is_empty() {
                    return Err("filesystem storage path must not be empty".to_string());
                }
                Ok(())
            }
            StorageConfig::S3 {
                access_key_id,
                secret_access_key,
                ..
            } => match (access_key_id.as_ref(), secret_access_key.as_ref()) {
                (Some(_), Some(_)) | (None, None) => Ok(()),
                _ => Err(
                    "s3 config requires both access_key_id and secret_access_key when either is set"
                        .to_string(),
                ),
            },
        }
    }
}

/// Chunked upload protocol configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Bucket holding not-yet-merged chunks, shared by every session.
    #[serde(default = "default_staging_bucket")]
    pub staging_bucket: String,
    /// Destination bucket used when the client does not name one.
    #[serde(default = "default_bucket")]
    pub default_bucket: String,
    /// Digest clients use to compute the session fingerprint.
    #[serde(default)]
    pub digest: DigestAlgorithm,
    /// Age after which abandoned staging objects are reaped.
    #[serde(default = "default_staging_ttl_secs")]
    pub staging_ttl_secs: u64,
    /// How often the staging reaper runs. Zero disables it.
    #[serde(default)]
    pub reaper_interval_secs: u64,
}

fn default_staging_bucket() -> String {
    "temp".to_string()
}

fn default_bucket() -> String {
    "uploads".to_string()
}

fn default_staging_ttl_secs() -> u64 {
    7 * 24 * 60 * 60
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            staging_bucket: default_staging_bucket(),
            default_bucket: default_bucket(),
            digest: DigestAlgorithm::default(),
            staging_ttl_secs: default_staging_ttl_secs(),
            reaper_interval_secs: 0,
        }
    }
}

impl UploadConfig {
    /// Staging object time-to-live.
    pub fn staging_ttl(&self) -> Duration {
        Duration::from_secs(self.staging_ttl_secs)
    }

    /// Reaper interval, or `None` when the reaper is disabled.
    pub fn reaper_interval(&self) -> Option<Duration> {
        (self.reaper_interval_secs > 0).then(|| Duration::from_secs(self.reaper_interval_secs))
    }

    /// Validate upload configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.staging_bucket.trim().is_empty() {
            return Err("upload.staging_bucket must not be empty".to_string());
        }
        if self.default_bucket.trim().is_empty() {
            return Err("upload.default_bucket must not be empty".to_string());
        }
        if self.staging_bucket == self.default_bucket {
            return Err(format!(
                "upload.staging_bucket and upload.default_bucket must differ (both are {:?})",
                self.staging_bucket
            ));
        }
        if self.reaper_interval_secs > 0 && self.staging_ttl_secs == 0 {
            return Err("upload.staging_ttl_secs must be positive when the reaper is enabled".to_string());
        }
        Ok(())
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Storage backend configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Chunked upload configuration.
    #[serde(default)]
    pub upload: UploadConfig,
}

impl AppConfig {
    /// Validate every section.
    pub fn validate(&self) -> Result<(), String> {
        self.storage.validate()?;
        self.upload.validate()?;
        if self.server.max_chunk_size == 0 {
            return Err("server.max_chunk_size must be positive".to_string());
        }
        Ok(())
    }

    /// Create a test configuration rooted at the given storage path.
    ///
    /// **For testing only.**
    pub fn for_testing(storage_path: impl Into<PathBuf>) -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::Filesystem {
                path: storage_path.into(),
            },
            upload: UploadConfig::default(),
        }
    }
}
