//! Core domain types for chunkyard resumable uploads.
//!
//! This crate defines the data model shared by the storage, upload, server
//! and CLI crates:
//! - Content fingerprints and the digests that produce them
//! - Staging key layout for chunks and session markers
//! - Upload outcomes and the records that persist them
//! - Object and bucket naming rules
//! - The text encoding of chunk responses

pub mod chunk;
pub mod config;
pub mod error;
pub mod hash;
pub mod naming;
pub mod upload;
pub mod wire;

pub use chunk::{ChunkKey, parse_chunk_index};
pub use error::{Error, Result};
pub use hash::{ContentHasher, DigestAlgorithm, Fingerprint};
pub use naming::{validate_bucket_name, validate_object_name};
pub use upload::{OutcomeRecord, SessionMarker, UploadOutcome};

/// Default chunk size used by clients: 8 MiB
pub const DEFAULT_CHUNK_SIZE: u64 = 8 * 1024 * 1024;

/// Maximum accepted chunk size: 64 MiB
pub const MAX_CHUNK_SIZE: u64 = 64 * 1024 * 1024;

/// Maximum single-shot object size: 512 MiB
pub const MAX_OBJECT_SIZE: u64 = 512 * 1024 * 1024;
