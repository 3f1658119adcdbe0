//! The resumable chunked upload protocol.
//!
//! Progress is never stored separately: the set of chunk objects under a
//! session's staging prefix is the state. The coordinator answers each chunk
//! with the next index to send, and once every chunk is present it merges,
//! verifies and records the outcome under a per-fingerprint lock.

pub mod coordinator;
pub mod error;
pub mod locks;
pub mod merger;
pub mod reaper;
pub mod tracker;
pub mod verifier;

pub use coordinator::{ChunkSubmission, CoordinatorConfig, UploadCoordinator};
pub use error::{UploadError, UploadResult};
pub use locks::{SessionGuard, SessionLocks};
pub use merger::{MergedObject, Merger};
pub use reaper::{ReapStats, StagingReaper};
pub use tracker::ChunkTracker;
pub use verifier::{IntegrityVerifier, Verification};

pub use chunkyard_core::UploadOutcome;
