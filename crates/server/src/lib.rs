//! HTTP server for chunkyard.
//!
//! This crate provides the HTTP surface:
//! - Resumable chunked uploads (`POST /objects/chunked`)
//! - Single-shot object upload, download, listing, stat and delete
//! - Bucket management and presigned download URLs
//! - Health checks

pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;
pub mod trace;

pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;
pub use trace::TraceId;
