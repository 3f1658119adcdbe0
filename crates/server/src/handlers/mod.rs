//! HTTP request handlers.

pub mod buckets;
pub mod chunked;
pub mod health;
pub mod objects;

pub use buckets::*;
pub use chunked::*;
pub use health::*;
pub use objects::*;
