//! Repository implementations for database operations

pub mod cache;
pub mod jobs;
pub mod stats;

pub use cache::*;
pub use jobs::*;
pub use stats::*;
