//! Versioned response cache for offline support.
//!
//! This module provides:
//! - Named cache buckets mapping a request identity to a stored response
//! - SQLite and in-memory storage backends
//! - The `CacheStoreManager`, which populates the current bucket on
//!   install and evicts stale buckets on activate

mod manager;
mod storage;
mod traits;

#[cfg(test)]
pub mod testing;

pub use manager::{BucketSummary, CacheStoreManager, InstallError, InstallPolicy, InstallReport};
pub use storage::{CacheStorage, MemoryStorage, SqliteStorage};
pub use traits::{CacheSource, CachedResponse, Served};
