//! Local caching of resource snapshots for offline support.
//!
//! This module provides a resource-agnostic cache that:
//! - Stores one last-known-good snapshot per resource key
//! - Treats entries older than their TTL as absent (lazy expiry)
//! - Resolves racing writes last-write-wins by capture time
//! - Persists to SQLite so snapshots survive restarts

mod layer;
mod storage;
mod traits;

pub use layer::LocalCache;
pub use storage::{MemoryStorage, SqliteStorage};
pub use traits::CacheSource;
