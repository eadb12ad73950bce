//! Keyed, TTL-bounded cache of last-known-good resource snapshots.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use super::storage::{CacheStorage, StoredEntry};
use super::traits::{is_fresh, CacheEntry};
use crate::clock::{Clock, SystemClock};

/// Local cache sitting between resource hooks and the storage backend.
///
/// Values cross the boundary by serialization, so callers always get their
/// own copy. Expiry is lazy: an expired entry reads as absent and stays in
/// storage until it is overwritten or invalidated.
///
/// The cache is advisory. Storage failures are logged and read as a miss;
/// they never fail the caller.
pub struct LocalCache {
  storage: Arc<dyn CacheStorage>,
  clock: Arc<dyn Clock>,
}

impl LocalCache {
  /// Create a new cache with the given storage backend.
  pub fn new(storage: impl CacheStorage + 'static) -> Self {
    Self {
      storage: Arc::new(storage),
      clock: Arc::new(SystemClock),
    }
  }

  /// Use a different time source.
  #[cfg(test)]
  pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  pub fn now(&self) -> DateTime<Utc> {
    self.clock.now()
  }

  /// Payload for `key` if present and not expired.
  pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
    self.get_entry(key).map(|entry| entry.payload)
  }

  /// Full entry for `key` if present and not expired.
  pub fn get_entry<T: DeserializeOwned>(&self, key: &str) -> Option<CacheEntry<T>> {
    let stored = match self.storage.get(key) {
      Ok(Some(stored)) => stored,
      Ok(None) => return None,
      Err(e) => {
        warn!(key, error = %e, "cache read failed");
        return None;
      }
    };

    if !is_fresh(stored.captured_at, stored.ttl, self.clock.now()) {
      return None;
    }

    match serde_json::from_slice(&stored.payload) {
      Ok(payload) => Some(CacheEntry {
        resource_key: stored.resource_key,
        payload,
        captured_at: stored.captured_at,
        ttl: stored.ttl,
      }),
      Err(e) => {
        warn!(key, error = %e, "discarding undecodable cache entry");
        self.invalidate(key);
        None
      }
    }
  }

  /// Store `value` captured now.
  pub fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
    let captured_at = self.clock.now();
    self.set_captured(key, value, ttl, captured_at);
  }

  /// Store `value` captured at `captured_at`, unless the current entry is newer.
  /// Returns whether the value was written.
  pub fn set_captured<T: Serialize>(
    &self,
    key: &str,
    value: &T,
    ttl: Duration,
    captured_at: DateTime<Utc>,
  ) -> bool {
    let payload = match serde_json::to_vec(value) {
      Ok(payload) => payload,
      Err(e) => {
        warn!(key, error = %e, "failed to serialize cache entry");
        return false;
      }
    };

    let entry = StoredEntry {
      resource_key: key.to_string(),
      payload,
      captured_at,
      ttl,
    };

    match self.storage.put_if_newer(entry) {
      Ok(written) => written,
      Err(e) => {
        warn!(key, error = %e, "cache write failed");
        false
      }
    }
  }

  /// Drop the entry for `key` immediately.
  pub fn invalidate(&self, key: &str) {
    if let Err(e) = self.storage.remove(key) {
      warn!(key, error = %e, "cache invalidation failed");
    }
  }

  /// Whether `key` holds a fresh entry, without decoding the payload.
  pub fn is_valid(&self, key: &str) -> bool {
    match self.storage.metadata(key) {
      Ok(Some((captured_at, ttl))) => is_fresh(captured_at, ttl, self.clock.now()),
      Ok(None) => false,
      Err(e) => {
        warn!(key, error = %e, "cache metadata read failed");
        false
      }
    }
  }

  /// Drop every entry.
  pub fn clear(&self) {
    if let Err(e) = self.storage.clear() {
      warn!(error = %e, "cache clear failed");
    }
  }
}

impl Clone for LocalCache {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      clock: Arc::clone(&self.clock),
    }
  }
}
