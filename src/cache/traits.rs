//! Core types for the local cache.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// A last-known-good snapshot for one resource key.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<T> {
  pub resource_key: String,
  pub payload: T,
  pub captured_at: DateTime<Utc>,
  pub ttl: Duration,
}

impl<T> CacheEntry<T> {
  /// Valid iff `now - captured_at < ttl`.
  #[cfg(test)]
  pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
    is_fresh(self.captured_at, self.ttl, now)
  }
}

pub(crate) fn is_fresh(captured_at: DateTime<Utc>, ttl: Duration, now: DateTime<Utc>) -> bool {
  match chrono::Duration::from_std(ttl) {
    Ok(ttl) => now - captured_at < ttl,
    // Larger than chrono can represent: never expires
    Err(_) => true,
  }
}

/// Indicates where served data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from the backend
  Network,
  /// Last-known-good snapshot from the local cache
  Cache,
  /// Neither network nor cache: the built-in minimal dataset
  Fallback,
}
