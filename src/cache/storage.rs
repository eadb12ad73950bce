//! Cache storage trait with in-memory and SQLite implementations.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

/// An entry as the storage sees it: payload already serialized.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEntry {
  pub resource_key: String,
  pub payload: Vec<u8>,
  pub captured_at: DateTime<Utc>,
  pub ttl: Duration,
}

/// Trait for cache storage backends.
///
/// Entries are independent per resource key.
pub trait CacheStorage: Send + Sync {
  /// Get the full entry for a key.
  fn get(&self, resource_key: &str) -> Result<Option<StoredEntry>>;

  /// Get only freshness metadata (`captured_at`, `ttl`) without the payload.
  fn metadata(&self, resource_key: &str) -> Result<Option<(DateTime<Utc>, Duration)>>;

  /// Store the entry unless an existing one was captured later.
  /// Returns whether the entry was written.
  fn put_if_newer(&self, entry: StoredEntry) -> Result<bool>;

  /// Remove a single key.
  fn remove(&self, resource_key: &str) -> Result<()>;

  /// Remove everything.
  fn clear(&self) -> Result<()>;
}

/// Process-local storage, lost on exit.
#[derive(Default)]
pub struct MemoryStorage {
  entries: Mutex<HashMap<String, StoredEntry>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }
}

impl CacheStorage for MemoryStorage {
  fn get(&self, resource_key: &str) -> Result<Option<StoredEntry>> {
    let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
    Ok(entries.get(resource_key).cloned())
  }

  fn metadata(&self, resource_key: &str) -> Result<Option<(DateTime<Utc>, Duration)>> {
    let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
    Ok(entries.get(resource_key).map(|e| (e.captured_at, e.ttl)))
  }

  fn put_if_newer(&self, entry: StoredEntry) -> Result<bool> {
    let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(existing) = entries.get(&entry.resource_key) {
      if existing.captured_at > entry.captured_at {
        return Ok(false);
      }
    }
    entries.insert(entry.resource_key.clone(), entry);
    Ok(true)
  }

  fn remove(&self, resource_key: &str) -> Result<()> {
    let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
    entries.remove(resource_key);
    Ok(())
  }

  fn clear(&self) -> Result<()> {
    let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
    entries.clear();
    Ok(())
  }
}

/// SQLite-based cache storage, persisted across restarts.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open the cache database at `path`, or at the default location.
  pub fn open(path: Option<&Path>) -> Result<Self> {
    let path = match path {
      Some(p) => p.to_path_buf(),
      None => Self::default_path()?,
    };

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Open a throwaway database held in memory.
  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory cache: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  /// Get the default database path.
  fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("acon").join("cache.db"))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache_entries (
    key_hash TEXT PRIMARY KEY,
    resource_key TEXT NOT NULL,
    payload BLOB NOT NULL,
    captured_at_ms INTEGER NOT NULL,
    ttl_ms INTEGER NOT NULL
);
"#;

/// SHA256 hash for stable, fixed-length keys.
fn key_hash(resource_key: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(resource_key.as_bytes());
  hex::encode(hasher.finalize())
}

fn millis_to_datetime(ms: i64) -> Result<DateTime<Utc>> {
  DateTime::from_timestamp_millis(ms).ok_or_else(|| eyre!("Invalid cached timestamp {}", ms))
}

fn ttl_to_millis(ttl: Duration) -> i64 {
  i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)
}

fn millis_to_ttl(ms: i64) -> Duration {
  Duration::from_millis(u64::try_from(ms).unwrap_or(0))
}

impl CacheStorage for SqliteStorage {
  fn get(&self, resource_key: &str) -> Result<Option<StoredEntry>> {
    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let row: Option<(Vec<u8>, i64, i64)> = conn
      .query_row(
        "SELECT payload, captured_at_ms, ttl_ms FROM cache_entries WHERE key_hash = ?",
        params![key_hash(resource_key)],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read cache entry {}: {}", resource_key, e))?;

    match row {
      Some((payload, captured_at_ms, ttl_ms)) => Ok(Some(StoredEntry {
        resource_key: resource_key.to_string(),
        payload,
        captured_at: millis_to_datetime(captured_at_ms)?,
        ttl: millis_to_ttl(ttl_ms),
      })),
      None => Ok(None),
    }
  }

  fn metadata(&self, resource_key: &str) -> Result<Option<(DateTime<Utc>, Duration)>> {
    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let row: Option<(i64, i64)> = conn
      .query_row(
        "SELECT captured_at_ms, ttl_ms FROM cache_entries WHERE key_hash = ?",
        params![key_hash(resource_key)],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read cache metadata {}: {}", resource_key, e))?;

    match row {
      Some((captured_at_ms, ttl_ms)) => Ok(Some((
        millis_to_datetime(captured_at_ms)?,
        millis_to_ttl(ttl_ms),
      ))),
      None => Ok(None),
    }
  }

  fn put_if_newer(&self, entry: StoredEntry) -> Result<bool> {
    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;

    // Last write wins by capture time, not by arrival order
    let changed = conn
      .execute(
        "INSERT INTO cache_entries (key_hash, resource_key, payload, captured_at_ms, ttl_ms)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(key_hash) DO UPDATE SET
           payload = excluded.payload,
           captured_at_ms = excluded.captured_at_ms,
           ttl_ms = excluded.ttl_ms
         WHERE excluded.captured_at_ms >= cache_entries.captured_at_ms",
        params![
          key_hash(&entry.resource_key),
          entry.resource_key,
          entry.payload,
          entry.captured_at.timestamp_millis(),
          ttl_to_millis(entry.ttl),
        ],
      )
      .map_err(|e| eyre!("Failed to store cache entry: {}", e))?;

    Ok(changed > 0)
  }

  fn remove(&self, resource_key: &str) -> Result<()> {
    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "DELETE FROM cache_entries WHERE key_hash = ?",
        params![key_hash(resource_key)],
      )
      .map_err(|e| eyre!("Failed to remove cache entry {}: {}", resource_key, e))?;

    Ok(())
  }

  fn clear(&self) -> Result<()> {
    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute("DELETE FROM cache_entries", [])
      .map_err(|e| eyre!("Failed to clear cache: {}", e))?;

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn entry(key: &str, payload: &[u8], captured_at: DateTime<Utc>) -> StoredEntry {
    StoredEntry {
      resource_key: key.to_string(),
      payload: payload.to_vec(),
      captured_at,
      ttl: Duration::from_secs(300),
    }
  }

  fn captured(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap()
  }

  fn exercise_last_write_wins(storage: &dyn CacheStorage) {
    assert!(storage
      .put_if_newer(entry("books", b"newer", captured(2_000)))
      .unwrap());
    // A late write captured earlier must not clobber fresher data
    assert!(!storage
      .put_if_newer(entry("books", b"older", captured(1_000)))
      .unwrap());

    let stored = storage.get("books").unwrap().unwrap();
    assert_eq!(stored.payload, b"newer");
    assert_eq!(stored.captured_at, captured(2_000));
  }

  #[test]
  fn test_memory_last_write_wins() {
    exercise_last_write_wins(&MemoryStorage::new());
  }

  #[test]
  fn test_sqlite_last_write_wins() {
    exercise_last_write_wins(&SqliteStorage::open_in_memory().unwrap());
  }

  #[test]
  fn test_sqlite_roundtrip_and_metadata() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage
      .put_if_newer(entry("years", b"[1,2]", captured(5_000)))
      .unwrap();

    let (captured_at, ttl) = storage.metadata("years").unwrap().unwrap();
    assert_eq!(captured_at, captured(5_000));
    assert_eq!(ttl, Duration::from_secs(300));

    let stored = storage.get("years").unwrap().unwrap();
    assert_eq!(stored.resource_key, "years");
    assert_eq!(stored.payload, b"[1,2]");
  }

  #[test]
  fn test_sqlite_entries_are_independent() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage
      .put_if_newer(entry("years", b"y", captured(1)))
      .unwrap();
    storage
      .put_if_newer(entry("books", b"b", captured(1)))
      .unwrap();

    storage.remove("years").unwrap();

    assert!(storage.get("years").unwrap().is_none());
    assert!(storage.get("books").unwrap().is_some());

    storage.clear().unwrap();
    assert!(storage.get("books").unwrap().is_none());
  }
}
