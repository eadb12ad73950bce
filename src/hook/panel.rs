//! Type-erased view of a resource hook for the console.

use async_trait::async_trait;
use tokio::sync::watch;

use super::record::{Record, RecordKey};
use super::resource::{Resolution, ResourceHook};
use crate::cache::CacheSource;
use crate::resources::Resource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMark {
  Synced,
  PendingCreate,
  Modified,
}

impl SyncMark {
  pub fn glyph(&self) -> &'static str {
    match self {
      SyncMark::Synced => " ",
      SyncMark::PendingCreate => "●",
      SyncMark::Modified => "✎",
    }
  }
}

/// One line in a resource list.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
  pub key: RecordKey,
  pub title: String,
  pub mark: SyncMark,
}

impl<R: Resource> From<&Record<R>> for Row {
  fn from(record: &Record<R>) -> Self {
    let mark = match record {
      Record::Synced { .. } => SyncMark::Synced,
      Record::Pending { .. } => SyncMark::PendingCreate,
      Record::Modified { .. } => SyncMark::Modified,
    };
    Row {
      key: record.key(),
      title: record.data().title().to_string(),
      mark,
    }
  }
}

#[async_trait]
pub trait ResourcePanel: Send + Sync {
  fn name(&self) -> &'static str;
  fn rows(&self) -> Vec<Row>;
  fn loading(&self) -> bool;
  fn error(&self) -> Option<String>;
  fn is_offline_mode(&self) -> bool;
  fn unsynced_count(&self) -> usize;
  fn source(&self) -> Option<CacheSource>;
  fn conflict_message(&self) -> Option<String>;
  fn changes(&self) -> watch::Receiver<u64>;
  fn clear_cache(&self);

  async fn activate(&self);
  async fn create_titled(&self, title: &str) -> Result<(), String>;
  async fn retitle(&self, key: &RecordKey, title: &str) -> Result<(), String>;
  async fn remove(&self, key: &RecordKey) -> Result<(), String>;
  async fn retry_connection(&self) -> Result<(), String>;
  async fn resolve_conflict(&self, resolution: Resolution) -> Result<(), String>;
}

#[async_trait]
impl<R: Resource> ResourcePanel for ResourceHook<R> {
  fn name(&self) -> &'static str {
    R::COLLECTION
  }

  fn rows(&self) -> Vec<Row> {
    self.items().iter().map(Row::from).collect()
  }

  fn loading(&self) -> bool {
    ResourceHook::loading(self)
  }

  fn error(&self) -> Option<String> {
    ResourceHook::error(self)
  }

  fn is_offline_mode(&self) -> bool {
    ResourceHook::is_offline_mode(self)
  }

  fn unsynced_count(&self) -> usize {
    ResourceHook::unsynced_count(self)
  }

  fn source(&self) -> Option<CacheSource> {
    ResourceHook::source(self)
  }

  fn conflict_message(&self) -> Option<String> {
    self.conflict().map(|c| c.message())
  }

  fn changes(&self) -> watch::Receiver<u64> {
    ResourceHook::changes(self)
  }

  fn clear_cache(&self) {
    ResourceHook::clear_cache(self)
  }

  async fn activate(&self) {
    ResourceHook::activate(self).await
  }

  async fn create_titled(&self, title: &str) -> Result<(), String> {
    self.create(R::draft(title)).await.map(|_| ())
  }

  async fn retitle(&self, key: &RecordKey, title: &str) -> Result<(), String> {
    let current = self
      .items()
      .into_iter()
      .find(|r| &r.key() == key)
      .map(|r| r.data().with_title(title))
      .ok_or_else(|| format!("{} not found", key))?;
    self.update(key, current).await
  }

  async fn remove(&self, key: &RecordKey) -> Result<(), String> {
    self.delete(key).await
  }

  async fn retry_connection(&self) -> Result<(), String> {
    ResourceHook::retry_connection(self).await
  }

  async fn resolve_conflict(&self, resolution: Resolution) -> Result<(), String> {
    ResourceHook::resolve_conflict(self, resolution).await
  }
}
