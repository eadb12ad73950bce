//! Local view of backend records and the queue of unsynced changes.
//!
//! A hook keeps two things: the last known backend snapshot and an
//! [`Outbox`] of local mutations not yet confirmed by the backend. What the
//! user sees is always the snapshot with the outbox laid over it, so a
//! confirmed change can never show up twice.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static LAST_LOCAL_ID: AtomicU64 = AtomicU64::new(0);

/// Client-generated id for a record created locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalId(u64);

impl LocalId {
  /// Time-based and strictly increasing within the process.
  pub fn generate() -> Self {
    let now = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0) * 1000;
    let previous = LAST_LOCAL_ID
      .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |last| {
        Some(now.max(last + 1))
      })
      .unwrap_or(now);
    LocalId(now.max(previous + 1))
  }
}

impl fmt::Display for LocalId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "local-{}", self.0)
  }
}

/// How callers address a record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RecordKey {
  Remote(String),
  Local(LocalId),
}

impl fmt::Display for RecordKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      RecordKey::Remote(id) => f.write_str(id),
      RecordKey::Local(id) => write!(f, "{}", id),
    }
  }
}

/// A backend document with its typed payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity<T> {
  pub id: String,
  pub data: T,
}

/// A record as shown to the user.
#[derive(Debug, Clone, PartialEq)]
pub enum Record<T> {
  /// Matches the backend
  Synced { id: String, data: T },
  /// Created locally, not yet on the backend
  Pending { local_id: LocalId, data: T },
  /// Exists on the backend, with a local edit not yet confirmed
  Modified { id: String, data: T },
}

impl<T> Record<T> {
  pub fn key(&self) -> RecordKey {
    match self {
      Record::Synced { id, .. } | Record::Modified { id, .. } => RecordKey::Remote(id.clone()),
      Record::Pending { local_id, .. } => RecordKey::Local(*local_id),
    }
  }

  pub fn data(&self) -> &T {
    match self {
      Record::Synced { data, .. } | Record::Pending { data, .. } | Record::Modified { data, .. } => {
        data
      }
    }
  }

  #[cfg(test)]
  pub fn is_unsynced(&self) -> bool {
    !matches!(self, Record::Synced { .. })
  }

  fn remote_id(&self) -> Option<&str> {
    match self {
      Record::Synced { id, .. } | Record::Modified { id, .. } => Some(id),
      Record::Pending { .. } => None,
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Mutation<T> {
  Create { local_id: LocalId, data: T },
  Update { id: String, data: T },
  Delete { id: String },
}

impl<T> Mutation<T> {
  pub fn describe(&self) -> String {
    match self {
      Mutation::Create { local_id, .. } => format!("create {}", local_id),
      Mutation::Update { id, .. } => format!("update {}", id),
      Mutation::Delete { id } => format!("delete {}", id),
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueuedMutation<T> {
  /// Issue order within the outbox
  pub seq: u64,
  pub queued_at: DateTime<Utc>,
  pub mutation: Mutation<T>,
}

/// Unsynced mutations in the order the user issued them.
#[derive(Debug, Clone)]
pub struct Outbox<T> {
  queue: VecDeque<QueuedMutation<T>>,
  next_seq: u64,
}

impl<T> Default for Outbox<T> {
  fn default() -> Self {
    Self {
      queue: VecDeque::new(),
      next_seq: 1,
    }
  }
}

impl<T: Clone> Outbox<T> {
  pub fn len(&self) -> usize {
    self.queue.len()
  }

  pub fn is_empty(&self) -> bool {
    self.queue.is_empty()
  }

  pub fn front(&self) -> Option<&QueuedMutation<T>> {
    self.queue.front()
  }

  pub fn iter(&self) -> impl Iterator<Item = &QueuedMutation<T>> {
    self.queue.iter()
  }

  fn push(&mut self, mutation: Mutation<T>) -> u64 {
    let seq = self.next_seq;
    self.next_seq += 1;
    self.queue.push_back(QueuedMutation {
      seq,
      queued_at: Utc::now(),
      mutation,
    });
    seq
  }

  /// Queue a create and return the id the record is known by until it syncs.
  pub fn create(&mut self, data: T) -> LocalId {
    let local_id = LocalId::generate();
    self.push(Mutation::Create { local_id, data });
    local_id
  }

  pub fn queue_update(&mut self, id: String, data: T) {
    self.push(Mutation::Update { id, data });
  }

  pub fn queue_delete(&mut self, id: String) {
    self.push(Mutation::Delete { id });
  }

  /// Fold an edit of a not-yet-created record into its queued create.
  pub fn amend_local(&mut self, local_id: LocalId, data: T) -> bool {
    for queued in self.queue.iter_mut() {
      if let Mutation::Create {
        local_id: l,
        data: queued_data,
      } = &mut queued.mutation
      {
        if *l == local_id {
          *queued_data = data;
          return true;
        }
      }
    }
    false
  }

  /// Drop the queued create of a record deleted before it ever synced.
  pub fn discard_local(&mut self, local_id: LocalId) -> bool {
    let before = self.queue.len();
    self.queue.retain(
      |q| !matches!(&q.mutation, Mutation::Create { local_id: l, .. } if *l == local_id),
    );
    self.queue.len() != before
  }

  /// Remove the entry with `seq`, returning its current contents. `None`
  /// when the entry was discarded while it was in flight.
  pub fn complete(&mut self, seq: u64) -> Option<QueuedMutation<T>> {
    let position = self.queue.iter().position(|q| q.seq == seq)?;
    self.queue.remove(position)
  }

  /// The user-visible records: `remote` with every queued mutation applied.
  pub fn overlay(&self, remote: &[Entity<T>]) -> Vec<Record<T>> {
    let mut records: Vec<Record<T>> = remote
      .iter()
      .map(|e| Record::Synced {
        id: e.id.clone(),
        data: e.data.clone(),
      })
      .collect();

    for queued in &self.queue {
      match &queued.mutation {
        Mutation::Create { local_id, data } => records.push(Record::Pending {
          local_id: *local_id,
          data: data.clone(),
        }),
        Mutation::Update { id, data } => {
          let modified = Record::Modified {
            id: id.clone(),
            data: data.clone(),
          };
          match records.iter().position(|r| r.remote_id() == Some(id.as_str())) {
            Some(pos) => records[pos] = modified,
            None => records.push(modified),
          }
        }
        Mutation::Delete { id } => records.retain(|r| r.remote_id() != Some(id.as_str())),
      }
    }

    records
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn entity(id: &str, data: &str) -> Entity<String> {
    Entity {
      id: id.to_string(),
      data: data.to_string(),
    }
  }

  #[test]
  fn test_local_ids_are_unique_and_increasing() {
    let ids: Vec<LocalId> = (0..100).map(|_| LocalId::generate()).collect();
    assert!(ids.windows(2).all(|w| w[0] < w[1]));
  }

  #[test]
  fn test_overlay_applies_queue_in_order() {
    let remote = vec![entity("a", "Algebra"), entity("b", "Biology")];
    let mut outbox = Outbox::default();
    let local = outbox.create("Chemistry".to_string());
    outbox.queue_update("a".to_string(), "Linear Algebra".to_string());
    outbox.queue_delete("b".to_string());

    let records = outbox.overlay(&remote);

    assert_eq!(
      records,
      vec![
        Record::Modified {
          id: "a".to_string(),
          data: "Linear Algebra".to_string()
        },
        Record::Pending {
          local_id: local,
          data: "Chemistry".to_string()
        },
      ]
    );
    assert!(records.iter().all(|r| r.is_unsynced()));
  }

  #[test]
  fn test_amend_and_discard_local() {
    let mut outbox = Outbox::default();
    let local = outbox.create("Draft".to_string());

    assert!(outbox.amend_local(local, "Final".to_string()));
    assert_eq!(outbox.len(), 1);
    assert_eq!(
      outbox.front().map(|q| q.mutation.clone()),
      Some(Mutation::Create {
        local_id: local,
        data: "Final".to_string()
      })
    );

    assert!(outbox.discard_local(local));
    assert!(outbox.is_empty());
    assert!(!outbox.amend_local(local, "Again".to_string()));
  }

  #[test]
  fn test_complete_removes_by_seq() {
    let mut outbox: Outbox<String> = Outbox::default();
    outbox.queue_delete("a".to_string());
    outbox.queue_delete("b".to_string());
    let first = outbox.front().unwrap().seq;

    let done = outbox.complete(first).unwrap();

    assert_eq!(done.mutation, Mutation::Delete { id: "a".to_string() });
    assert_eq!(outbox.len(), 1);
    assert!(outbox.complete(first).is_none());
  }

  #[test]
  fn test_confirmed_create_appears_once() {
    let mut outbox = Outbox::default();
    outbox.create("Physics".to_string());
    let seq = outbox.front().unwrap().seq;

    // Backend confirms: entry leaves the outbox, echo joins the snapshot
    outbox.complete(seq);
    let remote = vec![entity("p1", "Physics")];

    let records = outbox.overlay(&remote);
    assert_eq!(records.len(), 1);
    assert!(!records[0].is_unsynced());
  }
}
