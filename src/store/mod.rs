//! Document database client seen by resource hooks.
//!
//! The database protocol is opaque to the rest of the crate: documents are
//! an id plus a JSON payload that passes through unchanged.

mod rest;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::Result;

pub use rest::RestDocumentStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
  pub id: String,
  pub data: Value,
}

/// One push-style notification from a live change feed.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
  Upserted(Document),
  Removed { id: String },
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
  async fn list(&self, collection: &str) -> Result<Vec<Document>>;

  /// Create a document; the backend assigns the id and echoes the stored copy.
  async fn create(&self, collection: &str, data: Value) -> Result<Document>;

  async fn update(&self, collection: &str, id: &str, data: Value) -> Result<Document>;

  async fn delete(&self, collection: &str, id: &str) -> Result<()>;

  /// Live change feed for a collection, when the backend offers one.
  fn watch(&self, _collection: &str) -> Option<mpsc::UnboundedReceiver<ChangeEvent>> {
    None
  }
}
