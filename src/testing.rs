//! Test doubles shared across modules.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::connectivity::ConnectivityMonitor;
use crate::error::{Error, HttpError, Result};
use crate::net::{HttpClient, HttpRequest, HttpResponse};
use crate::store::{ChangeEvent, Document, DocumentStore};

/// HTTP client that replays queued outcomes in order. Once the script runs
/// out every call answers `200 {}`.
#[derive(Default)]
pub struct ScriptedHttp {
  script: Mutex<VecDeque<std::result::Result<HttpResponse, HttpError>>>,
  requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedHttp {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn push_ok(&self, status: u16, body: &[u8]) {
    self.script.lock().unwrap().push_back(Ok(HttpResponse {
      status,
      body: body.to_vec(),
    }));
  }

  pub fn push_err(&self, err: HttpError) {
    self.script.lock().unwrap().push_back(Err(err));
  }

  pub fn calls(&self) -> usize {
    self.requests.lock().unwrap().len()
  }

  pub fn requests(&self) -> Vec<HttpRequest> {
    self.requests.lock().unwrap().clone()
  }
}

#[async_trait]
impl HttpClient for ScriptedHttp {
  async fn send(&self, request: HttpRequest) -> std::result::Result<HttpResponse, HttpError> {
    self.requests.lock().unwrap().push(request);
    self.script.lock().unwrap().pop_front().unwrap_or(Ok(HttpResponse {
      status: 200,
      body: b"{}".to_vec(),
    }))
  }
}

#[derive(Default)]
struct StoreState {
  collections: HashMap<String, Vec<Document>>,
  next_id: u64,
  writes: Vec<String>,
  failures: VecDeque<Error>,
  list_delay: Option<Duration>,
  list_calls: usize,
  watchers: HashMap<String, Vec<mpsc::UnboundedSender<ChangeEvent>>>,
}

/// In-memory document database.
///
/// Every call yields once before touching state so concurrent callers can
/// interleave. With a monitor attached, successful calls are reported the
/// way the request interceptor would.
#[derive(Default)]
pub struct MemoryStore {
  state: Mutex<StoreState>,
  monitor: Option<Arc<ConnectivityMonitor>>,
  live: bool,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_monitor(mut self, monitor: Arc<ConnectivityMonitor>) -> Self {
    self.monitor = Some(monitor);
    self
  }

  /// Offer a change feed from `watch`.
  pub fn live(mut self) -> Self {
    self.live = true;
    self
  }

  fn lock(&self) -> MutexGuard<'_, StoreState> {
    self.state.lock().unwrap()
  }

  pub fn seed(&self, collection: &str, id: &str, data: Value) {
    self
      .lock()
      .collections
      .entry(collection.to_string())
      .or_default()
      .push(Document {
        id: id.to_string(),
        data,
      });
  }

  pub fn documents(&self, collection: &str) -> Vec<Document> {
    self
      .lock()
      .collections
      .get(collection)
      .cloned()
      .unwrap_or_default()
  }

  /// Completed writes as `collection:op:id`, in the order they landed.
  pub fn writes(&self) -> Vec<String> {
    self.lock().writes.clone()
  }

  /// Fail the next call (of any kind) with `err`.
  pub fn fail_next(&self, err: Error) {
    self.lock().failures.push_back(err);
  }

  pub fn delay_lists(&self, delay: Option<Duration>) {
    self.lock().list_delay = delay;
  }

  pub fn list_calls(&self) -> usize {
    self.lock().list_calls
  }

  /// Push an event to every watcher of `collection`.
  pub fn emit(&self, collection: &str, event: ChangeEvent) {
    let mut state = self.lock();
    if let Some(watchers) = state.watchers.get_mut(collection) {
      watchers.retain(|tx| tx.send(event.clone()).is_ok());
    }
  }

  async fn enter(&self) -> Result<()> {
    tokio::task::yield_now().await;
    match self.lock().failures.pop_front() {
      Some(err) => Err(err),
      None => Ok(()),
    }
  }

  fn succeeded(&self) {
    if let Some(monitor) = &self.monitor {
      monitor.report_success();
    }
  }
}

#[async_trait]
impl DocumentStore for MemoryStore {
  async fn list(&self, collection: &str) -> Result<Vec<Document>> {
    let delay = {
      let mut state = self.lock();
      state.list_calls += 1;
      state.list_delay
    };
    if let Some(delay) = delay {
      tokio::time::sleep(delay).await;
    }
    self.enter().await?;
    self.succeeded();
    Ok(self.documents(collection))
  }

  async fn create(&self, collection: &str, data: Value) -> Result<Document> {
    self.enter().await?;
    let doc = {
      let mut state = self.lock();
      state.next_id += 1;
      let prefix = collection.chars().next().unwrap_or('d');
      let doc = Document {
        id: format!("{}{}", prefix, state.next_id),
        data,
      };
      state
        .collections
        .entry(collection.to_string())
        .or_default()
        .push(doc.clone());
      state
        .writes
        .push(format!("{}:create:{}", collection, doc.id));
      doc
    };
    self.succeeded();
    Ok(doc)
  }

  async fn update(&self, collection: &str, id: &str, data: Value) -> Result<Document> {
    self.enter().await?;
    let doc = {
      let mut state = self.lock();
      let docs = state.collections.entry(collection.to_string()).or_default();
      let Some(existing) = docs.iter_mut().find(|d| d.id == id) else {
        return Err(Error::Validation(format!("HTTP 404: {} not found", id)));
      };
      existing.data = data;
      let doc = existing.clone();
      state.writes.push(format!("{}:update:{}", collection, id));
      doc
    };
    self.succeeded();
    Ok(doc)
  }

  async fn delete(&self, collection: &str, id: &str) -> Result<()> {
    self.enter().await?;
    {
      let mut state = self.lock();
      let docs = state.collections.entry(collection.to_string()).or_default();
      let before = docs.len();
      docs.retain(|d| d.id != id);
      if docs.len() == before {
        return Err(Error::Validation(format!("HTTP 404: {} not found", id)));
      }
      state.writes.push(format!("{}:delete:{}", collection, id));
    }
    self.succeeded();
    Ok(())
  }

  fn watch(&self, collection: &str) -> Option<mpsc::UnboundedReceiver<ChangeEvent>> {
    if !self.live {
      return None;
    }
    let (tx, rx) = mpsc::unbounded_channel();
    self
      .lock()
      .watchers
      .entry(collection.to_string())
      .or_default()
      .push(tx);
    Some(rx)
  }
}
