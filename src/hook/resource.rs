//! Per-resource data hook: loads a collection, serves it offline, and keeps
//! local mutations until the backend confirms them.

use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::record::{Entity, LocalId, Mutation, Outbox, QueuedMutation, Record, RecordKey};
use crate::cache::{CacheSource, LocalCache};
use crate::connectivity::{
  ConnectivityChange, ConnectivityMonitor, ConnectivityState, OfflineReason, Subscription,
};
use crate::error::{Error, Result};
use crate::resources::Resource;
use crate::retry::{retry, RetryError, RetryPolicy};
use crate::store::{ChangeEvent, Document, DocumentStore};

/// Id prefix of records served from the built-in fallback dataset.
pub const FALLBACK_PREFIX: &str = "fallback-";

#[derive(Debug, Clone)]
pub struct HookSettings {
  /// Longest a fetch may take before the hook serves offline data
  pub fetch_timeout: Duration,
  /// Lifetime of cached snapshots
  pub cache_ttl: Duration,
  pub retry: RetryPolicy,
}

impl Default for HookSettings {
  fn default() -> Self {
    Self {
      fetch_timeout: Duration::from_millis(2500),
      cache_ttl: Duration::from_secs(300),
      retry: RetryPolicy::default(),
    }
  }
}

/// Serializes outbox replay across every hook sharing it.
#[derive(Clone, Default)]
pub struct ReplayGate(Arc<tokio::sync::Mutex<()>>);

/// Everything a hook needs from the rest of the process.
#[derive(Clone)]
pub struct HookContext {
  pub store: Arc<dyn DocumentStore>,
  pub monitor: Arc<ConnectivityMonitor>,
  pub cache: LocalCache,
  pub replay_gate: ReplayGate,
  pub settings: HookSettings,
}

impl HookContext {
  pub fn new(
    store: Arc<dyn DocumentStore>,
    monitor: Arc<ConnectivityMonitor>,
    cache: LocalCache,
  ) -> Self {
    Self {
      store,
      monitor,
      cache,
      replay_gate: ReplayGate::default(),
      settings: HookSettings::default(),
    }
  }

  pub fn with_settings(mut self, settings: HookSettings) -> Self {
    self.settings = settings;
    self
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookStatus {
  Connecting,
  Connected,
  Offline,
}

/// A queued mutation the backend rejected during replay.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayConflict<T> {
  pub mutation: QueuedMutation<T>,
  pub reason: String,
}

impl<T> ReplayConflict<T> {
  pub fn message(&self) -> String {
    Error::ConflictOnReplay(format!("{}: {}", self.mutation.mutation.describe(), self.reason))
      .to_string()
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
  /// Drop the rejected change; the next refresh restores the backend copy
  Discard,
  /// Send the rejected change again
  Resubmit,
}

struct HookState<R> {
  status: HookStatus,
  remote: Vec<Entity<R>>,
  outbox: Outbox<R>,
  source: Option<CacheSource>,
  loading: bool,
  error: Option<String>,
  conflict: Option<ReplayConflict<R>>,
  /// Bumped per refresh; only the newest refresh may apply its result
  fetch_generation: u64,
  /// Bumped per local or confirmed change; stale fetches must not overwrite
  mutation_epoch: u64,
  replaying: bool,
  watching: bool,
}

struct Shared<R: Resource> {
  ctx: HookContext,
  state: Mutex<HookState<R>>,
  changes: watch::Sender<u64>,
  subscription: Mutex<Option<Subscription>>,
}

/// Data hook for one resource kind.
///
/// Cheap to clone; clones share state.
pub struct ResourceHook<R: Resource> {
  shared: Arc<Shared<R>>,
}

impl<R: Resource> Clone for ResourceHook<R> {
  fn clone(&self) -> Self {
    Self {
      shared: Arc::clone(&self.shared),
    }
  }
}

/// Backend's answer to one replayed mutation.
enum Echo<R> {
  Created(Entity<R>),
  Updated(Entity<R>),
  Deleted(String),
}

impl<R: Resource> ResourceHook<R> {
  pub fn new(ctx: HookContext) -> Self {
    let (changes, _) = watch::channel(0);
    Self {
      shared: Arc::new(Shared {
        ctx,
        state: Mutex::new(HookState {
          status: HookStatus::Connecting,
          remote: Vec::new(),
          outbox: Outbox::default(),
          source: None,
          loading: false,
          error: None,
          conflict: None,
          fetch_generation: 0,
          mutation_epoch: 0,
          replaying: false,
          watching: false,
        }),
        changes,
        subscription: Mutex::new(None),
      }),
    }
  }

  fn from_weak(shared: &Weak<Shared<R>>) -> Option<Self> {
    shared.upgrade().map(|shared| Self { shared })
  }

  fn ctx(&self) -> &HookContext {
    &self.shared.ctx
  }

  fn lock(&self) -> MutexGuard<'_, HookState<R>> {
    self
      .shared
      .state
      .lock()
      .unwrap_or_else(|e| e.into_inner())
  }

  fn notify(&self) {
    self.shared.changes.send_modify(|version| *version += 1);
  }

  /// Ticks whenever anything observable changes.
  pub fn changes(&self) -> watch::Receiver<u64> {
    self.shared.changes.subscribe()
  }

  /// Backend snapshot with unsynced local changes laid over it.
  pub fn items(&self) -> Vec<Record<R>> {
    let state = self.lock();
    state.outbox.overlay(&state.remote)
  }

  pub fn loading(&self) -> bool {
    self.lock().loading
  }

  pub fn error(&self) -> Option<String> {
    self.lock().error.clone()
  }

  pub fn status(&self) -> HookStatus {
    self.lock().status
  }

  pub fn is_offline_mode(&self) -> bool {
    self.status() == HookStatus::Offline
  }

  /// Where the current snapshot came from; `None` before the first load.
  pub fn source(&self) -> Option<CacheSource> {
    self.lock().source
  }

  pub fn unsynced_count(&self) -> usize {
    self.lock().outbox.len()
  }

  pub fn conflict(&self) -> Option<ReplayConflict<R>> {
    self.lock().conflict.clone()
  }

  /// Start following connectivity and load the collection.
  pub async fn activate(&self) {
    self.follow_connectivity();
    self.refresh().await;
  }

  fn follow_connectivity(&self) {
    let mut subscription = self
      .shared
      .subscription
      .lock()
      .unwrap_or_else(|e| e.into_inner());
    if subscription.is_some() {
      return;
    }
    let (tx, rx) = mpsc::unbounded_channel();
    *subscription = Some(self.ctx().monitor.subscribe(move |change| {
      let _ = tx.send(change.clone());
    }));
    tokio::spawn(on_connectivity(Arc::downgrade(&self.shared), rx));
  }

  /// Load the collection from the backend, falling back to offline data.
  pub async fn refresh(&self) {
    let (generation, epoch) = {
      let mut state = self.lock();
      state.fetch_generation += 1;
      state.loading = true;
      state.status = HookStatus::Connecting;
      (state.fetch_generation, state.mutation_epoch)
    };
    self.notify();

    if self.ctx().monitor.should_short_circuit() {
      debug!(resource = R::COLLECTION, "offline, skipping fetch");
      self.serve_offline(generation, None);
      return;
    }

    self.prime_from_cache(generation);

    let store = Arc::clone(&self.ctx().store);
    let captured_at = self.ctx().cache.now();
    let mut fetch = tokio::spawn(async move { store.list(R::COLLECTION).await });

    let outcome = tokio::time::timeout(self.ctx().settings.fetch_timeout, &mut fetch).await;
    match outcome {
      Ok(Ok(Ok(docs))) => self.apply_fetch(generation, epoch, decode_all(docs), captured_at),
      Ok(Ok(Err(err))) => self.fetch_failed(generation, err),
      Ok(Err(join_err)) => self.fetch_failed(
        generation,
        Error::TransientNetwork(format!("fetch task failed: {}", join_err)),
      ),
      Err(_) => {
        warn!(
          resource = R::COLLECTION,
          timeout = ?self.ctx().settings.fetch_timeout,
          "fetch timed out, serving offline data"
        );
        self.ctx().monitor.force_offline(OfflineReason::FetchTimeout {
          resource: R::COLLECTION.to_string(),
        });
        self.serve_offline(
          generation,
          Some(format!("{} took too long to load", R::COLLECTION)),
        );

        // A late answer may still refresh the cache
        let shared = Arc::downgrade(&self.shared);
        tokio::spawn(async move {
          if let Ok(Ok(docs)) = fetch.await {
            if let Some(hook) = Self::from_weak(&shared) {
              hook.late_arrival(epoch, decode_all(docs), captured_at);
            }
          }
        });
      }
    }
  }

  fn apply_fetch(
    &self,
    generation: u64,
    epoch: u64,
    entities: Vec<Entity<R>>,
    captured_at: chrono::DateTime<chrono::Utc>,
  ) {
    let snapshot = {
      let mut state = self.lock();
      if state.fetch_generation != generation {
        debug!(resource = R::COLLECTION, "discarding superseded fetch");
        return;
      }
      state.status = HookStatus::Connected;
      state.loading = false;
      // An unresolved conflict stays visible until acknowledged
      state.error = state.conflict.as_ref().map(ReplayConflict::message);
      if state.mutation_epoch == epoch {
        state.remote = entities;
        state.source = Some(CacheSource::Network);
        Some(state.remote.clone())
      } else {
        // A confirmed write landed while the list was in flight
        None
      }
    };

    if let Some(snapshot) = snapshot {
      let ttl = self.ctx().settings.cache_ttl;
      self
        .ctx()
        .cache
        .set_captured(R::COLLECTION, &snapshot, ttl, captured_at);
    }
    self.start_watch();
    self.notify();
  }

  fn fetch_failed(&self, generation: u64, err: Error) {
    // Only the monitor decides the backend is gone. Below its failure
    // threshold the hook stays connected and keeps what it shows.
    let offline = self.ctx().monitor.current_state() == ConnectivityState::Offline;
    if err.is_connectivity() && offline {
      let message = match err {
        Error::BackendUnavailable => None,
        other => Some(other.to_string()),
      };
      self.serve_offline(generation, message);
      return;
    }

    warn!(resource = R::COLLECTION, error = %err, "fetch failed");
    let cached = self.cached_snapshot();
    {
      let mut state = self.lock();
      if state.fetch_generation != generation {
        return;
      }
      state.loading = false;
      state.status = HookStatus::Connected;
      state.error = Some(err.to_string());
      if state.source.is_none() {
        if let Some(remote) = cached {
          state.remote = remote;
          state.source = Some(CacheSource::Cache);
        }
      }
    }
    self.notify();
  }

  /// Show the best data available without the backend: the cached
  /// snapshot, else what is already in memory, else the fallback dataset.
  fn serve_offline(&self, generation: u64, message: Option<String>) {
    let cached = self.ctx().cache.get_entry::<Vec<Entity<R>>>(R::COLLECTION);
    {
      let mut state = self.lock();
      if state.fetch_generation != generation {
        return;
      }
      state.loading = false;
      state.status = HookStatus::Offline;
      state.error = message.or_else(|| state.conflict.as_ref().map(ReplayConflict::message));
      match cached {
        Some(entry) => {
          debug!(
            resource = R::COLLECTION,
            captured_at = %entry.captured_at,
            ttl = ?entry.ttl,
            "using cached snapshot"
          );
          state.remote = entry.payload;
          state.source = Some(CacheSource::Cache);
        }
        None if matches!(state.source, Some(CacheSource::Network | CacheSource::Cache)) => {}
        None => {
          state.remote = fallback_entities();
          state.source = Some(CacheSource::Fallback);
        }
      }
      info!(
        resource = R::COLLECTION,
        source = ?state.source,
        records = state.remote.len(),
        "serving offline data"
      );
    }
    self.notify();
  }

  /// Show the cached snapshot on a cold start while the fetch is in flight.
  fn prime_from_cache(&self, generation: u64) {
    if !self.ctx().cache.is_valid(R::COLLECTION) {
      return;
    }
    let Some(cached) = self.cached_snapshot() else {
      return;
    };
    {
      let mut state = self.lock();
      if state.fetch_generation != generation || state.source.is_some() {
        return;
      }
      state.remote = cached;
      state.source = Some(CacheSource::Cache);
    }
    self.notify();
  }

  fn cached_snapshot(&self) -> Option<Vec<Entity<R>>> {
    self.ctx().cache.get::<Vec<Entity<R>>>(R::COLLECTION)
  }

  /// A fetch that timed out finally answered. Cache it unless local
  /// changes made it stale.
  fn late_arrival(
    &self,
    epoch: u64,
    entities: Vec<Entity<R>>,
    captured_at: chrono::DateTime<chrono::Utc>,
  ) {
    let stale = {
      let state = self.lock();
      state.mutation_epoch != epoch || !state.outbox.is_empty()
    };
    if stale {
      debug!(resource = R::COLLECTION, "ignoring late fetch response");
      return;
    }
    let ttl = self.ctx().settings.cache_ttl;
    if self
      .ctx()
      .cache
      .set_captured(R::COLLECTION, &entities, ttl, captured_at)
    {
      debug!(resource = R::COLLECTION, "late fetch response cached");
    }
  }

  fn start_watch(&self) {
    {
      let mut state = self.lock();
      if state.watching {
        return;
      }
      let Some(rx) = self.ctx().store.watch(R::COLLECTION) else {
        return;
      };
      state.watching = true;
      tokio::spawn(on_remote_change(Arc::downgrade(&self.shared), rx));
    }
    debug!(resource = R::COLLECTION, "following live changes");
  }

  fn apply_remote_change(&self, event: ChangeEvent) {
    {
      let mut state = self.lock();
      match event {
        ChangeEvent::Upserted(doc) => match decode_entity::<R>(doc) {
          Ok(entity) => upsert(&mut state.remote, entity),
          Err(e) => {
            warn!(resource = R::COLLECTION, error = %e, "skipping undecodable change");
            return;
          }
        },
        ChangeEvent::Removed { id } => state.remote.retain(|e| e.id != id),
      }
      state.mutation_epoch += 1;
    }
    self.ctx().cache.invalidate(R::COLLECTION);
    self.notify();
  }

  /// Create a record. Offline, the record is queued and visible at once
  /// under a [`RecordKey::Local`] key.
  pub async fn create(&self, data: R) -> std::result::Result<RecordKey, String> {
    data
      .validate()
      .map_err(|e| self.surface(Error::Validation(e)))?;

    if self.should_queue() {
      return Ok(RecordKey::Local(self.queue_create(data)));
    }

    let value = encode(&data).map_err(|e| self.surface(e))?;
    let store = Arc::clone(&self.ctx().store);
    let outcome = retry(&self.ctx().settings.retry, |_| {
      let store = Arc::clone(&store);
      let value = value.clone();
      async move { store.create(R::COLLECTION, value).await }
    })
    .await
    .and_then(|doc| decode_entity::<R>(doc).map_err(RetryError::Terminal));

    match outcome {
      Ok(entity) => {
        let id = entity.id.clone();
        self.confirmed(|remote| upsert(remote, entity));
        Ok(RecordKey::Remote(id))
      }
      Err(err) => match self.write_failed(err) {
        Some(message) => Err(message),
        None => Ok(RecordKey::Local(self.queue_create(data))),
      },
    }
  }

  pub async fn update(&self, key: &RecordKey, data: R) -> std::result::Result<(), String> {
    data
      .validate()
      .map_err(|e| self.surface(Error::Validation(e)))?;

    let id = match key {
      RecordKey::Local(local_id) => {
        let amended = self.lock().outbox.amend_local(*local_id, data);
        if !amended {
          return Err(self.surface(Error::Validation(format!("{} is no longer pending", local_id))));
        }
        self.local_change();
        return Ok(());
      }
      RecordKey::Remote(id) => id.clone(),
    };
    self.check_writable(&id)?;

    if self.should_queue() {
      self.lock().outbox.queue_update(id, data);
      self.local_change();
      return Ok(());
    }

    let value = encode(&data).map_err(|e| self.surface(e))?;
    let store = Arc::clone(&self.ctx().store);
    let outcome = retry(&self.ctx().settings.retry, |_| {
      let store = Arc::clone(&store);
      let value = value.clone();
      let id = id.clone();
      async move { store.update(R::COLLECTION, &id, value).await }
    })
    .await
    .and_then(|doc| decode_entity::<R>(doc).map_err(RetryError::Terminal));

    match outcome {
      Ok(entity) => {
        self.confirmed(|remote| upsert(remote, entity));
        Ok(())
      }
      Err(err) => match self.write_failed(err) {
        Some(message) => Err(message),
        None => {
          self.lock().outbox.queue_update(id, data);
          self.local_change();
          Ok(())
        }
      },
    }
  }

  pub async fn delete(&self, key: &RecordKey) -> std::result::Result<(), String> {
    let id = match key {
      RecordKey::Local(local_id) => {
        let discarded = self.lock().outbox.discard_local(*local_id);
        if !discarded {
          return Err(self.surface(Error::Validation(format!("{} is no longer pending", local_id))));
        }
        self.local_change();
        return Ok(());
      }
      RecordKey::Remote(id) => id.clone(),
    };
    self.check_writable(&id)?;

    if self.should_queue() {
      self.lock().outbox.queue_delete(id);
      self.local_change();
      return Ok(());
    }

    let store = Arc::clone(&self.ctx().store);
    let outcome = retry(&self.ctx().settings.retry, |_| {
      let store = Arc::clone(&store);
      let id = id.clone();
      async move { store.delete(R::COLLECTION, &id).await }
    })
    .await;

    match outcome {
      Ok(()) => {
        self.confirmed(|remote| remote.retain(|e| e.id != id));
        Ok(())
      }
      Err(err) => match self.write_failed(err) {
        Some(message) => Err(message),
        None => {
          self.lock().outbox.queue_delete(id);
          self.local_change();
          Ok(())
        }
      },
    }
  }

  /// Writes go to the outbox while offline and while older writes are
  /// still queued, so replay keeps issue order.
  fn should_queue(&self) -> bool {
    let queued = {
      let state = self.lock();
      state.status == HookStatus::Offline || !state.outbox.is_empty()
    };
    queued || self.ctx().monitor.current_state() == ConnectivityState::Offline
  }

  fn check_writable(&self, id: &str) -> std::result::Result<(), String> {
    if id.starts_with(FALLBACK_PREFIX) {
      return Err(self.surface(Error::Validation(
        "placeholder records can't be changed until the backend is reachable".to_string(),
      )));
    }
    Ok(())
  }

  fn queue_create(&self, data: R) -> LocalId {
    let local_id = self.lock().outbox.create(data);
    debug!(resource = R::COLLECTION, %local_id, "queued create");
    self.local_change();
    local_id
  }

  fn local_change(&self) {
    self.lock().mutation_epoch += 1;
    self.ctx().cache.invalidate(R::COLLECTION);
    self.notify();
  }

  fn confirmed(&self, apply: impl FnOnce(&mut Vec<Entity<R>>)) {
    {
      let mut state = self.lock();
      apply(&mut state.remote);
      state.mutation_epoch += 1;
      state.error = None;
    }
    self.ctx().cache.invalidate(R::COLLECTION);
    self.notify();
  }

  /// Decide what a failed write turns into. `None` means the caller should
  /// queue the mutation; `Some` is an error to show.
  fn write_failed(&self, err: RetryError<Error>) -> Option<String> {
    match err {
      RetryError::Exhausted { error, attempts } => {
        warn!(
          resource = R::COLLECTION,
          attempts,
          error = %error,
          "write failed after retries, queueing"
        );
        self.ctx().monitor.force_offline(OfflineReason::RetriesExhausted {
          resource: R::COLLECTION.to_string(),
        });
        self.go_offline();
        None
      }
      RetryError::Terminal(error) if error.is_connectivity() => {
        debug!(resource = R::COLLECTION, error = %error, "backend unreachable, queueing");
        self.go_offline();
        None
      }
      RetryError::Terminal(error) => Some(self.surface(error)),
    }
  }

  fn surface(&self, err: Error) -> String {
    let message = err.to_string();
    self.lock().error = Some(message.clone());
    self.notify();
    message
  }

  fn go_offline(&self) {
    {
      let mut state = self.lock();
      if state.status == HookStatus::Offline {
        return;
      }
      state.status = HookStatus::Offline;
    }
    self.notify();
  }

  /// Replay queued mutations in issue order, one at a time, holding the
  /// shared replay gate. Stops at the first failure. Returns how many
  /// mutations the backend confirmed.
  pub async fn reconcile(&self) -> std::result::Result<usize, String> {
    let gate = self.ctx().replay_gate.clone();
    let _turn = gate.0.lock().await;

    if self.ctx().monitor.should_short_circuit() {
      return Ok(0);
    }
    {
      let mut state = self.lock();
      if state.replaying || state.conflict.is_some() || state.outbox.is_empty() {
        return Ok(0);
      }
      state.replaying = true;
      info!(
        resource = R::COLLECTION,
        pending = state.outbox.len(),
        "replaying queued changes"
      );
    }

    let mut replayed = 0;
    let outcome = loop {
      let Some(queued) = self.lock().outbox.front().cloned() else {
        break Ok(());
      };
      match self.replay_one(&queued.mutation).await {
        Ok(echo) => {
          self.replay_confirmed(&queued, echo);
          replayed += 1;
        }
        Err(err) if err.is_connectivity() => {
          info!(resource = R::COLLECTION, error = %err, "replay interrupted");
          self.go_offline();
          break Err(err.to_string());
        }
        Err(err) => {
          let conflict = ReplayConflict {
            mutation: queued,
            reason: err.to_string(),
          };
          let message = conflict.message();
          warn!(resource = R::COLLECTION, %message, "replay rejected");
          {
            let mut state = self.lock();
            state.error = Some(message.clone());
            state.conflict = Some(conflict);
          }
          self.notify();
          break Err(message);
        }
      }
    };

    self.lock().replaying = false;
    drop(_turn);

    if outcome.is_ok() && replayed > 0 {
      info!(resource = R::COLLECTION, replayed, "queued changes synced");
      self.refresh().await;
    }
    outcome.map(|_| replayed)
  }

  async fn replay_one(&self, mutation: &Mutation<R>) -> Result<Echo<R>> {
    let store = Arc::clone(&self.ctx().store);
    let policy = &self.ctx().settings.retry;
    let outcome = match mutation {
      Mutation::Create { data, .. } => {
        let value = encode(data)?;
        retry(policy, |_| {
          let store = Arc::clone(&store);
          let value = value.clone();
          async move { store.create(R::COLLECTION, value).await }
        })
        .await
        .and_then(|doc| decode_entity(doc).map(Echo::Created).map_err(RetryError::Terminal))
      }
      Mutation::Update { id, data } => {
        let value = encode(data)?;
        retry(policy, |_| {
          let store = Arc::clone(&store);
          let value = value.clone();
          let id = id.clone();
          async move { store.update(R::COLLECTION, &id, value).await }
        })
        .await
        .and_then(|doc| decode_entity(doc).map(Echo::Updated).map_err(RetryError::Terminal))
      }
      Mutation::Delete { id } => retry(policy, |_| {
        let store = Arc::clone(&store);
        let id = id.clone();
        async move { store.delete(R::COLLECTION, &id).await }
      })
      .await
      .map(|()| Echo::Deleted(id.clone())),
    };

    outcome.map_err(|err| {
      if err.is_exhausted() {
        self.ctx().monitor.force_offline(OfflineReason::RetriesExhausted {
          resource: R::COLLECTION.to_string(),
        });
      }
      err.into_inner()
    })
  }

  fn replay_confirmed(&self, sent: &QueuedMutation<R>, echo: Echo<R>) {
    {
      let mut state = self.lock();
      // The entry may have been amended or discarded while in flight
      let current = state.outbox.complete(sent.seq);
      match echo {
        Echo::Created(entity) => {
          match current.map(|q| q.mutation) {
            Some(Mutation::Create { data, .. }) => {
              let amended = match &sent.mutation {
                Mutation::Create { data: sent_data, .. } => *sent_data != data,
                _ => false,
              };
              if amended {
                state.outbox.queue_update(entity.id.clone(), data);
              }
            }
            _ => state.outbox.queue_delete(entity.id.clone()),
          }
          // A live feed may have delivered the document already
          upsert(&mut state.remote, entity);
        }
        Echo::Updated(entity) => upsert(&mut state.remote, entity),
        Echo::Deleted(id) => state.remote.retain(|e| e.id != id),
      }
      state.mutation_epoch += 1;
    }
    self.ctx().cache.invalidate(R::COLLECTION);
    self.notify();
  }

  /// Settle a rejected replay.
  pub async fn resolve_conflict(&self, resolution: Resolution) -> std::result::Result<(), String> {
    let Some(conflict) = self.lock().conflict.take() else {
      return Ok(());
    };

    match resolution {
      Resolution::Discard => {
        info!(
          resource = R::COLLECTION,
          mutation = %conflict.mutation.mutation.describe(),
          "discarding rejected change"
        );
        {
          let mut state = self.lock();
          state.outbox.complete(conflict.mutation.seq);
          state.error = None;
          state.mutation_epoch += 1;
        }
        self.notify();
        if self.ctx().monitor.should_short_circuit() {
          return Ok(());
        }
        if self.reconcile().await? == 0 {
          self.refresh().await;
        }
        Ok(())
      }
      Resolution::Resubmit => {
        info!(
          resource = R::COLLECTION,
          mutation = %conflict.mutation.mutation.describe(),
          "resubmitting rejected change"
        );
        self.lock().error = None;
        self.notify();
        self.reconcile().await.map(|_| ())
      }
    }
  }

  /// User-initiated reconnect: arm a retry on the monitor, reload, and
  /// replay anything queued.
  pub async fn retry_connection(&self) -> std::result::Result<(), String> {
    let armed = self.ctx().monitor.retry_now();
    debug!(resource = R::COLLECTION, armed, "retry requested");
    self.refresh().await;
    if self.status() != HookStatus::Connected {
      return Err(self.error().unwrap_or_else(|| "still offline".to_string()));
    }
    self.reconcile().await.map(|_| ())
  }

  /// Drop this resource's cached snapshot.
  pub fn clear_cache(&self) {
    self.ctx().cache.invalidate(R::COLLECTION);
    info!(resource = R::COLLECTION, "cache cleared");
  }
}

async fn on_connectivity<R: Resource>(
  shared: Weak<Shared<R>>,
  mut rx: mpsc::UnboundedReceiver<ConnectivityChange>,
) {
  while let Some(change) = rx.recv().await {
    let Some(hook) = ResourceHook::from_weak(&shared) else {
      return;
    };
    // Only the latest transition matters
    if hook.ctx().monitor.current_state() != change.current {
      continue;
    }
    match change.current {
      ConnectivityState::Online => {
        let replayed = hook.reconcile().await.unwrap_or(0);
        if replayed == 0 && hook.status() == HookStatus::Offline {
          hook.refresh().await;
        }
      }
      ConnectivityState::Offline => hook.go_offline(),
      ConnectivityState::Degraded => hook.notify(),
    }
  }
}

async fn on_remote_change<R: Resource>(
  shared: Weak<Shared<R>>,
  mut rx: mpsc::UnboundedReceiver<ChangeEvent>,
) {
  while let Some(event) = rx.recv().await {
    let Some(hook) = ResourceHook::from_weak(&shared) else {
      return;
    };
    hook.apply_remote_change(event);
  }
  if let Some(hook) = ResourceHook::<R>::from_weak(&shared) {
    hook.lock().watching = false;
  }
}

fn upsert<R>(remote: &mut Vec<Entity<R>>, entity: Entity<R>) {
  match remote.iter_mut().find(|e| e.id == entity.id) {
    Some(existing) => *existing = entity,
    None => remote.push(entity),
  }
}

fn fallback_entities<R: Resource>() -> Vec<Entity<R>> {
  R::fallback()
    .into_iter()
    .zip(1..)
    .map(|(data, n)| Entity {
      id: format!("{}{}", FALLBACK_PREFIX, n),
      data,
    })
    .collect()
}

fn encode<R: Resource>(data: &R) -> Result<Value> {
  serde_json::to_value(data)
    .map_err(|e| Error::Validation(format!("can't encode {}: {}", R::COLLECTION, e)))
}

fn decode_entity<R: Resource>(doc: Document) -> Result<Entity<R>> {
  let Document { id, data } = doc;
  let data = serde_json::from_value(data)
    .map_err(|e| Error::Decode(format!("{} {}: {}", R::COLLECTION, id, e)))?;
  Ok(Entity { id, data })
}

fn decode_all<R: Resource>(docs: Vec<Document>) -> Vec<Entity<R>> {
  docs
    .into_iter()
    .filter_map(|doc| match decode_entity(doc) {
      Ok(entity) => Some(entity),
      Err(e) => {
        warn!(resource = R::COLLECTION, error = %e, "skipping undecodable document");
        None
      }
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::MemoryStorage;
  use crate::resources::{Book, Product, Year};
  use crate::testing::MemoryStore;
  use futures::FutureExt;
  use serde_json::json;

  struct Fixture {
    store: Arc<MemoryStore>,
    monitor: Arc<ConnectivityMonitor>,
    ctx: HookContext,
  }

  fn fixture_with(live: bool) -> Fixture {
    let monitor = ConnectivityMonitor::with_defaults();
    let store = MemoryStore::new().with_monitor(monitor.clone());
    let store = Arc::new(if live { store.live() } else { store });
    let ctx = HookContext::new(
      store.clone(),
      monitor.clone(),
      LocalCache::new(MemoryStorage::new()),
    )
    .with_settings(HookSettings {
      fetch_timeout: Duration::from_millis(2500),
      cache_ttl: Duration::from_secs(300),
      retry: RetryPolicy {
        base_delay: Duration::from_millis(100),
        max_delay: Duration::from_secs(1),
        max_attempts: 3,
      },
    });
    Fixture {
      store,
      monitor,
      ctx,
    }
  }

  fn fixture() -> Fixture {
    fixture_with(false)
  }

  /// Let background tasks run until `done` holds.
  async fn until(done: impl Fn() -> bool) {
    for _ in 0..200 {
      if done() {
        return;
      }
      tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
  }

  fn titles<R: Resource>(hook: &ResourceHook<R>) -> Vec<String> {
    hook
      .items()
      .iter()
      .map(|r| r.data().title().to_string())
      .collect()
  }

  #[tokio::test(start_paused = true)]
  async fn test_activate_online_loads_and_caches() {
    let f = fixture();
    f.store.seed("books", "x1", json!({ "title": "Anatomy" }));
    let hook = ResourceHook::<Book>::new(f.ctx.clone());

    hook.activate().await;

    assert_eq!(hook.status(), HookStatus::Connected);
    assert_eq!(hook.source(), Some(CacheSource::Network));
    assert_eq!(titles(&hook), vec!["Anatomy"]);
    assert!(!hook.loading());
    assert!(f.ctx.cache.is_valid("books"));
  }

  #[tokio::test(start_paused = true)]
  async fn test_activate_while_offline_skips_network() {
    let f = fixture();
    f.monitor.os_offline();
    let hook = ResourceHook::<Year>::new(f.ctx.clone());

    hook.activate().await;

    assert!(hook.is_offline_mode());
    assert_eq!(hook.source(), Some(CacheSource::Fallback));
    assert_eq!(titles(&hook)[0], "First Year");
    assert_eq!(f.store.list_calls(), 0);

    let cached = vec![Entity {
      id: "y9".to_string(),
      data: Year::draft("Foundation Year"),
    }];
    f.ctx.cache.set("years", &cached, Duration::from_secs(60));
    hook.refresh().await;

    assert_eq!(hook.source(), Some(CacheSource::Cache));
    assert_eq!(titles(&hook), vec!["Foundation Year"]);
    assert_eq!(f.store.list_calls(), 0);
  }

  #[tokio::test(start_paused = true)]
  async fn test_fetch_timeout_serves_cache_and_forces_offline() {
    let f = fixture();
    let cached = vec![Entity {
      id: "x1".to_string(),
      data: Book::draft("Cached Physiology"),
    }];
    f.ctx.cache.set("books", &cached, Duration::from_secs(300));
    f.store.delay_lists(Some(Duration::from_secs(3600)));
    let hook = ResourceHook::<Book>::new(f.ctx.clone());

    hook.activate().await;

    assert_eq!(hook.status(), HookStatus::Offline);
    assert_eq!(hook.source(), Some(CacheSource::Cache));
    assert_eq!(titles(&hook), vec!["Cached Physiology"]);
    assert_eq!(f.monitor.current_state(), ConnectivityState::Offline);
    assert!(hook.error().unwrap().contains("took too long"));
  }

  #[tokio::test(start_paused = true)]
  async fn test_cold_start_shows_cache_while_fetching() {
    let f = fixture();
    f.store.seed("books", "x1", json!({ "title": "Histology 2nd ed." }));
    let cached = vec![Entity {
      id: "x1".to_string(),
      data: Book::draft("Histology"),
    }];
    f.ctx.cache.set("books", &cached, Duration::from_secs(300));
    f.store.delay_lists(Some(Duration::from_millis(500)));
    let hook = Arc::new(ResourceHook::<Book>::new(f.ctx.clone()));

    let task = tokio::spawn({
      let hook = hook.clone();
      async move { hook.refresh().await }
    });
    until(|| hook.source().is_some()).await;
    assert!(hook.loading());
    assert_eq!(titles(&hook), vec!["Histology"]);

    task.await.unwrap();
    assert_eq!(hook.source(), Some(CacheSource::Network));
    assert_eq!(titles(&hook), vec!["Histology 2nd ed."]);
  }

  #[tokio::test(start_paused = true)]
  async fn test_late_response_populates_cache() {
    let f = fixture();
    f.store.seed("books", "x1", json!({ "title": "Pharmacology" }));
    f.store.delay_lists(Some(Duration::from_secs(3)));
    let hook = ResourceHook::<Book>::new(f.ctx.clone());

    hook.activate().await;
    assert!(hook.is_offline_mode());
    assert!(hook.items().is_empty());

    until(|| f.ctx.cache.is_valid("books")).await;
    // Too late to change what the hook shows
    assert!(hook.items().is_empty());
    assert!(hook.is_offline_mode());
  }

  #[tokio::test(start_paused = true)]
  async fn test_late_response_ignored_after_local_change() {
    let f = fixture();
    f.store.seed("books", "x1", json!({ "title": "Pharmacology" }));
    f.store.delay_lists(Some(Duration::from_secs(3)));
    let hook = ResourceHook::<Book>::new(f.ctx.clone());

    hook.activate().await;
    hook.create(Book::draft("Pathology")).await.unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert!(!f.ctx.cache.is_valid("books"));
    assert_eq!(hook.unsynced_count(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_offline_create_is_immediate_and_syncs_once() {
    let f = fixture();
    let hook = ResourceHook::<Book>::new(f.ctx.clone());
    hook.activate().await;
    f.monitor.os_offline();

    let key = hook
      .create(Book::draft("Histology"))
      .now_or_never()
      .expect("offline create must not wait")
      .unwrap();

    assert!(matches!(key, RecordKey::Local(_)));
    let items = hook.items();
    assert_eq!(items.len(), 1);
    assert!(items[0].is_unsynced());
    assert_eq!(hook.unsynced_count(), 1);
    assert!(f.store.writes().is_empty());

    f.monitor.os_online();
    until(|| hook.unsynced_count() == 0 && hook.status() == HookStatus::Connected).await;

    let items = hook.items();
    assert_eq!(items.len(), 1);
    assert!(!items[0].is_unsynced());
    assert_eq!(items[0].data().title, "Histology");
    assert_eq!(f.store.documents("books").len(), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_offline_mutations_replay_in_issue_order() {
    let f = fixture();
    f.store.seed("books", "x1", json!({ "title": "Old Edition" }));
    f.store.seed("books", "x2", json!({ "title": "Withdrawn" }));
    let hook = ResourceHook::<Book>::new(f.ctx.clone());
    hook.activate().await;
    f.monitor.os_offline();

    let x1 = RecordKey::Remote("x1".to_string());
    let x2 = RecordKey::Remote("x2".to_string());
    hook.update(&x1, Book::draft("New Edition")).await.unwrap();
    hook.create(Book::draft("Fresh")).await.unwrap();
    hook.delete(&x2).await.unwrap();

    assert_eq!(titles(&hook), vec!["New Edition", "Fresh"]);
    assert_eq!(hook.unsynced_count(), 3);

    f.monitor.os_online();
    until(|| hook.unsynced_count() == 0 && hook.status() == HookStatus::Connected).await;

    assert_eq!(
      f.store.writes(),
      vec!["books:update:x1", "books:create:b1", "books:delete:x2"]
    );
    assert_eq!(titles(&hook), vec!["New Edition", "Fresh"]);
    assert!(hook.items().iter().all(|r| !r.is_unsynced()));
  }

  #[tokio::test(start_paused = true)]
  async fn test_replays_of_different_resources_do_not_interleave() {
    let f = fixture();
    let books = ResourceHook::<Book>::new(f.ctx.clone());
    let products = ResourceHook::<Product>::new(f.ctx.clone());
    books.activate().await;
    products.activate().await;
    f.monitor.os_offline();

    for title in ["A", "B", "C"] {
      books.create(Book::draft(title)).await.unwrap();
      products.create(Product::draft(title)).await.unwrap();
    }

    f.monitor.os_online();
    until(|| books.unsynced_count() == 0 && products.unsynced_count() == 0).await;

    let writes = f.store.writes();
    assert_eq!(writes.len(), 6);
    let collection = |w: &String| w.split(':').next().unwrap_or_default().to_string();
    assert!(writes[..3].iter().all(|w| collection(w) == collection(&writes[0])));
    assert!(writes[3..].iter().all(|w| collection(w) == collection(&writes[3])));
    assert_ne!(collection(&writes[0]), collection(&writes[3]));

    let stored: Vec<String> = f
      .store
      .documents("books")
      .iter()
      .map(|d| d.data["title"].as_str().unwrap_or_default().to_string())
      .collect();
    assert_eq!(stored, vec!["A", "B", "C"]);
  }

  #[tokio::test(start_paused = true)]
  async fn test_edits_to_pending_create_are_coalesced() {
    let f = fixture();
    f.monitor.os_offline();
    let hook = ResourceHook::<Book>::new(f.ctx.clone());
    hook.activate().await;

    let key = hook.create(Book::draft("Draft")).await.unwrap();
    hook.update(&key, Book::draft("Final")).await.unwrap();

    assert_eq!(hook.unsynced_count(), 1);
    assert_eq!(titles(&hook), vec!["Final"]);

    hook.delete(&key).await.unwrap();
    assert_eq!(hook.unsynced_count(), 0);
    assert!(hook.items().is_empty());
    assert!(hook.update(&key, Book::draft("Gone")).await.is_err());
  }

  #[tokio::test(start_paused = true)]
  async fn test_rejected_replay_surfaces_conflict_until_discarded() {
    let f = fixture();
    f.store.seed("books", "x1", json!({ "title": "Old" }));
    let hook = ResourceHook::<Book>::new(f.ctx.clone());
    hook.activate().await;
    f.monitor.os_offline();
    hook
      .update(&RecordKey::Remote("x1".to_string()), Book::draft("New"))
      .await
      .unwrap();

    f.store
      .fail_next(Error::Validation("HTTP 409: version mismatch".to_string()));
    f.monitor.os_online();
    until(|| hook.conflict().is_some()).await;

    let message = hook.error().unwrap();
    assert!(message.contains("update x1"));
    assert!(message.contains("version mismatch"));
    // Neither dropped nor applied
    assert_eq!(hook.unsynced_count(), 1);
    assert_eq!(titles(&hook), vec!["New"]);
    assert_eq!(f.store.documents("books")[0].data["title"], "Old");

    hook.resolve_conflict(Resolution::Discard).await.unwrap();

    assert!(hook.conflict().is_none());
    assert!(hook.error().is_none());
    assert_eq!(hook.unsynced_count(), 0);
    assert_eq!(titles(&hook), vec!["Old"]);
  }

  #[tokio::test(start_paused = true)]
  async fn test_resubmit_replays_rejected_change() {
    let f = fixture();
    f.store.seed("books", "x1", json!({ "title": "Old" }));
    let hook = ResourceHook::<Book>::new(f.ctx.clone());
    hook.activate().await;
    f.monitor.os_offline();
    hook
      .update(&RecordKey::Remote("x1".to_string()), Book::draft("New"))
      .await
      .unwrap();
    f.store
      .fail_next(Error::Validation("HTTP 412: precondition failed".to_string()));
    f.monitor.os_online();
    until(|| hook.conflict().is_some()).await;

    hook.resolve_conflict(Resolution::Resubmit).await.unwrap();

    assert_eq!(hook.unsynced_count(), 0);
    assert_eq!(f.store.documents("books")[0].data["title"], "New");
  }

  #[tokio::test(start_paused = true)]
  async fn test_exhausted_write_goes_offline_and_queues() {
    let f = fixture();
    let hook = ResourceHook::<Book>::new(f.ctx.clone());
    hook.activate().await;
    for _ in 0..3 {
      f.store
        .fail_next(Error::TransientNetwork("connection reset".to_string()));
    }

    let key = hook.create(Book::draft("Zoology")).await.unwrap();

    assert!(matches!(key, RecordKey::Local(_)));
    assert!(hook.is_offline_mode());
    assert_eq!(f.monitor.current_state(), ConnectivityState::Offline);
    assert_eq!(hook.unsynced_count(), 1);
    assert!(f.store.writes().is_empty());
  }

  #[tokio::test(start_paused = true)]
  async fn test_transient_write_failure_is_retried() {
    let f = fixture();
    let hook = ResourceHook::<Book>::new(f.ctx.clone());
    hook.activate().await;
    f.store
      .fail_next(Error::TransientNetwork("connection reset".to_string()));

    let key = hook.create(Book::draft("Botany")).await.unwrap();

    assert_eq!(key, RecordKey::Remote("b1".to_string()));
    assert_eq!(hook.unsynced_count(), 0);
    assert!(!f.ctx.cache.is_valid("books"));
  }

  #[tokio::test(start_paused = true)]
  async fn test_transient_fetch_failure_keeps_writes_online() {
    let f = fixture();
    f.store
      .fail_next(Error::TransientNetwork("HTTP 503".to_string()));
    let hook = ResourceHook::<Book>::new(f.ctx.clone());

    hook.activate().await;

    assert_eq!(f.monitor.current_state(), ConnectivityState::Online);
    assert_eq!(hook.status(), HookStatus::Connected);
    assert!(hook.error().unwrap().contains("503"));

    let key = hook.create(Book::draft("Anatomy")).await.unwrap();

    assert_eq!(key, RecordKey::Remote("b1".to_string()));
    assert_eq!(hook.unsynced_count(), 0);
    assert_eq!(f.store.writes(), vec!["books:create:b1"]);
  }

  #[tokio::test(start_paused = true)]
  async fn test_terminal_write_error_is_surfaced() {
    let f = fixture();
    let hook = ResourceHook::<Book>::new(f.ctx.clone());
    hook.activate().await;
    f.store
      .fail_next(Error::Unauthorized("HTTP 401: session expired".to_string()));

    let err = hook.create(Book::draft("Ethics")).await.unwrap_err();

    assert!(err.contains("session expired"));
    assert_eq!(hook.error(), Some(err));
    assert_eq!(hook.unsynced_count(), 0);
    assert_eq!(f.monitor.current_state(), ConnectivityState::Online);
  }

  #[tokio::test(start_paused = true)]
  async fn test_invalid_input_never_reaches_backend() {
    let f = fixture();
    let hook = ResourceHook::<Book>::new(f.ctx.clone());
    hook.activate().await;

    assert!(hook.create(Book::draft("   ")).await.is_err());
    assert!(f.store.writes().is_empty());
    assert_eq!(f.monitor.current_state(), ConnectivityState::Online);
  }

  #[tokio::test(start_paused = true)]
  async fn test_fallback_records_are_read_only() {
    let f = fixture();
    f.monitor.os_offline();
    let hook = ResourceHook::<Year>::new(f.ctx.clone());
    hook.activate().await;

    let key = hook.items()[0].key();
    assert_eq!(key, RecordKey::Remote(format!("{}1", FALLBACK_PREFIX)));
    assert!(hook.update(&key, Year::draft("Year One")).await.is_err());
    assert!(hook.delete(&key).await.is_err());
    assert_eq!(hook.unsynced_count(), 0);
  }

  #[tokio::test(start_paused = true)]
  async fn test_retry_connection_clears_blocker_and_replays() {
    let f = fixture();
    f.store.seed("books", "x1", json!({ "title": "Neurology" }));
    f.monitor.force_offline(OfflineReason::BlockerDetected);
    let hook = ResourceHook::<Book>::new(f.ctx.clone());
    hook.activate().await;
    hook.create(Book::draft("Queued")).await.unwrap();
    assert_eq!(f.store.list_calls(), 0);

    hook.retry_connection().await.unwrap();
    until(|| hook.unsynced_count() == 0 && hook.status() == HookStatus::Connected).await;

    assert_eq!(f.monitor.current_state(), ConnectivityState::Online);
    assert!(!f.monitor.blocker_detected());
    assert_eq!(hook.status(), HookStatus::Connected);
    assert_eq!(titles(&hook), vec!["Neurology", "Queued"]);
  }

  #[tokio::test(start_paused = true)]
  async fn test_retry_connection_reports_failure() {
    let f = fixture();
    f.monitor.os_offline();
    let hook = ResourceHook::<Book>::new(f.ctx.clone());
    hook.activate().await;
    f.store
      .fail_next(Error::TransientNetwork("connection refused".to_string()));

    assert!(hook.retry_connection().await.is_err());
    assert!(hook.is_offline_mode());
  }

  #[tokio::test(start_paused = true)]
  async fn test_live_changes_update_snapshot() {
    let f = fixture_with(true);
    let hook = ResourceHook::<Book>::new(f.ctx.clone());
    hook.activate().await;

    f.store.emit(
      "books",
      ChangeEvent::Upserted(Document {
        id: "x7".to_string(),
        data: json!({ "title": "Pushed" }),
      }),
    );
    until(|| hook.items().len() == 1).await;
    assert_eq!(titles(&hook), vec!["Pushed"]);

    f.store.emit("books", ChangeEvent::Removed { id: "x7".to_string() });
    until(|| hook.items().is_empty()).await;
  }

  #[tokio::test(start_paused = true)]
  async fn test_create_echo_after_live_upsert_appears_once() {
    let f = fixture_with(true);
    let hook = ResourceHook::<Book>::new(f.ctx.clone());
    hook.activate().await;

    f.store.emit(
      "books",
      ChangeEvent::Upserted(Document {
        id: "b1".to_string(),
        data: json!({ "title": "Anatomy" }),
      }),
    );
    until(|| hook.items().len() == 1).await;

    let key = hook.create(Book::draft("Anatomy")).await.unwrap();

    assert_eq!(key, RecordKey::Remote("b1".to_string()));
    assert_eq!(titles(&hook), vec!["Anatomy"]);
  }

  #[tokio::test(start_paused = true)]
  async fn test_clear_cache_drops_snapshot() {
    let f = fixture();
    let hook = ResourceHook::<Book>::new(f.ctx.clone());
    hook.activate().await;
    assert!(f.ctx.cache.is_valid("books"));

    hook.clear_cache();

    assert!(!f.ctx.cache.is_valid("books"));
  }
}
