//! Process-wide backend reachability state machine.
//!
//! ```text
//!            failures >= threshold
//!   ONLINE ------------------------> DEGRADED
//!     ^  ^        any success           |
//!     |  +------------------------------+
//!     |                                 |
//!     |   os offline / blocker / forced |
//!     |            +--------------------+
//!     |            v
//!     +------- OFFLINE
//!   os online (no blocker), or retry_now() + success
//! ```
//!
//! The blocker flag is sticky: while it is set, only `retry_now()` followed
//! by a successful backend call leaves OFFLINE.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::{debug, info, warn};

use crate::net::{FailureClass, FailureClassifier, FailureInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
  Online,
  Degraded,
  Offline,
}

impl ConnectivityState {
  pub fn label(&self) -> &'static str {
    match self {
      ConnectivityState::Online => "ONLINE",
      ConnectivityState::Degraded => "DEGRADED",
      ConnectivityState::Offline => "OFFLINE",
    }
  }
}

impl fmt::Display for ConnectivityState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.label())
  }
}

/// Why the monitor was pushed OFFLINE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OfflineReason {
  OsOffline,
  BlockerDetected,
  /// A resource fetch did not complete within its timeout
  FetchTimeout { resource: String },
  /// A resource hook exhausted its retry budget on a write
  RetriesExhausted { resource: String },
}

impl fmt::Display for OfflineReason {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      OfflineReason::OsOffline => write!(f, "network reported offline"),
      OfflineReason::BlockerDetected => write!(f, "backend requests are being blocked"),
      OfflineReason::FetchTimeout { resource } => write!(f, "{} fetch timed out", resource),
      OfflineReason::RetriesExhausted { resource } => {
        write!(f, "{} gave up after retries", resource)
      }
    }
  }
}

/// A published state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectivityChange {
  pub previous: ConnectivityState,
  pub current: ConnectivityState,
  pub blocker_detected: bool,
  /// Monotonic per monitor; a higher generation supersedes a lower one
  pub generation: u64,
}

/// Everything a status indicator needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectivitySnapshot {
  pub state: ConnectivityState,
  pub blocker_detected: bool,
  pub consecutive_failures: u32,
  pub os_online: bool,
  pub retry_armed: bool,
  pub last_failure: Option<String>,
  pub generation: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct MonitorConfig {
  /// Consecutive failures before ONLINE becomes DEGRADED
  pub failure_threshold: u32,
}

impl Default for MonitorConfig {
  fn default() -> Self {
    Self {
      failure_threshold: 3,
    }
  }
}

pub type Listener = Arc<dyn Fn(&ConnectivityChange) + Send + Sync>;

#[derive(Debug, Clone)]
struct Inner {
  state: ConnectivityState,
  blocker_detected: bool,
  consecutive_failures: u32,
  os_online: bool,
  retry_armed: bool,
  last_failure: Option<String>,
  generation: u64,
}

impl Inner {
  fn initial() -> Self {
    Self {
      state: ConnectivityState::Online,
      blocker_detected: false,
      consecutive_failures: 0,
      os_online: true,
      retry_armed: false,
      last_failure: None,
      generation: 0,
    }
  }
}

/// Single source of truth for "can we reach the backend".
///
/// Construct one per process and hand it to everything that needs it. State
/// is only mutated through the methods below; each mutation is applied under
/// one lock, so overlapping callers serialize and the last transition wins.
pub struct ConnectivityMonitor {
  inner: Mutex<Inner>,
  listeners: Mutex<Vec<(u64, Listener)>>,
  next_listener_id: AtomicU64,
  classifier: Box<dyn FailureClassifier>,
  config: MonitorConfig,
}

impl ConnectivityMonitor {
  pub fn new(config: MonitorConfig, classifier: impl FailureClassifier + 'static) -> Arc<Self> {
    Arc::new(Self {
      inner: Mutex::new(Inner::initial()),
      listeners: Mutex::new(Vec::new()),
      next_listener_id: AtomicU64::new(1),
      classifier: Box::new(classifier),
      config,
    })
  }

  /// Monitor with default threshold and blocker signatures.
  #[cfg(test)]
  pub fn with_defaults() -> Arc<Self> {
    Self::new(MonitorConfig::default(), crate::net::SignatureClassifier::default())
  }

  fn lock(&self) -> MutexGuard<'_, Inner> {
    self.inner.lock().unwrap_or_else(|e| e.into_inner())
  }

  pub fn current_state(&self) -> ConnectivityState {
    self.lock().state
  }

  pub fn blocker_detected(&self) -> bool {
    self.lock().blocker_detected
  }

  pub fn is_os_online(&self) -> bool {
    self.lock().os_online
  }

  pub fn snapshot(&self) -> ConnectivitySnapshot {
    let inner = self.lock();
    ConnectivitySnapshot {
      state: inner.state,
      blocker_detected: inner.blocker_detected,
      consecutive_failures: inner.consecutive_failures,
      os_online: inner.os_online,
      retry_armed: inner.retry_armed,
      last_failure: inner.last_failure.clone(),
      generation: inner.generation,
    }
  }

  /// Whether backend-bound calls should fail fast without touching the network.
  pub fn should_short_circuit(&self) -> bool {
    let inner = self.lock();
    inner.state == ConnectivityState::Offline && !inner.retry_armed
  }

  /// Register a listener. Listeners run synchronously, in registration
  /// order, on the thread that caused the transition; they must return
  /// quickly (hand work off to a channel). The listener stays registered
  /// until the returned [`Subscription`] is dropped.
  pub fn subscribe<F>(self: &Arc<Self>, listener: F) -> Subscription
  where
    F: Fn(&ConnectivityChange) + Send + Sync + 'static,
  {
    let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
    self
      .listeners
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .push((id, Arc::new(listener)));
    Subscription {
      monitor: Arc::downgrade(self),
      id,
    }
  }

  fn unsubscribe(&self, id: u64) {
    self
      .listeners
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .retain(|(listener_id, _)| *listener_id != id);
  }

  /// A backend call completed.
  pub fn report_success(&self) {
    let change = {
      let mut inner = self.lock();
      inner.consecutive_failures = 0;

      if inner.retry_armed {
        inner.retry_armed = false;
        inner.blocker_detected = false;
        inner.last_failure = None;
        info!("connectivity: retry succeeded");
        Self::transition(&mut inner, ConnectivityState::Online)
      } else if inner.state == ConnectivityState::Degraded && !inner.blocker_detected {
        inner.last_failure = None;
        Self::transition(&mut inner, ConnectivityState::Online)
      } else {
        // OFFLINE only clears via an OS online edge or an explicit retry
        None
      }
    };
    self.publish(change);
  }

  /// A backend call failed at the transport level. Returns how the failure
  /// was classified.
  pub fn report_failure(&self, failure: &FailureInfo) -> FailureClass {
    let class = self.classifier.classify(failure);

    let change = {
      let mut inner = self.lock();
      inner.last_failure = Some(failure.message.clone());
      if inner.retry_armed {
        debug!("connectivity: retry attempt failed");
        inner.retry_armed = false;
      }

      match class {
        FailureClass::Blocker => {
          if !inner.blocker_detected {
            warn!(message = %failure.message, "connectivity: blocker detected");
          }
          inner.blocker_detected = true;
          Self::transition(&mut inner, ConnectivityState::Offline)
        }
        FailureClass::Transient => {
          inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
          debug!(
            failures = inner.consecutive_failures,
            kind = %failure.kind,
            "connectivity: backend call failed"
          );
          if inner.state == ConnectivityState::Online
            && inner.consecutive_failures >= self.config.failure_threshold
            && inner.os_online
            && !inner.blocker_detected
          {
            Self::transition(&mut inner, ConnectivityState::Degraded)
          } else {
            None
          }
        }
      }
    };
    self.publish(change);
    class
  }

  /// Go OFFLINE regardless of the current state.
  pub fn force_offline(&self, reason: OfflineReason) {
    let change = {
      let mut inner = self.lock();
      inner.retry_armed = false;
      if reason == OfflineReason::BlockerDetected {
        inner.blocker_detected = true;
      }
      if inner.state != ConnectivityState::Offline {
        warn!(reason = %reason, "connectivity: forced offline");
      }
      Self::transition(&mut inner, ConnectivityState::Offline)
    };
    self.publish(change);
  }

  /// User asked to try again. While OFFLINE, lets the next backend calls
  /// through; the first one to complete decides the outcome. Returns whether
  /// a retry was armed.
  pub fn retry_now(&self) -> bool {
    let (armed, generation_bump) = {
      let mut inner = self.lock();
      inner.consecutive_failures = 0;
      match inner.state {
        ConnectivityState::Offline => {
          inner.retry_armed = true;
          inner.generation += 1;
          info!(
            blocker = inner.blocker_detected,
            "connectivity: manual retry requested"
          );
          (true, Some(Self::change_for(&inner, inner.state)))
        }
        _ => (false, None),
      }
    };
    // No state change, but the indicator shows the pending retry
    self.publish(generation_bump);
    armed
  }

  /// OS reported the network up.
  pub fn os_online(&self) {
    let change = {
      let mut inner = self.lock();
      inner.os_online = true;
      if inner.state == ConnectivityState::Offline {
        if inner.blocker_detected {
          debug!("connectivity: ignoring OS online event, blocker still flagged");
          None
        } else {
          inner.consecutive_failures = 0;
          inner.retry_armed = false;
          Self::transition(&mut inner, ConnectivityState::Online)
        }
      } else {
        None
      }
    };
    self.publish(change);
  }

  /// OS reported the network down.
  pub fn os_offline(&self) {
    let change = {
      let mut inner = self.lock();
      inner.os_online = false;
      inner.retry_armed = false;
      Self::transition(&mut inner, ConnectivityState::Offline)
    };
    self.publish(change);
  }

  /// Back to the initial state. Listeners stay registered.
  #[cfg(test)]
  pub fn reset(&self) {
    let change = {
      let mut inner = self.lock();
      let generation = inner.generation;
      let previous = inner.state;
      *inner = Inner::initial();
      inner.generation = generation;
      if previous != ConnectivityState::Online {
        inner.generation += 1;
        Some(ConnectivityChange {
          previous,
          current: ConnectivityState::Online,
          blocker_detected: false,
          generation: inner.generation,
        })
      } else {
        None
      }
    };
    self.publish(change);
  }

  fn transition(inner: &mut Inner, next: ConnectivityState) -> Option<ConnectivityChange> {
    if inner.state == next {
      return None;
    }
    let previous = inner.state;
    inner.state = next;
    inner.generation += 1;
    info!(
      from = %previous,
      to = %next,
      blocker = inner.blocker_detected,
      "connectivity: state changed"
    );
    Some(Self::change_for(inner, previous))
  }

  fn change_for(inner: &Inner, previous: ConnectivityState) -> ConnectivityChange {
    ConnectivityChange {
      previous,
      current: inner.state,
      blocker_detected: inner.blocker_detected,
      generation: inner.generation,
    }
  }

  fn publish(&self, change: Option<ConnectivityChange>) {
    let Some(change) = change else {
      return;
    };
    // Snapshot so listeners may call back into the monitor
    let listeners: Vec<Listener> = self
      .listeners
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .iter()
      .map(|(_, l)| Arc::clone(l))
      .collect();
    for listener in listeners {
      listener(&change);
    }
  }
}

/// Keeps a listener registered; dropping it unsubscribes.
pub struct Subscription {
  monitor: Weak<ConnectivityMonitor>,
  id: u64,
}

impl Drop for Subscription {
  fn drop(&mut self) {
    if let Some(monitor) = self.monitor.upgrade() {
      monitor.unsubscribe(self.id);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::TransportKind;

  fn monitor() -> Arc<ConnectivityMonitor> {
    ConnectivityMonitor::with_defaults()
  }

  fn generic_failure() -> FailureInfo {
    FailureInfo::new(
      TransportKind::Connect,
      "tcp connect error: Connection refused (os error 111)",
    )
  }

  fn blocker_failure() -> FailureInfo {
    FailureInfo::new(TransportKind::Other, "net::ERR_BLOCKED_BY_CLIENT")
  }

  fn recorded(monitor: &Arc<ConnectivityMonitor>) -> (Subscription, Arc<Mutex<Vec<ConnectivityChange>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let sub = monitor.subscribe(move |change| sink.lock().unwrap().push(change.clone()));
    (sub, seen)
  }

  #[test]
  fn test_below_threshold_stays_online() {
    let m = monitor();
    m.report_failure(&generic_failure());
    m.report_failure(&generic_failure());
    assert_eq!(m.current_state(), ConnectivityState::Online);
  }

  #[test]
  fn test_threshold_failures_degrade_not_offline() {
    let m = monitor();
    for _ in 0..3 {
      assert_eq!(m.report_failure(&generic_failure()), FailureClass::Transient);
    }
    assert_eq!(m.current_state(), ConnectivityState::Degraded);
    assert!(!m.blocker_detected());
  }

  #[test]
  fn test_success_resets_counter() {
    let m = monitor();
    m.report_failure(&generic_failure());
    m.report_failure(&generic_failure());
    m.report_success();
    m.report_failure(&generic_failure());
    m.report_failure(&generic_failure());
    assert_eq!(m.current_state(), ConnectivityState::Online);
    assert_eq!(m.snapshot().consecutive_failures, 2);
  }

  #[test]
  fn test_success_recovers_from_degraded() {
    let m = monitor();
    for _ in 0..3 {
      m.report_failure(&generic_failure());
    }
    m.report_success();
    assert_eq!(m.current_state(), ConnectivityState::Online);
  }

  #[test]
  fn test_single_blocker_failure_goes_straight_offline() {
    let m = monitor();
    let (_sub, seen) = recorded(&m);

    assert_eq!(m.report_failure(&blocker_failure()), FailureClass::Blocker);

    assert_eq!(m.current_state(), ConnectivityState::Offline);
    assert!(m.blocker_detected());
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].previous, ConnectivityState::Online);
    assert_eq!(seen[0].current, ConnectivityState::Offline);
  }

  #[test]
  fn test_os_online_does_not_clear_blocker() {
    let m = monitor();
    m.report_failure(&blocker_failure());

    for _ in 0..5 {
      m.os_offline();
      m.os_online();
    }

    assert_eq!(m.current_state(), ConnectivityState::Offline);
    assert!(m.blocker_detected());
  }

  #[test]
  fn test_success_alone_does_not_clear_blocker() {
    let m = monitor();
    m.report_failure(&blocker_failure());
    m.report_success();
    assert_eq!(m.current_state(), ConnectivityState::Offline);
    assert!(m.should_short_circuit());
  }

  #[test]
  fn test_retry_then_success_clears_blocker() {
    let m = monitor();
    m.report_failure(&blocker_failure());

    assert!(m.retry_now());
    assert!(!m.should_short_circuit());
    m.report_success();

    assert_eq!(m.current_state(), ConnectivityState::Online);
    assert!(!m.blocker_detected());
  }

  #[test]
  fn test_failed_retry_stays_offline() {
    let m = monitor();
    m.report_failure(&blocker_failure());

    m.retry_now();
    m.report_failure(&generic_failure());

    assert_eq!(m.current_state(), ConnectivityState::Offline);
    assert!(m.blocker_detected());
    assert!(m.should_short_circuit());
  }

  #[test]
  fn test_os_online_recovers_without_blocker() {
    let m = monitor();
    m.os_offline();
    assert_eq!(m.current_state(), ConnectivityState::Offline);
    m.os_online();
    assert_eq!(m.current_state(), ConnectivityState::Online);
  }

  #[test]
  fn test_forced_offline_waits_for_os_edge_or_retry() {
    let m = monitor();
    m.force_offline(OfflineReason::FetchTimeout {
      resource: "years".to_string(),
    });
    m.report_success();
    assert_eq!(m.current_state(), ConnectivityState::Offline);

    m.os_online();
    assert_eq!(m.current_state(), ConnectivityState::Online);
  }

  #[test]
  fn test_os_online_disarms_pending_retry() {
    let m = monitor();
    m.os_offline();
    assert!(m.retry_now());
    assert!(m.snapshot().retry_armed);

    m.os_online();

    let snapshot = m.snapshot();
    assert_eq!(snapshot.state, ConnectivityState::Online);
    assert!(!snapshot.retry_armed);
  }

  #[test]
  fn test_retry_now_is_noop_when_online() {
    let m = monitor();
    assert!(!m.retry_now());
    assert!(!m.snapshot().retry_armed);
  }

  #[test]
  fn test_listeners_called_in_registration_order() {
    let m = monitor();
    let order = Arc::new(Mutex::new(Vec::new()));
    let first = order.clone();
    let second = order.clone();
    let _a = m.subscribe(move |_| first.lock().unwrap().push("first"));
    let _b = m.subscribe(move |_| second.lock().unwrap().push("second"));

    m.os_offline();

    assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
  }

  #[test]
  fn test_dropped_subscription_stops_delivery() {
    let m = monitor();
    let (sub, seen) = recorded(&m);
    m.os_offline();
    drop(sub);
    m.os_online();
    assert_eq!(seen.lock().unwrap().len(), 1);
  }

  #[test]
  fn test_listener_may_read_monitor() {
    let m = monitor();
    let observed = Arc::new(Mutex::new(None));
    let sink = observed.clone();
    let weak = Arc::downgrade(&m);
    let _sub = m.subscribe(move |_| {
      if let Some(m) = weak.upgrade() {
        *sink.lock().unwrap() = Some(m.current_state());
      }
    });

    m.os_offline();

    assert_eq!(*observed.lock().unwrap(), Some(ConnectivityState::Offline));
  }

  #[test]
  fn test_reset_restores_initial_state() {
    let m = monitor();
    m.report_failure(&blocker_failure());
    m.reset();
    let snapshot = m.snapshot();
    assert_eq!(snapshot.state, ConnectivityState::Online);
    assert!(!snapshot.blocker_detected);
    assert_eq!(snapshot.consecutive_failures, 0);
  }

  #[test]
  fn test_generation_increases_with_each_change() {
    let m = monitor();
    let (_sub, seen) = recorded(&m);
    m.os_offline();
    m.os_online();
    let seen = seen.lock().unwrap();
    assert!(seen[1].generation > seen[0].generation);
  }
}
