//! Background probing while the backend looks degraded.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use super::monitor::{ConnectivityMonitor, ConnectivityState};
use crate::net::{HttpClient, HttpRequest};
use crate::retry::RetryPolicy;

/// Sends lightweight backend requests with backoff while DEGRADED.
///
/// Probes go through the intercepted client, so their outcome reaches the
/// monitor the same way any other backend call does. Probing stops as soon
/// as the state leaves DEGRADED; it never runs while OFFLINE.
pub struct Prober<C> {
  client: C,
  monitor: Arc<ConnectivityMonitor>,
  probe_url: String,
  policy: RetryPolicy,
}

impl<C: HttpClient + 'static> Prober<C> {
  pub fn new(
    client: C,
    monitor: Arc<ConnectivityMonitor>,
    probe_url: impl Into<String>,
    policy: RetryPolicy,
  ) -> Self {
    Self {
      client,
      monitor,
      probe_url: probe_url.into(),
      policy,
    }
  }

  pub fn spawn(self) -> JoinHandle<()> {
    tokio::spawn(self.run())
  }

  async fn run(self) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let _subscription = self.monitor.subscribe(move |change| {
      let _ = tx.send(change.current);
    });

    let mut attempt = 0u32;
    loop {
      if self.monitor.current_state() != ConnectivityState::Degraded {
        attempt = 0;
        if rx.recv().await.is_none() {
          break;
        }
        continue;
      }

      attempt = attempt.saturating_add(1);
      let delay = self.policy.delay_for(attempt);

      tokio::select! {
        _ = tokio::time::sleep(delay) => {}
        changed = rx.recv() => {
          if changed.is_none() {
            break;
          }
          // Re-evaluate the state before probing
          continue;
        }
      }

      debug!(attempt, url = %self.probe_url, "probing backend");
      let _ = self.client.send(HttpRequest::get(&self.probe_url)).await;
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::{HttpError, TransportKind};
  use crate::net::{FailureInfo, RequestInterceptor};
  use crate::testing::ScriptedHttp;
  use std::time::Duration;

  #[tokio::test(start_paused = true)]
  async fn test_probe_recovers_degraded_backend() {
    let monitor = ConnectivityMonitor::with_defaults();
    let http = Arc::new(ScriptedHttp::new());
    http.push_err(HttpError::transport(TransportKind::Connect, "refused"));
    http.push_ok(200, b"ok");
    let client = Arc::new(RequestInterceptor::new(
      http.clone(),
      monitor.clone(),
      ["api.example.com"],
    ));

    let _task = Prober::new(
      client,
      monitor.clone(),
      "https://api.example.com/health",
      RetryPolicy::default(),
    )
    .spawn();
    tokio::task::yield_now().await;

    for _ in 0..3 {
      monitor.report_failure(&FailureInfo::new(TransportKind::Connect, "refused"));
    }
    assert_eq!(monitor.current_state(), ConnectivityState::Degraded);

    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(http.calls(), 2);
    assert_eq!(monitor.current_state(), ConnectivityState::Online);
  }

  #[tokio::test(start_paused = true)]
  async fn test_no_probing_while_offline() {
    let monitor = ConnectivityMonitor::with_defaults();
    let http = Arc::new(ScriptedHttp::new());
    let client = Arc::new(RequestInterceptor::new(
      http.clone(),
      monitor.clone(),
      ["api.example.com"],
    ));
    let _task = Prober::new(
      client,
      monitor.clone(),
      "https://api.example.com/health",
      RetryPolicy::default(),
    )
    .spawn();
    tokio::task::yield_now().await;

    monitor.os_offline();
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(http.calls(), 0);
  }
}
