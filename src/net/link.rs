//! OS-level link signal for a terminal process.
//!
//! There are no browser `online`/`offline` events here, so the watcher asks
//! a [`LinkProbe`] periodically and forwards only the edges to the monitor.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::connectivity::ConnectivityMonitor;

#[async_trait]
pub trait LinkProbe: Send + Sync {
  /// Whether the machine currently has a usable network link.
  async fn is_up(&self) -> bool;
}

/// Considers the link up when a TCP connection to `addr` opens in time.
pub struct TcpLinkProbe {
  addr: String,
  timeout: Duration,
}

impl TcpLinkProbe {
  pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
    Self {
      addr: addr.into(),
      timeout,
    }
  }
}

#[async_trait]
impl LinkProbe for TcpLinkProbe {
  async fn is_up(&self) -> bool {
    matches!(
      tokio::time::timeout(self.timeout, TcpStream::connect(self.addr.as_str())).await,
      Ok(Ok(_))
    )
  }
}

pub struct LinkWatcher {
  probe: Arc<dyn LinkProbe>,
  monitor: Arc<ConnectivityMonitor>,
  interval: Duration,
  last: Option<bool>,
}

impl LinkWatcher {
  pub fn new(probe: Arc<dyn LinkProbe>, monitor: Arc<ConnectivityMonitor>, interval: Duration) -> Self {
    Self {
      probe,
      monitor,
      interval,
      last: None,
    }
  }

  /// Check once and forward an edge if the link changed. Returns the
  /// forwarded value, if any.
  pub async fn check(&mut self) -> Option<bool> {
    let up = self.probe.is_up().await;
    if self.last == Some(up) {
      return None;
    }

    let first = self.last.is_none();
    self.last = Some(up);

    // Starting up with a working link is not news
    if first && up && self.monitor.is_os_online() {
      debug!("link: up at start");
      return None;
    }

    if up {
      info!("link: network up");
      self.monitor.os_online();
    } else {
      info!("link: network down");
      self.monitor.os_offline();
    }
    Some(up)
  }

  pub fn spawn(mut self) -> JoinHandle<()> {
    tokio::spawn(async move {
      loop {
        self.check().await;
        tokio::time::sleep(self.interval).await;
      }
    })
  }
}
