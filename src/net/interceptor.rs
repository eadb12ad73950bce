//! Decorator that routes every outbound call through connectivity tracking.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;
use url::Url;

use super::classify::{FailureClass, FailureInfo};
use super::http::{HttpClient, HttpRequest, HttpResponse};
use crate::connectivity::ConnectivityMonitor;
use crate::error::HttpError;

/// Wraps an [`HttpClient`] and reports backend-bound outcomes to the monitor.
///
/// Calls to hosts outside the backend list pass straight through and never
/// affect backend health.
pub struct RequestInterceptor<C> {
  inner: C,
  monitor: Arc<ConnectivityMonitor>,
  backend_hosts: Vec<String>,
}

impl<C: HttpClient> RequestInterceptor<C> {
  /// `backend_hosts` entries match exactly, or as a suffix when written `*.example.com`.
  pub fn new<I, S>(inner: C, monitor: Arc<ConnectivityMonitor>, backend_hosts: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    Self {
      inner,
      monitor,
      backend_hosts: backend_hosts
        .into_iter()
        .map(|h| h.as_ref().trim().to_lowercase())
        .filter(|h| !h.is_empty())
        .collect(),
    }
  }

  pub fn is_backend_bound(&self, url: &str) -> bool {
    let Ok(url) = Url::parse(url) else {
      return false;
    };
    let Some(host) = url.host_str() else {
      return false;
    };
    let host = host.to_lowercase();

    self.backend_hosts.iter().any(|pattern| {
      match pattern.strip_prefix("*.") {
        Some(domain) => host.ends_with(&format!(".{}", domain)),
        None => host == *pattern,
      }
    })
  }
}

#[async_trait]
impl<C: HttpClient> HttpClient for RequestInterceptor<C> {
  async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
    if !self.is_backend_bound(&request.url) {
      return self.inner.send(request).await;
    }

    if self.monitor.should_short_circuit() {
      debug!(url = %request.url, "short-circuiting backend call while offline");
      return Err(HttpError::BackendUnavailable);
    }

    match self.inner.send(request).await {
      Ok(response) => {
        // Any response proves the backend is reachable
        self.monitor.report_success();
        Ok(response)
      }
      Err(HttpError::Transport { kind, message }) => {
        let failure = FailureInfo::new(kind, message.clone());
        match self.monitor.report_failure(&failure) {
          FailureClass::Blocker => Err(HttpError::BlockerSuspected(message)),
          FailureClass::Transient => Err(HttpError::Transport { kind, message }),
        }
      }
      // Malformed requests say nothing about backend health
      Err(other) => Err(other),
    }
  }
}
