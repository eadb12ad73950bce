//! Error taxonomy for backend access.
//!
//! `HttpError` is what the HTTP primitive (and the interceptor wrapping it)
//! returns. `Error` is what the document store and resource hooks speak: it
//! separates connectivity-shaped failures, which drive offline mode, from
//! terminal ones that are shown to the user as-is.

use std::fmt;

/// Transport-level failure category reported by an [`crate::net::HttpClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
  /// Could not open a connection (refused, unreachable, reset during connect)
  Connect,
  /// Name resolution failed
  Dns,
  /// The request did not complete in time
  Timeout,
  /// Connection dropped after the request was sent
  Reset,
  /// Anything else the transport could not describe further
  Other,
}

impl fmt::Display for TransportKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      TransportKind::Connect => "connect",
      TransportKind::Dns => "dns",
      TransportKind::Timeout => "timeout",
      TransportKind::Reset => "reset",
      TransportKind::Other => "other",
    };
    f.write_str(s)
  }
}

/// Errors surfaced by the HTTP primitive.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HttpError {
  #[error("network request failed ({kind}): {message}")]
  Transport { kind: TransportKind, message: String },
  #[error("invalid request: {0}")]
  InvalidRequest(String),
  /// Short-circuit returned while the monitor is OFFLINE; the network was not touched.
  #[error("backend unavailable (offline mode)")]
  BackendUnavailable,
  #[error("backend requests appear to be blocked: {0}")]
  BlockerSuspected(String),
}

impl HttpError {
  pub fn transport(kind: TransportKind, message: impl Into<String>) -> Self {
    HttpError::Transport {
      kind,
      message: message.into(),
    }
  }
}

/// Domain error returned by the document store and resource hooks.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
  #[error("network error: {0}")]
  TransientNetwork(String),
  #[error("requests to the backend appear to be blocked: {0}")]
  BlockerSuspected(String),
  #[error("backend unavailable (offline mode)")]
  BackendUnavailable,
  #[error("backend rejected a queued change: {0}")]
  ConflictOnReplay(String),
  #[error("validation failed: {0}")]
  Validation(String),
  #[error("not authorized: {0}")]
  Unauthorized(String),
  #[error("unexpected response from backend: {0}")]
  Decode(String),
}

impl Error {
  /// Only transient network errors are worth another attempt.
  pub fn is_retryable(&self) -> bool {
    matches!(self, Error::TransientNetwork(_))
  }

  /// Errors that mean "the backend cannot be reached right now".
  pub fn is_connectivity(&self) -> bool {
    matches!(
      self,
      Error::TransientNetwork(_) | Error::BlockerSuspected(_) | Error::BackendUnavailable
    )
  }
}

impl From<HttpError> for Error {
  fn from(err: HttpError) -> Self {
    match err {
      HttpError::Transport { .. } => Error::TransientNetwork(err.to_string()),
      HttpError::InvalidRequest(msg) => Error::Validation(msg),
      HttpError::BackendUnavailable => Error::BackendUnavailable,
      HttpError::BlockerSuspected(msg) => Error::BlockerSuspected(msg),
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
