//! Blocker heuristic for failed backend calls.
//!
//! A browser extension or filtering middlebox rejecting backend calls looks
//! almost like an ordinary outage. The only evidence is the shape of the
//! error: a known "blocked" marker, or an opaque failure with no detail on a
//! request that was well-formed. The heuristic is isolated here so it can be
//! tuned without touching the state machine.

use crate::error::TransportKind;

/// What the monitor learns about one failed backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureInfo {
  pub kind: TransportKind,
  pub message: String,
  /// The caller can vouch the request itself was valid
  pub well_formed: bool,
}

impl FailureInfo {
  pub fn new(kind: TransportKind, message: impl Into<String>) -> Self {
    Self {
      kind,
      message: message.into(),
      well_formed: true,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
  /// Looks like an agent actively rejecting the call
  Blocker,
  /// Ordinary network failure
  Transient,
}

pub trait FailureClassifier: Send + Sync {
  fn classify(&self, failure: &FailureInfo) -> FailureClass;
}

/// Markers left by client-side blockers and filtering proxies.
const DEFAULT_SIGNATURES: &[&str] = &[
  "err_blocked_by_client",
  "blocked by client",
  "err_blocked_by_response",
  "err_blocked_by_administrator",
  "blocked by an extension",
  "request blocked",
];

/// Messages that carry no information beyond "it failed".
const OPAQUE_MESSAGES: &[&str] = &[
  "failed to fetch",
  "network request failed",
  "load failed",
  "networkerror when attempting to fetch resource.",
];

/// Substring-based classifier with a configurable signature list.
#[derive(Debug, Clone)]
pub struct SignatureClassifier {
  signatures: Vec<String>,
}

impl Default for SignatureClassifier {
  fn default() -> Self {
    Self {
      signatures: DEFAULT_SIGNATURES.iter().map(|s| s.to_string()).collect(),
    }
  }
}

impl SignatureClassifier {
  /// Default signatures plus extra fragments (matched case-insensitively).
  pub fn with_extra<I, S>(extra: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    let mut classifier = Self::default();
    classifier.signatures.extend(
      extra
        .into_iter()
        .map(|s| s.as_ref().trim().to_lowercase())
        .filter(|s| !s.is_empty()),
    );
    classifier
  }
}

impl FailureClassifier for SignatureClassifier {
  fn classify(&self, failure: &FailureInfo) -> FailureClass {
    if !failure.well_formed {
      return FailureClass::Transient;
    }

    let message = failure.message.trim().to_lowercase();

    if self.signatures.iter().any(|s| message.contains(s.as_str())) {
      return FailureClass::Blocker;
    }

    // Opaque failure with nothing else to go on
    if failure.kind == TransportKind::Other && OPAQUE_MESSAGES.contains(&message.as_str()) {
      return FailureClass::Blocker;
    }

    FailureClass::Transient
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn classify(kind: TransportKind, message: &str) -> FailureClass {
    SignatureClassifier::default().classify(&FailureInfo::new(kind, message))
  }

  #[test]
  fn test_chromium_blocked_by_client() {
    assert_eq!(
      classify(
        TransportKind::Other,
        "GET https://api.example.com/v1/years net::ERR_BLOCKED_BY_CLIENT"
      ),
      FailureClass::Blocker
    );
  }

  #[test]
  fn test_bare_failed_to_fetch_is_blocker() {
    assert_eq!(
      classify(TransportKind::Other, "Failed to fetch"),
      FailureClass::Blocker
    );
    assert_eq!(
      classify(TransportKind::Other, "Network request failed"),
      FailureClass::Blocker
    );
  }

  #[test]
  fn test_failed_to_fetch_with_detail_is_transient() {
    assert_eq!(
      classify(
        TransportKind::Other,
        "Failed to fetch: connection reset by peer"
      ),
      FailureClass::Transient
    );
  }

  #[test]
  fn test_connect_and_timeout_errors_are_transient() {
    assert_eq!(
      classify(
        TransportKind::Connect,
        "error sending request: tcp connect error: Connection refused (os error 111)"
      ),
      FailureClass::Transient
    );
    assert_eq!(
      classify(TransportKind::Timeout, "operation timed out"),
      FailureClass::Transient
    );
    assert_eq!(
      classify(
        TransportKind::Dns,
        "dns error: failed to lookup address information"
      ),
      FailureClass::Transient
    );
  }

  #[test]
  fn test_malformed_request_is_never_blocker() {
    let failure = FailureInfo {
      kind: TransportKind::Other,
      message: "Failed to fetch".to_string(),
      well_formed: false,
    };
    assert_eq!(
      SignatureClassifier::default().classify(&failure),
      FailureClass::Transient
    );
  }

  #[test]
  fn test_extra_signatures() {
    let classifier = SignatureClassifier::with_extra(["Blocked By Corporate Proxy", "  "]);
    let failure = FailureInfo::new(
      TransportKind::Reset,
      "403 blocked by corporate proxy policy",
    );
    assert_eq!(classifier.classify(&failure), FailureClass::Blocker);
  }
}
