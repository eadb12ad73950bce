//! Bounded exponential backoff.
//!
//! `RetryPolicy` is plain data; every operation that retries takes its own
//! [`RetryBudget`] from it and drops the budget when the operation ends.

use std::future::Future;
use std::time::Duration;

use crate::error::Error;

/// Errors that can tell whether another attempt could succeed.
pub trait Retryable {
  fn is_retryable(&self) -> bool;
}

impl Retryable for Error {
  fn is_retryable(&self) -> bool {
    Error::is_retryable(self)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  /// Delay after the first failed attempt
  pub base_delay: Duration,
  /// Upper bound for any single delay
  pub max_delay: Duration,
  /// Total attempts, including the first one
  pub max_attempts: u32,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      base_delay: Duration::from_millis(500),
      max_delay: Duration::from_secs(8),
      max_attempts: 4,
    }
  }
}

impl RetryPolicy {
  /// `base_delay * 2^(attempt-1)`, capped at `max_delay`. Attempts are 1-based.
  pub fn delay_for(&self, attempt: u32) -> Duration {
    let exponent = attempt.max(1) - 1;
    let factor = 2u32.saturating_pow(exponent);
    self.base_delay.saturating_mul(factor).min(self.max_delay)
  }

  /// A fresh budget for one operation.
  pub fn budget(&self) -> RetryBudget {
    RetryBudget {
      attempt: 0,
      max_attempts: self.max_attempts.max(1),
      base_delay: self.base_delay,
      max_delay: self.max_delay,
    }
  }
}

/// Attempt counter owned by exactly one in-flight operation.
#[derive(Debug, Clone)]
pub struct RetryBudget {
  pub attempt: u32,
  pub max_attempts: u32,
  pub base_delay: Duration,
  max_delay: Duration,
}

impl RetryBudget {
  /// Record a retryable failure. Returns the delay before the next attempt,
  /// or `None` once the budget is spent.
  pub fn record_failure(&mut self) -> Option<Duration> {
    self.attempt += 1;
    if self.attempt >= self.max_attempts {
      return None;
    }
    let policy = RetryPolicy {
      base_delay: self.base_delay,
      max_delay: self.max_delay,
      max_attempts: self.max_attempts,
    };
    Some(policy.delay_for(self.attempt))
  }

  pub fn is_exhausted(&self) -> bool {
    self.attempt >= self.max_attempts
  }
}

/// Why a retried operation gave up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError<E> {
  /// Every attempt failed with a retryable error; holds the last one
  Exhausted { error: E, attempts: u32 },
  /// A non-retryable error ended the operation without consuming budget
  Terminal(E),
}

impl<E> RetryError<E> {
  pub fn into_inner(self) -> E {
    match self {
      RetryError::Exhausted { error, .. } => error,
      RetryError::Terminal(error) => error,
    }
  }

  pub fn is_exhausted(&self) -> bool {
    matches!(self, RetryError::Exhausted { .. })
  }
}

/// Run `op` until it succeeds, fails terminally, or the budget is spent.
///
/// `op` receives the 1-based attempt number.
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, RetryError<E>>
where
  E: Retryable + std::fmt::Display,
  F: FnMut(u32) -> Fut,
  Fut: Future<Output = Result<T, E>>,
{
  let mut budget = policy.budget();
  loop {
    let attempt = budget.attempt + 1;
    match op(attempt).await {
      Ok(value) => return Ok(value),
      Err(error) if !error.is_retryable() => return Err(RetryError::Terminal(error)),
      Err(error) => match budget.record_failure() {
        Some(delay) => {
          tracing::debug!(attempt, ?delay, %error, "retrying after transient failure");
          tokio::time::sleep(delay).await;
        }
        None => {
          return Err(RetryError::Exhausted {
            error,
            attempts: budget.attempt,
          })
        }
      },
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicU32, Ordering};
  use std::sync::Arc;

  fn policy() -> RetryPolicy {
    RetryPolicy {
      base_delay: Duration::from_millis(500),
      max_delay: Duration::from_secs(8),
      max_attempts: 4,
    }
  }

  #[test]
  fn test_delay_doubles_per_attempt() {
    let p = policy();
    assert_eq!(p.delay_for(1), Duration::from_millis(500));
    assert_eq!(p.delay_for(2), Duration::from_millis(1000));
    assert_eq!(p.delay_for(3), Duration::from_millis(2000));
    assert_eq!(p.delay_for(4), Duration::from_millis(4000));
  }

  #[test]
  fn test_delay_is_capped() {
    let p = policy();
    assert_eq!(p.delay_for(5), Duration::from_secs(8));
    assert_eq!(p.delay_for(6), Duration::from_secs(8));
    assert_eq!(p.delay_for(200), Duration::from_secs(8));
  }

  #[test]
  fn test_budget_exhausts_after_max_attempts() {
    let mut budget = policy().budget();
    assert!(budget.record_failure().is_some());
    assert!(budget.record_failure().is_some());
    assert!(budget.record_failure().is_some());
    assert!(budget.record_failure().is_none());
    assert!(budget.is_exhausted());
  }

  #[tokio::test(start_paused = true)]
  async fn test_retry_succeeds_after_transient_failures() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();

    let result = retry(&policy(), |_| {
      let counter = counter.clone();
      async move {
        if counter.fetch_add(1, Ordering::SeqCst) < 2 {
          Err(Error::TransientNetwork("connection reset".into()))
        } else {
          Ok(7)
        }
      }
    })
    .await;

    assert_eq!(result, Ok(7));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
  }

  #[tokio::test(start_paused = true)]
  async fn test_terminal_error_does_not_consume_budget() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();

    let result: Result<(), _> = retry(&policy(), |_| {
      let counter = counter.clone();
      async move {
        counter.fetch_add(1, Ordering::SeqCst);
        Err(Error::Validation("title is required".into()))
      }
    })
    .await;

    assert_eq!(
      result,
      Err(RetryError::Terminal(Error::Validation(
        "title is required".into()
      )))
    );
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_retry_exhaustion_reports_last_error() {
    let result: Result<(), _> = retry(&policy(), |attempt| async move {
      Err(Error::TransientNetwork(format!("attempt {}", attempt)))
    })
    .await;

    match result {
      Err(RetryError::Exhausted { error, attempts }) => {
        assert_eq!(attempts, 4);
        assert_eq!(error, Error::TransientNetwork("attempt 4".into()));
      }
      other => panic!("unexpected result: {:?}", other),
    }
  }
}
