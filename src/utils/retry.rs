// src/utils/retry.rs

//! Bounded exponential backoff.

use std::future::Future;
use std::time::Duration;

use crate::error::{AppError, ErrorKind, Result};

/// Retry budget and backoff schedule shared by page fetches and uploads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one (at least 1)
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles after every failure
    pub base_delay: Duration,
    /// Upper bound for a single delay
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// Policy that never waits, for callers that do their own pacing.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO, Duration::ZERO)
    }

    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let factor = 1u32 << exponent;
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Decide whether another attempt should follow a failure.
    pub fn should_retry(&self, kind: ErrorKind, attempt: u32) -> bool {
        kind == ErrorKind::Transient && attempt < self.max_attempts
    }

    /// Wrap the last error of a used-up budget.
    pub fn exhausted(&self, context: impl Into<String>, last: &AppError) -> AppError {
        AppError::RetriesExhausted {
            context: context.into(),
            attempts: self.max_attempts,
            message: last.to_string(),
        }
    }

    /// Run `op` until it succeeds, fails permanently, or the budget is spent.
    pub async fn run<T, F, Fut>(&self, context: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            if !self.should_retry(err.kind(), attempt) {
                return Err(if err.is_transient() {
                    self.exhausted(context, &err)
                } else {
                    err
                });
            }
            let wait = self.delay_after(attempt);
            log::warn!(
                "{context} failed (attempt {attempt}/{}), retrying in {wait:?}: {err}",
                self.max_attempts
            );
            tokio::time::sleep(wait).await;
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1), Duration::from_secs(32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = RetryPolicy::new(6, Duration::from_secs(1), Duration::from_secs(5));
        assert_eq!(policy.delay_after(1), Duration::from_secs(1));
        assert_eq!(policy.delay_after(2), Duration::from_secs(2));
        assert_eq!(policy.delay_after(3), Duration::from_secs(4));
        assert_eq!(policy.delay_after(4), Duration::from_secs(5));
        assert_eq!(policy.delay_after(40), Duration::from_secs(5));
    }

    #[test]
    fn test_should_retry_depends_on_kind_and_budget() {
        let policy = RetryPolicy::immediate(3);
        assert!(policy.should_retry(ErrorKind::Transient, 1));
        assert!(policy.should_retry(ErrorKind::Transient, 2));
        assert!(!policy.should_retry(ErrorKind::Transient, 3));
        assert!(!policy.should_retry(ErrorKind::Permanent, 1));
        assert!(!policy.should_retry(ErrorKind::Integrity, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_retries_transient_then_succeeds() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1), Duration::from_secs(4));
        let mut calls = 0;
        let value = policy
            .run("op", || {
                calls += 1;
                let result = if calls < 3 {
                    Err(AppError::Unavailable("busy".into()))
                } else {
                    Ok(calls)
                };
                async move { result }
            })
            .await
            .unwrap();
        assert_eq!(value, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_permanent() {
        let policy = RetryPolicy::immediate(5);
        let mut calls = 0;
        let err = policy
            .run("op", || {
                calls += 1;
                async { Err::<(), _>(AppError::Rejected("no".into())) }
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Rejected(_)));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_zero_attempts_clamped() {
        assert_eq!(RetryPolicy::immediate(0).max_attempts, 1);
    }
}
