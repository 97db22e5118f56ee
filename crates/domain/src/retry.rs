//! Reusable retry policy.
//!
//! One policy value carries the max attempt count, the backoff schedule, and
//! the retryable-error predicate. The credential broker and the document
//! store client share [`RetryPolicy::run`]; the run reconciler drives its
//! poll loop through [`RetryPolicy::poll_until`] with a fixed interval.

use std::future::Future;
use std::time::Duration;

use crate::error::{Error, Result};

/// Bounded retry with a per-attempt backoff schedule.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    /// Sleep before attempt `n+1` is `backoff[n-1]`, clamped to the last
    /// entry when the schedule is shorter than the attempt count.
    backoff: Vec<Duration>,
    retryable: fn(&Error) -> bool,
}

impl RetryPolicy {
    /// A policy with an explicit backoff schedule. Errors retry when
    /// [`Error::is_transient`] holds.
    pub fn new(max_attempts: u32, backoff: Vec<Duration>) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
            retryable: Error::is_transient,
        }
    }

    /// A fixed-interval policy, used for polling loops.
    pub fn fixed(interval: Duration, max_attempts: u32) -> Self {
        Self::new(max_attempts, vec![interval])
    }

    /// Override the retryable-error predicate.
    pub fn with_retryable(mut self, retryable: fn(&Error) -> bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Delay to sleep before `attempt` (1-based). `None` for the first.
    fn delay_before(&self, attempt: u32) -> Option<Duration> {
        if attempt <= 1 || self.backoff.is_empty() {
            return None;
        }
        let idx = ((attempt - 2) as usize).min(self.backoff.len() - 1);
        Some(self.backoff[idx])
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// `op` receives the 1-based attempt number so callers can rebuild
    /// per-attempt state (e.g. a fresh HTTP client). Non-retryable errors
    /// surface immediately; the last transient error surfaces after
    /// exhaustion.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut last_err: Option<Error> = None;

        for attempt in 1..=self.max_attempts {
            if let Some(delay) = self.delay_before(attempt) {
                tokio::time::sleep(delay).await;
            }

            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if (self.retryable)(&e) => {
                    tracing::debug!(attempt, error = %e, "transient failure, will retry");
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err.unwrap_or_else(|| Error::Timeout("retries exhausted".into())))
    }

    /// Poll `op` until it yields a value or attempts run out, sleeping the
    /// schedule's interval between checks. Returns `None` on exhaustion.
    pub async fn poll_until<T, F, Fut>(&self, mut op: F) -> Option<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Option<T>>,
    {
        for attempt in 1..=self.max_attempts {
            if let Some(delay) = self.delay_before(attempt) {
                tokio::time::sleep(delay).await;
            }
            if let Some(value) = op().await {
                return Some(value);
            }
        }
        None
    }
}
