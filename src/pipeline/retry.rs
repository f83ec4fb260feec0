//! Bounded retry with exponential backoff.
//!
//! [`retry_with_backoff`] is a plain higher-order async function: it owns the
//! attempt counter, sleeps between attempts and asks a caller-supplied
//! predicate whether a failure is worth another try. The model stage is its
//! only user today, but nothing here knows about models or HTTP.
//!
//! With the default 1 s base delay and 4 attempts the waits are
//! 1 s → 2 s → 4 s, so a fully rate-limited call gives up after ~7 s of
//! back-off plus the four request latencies.

use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// How many times to try and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first. Always ≥ 1.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubled for each later one.
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Delay to wait before attempt number `attempt` (1-based).
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(attempt - 2);
        self.base_delay.saturating_mul(factor)
    }

    /// Sum of all delays when every attempt is used.
    pub fn worst_case_delay(&self) -> Duration {
        (2..=self.max_attempts)
            .map(|a| self.delay_before(a))
            .fold(Duration::ZERO, Duration::saturating_add)
    }
}

/// Why [`retry_with_backoff`] gave up.
#[derive(Debug, PartialEq, Eq)]
pub enum RetryError<E> {
    /// The predicate rejected the error; no further attempts were made.
    Fatal(E),
    /// Every attempt failed with a retryable error.
    Exhausted { attempts: u32, last: E },
}

/// Run `op` until it succeeds, fails fatally, or the policy runs out.
///
/// `op` receives the 1-based attempt number. `is_retryable` decides whether a
/// failure leads to another attempt or is returned as
/// [`RetryError::Fatal`] immediately.
pub async fn retry_with_backoff<T, E, Op, Fut, P>(
    policy: &RetryPolicy,
    is_retryable: P,
    mut op: Op,
) -> Result<T, RetryError<E>>
where
    Op: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if !is_retryable(&e) => return Err(RetryError::Fatal(e)),
            Err(e) if attempt >= max_attempts => {
                return Err(RetryError::Exhausted { attempts: attempt, last: e })
            }
            Err(e) => {
                let backoff = policy.delay_before(attempt + 1);
                warn!(
                    "Attempt {}/{} failed ({}); retrying in {}ms",
                    attempt,
                    max_attempts,
                    e,
                    backoff.as_millis()
                );
                sleep(backoff).await;
                attempt += 1;
            }
        }
    }
}
