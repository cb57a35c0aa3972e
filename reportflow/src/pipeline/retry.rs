//! Retry-with-backoff combinator shared by single passes and fan-out passes.
//!
//! Delays follow `base * 2^attempt` by default, capped at `max_delay_ms`,
//! with optional jitter. Waiting is a `tokio::time::sleep` inside the
//! retrying task, so other jobs are never blocked.

use crate::errors::PassError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Additional attempts allowed after the first.
pub const MAX_RETRIES: usize = 2;

/// Backoff strategy for retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// delay = base * 2^attempt
    #[default]
    Exponential,
    /// delay = base * (attempt + 1)
    Linear,
    /// delay = base
    Constant,
}

/// Jitter applied on top of the backoff delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// Exact delays.
    #[default]
    None,
    /// Random from 0 to delay.
    Full,
    /// Half fixed, half random.
    Equal,
}

fn default_max_retries() -> usize {
    MAX_RETRIES
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

/// Retry configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Additional attempts after the first.
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    /// Base delay in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Delay cap in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Backoff strategy.
    #[serde(default)]
    pub backoff: BackoffStrategy,
    /// Jitter strategy.
    #[serde(default)]
    pub jitter: JitterStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff: BackoffStrategy::Exponential,
            jitter: JitterStrategy::None,
        }
    }
}

impl RetryPolicy {
    /// Creates the default policy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A policy that never waits, for tests and local runs.
    #[must_use]
    pub fn immediate() -> Self {
        Self::default().with_base_delay_ms(0)
    }

    /// Sets the number of additional attempts.
    #[must_use]
    pub fn with_max_retries(mut self, retries: usize) -> Self {
        self.max_retries = retries;
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Sets the delay cap.
    #[must_use]
    pub fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Sets the backoff strategy.
    #[must_use]
    pub fn with_backoff(mut self, strategy: BackoffStrategy) -> Self {
        self.backoff = strategy;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, strategy: JitterStrategy) -> Self {
        self.jitter = strategy;
        self
    }

    /// Total attempts including the first.
    #[must_use]
    pub fn max_attempts(&self) -> usize {
        self.max_retries + 1
    }

    /// Delay before retry number `attempt + 1`.
    #[must_use]
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let base = self.base_delay_ms;
        let max = self.max_delay_ms;
        let exponent = u32::try_from(attempt).unwrap_or(u32::MAX);

        let delay = match self.backoff {
            BackoffStrategy::Exponential => base.saturating_mul(2u64.saturating_pow(exponent)),
            BackoffStrategy::Linear => base.saturating_mul(u64::from(exponent).saturating_add(1)),
            BackoffStrategy::Constant => base,
        }
        .min(max);

        let jittered = match self.jitter {
            JitterStrategy::None => delay,
            JitterStrategy::Full => {
                if delay == 0 {
                    0
                } else {
                    rand::thread_rng().gen_range(0..=delay)
                }
            }
            JitterStrategy::Equal => {
                let half = delay / 2;
                if half == 0 {
                    delay
                } else {
                    half + rand::thread_rng().gen_range(0..=half)
                }
            }
        };

        Duration::from_millis(jittered)
    }
}

/// Classifies errors for the retry combinator.
pub trait Retryable {
    /// Returns true if another attempt may succeed.
    fn is_retryable(&self) -> bool;
}

impl Retryable for PassError {
    fn is_retryable(&self) -> bool {
        PassError::is_retryable(self)
    }
}

/// State tracking for one retried operation.
#[derive(Debug, Default)]
pub struct RetryState {
    /// Retries performed so far.
    pub attempt: usize,
}

impl RetryState {
    /// Creates a new retry state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if retries are exhausted.
    #[must_use]
    pub fn is_exhausted(&self, policy: &RetryPolicy) -> bool {
        self.attempt >= policy.max_retries
    }
}

/// Outcome of a retry decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry(Duration),
    /// No more retries, give up.
    GiveUp,
    /// Don't retry, the error is not retryable.
    NotRetryable,
}

/// Decides whether to retry after a failure.
#[must_use]
pub fn should_retry<E: Retryable>(
    state: &mut RetryState,
    policy: &RetryPolicy,
    error: &E,
) -> RetryDecision {
    if !error.is_retryable() {
        return RetryDecision::NotRetryable;
    }
    if state.is_exhausted(policy) {
        return RetryDecision::GiveUp;
    }
    let delay = policy.delay_for(state.attempt);
    state.attempt += 1;
    RetryDecision::Retry(delay)
}

/// A successful result and the retries it took.
#[derive(Debug, Clone, PartialEq)]
pub struct Retried<T> {
    /// The value.
    pub value: T,
    /// Retries used before success.
    pub retry_count: usize,
}

/// The final error once retries are exhausted or the error is terminal.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryExhausted<E> {
    /// The error of the last attempt.
    pub error: E,
    /// Attempts made, including the first.
    pub attempts: usize,
}

/// Details handed to the retry observer before sleeping.
#[derive(Debug)]
pub struct RetryNotice<'a, E> {
    /// The retry about to run (1-based).
    pub attempt: usize,
    /// Backoff before it runs.
    pub delay: Duration,
    /// The error that triggered it.
    pub error: &'a E,
}

/// Executes an operation with retry logic.
///
/// `operation` receives the zero-based attempt index.
pub async fn with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    key: &str,
    operation: F,
) -> Result<Retried<T>, RetryExhausted<E>>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display + Retryable,
{
    with_retry_observed(policy, key, operation, |_| {}).await
}

/// Like [`with_retry`], calling `on_retry` before every backoff sleep.
pub async fn with_retry_observed<T, E, F, Fut, O>(
    policy: &RetryPolicy,
    key: &str,
    mut operation: F,
    mut on_retry: O,
) -> Result<Retried<T>, RetryExhausted<E>>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display + Retryable,
    O: FnMut(&RetryNotice<'_, E>),
{
    let mut state = RetryState::new();

    loop {
        let attempt = state.attempt;
        match operation(attempt).await {
            Ok(value) => {
                return Ok(Retried {
                    value,
                    retry_count: attempt,
                })
            }
            Err(error) => match should_retry(&mut state, policy, &error) {
                RetryDecision::Retry(delay) => {
                    tracing::debug!(
                        key = %key,
                        attempt = state.attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %error,
                        "Retrying after error"
                    );
                    on_retry(&RetryNotice {
                        attempt: state.attempt,
                        delay,
                        error: &error,
                    });
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::GiveUp | RetryDecision::NotRetryable => {
                    return Err(RetryExhausted {
                        error,
                        attempts: attempt + 1,
                    });
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn transport() -> PassError {
        PassError::Transport("connection reset".into())
    }

    #[test]
    fn test_policy_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, MAX_RETRIES);
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(policy.base_delay_ms, 1000);
        assert_eq!(policy.backoff, BackoffStrategy::Exponential);
        assert_eq!(policy.jitter, JitterStrategy::None);
    }

    #[test]
    fn test_exponential_delays() {
        let policy = RetryPolicy::new().with_base_delay_ms(100);
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
    }

    #[test]
    fn test_linear_and_constant_delays() {
        let linear = RetryPolicy::new()
            .with_base_delay_ms(100)
            .with_backoff(BackoffStrategy::Linear);
        assert_eq!(linear.delay_for(2), Duration::from_millis(300));

        let constant = RetryPolicy::new()
            .with_base_delay_ms(100)
            .with_backoff(BackoffStrategy::Constant);
        assert_eq!(constant.delay_for(5), Duration::from_millis(100));
    }

    #[test]
    fn test_delay_capped_at_max() {
        let policy = RetryPolicy::new()
            .with_base_delay_ms(1000)
            .with_max_delay_ms(5000);
        assert_eq!(policy.delay_for(10), Duration::from_millis(5000));
    }

    #[test]
    fn test_full_jitter_within_bounds() {
        let policy = RetryPolicy::new()
            .with_base_delay_ms(100)
            .with_jitter(JitterStrategy::Full);
        for _ in 0..50 {
            assert!(policy.delay_for(1) <= Duration::from_millis(200));
        }
    }

    #[test]
    fn test_should_retry_not_retryable() {
        let mut state = RetryState::new();
        let decision = should_retry(&mut state, &RetryPolicy::new(), &PassError::Prompt("x".into()));
        assert_eq!(decision, RetryDecision::NotRetryable);
        assert_eq!(state.attempt, 0);
    }

    #[tokio::test]
    async fn test_success_after_max_retries_failures() {
        let calls = AtomicUsize::new(0);
        let result = with_retry(&RetryPolicy::immediate(), "t", |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < MAX_RETRIES {
                    Err(transport())
                } else {
                    Ok("done")
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(result.value, "done");
        assert_eq!(result.retry_count, MAX_RETRIES);
        assert_eq!(calls.load(Ordering::SeqCst), MAX_RETRIES + 1);
    }

    #[tokio::test]
    async fn test_failure_after_max_retries_plus_one() {
        let calls = AtomicUsize::new(0);
        let result: Result<Retried<()>, _> = with_retry(&RetryPolicy::immediate(), "t", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(transport()) }
        })
        .await;

        let exhausted = result.unwrap_err();
        assert_eq!(exhausted.attempts, MAX_RETRIES + 1);
        assert_eq!(exhausted.error, transport());
        assert_eq!(calls.load(Ordering::SeqCst), MAX_RETRIES + 1);
    }

    #[tokio::test]
    async fn test_non_retryable_stops_immediately() {
        let calls = AtomicUsize::new(0);
        let result: Result<Retried<()>, _> = with_retry(&RetryPolicy::immediate(), "t", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(PassError::Prompt("bad template".into())) }
        })
        .await;

        assert_eq!(result.unwrap_err().attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_observer_sees_each_retry_with_backoff() {
        let policy = RetryPolicy::new().with_base_delay_ms(1);
        let mut seen = Vec::new();
        let _ = with_retry_observed(
            &policy,
            "t",
            |attempt| async move {
                if attempt < 2 {
                    Err(transport())
                } else {
                    Ok(())
                }
            },
            |notice| seen.push((notice.attempt, notice.delay)),
        )
        .await;

        assert_eq!(
            seen,
            vec![(1, Duration::from_millis(1)), (2, Duration::from_millis(2))]
        );
    }
}
