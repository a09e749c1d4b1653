//! Bounded retry state machine shared by every remote call.
//!
//! A logical request moves through four states:
//!
//! - `Attempting` - the operation is in flight
//! - `RateLimitWaiting` - the server asked us to slow down; sleep until the
//!   advertised reset time (or a fixed fallback) and try again
//! - `Succeeded` / `Failed` - terminal
//!
//! Ordinary transient failures consume the attempt budget and are retried
//! using the delays of a `backon` constant backoff (zero by default, i.e.
//! immediately). Rate-limit waits do not consume the attempt budget; they
//! have their own ceiling so a server that never recovers still terminates.

use std::future::Future;
use std::time::Duration;

use backon::{BackoffBuilder, ConstantBuilder};
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::error::short_error_message;
use crate::sync::{ProgressCallback, SyncProgress, emit};

/// Default number of attempts for one logical request.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 4;

/// Sleep used when a rate-limit response carries no reset hint.
pub const RATE_LIMIT_FALLBACK_MS: u64 = 10_000;

/// Added on top of the advertised reset time.
pub const RATE_LIMIT_PADDING_MS: u64 = 100;

/// Default ceiling on rate-limit waits for one logical request.
pub const DEFAULT_MAX_RATE_LIMIT_WAITS: u32 = 8;

/// How a failed attempt should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// Retry immediately (subject to the attempt budget).
    Transient,
    /// Sleep until `reset_at` (or the fallback), then retry.
    RateLimited { reset_at: Option<DateTime<Utc>> },
    /// Never retry.
    Fatal,
}

/// Errors that can be classified for retrying.
pub trait ClassifyFailure {
    fn failure(&self) -> Failure;
}

/// Terminal outcome of a retried operation.
#[derive(Debug, Error)]
pub enum RetryError<E>
where
    E: std::error::Error + 'static,
{
    /// Attempt budget exhausted; carries the last failure.
    #[error("{source} (gave up after {attempts} attempts)")]
    Exhausted {
        attempts: u32,
        #[source]
        source: E,
    },

    /// Too many rate-limit waits in a single logical request.
    #[error("{source} (still rate limited after {waits} waits)")]
    RateLimitExhausted {
        waits: u32,
        #[source]
        source: E,
    },

    /// Failure that is never retried.
    #[error(transparent)]
    Fatal(E),
}

impl<E> RetryError<E>
where
    E: std::error::Error + 'static,
{
    /// The underlying failure.
    pub fn inner(&self) -> &E {
        match self {
            Self::Exhausted { source, .. } | Self::RateLimitExhausted { source, .. } => source,
            Self::Fatal(source) => source,
        }
    }

    /// Consume and return the underlying failure.
    pub fn into_inner(self) -> E {
        match self {
            Self::Exhausted { source, .. } | Self::RateLimitExhausted { source, .. } => source,
            Self::Fatal(source) => source,
        }
    }
}

/// Configuration for retry operations.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (the first try counts).
    pub max_attempts: u32,
    /// Delay between ordinary retries.
    pub retry_delay: Duration,
    /// Sleep used when a rate-limit response has no reset hint.
    pub rate_limit_fallback: Duration,
    /// Added to the advertised reset time.
    pub rate_limit_padding: Duration,
    /// Maximum rate-limit waits before giving up.
    pub max_rate_limit_waits: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay: Duration::ZERO,
            rate_limit_fallback: Duration::from_millis(RATE_LIMIT_FALLBACK_MS),
            rate_limit_padding: Duration::from_millis(RATE_LIMIT_PADDING_MS),
            max_rate_limit_waits: DEFAULT_MAX_RATE_LIMIT_WAITS,
        }
    }
}

impl RetryConfig {
    /// Create a configuration with a custom attempt ceiling.
    ///
    /// A ceiling of zero is treated as one attempt.
    #[must_use]
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Set the delay between ordinary retries.
    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Set the rate-limit wait ceiling.
    #[must_use]
    pub fn with_max_rate_limit_waits(mut self, waits: u32) -> Self {
        self.max_rate_limit_waits = waits;
        self
    }

    /// Build the delay sequence for ordinary retries.
    ///
    /// Yields `max_attempts - 1` delays, one per retry.
    #[must_use]
    pub fn into_backoff(self) -> ConstantBuilder {
        ConstantBuilder::default()
            .with_delay(self.retry_delay)
            .with_max_times(self.max_attempts.saturating_sub(1) as usize)
    }

    /// How long to sleep for a rate-limit response.
    ///
    /// `reset_at - now + padding`, clamped at zero, or the fallback when the
    /// server gave no hint.
    #[must_use]
    pub fn rate_limit_sleep(
        &self,
        reset_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Duration {
        match reset_at {
            Some(reset_at) => {
                let until_reset = (reset_at - now).num_milliseconds();
                let padded = until_reset + self.rate_limit_padding.as_millis() as i64;
                Duration::from_millis(padded.max(0) as u64)
            }
            None => self.rate_limit_fallback,
        }
    }
}

enum RetryState<T, E>
where
    E: std::error::Error + 'static,
{
    Attempting,
    RateLimitWaiting { sleep: Duration, error: E },
    Succeeded(T),
    Failed(RetryError<E>),
}

/// Run `operation` until it succeeds or the retry budget is spent.
///
/// # Arguments
///
/// * `config` - Attempt ceiling and rate-limit policy.
/// * `operation_name` - Label used in logs and progress events.
/// * `operation` - Closure producing one attempt.
/// * `on_progress` - Optional callback for retry / back-off events.
///
/// # Example
///
/// ```ignore
/// use silosync::retry::{RetryConfig, with_retry};
///
/// let data =
///     with_retry(&RetryConfig::default(), "DataSilos", || client.post_once(&body), None).await?;
/// ```
pub async fn with_retry<T, E, F, Fut>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
    on_progress: Option<&ProgressCallback>,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: ClassifyFailure + std::error::Error + 'static,
{
    let max_attempts = config.max_attempts.max(1);
    let mut delays = config.clone().into_backoff().build();
    let mut attempt: u32 = 1;
    let mut waits: u32 = 0;
    let mut state = RetryState::Attempting;

    loop {
        state = match state {
            RetryState::Attempting => match operation().await {
                Ok(value) => RetryState::Succeeded(value),
                Err(error) => match error.failure() {
                    Failure::Fatal => RetryState::Failed(RetryError::Fatal(error)),
                    Failure::RateLimited { reset_at } => {
                        if waits >= config.max_rate_limit_waits {
                            RetryState::Failed(RetryError::RateLimitExhausted {
                                waits,
                                source: error,
                            })
                        } else {
                            RetryState::RateLimitWaiting {
                                sleep: config.rate_limit_sleep(reset_at, Utc::now()),
                                error,
                            }
                        }
                    }
                    Failure::Transient => {
                        if attempt < max_attempts
                            && let Some(delay) = delays.next()
                        {
                            let message = short_error_message(&error);
                            tracing::warn!(
                                operation = operation_name,
                                attempt,
                                max_attempts,
                                "Request failed: {}. Retrying {}/{}...",
                                message,
                                attempt,
                                max_attempts - 1
                            );
                            emit(
                                on_progress,
                                SyncProgress::RequestRetry {
                                    operation: operation_name.to_string(),
                                    attempt,
                                    max_attempts,
                                    error: message,
                                },
                            );
                            if !delay.is_zero() {
                                tokio::time::sleep(delay).await;
                            }
                            attempt += 1;
                            RetryState::Attempting
                        } else {
                            RetryState::Failed(RetryError::Exhausted {
                                attempts: attempt,
                                source: error,
                            })
                        }
                    }
                },
            },
            RetryState::RateLimitWaiting { sleep, error } => {
                waits += 1;
                let retry_after_ms = sleep.as_millis() as u64;
                tracing::warn!(
                    operation = operation_name,
                    retry_after_ms,
                    wait = waits,
                    "Detected rate limit: {}. Sleeping for {}ms",
                    short_error_message(&error),
                    retry_after_ms
                );
                emit(
                    on_progress,
                    SyncProgress::RateLimitBackoff {
                        operation: operation_name.to_string(),
                        retry_after_ms,
                        wait: waits,
                    },
                );
                tokio::time::sleep(sleep).await;
                RetryState::Attempting
            }
            RetryState::Succeeded(value) => return Ok(value),
            RetryState::Failed(error) => return Err(error),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone)]
    struct TestError {
        message: &'static str,
        failure: Failure,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", self.message)
        }
    }

    impl std::error::Error for TestError {}

    impl ClassifyFailure for TestError {
        fn failure(&self) -> Failure {
            self.failure
        }
    }

    fn transient(message: &'static str) -> TestError {
        TestError {
            message,
            failure: Failure::Transient,
        }
    }

    fn rate_limited(reset_at: Option<DateTime<Utc>>) -> TestError {
        TestError {
            message: "Client error: Too many requests",
            failure: Failure::RateLimited { reset_at },
        }
    }

    #[test]
    fn test_retry_config_default() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert_eq!(config.retry_delay, Duration::ZERO);
        assert_eq!(
            config.rate_limit_fallback,
            Duration::from_millis(RATE_LIMIT_FALLBACK_MS)
        );
        assert_eq!(config.max_rate_limit_waits, DEFAULT_MAX_RATE_LIMIT_WAITS);
    }

    #[test]
    fn test_retry_config_zero_attempts_means_one() {
        assert_eq!(RetryConfig::new(0).max_attempts, 1);
    }

    #[test]
    fn test_backoff_yields_one_delay_per_retry() {
        let delays: Vec<Duration> = RetryConfig::new(4).into_backoff().build().collect();
        assert_eq!(delays, vec![Duration::ZERO; 3]);
    }

    #[test]
    fn test_rate_limit_sleep_uses_reset_hint_plus_padding() {
        let config = RetryConfig::default();
        let now = Utc::now();
        let reset = now + chrono::Duration::milliseconds(500);
        assert_eq!(
            config.rate_limit_sleep(Some(reset), now),
            Duration::from_millis(600)
        );
    }

    #[test]
    fn test_rate_limit_sleep_clamps_past_reset_to_zero() {
        let config = RetryConfig::default();
        let now = Utc::now();
        let reset = now - chrono::Duration::seconds(5);
        assert_eq!(config.rate_limit_sleep(Some(reset), now), Duration::ZERO);
    }

    #[test]
    fn test_rate_limit_sleep_falls_back_without_hint() {
        let config = RetryConfig::default();
        assert_eq!(
            config.rate_limit_sleep(None, Utc::now()),
            Duration::from_millis(10_000)
        );
    }

    #[tokio::test]
    async fn with_retry_recovers_from_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = with_retry(
            &RetryConfig::default(),
            "Test",
            || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 { Err(transient("boom")) } else { Ok(7u32) }
            },
            None,
        )
        .await;

        assert_eq!(result.expect("should recover"), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn with_retry_gives_up_after_max_attempts_and_keeps_message() {
        let calls = AtomicU32::new(0);
        let err = with_retry(
            &RetryConfig::new(4),
            "Test",
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(transient("upstream exploded"))
            },
            None,
        )
        .await
        .expect_err("should exhaust");

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(matches!(err, RetryError::Exhausted { attempts: 4, .. }));
        assert!(err.to_string().contains("upstream exploded"));
        assert_eq!(err.inner().message, "upstream exploded");
    }

    #[tokio::test]
    async fn with_retry_does_not_retry_fatal_errors() {
        let calls = AtomicU32::new(0);
        let err = with_retry(
            &RetryConfig::default(),
            "Test",
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(TestError {
                    message: "bad payload",
                    failure: Failure::Fatal,
                })
            },
            None,
        )
        .await
        .expect_err("fatal");

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(err.to_string(), "bad payload");
    }

    #[tokio::test(start_paused = true)]
    async fn with_retry_sleeps_until_rate_limit_reset() {
        let calls = AtomicU32::new(0);
        let reset_at = Utc::now() + chrono::Duration::milliseconds(500);
        let start = tokio::time::Instant::now();

        let result = with_retry(
            &RetryConfig::default(),
            "Test",
            || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    Err(rate_limited(Some(reset_at)))
                } else {
                    Ok("done")
                }
            },
            None,
        )
        .await;

        let elapsed = start.elapsed();
        assert_eq!(result.expect("should succeed"), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(elapsed >= Duration::from_millis(500), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(1500), "elapsed {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn with_retry_uses_fallback_sleep_without_reset_hint() {
        let calls = AtomicU32::new(0);
        let start = tokio::time::Instant::now();

        let result = with_retry(
            &RetryConfig::default(),
            "Test",
            || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n == 0 { Err(rate_limited(None)) } else { Ok(()) }
            },
            None,
        )
        .await;

        assert!(result.is_ok());
        assert!(start.elapsed() >= Duration::from_millis(RATE_LIMIT_FALLBACK_MS));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_waits_do_not_consume_attempts() {
        let calls = AtomicU32::new(0);
        // One attempt allowed, but three rate-limit waits in front of it.
        let result = with_retry(
            &RetryConfig::new(1),
            "Test",
            || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 3 { Err(rate_limited(None)) } else { Ok(n) }
            },
            None,
        )
        .await;

        assert_eq!(result.expect("should succeed"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_waits_are_bounded() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig::default().with_max_rate_limit_waits(2);
        let err = with_retry(
            &config,
            "Test",
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(rate_limited(None))
            },
            None,
        )
        .await
        .expect_err("should give up");

        assert!(matches!(err, RetryError::RateLimitExhausted { waits: 2, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn with_retry_emits_progress_for_retries_and_waits() {
        let events: Arc<Mutex<Vec<SyncProgress>>> = Arc::new(Mutex::new(Vec::new()));
        let capture = Arc::clone(&events);
        let callback: ProgressCallback = Box::new(move |event| {
            capture
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(event);
        });

        let calls = AtomicU32::new(0);
        let result = with_retry(
            &RetryConfig::default(),
            "DataSilos",
            || async {
                match calls.fetch_add(1, Ordering::SeqCst) {
                    0 => Err(transient("reset by peer")),
                    1 => Err(rate_limited(None)),
                    _ => Ok(()),
                }
            },
            Some(&callback),
        )
        .await;
        assert!(result.is_ok());

        let events = events.lock().unwrap_or_else(|e| e.into_inner());
        assert!(events.iter().any(|e| matches!(
            e,
            SyncProgress::RequestRetry { attempt: 1, max_attempts: 4, .. }
        )));
        assert!(events.iter().any(|e| matches!(
            e,
            SyncProgress::RateLimitBackoff { retry_after_ms: 10_000, wait: 1, .. }
        )));
    }
}
