//! Retry logic.
//!
//! # Responsibilities
//! - Decide whether a failure is worth another attempt
//! - Execute retries with exponential backoff + jitter
//! - Return the final error unchanged once attempts run out
//!
//! The operation handed to the policy is the breaker-guarded call, so a
//! breaker fast-fail still consumes an attempt without touching the network.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::pipeline::error::ApiError;
use crate::resilience::backoff::calculate_backoff;

/// Decides whether an error may be retried.
pub type RetryPredicate<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// Default predicate: network failures, timeouts, HTTP 5xx and 429.
///
/// Classification already folded those into `ApiError::retryable`.
pub fn default_retryable(error: &ApiError) -> bool {
    error.retryable
}

/// Bounded retry with exponential backoff.
#[derive(Clone)]
pub struct RetryPolicy<E = ApiError> {
    config: RetryConfig,
    retryable: RetryPredicate<E>,
}

impl RetryPolicy<ApiError> {
    pub fn new(config: RetryConfig) -> Self {
        Self::with_predicate(config, default_retryable)
    }
}

impl<E> RetryPolicy<E> {
    pub fn with_predicate<P>(config: RetryConfig, predicate: P) -> Self
    where
        P: Fn(&E) -> bool + Send + Sync + 'static,
    {
        Self {
            config,
            retryable: Arc::new(predicate),
        }
    }

    /// Same predicate, single attempt.
    pub fn without_retries(&self) -> Self {
        let mut config = self.config.clone();
        config.enabled = false;
        Self {
            config,
            retryable: self.retryable.clone(),
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Attempts including the first; 1 when retries are disabled.
    pub fn max_attempts(&self) -> u32 {
        if self.config.enabled {
            self.config.max_attempts.max(1)
        } else {
            1
        }
    }

    pub async fn execute<T, F, Fut>(&self, op: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_with(op, |_, _, _| {}).await
    }

    /// Run `op` (given the 1-based attempt number) until it succeeds, fails
    /// with a non-retryable error, or attempts run out.
    ///
    /// `on_retry(next_attempt, error, delay)` fires before each backoff sleep.
    pub async fn execute_with<T, F, Fut, R>(&self, mut op: F, mut on_retry: R) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: FnMut(u32, &E, Duration),
    {
        let max_attempts = self.max_attempts();
        let mut attempt = 1;

        loop {
            let delay = match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    if attempt >= max_attempts || !(self.retryable)(&error) {
                        return Err(error);
                    }
                    let delay = calculate_backoff(&self.config, attempt + 1);
                    on_retry(attempt + 1, &error, delay);
                    delay
                }
            };

            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

/// One-shot helper: retry `op` under `config` with the default predicate.
pub async fn with_retry<T, F, Fut, R>(op: F, config: &RetryConfig, on_retry: R) -> Result<T, ApiError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
    R: FnMut(u32, &ApiError, Duration),
{
    RetryPolicy::new(config.clone()).execute_with(op, on_retry).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::error::ErrorCode;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn config() -> RetryConfig {
        RetryConfig {
            enabled: true,
            max_attempts: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }

    fn upstream_down() -> ApiError {
        ApiError::from_status(503, "down", "crm", "list_contacts")
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_return_original_error() {
        let calls = AtomicU32::new(0);
        let mut delays = Vec::new();
        let start = Instant::now();

        let result: Result<(), ApiError> = with_retry(
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(upstream_down()) }
            },
            &config(),
            |attempt, _, delay| delays.push((attempt, delay)),
        )
        .await;

        assert_eq!(result.unwrap_err(), upstream_down());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(delays.len(), 2);
        assert_eq!(delays[0].0, 2);
        assert!((1800..=2200).contains(&delays[0].1.as_millis()));
        assert_eq!(delays[1].0, 3);
        assert!((3600..=4400).contains(&delays[1].1.as_millis()));
        assert!(start.elapsed() >= Duration::from_millis(5400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_fails_immediately() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(config());

        let result: Result<(), ApiError> = policy
            .execute(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ApiError::from_status(404, "gone", "crm", "get_contact")) }
            })
            .await;

        assert_eq!(result.unwrap_err().code, ErrorCode::NotFound);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failure() {
        let policy = RetryPolicy::new(config());
        let result = policy
            .execute(|attempt| async move {
                if attempt < 3 {
                    Err(ApiError::new(ErrorCode::NetworkError, "reset", "crm", "list"))
                } else {
                    Ok(attempt)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_policy_makes_one_attempt() {
        let mut config = config();
        config.enabled = false;
        let calls = AtomicU32::new(0);

        let result: Result<(), ApiError> = RetryPolicy::new(config)
            .execute(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(upstream_down()) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_predicate() {
        let policy: RetryPolicy<String> =
            RetryPolicy::with_predicate(config(), |e: &String| e.as_str() == "again");
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = policy
            .execute(|_| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err("again".to_string())
                    } else {
                        Err("stop".to_string())
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap_err(), "stop");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
