//! Circuit breaker for upstream protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: upstream assumed down, requests fail fast
//! - Half-Open: trial calls decide whether the upstream recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: total >= volume_threshold AND failures >= failure_threshold
//! Open → Half-Open: first call after timeout_ms
//! Half-Open → Closed: success_threshold consecutive successes
//! Half-Open → Open: any counted failure
//! ```
//!
//! Stats reset on every transition. One breaker per `provider:operation`.

use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;
use crate::observability::metrics;
use crate::pipeline::error::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Decides whether a failure counts against the breaker.
pub type ErrorFilter = Arc<dyn Fn(&ApiError) -> bool + Send + Sync>;

/// Network failures, timeouts and HTTP 5xx count; client errors do not.
pub fn default_error_filter(error: &ApiError) -> bool {
    error.counts_as_failure()
}

#[derive(Debug, Clone, Copy, Default)]
struct CircuitStats {
    failures: u32,
    successes: u32,
    total_requests: u32,
    consecutive_successes: u32,
    last_failure: Option<Instant>,
}

#[derive(Debug)]
struct Circuit {
    state: CircuitState,
    stats: CircuitStats,
    next_attempt_at: Option<Instant>,
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CircuitStatus {
    pub provider: String,
    pub operation: String,
    pub state: CircuitState,
    pub failures: u32,
    pub successes: u32,
    pub total_requests: u32,
    pub consecutive_successes: u32,
    /// Milliseconds until an open breaker admits a trial call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_in_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure_ms_ago: Option<u64>,
}

pub struct CircuitBreaker {
    key: String,
    provider: String,
    operation: String,
    config: CircuitBreakerConfig,
    filter: ErrorFilter,
    circuit: Mutex<Circuit>,
}

impl CircuitBreaker {
    pub fn new(provider: &str, operation: &str, config: CircuitBreakerConfig) -> Self {
        Self {
            key: format!("{}:{}", provider, operation),
            provider: provider.to_string(),
            operation: operation.to_string(),
            config,
            filter: Arc::new(default_error_filter),
            circuit: Mutex::new(Circuit {
                state: CircuitState::Closed,
                stats: CircuitStats::default(),
                next_attempt_at: None,
            }),
        }
    }

    pub fn with_error_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&ApiError) -> bool + Send + Sync + 'static,
    {
        self.filter = Arc::new(filter);
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, Circuit> {
        self.circuit.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Run `call` unless the breaker is open.
    ///
    /// An open breaker fails with [`ApiError::circuit_open`] without invoking
    /// `call` and without counting a request.
    pub async fn execute<T, F, Fut>(&self, call: F) -> Result<T, ApiError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        self.admit()?;
        match call().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(error) => {
                self.record_failure(&error);
                Err(error)
            }
        }
    }

    fn admit(&self) -> Result<(), ApiError> {
        let mut circuit = self.lock();
        if circuit.state != CircuitState::Open {
            return Ok(());
        }

        let now = Instant::now();
        let next_attempt_at = circuit.next_attempt_at;
        match next_attempt_at {
            Some(next) if now < next => Err(ApiError::circuit_open(
                &self.provider,
                &self.operation,
                next.duration_since(now),
            )),
            _ => {
                self.transition(&mut circuit, CircuitState::HalfOpen, now);
                Ok(())
            }
        }
    }

    fn record_success(&self) {
        let mut circuit = self.lock();
        circuit.stats.successes += 1;
        circuit.stats.total_requests += 1;
        circuit.stats.consecutive_successes += 1;

        if circuit.state == CircuitState::HalfOpen
            && circuit.stats.consecutive_successes >= self.config.success_threshold
        {
            self.transition(&mut circuit, CircuitState::Closed, Instant::now());
        }
    }

    fn record_failure(&self, error: &ApiError) {
        if !(self.filter)(error) {
            return;
        }

        let now = Instant::now();
        let mut circuit = self.lock();
        circuit.stats.failures += 1;
        circuit.stats.total_requests += 1;
        circuit.stats.last_failure = Some(now);
        circuit.stats.consecutive_successes = 0;

        let (state, stats) = (circuit.state, circuit.stats);
        match state {
            CircuitState::HalfOpen => self.transition(&mut circuit, CircuitState::Open, now),
            CircuitState::Closed
                if stats.total_requests >= self.config.volume_threshold
                    && stats.failures >= self.config.failure_threshold =>
            {
                self.transition(&mut circuit, CircuitState::Open, now)
            }
            _ => {}
        }
    }

    fn transition(&self, circuit: &mut Circuit, to: CircuitState, now: Instant) {
        let from = circuit.state;
        let last_failure = circuit.stats.last_failure;
        circuit.state = to;
        circuit.stats = CircuitStats::default();

        match to {
            CircuitState::Open => {
                circuit.stats.last_failure = last_failure;
                circuit.next_attempt_at = Some(now + Duration::from_millis(self.config.timeout_ms));
                tracing::warn!(
                    circuit = %self.key,
                    from = from.as_str(),
                    open_for_ms = self.config.timeout_ms,
                    "Circuit opened"
                );
            }
            CircuitState::HalfOpen => {
                circuit.next_attempt_at = None;
                tracing::info!(circuit = %self.key, "Circuit half-open, allowing trial calls");
            }
            CircuitState::Closed => {
                circuit.next_attempt_at = None;
                tracing::info!(circuit = %self.key, from = from.as_str(), "Circuit closed");
            }
        }
        metrics::record_circuit_transition(&self.key, to.as_str());
    }

    /// Force the breaker closed with fresh stats.
    pub fn reset(&self) {
        let mut circuit = self.lock();
        if circuit.state != CircuitState::Closed {
            self.transition(&mut circuit, CircuitState::Closed, Instant::now());
        } else {
            circuit.stats = CircuitStats::default();
        }
    }

    pub fn status(&self) -> CircuitStatus {
        let circuit = self.lock();
        let now = Instant::now();
        CircuitStatus {
            provider: self.provider.clone(),
            operation: self.operation.clone(),
            state: circuit.state,
            failures: circuit.stats.failures,
            successes: circuit.stats.successes,
            total_requests: circuit.stats.total_requests,
            consecutive_successes: circuit.stats.consecutive_successes,
            retry_in_ms: circuit
                .next_attempt_at
                .map(|next| next.saturating_duration_since(now).as_millis() as u64),
            last_failure_ms_ago: circuit
                .stats
                .last_failure
                .map(|at| now.saturating_duration_since(at).as_millis() as u64),
        }
    }
}

/// Lazily creates one breaker per `provider:operation`.
pub struct CircuitBreakerManager {
    defaults: CircuitBreakerConfig,
    provider_configs: DashMap<String, (CircuitBreakerConfig, Option<ErrorFilter>)>,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakerManager {
    pub fn new(defaults: CircuitBreakerConfig) -> Self {
        Self {
            defaults,
            provider_configs: DashMap::new(),
            breakers: DashMap::new(),
        }
    }

    /// Provider-specific thresholds, and optionally a failure filter, for
    /// breakers created from now on.
    pub fn configure_provider(&self, provider: &str, config: CircuitBreakerConfig, filter: Option<ErrorFilter>) {
        self.provider_configs.insert(provider.to_string(), (config, filter));
    }

    pub fn get(&self, provider: &str, operation: &str) -> Arc<CircuitBreaker> {
        let key = format!("{}:{}", provider, operation);
        if let Some(breaker) = self.breakers.get(&key) {
            return breaker.clone();
        }
        let (config, filter) = self
            .provider_configs
            .get(provider)
            .map(|entry| entry.value().clone())
            .unwrap_or((self.defaults, None));
        self.breakers
            .entry(key)
            .or_insert_with(|| {
                let mut breaker = CircuitBreaker::new(provider, operation, config);
                if let Some(filter) = filter {
                    breaker.filter = filter;
                }
                Arc::new(breaker)
            })
            .clone()
    }

    pub async fn execute<T, F, Fut>(&self, provider: &str, operation: &str, call: F) -> Result<T, ApiError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        self.get(provider, operation).execute(call).await
    }

    /// Reset one breaker by `provider:operation` key. Returns false if unknown.
    pub fn reset(&self, key: &str) -> bool {
        match self.breakers.get(key) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }

    pub fn reset_all(&self) {
        for breaker in self.breakers.iter() {
            breaker.reset();
        }
    }

    pub fn status(&self) -> BTreeMap<String, CircuitStatus> {
        self.breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().status()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 5,
            success_threshold: 2,
            timeout_ms: 60_000,
            volume_threshold: 10,
        }
    }

    fn server_error() -> ApiError {
        ApiError::from_status(500, "boom", "crm", "list")
    }

    async fn fail(breaker: &CircuitBreaker) {
        let _ = breaker.execute(|| async { Err::<(), _>(server_error()) }).await;
    }

    async fn succeed(breaker: &CircuitBreaker) {
        breaker.execute(|| async { Ok::<_, ApiError>(()) }).await.unwrap();
    }

    async fn trip(breaker: &CircuitBreaker) {
        for _ in 0..5 {
            succeed(breaker).await;
        }
        for _ in 0..5 {
            fail(breaker).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_volume_and_failures() {
        let breaker = CircuitBreaker::new("crm", "list", config());
        for _ in 0..5 {
            succeed(&breaker).await;
        }
        for _ in 0..4 {
            fail(&breaker).await;
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
        fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        let invoked = AtomicU32::new(0);
        tokio::time::advance(Duration::from_millis(59_999)).await;
        let err = breaker
            .execute(|| async {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ApiError>(())
            })
            .await
            .unwrap_err();
        assert!(err.is_circuit_open());
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
        assert_eq!(breaker.status().total_requests, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_below_volume_do_not_open() {
        let breaker = CircuitBreaker::new("crm", "list", config());
        for _ in 0..9 {
            fail(&breaker).await;
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
        fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_recovers_to_closed() {
        let breaker = CircuitBreaker::new("crm", "list", config());
        trip(&breaker).await;
        tokio::time::advance(Duration::from_millis(60_000)).await;

        let state_during_call = breaker
            .execute(|| async { Ok::<_, ApiError>(breaker.state()) })
            .await
            .unwrap();
        assert_eq!(state_during_call, CircuitState::HalfOpen);
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        succeed(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Closed);
        let status = breaker.status();
        assert_eq!(status.total_requests, 0);
        assert_eq!(status.failures, 0);
        assert_eq!(status.consecutive_successes, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let breaker = CircuitBreaker::new("crm", "list", config());
        trip(&breaker).await;
        tokio::time::advance(Duration::from_secs(61)).await;

        succeed(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.status().retry_in_ms.unwrap() > 59_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_errors_are_ignored() {
        let breaker = CircuitBreaker::new("crm", "list", config());
        for _ in 0..20 {
            let _ = breaker
                .execute(|| async { Err::<(), _>(ApiError::from_status(404, "missing", "crm", "list")) })
                .await;
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.status().total_requests, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_error_filter() {
        let breaker = CircuitBreaker::new("crm", "list", config()).with_error_filter(|_| true);
        for _ in 0..10 {
            let _ = breaker
                .execute(|| async { Err::<(), _>(ApiError::from_status(404, "missing", "crm", "list")) })
                .await;
        }
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manager_applies_provider_filter() {
        let manager = CircuitBreakerManager::new(config());
        let strict = CircuitBreakerConfig {
            failure_threshold: 1,
            success_threshold: 1,
            timeout_ms: 1_000,
            volume_threshold: 1,
        };
        // Count 429s against the breaker for this provider only.
        let rate_limited: ErrorFilter = Arc::new(|e: &ApiError| e.status == Some(429));
        manager.configure_provider("mail", strict, Some(rate_limited));
        manager.configure_provider("crm", strict, None);

        let throttled = || async { Err::<(), _>(ApiError::from_status(429, "slow down", "mail", "send")) };
        let _ = manager.execute("mail", "send", throttled).await;
        let _ = manager.execute("crm", "send", throttled).await;

        assert_eq!(manager.get("mail", "send").state(), CircuitState::Open);
        assert_eq!(manager.get("crm", "send").state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manager_keys_and_overrides() {
        let manager = CircuitBreakerManager::new(config());
        manager.configure_provider(
            "docs",
            CircuitBreakerConfig {
                failure_threshold: 1,
                success_threshold: 1,
                timeout_ms: 1_000,
                volume_threshold: 1,
            },
            None,
        );

        let list = manager.get("crm", "list");
        assert!(Arc::ptr_eq(&list, &manager.get("crm", "list")));
        assert_eq!(list.key(), "crm:list");

        let _ = manager
            .execute("docs", "upload", || async { Err::<(), _>(server_error()) })
            .await;
        let status = manager.status();
        assert_eq!(status["docs:upload"].state, CircuitState::Open);
        assert_eq!(status["crm:list"].state, CircuitState::Closed);

        assert!(manager.reset("docs:upload"));
        assert_eq!(manager.get("docs", "upload").state(), CircuitState::Closed);
        assert!(!manager.reset("docs:nope"));
    }
}
