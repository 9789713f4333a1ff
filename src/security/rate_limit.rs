//! Per-key token-bucket admission control for outbound calls.
//!
//! Each `(provider, key)` pair owns a bucket. Callers that find tokens
//! available and nobody waiting are admitted immediately; everyone else joins
//! a FIFO queue drained by a single scheduler task per bucket.

use dashmap::DashMap;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::config::RateLimitConfig;
use crate::observability::metrics;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RateLimitError {
    /// No limits were configured for this provider.
    #[error("no rate limit configured for provider '{0}'")]
    UnknownProvider(String),
}

/// A token bucket refilled from elapsed time.
#[derive(Debug, Clone)]
pub(crate) struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
    max_tokens: f64,
    refill_per_ms: f64,
}

impl TokenBucket {
    pub(crate) fn new(config: &RateLimitConfig) -> Self {
        let max_tokens = config.max_burst.unwrap_or(config.max_requests) as f64;
        Self {
            tokens: max_tokens,
            last_refill: Instant::now(),
            max_tokens,
            refill_per_ms: config.max_requests as f64 / config.window_ms.max(1) as f64,
        }
    }

    pub(crate) fn refill(&mut self, now: Instant) {
        let elapsed_ms = now.saturating_duration_since(self.last_refill).as_secs_f64() * 1000.0;
        self.tokens = (self.tokens + elapsed_ms * self.refill_per_ms).min(self.max_tokens);
        self.last_refill = now;
    }

    pub(crate) fn try_take(&mut self) -> bool {
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Time until one whole token will be available.
    pub(crate) fn time_to_next_token(&self) -> Duration {
        if self.tokens >= 1.0 || self.refill_per_ms <= 0.0 {
            return Duration::ZERO;
        }
        let ms = (1.0 - self.tokens) / self.refill_per_ms;
        Duration::from_micros((ms * 1000.0).ceil() as u64)
    }

    pub(crate) fn tokens(&self) -> f64 {
        self.tokens
    }
}

struct BucketState {
    bucket: TokenBucket,
    waiters: VecDeque<oneshot::Sender<()>>,
    draining: bool,
}

struct Bucket {
    provider: String,
    state: Mutex<BucketState>,
}

impl Bucket {
    fn lock(&self) -> MutexGuard<'_, BucketState> {
        // Nothing panics while the lock is held; recover the data if it ever does.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Release queued waiters in arrival order as tokens accumulate.
    async fn drain(self: Arc<Self>) {
        loop {
            let wait = {
                let mut state = self.lock();
                state.bucket.refill(Instant::now());
                while !state.waiters.is_empty() && state.bucket.try_take() {
                    if let Some(waiter) = state.waiters.pop_front() {
                        // An abandoned waiter still spends the slot it was granted.
                        let _ = waiter.send(());
                    }
                }
                if state.waiters.is_empty() {
                    state.draining = false;
                    return;
                }
                state.bucket.time_to_next_token()
            };
            tokio::time::sleep(wait.max(Duration::from_millis(1))).await;
        }
    }
}

/// Snapshot of one bucket for monitoring.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BucketStatus {
    pub provider: String,
    pub available_tokens: u64,
    pub max_tokens: u64,
    pub queue_depth: usize,
}

/// Rate limiter keyed by provider and caller-chosen key (usually the user id).
pub struct RateLimiter {
    configs: DashMap<String, RateLimitConfig>,
    buckets: DashMap<String, Arc<Bucket>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            configs: DashMap::new(),
            buckets: DashMap::new(),
        }
    }

    /// Register (or replace) the limits for a provider.
    ///
    /// Existing buckets keep their old parameters until the process restarts.
    pub fn configure(&self, provider: &str, config: RateLimitConfig) {
        self.configs.insert(provider.to_string(), config);
    }

    pub fn is_configured(&self, provider: &str) -> bool {
        self.configs.contains_key(provider)
    }

    fn bucket(&self, provider: &str, key: &str) -> Result<Arc<Bucket>, RateLimitError> {
        let bucket_key = format!("{}:{}", provider, key);
        if let Some(bucket) = self.buckets.get(&bucket_key) {
            return Ok(bucket.clone());
        }
        let config = *self
            .configs
            .get(provider)
            .ok_or_else(|| RateLimitError::UnknownProvider(provider.to_string()))?;
        let bucket = self
            .buckets
            .entry(bucket_key)
            .or_insert_with(|| {
                Arc::new(Bucket {
                    provider: provider.to_string(),
                    state: Mutex::new(BucketState {
                        bucket: TokenBucket::new(&config),
                        waiters: VecDeque::new(),
                        draining: false,
                    }),
                })
            })
            .clone();
        Ok(bucket)
    }

    /// Wait until a token is available for `(provider, key)` and take it.
    ///
    /// There is no cancellation: a caller dropped while queued still consumes
    /// the slot it would have been granted.
    pub async fn acquire(&self, provider: &str, key: &str) -> Result<(), RateLimitError> {
        let bucket = self.bucket(provider, key)?;

        let receiver = {
            let mut state = bucket.lock();
            state.bucket.refill(Instant::now());
            if state.waiters.is_empty() && state.bucket.try_take() {
                return Ok(());
            }

            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(tx);
            if !state.draining {
                state.draining = true;
                tokio::spawn(bucket.clone().drain());
            }
            rx
        };

        metrics::record_rate_limit_wait(provider);
        tracing::debug!(provider = %provider, key = %key, "Rate limit reached, queued for a slot");

        // The drainer never drops a sender without sending.
        let _ = receiver.await;
        Ok(())
    }

    /// Available tokens (floored) and queue depth per `provider:key`.
    pub fn status(&self) -> BTreeMap<String, BucketStatus> {
        let now = Instant::now();
        self.buckets
            .iter()
            .map(|entry| {
                let mut state = entry.value().lock();
                state.bucket.refill(now);
                let status = BucketStatus {
                    provider: entry.value().provider.clone(),
                    available_tokens: state.bucket.tokens().floor() as u64,
                    max_tokens: state.bucket.max_tokens as u64,
                    queue_depth: state.waiters.len(),
                };
                (entry.key().clone(), status)
            })
            .collect()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
