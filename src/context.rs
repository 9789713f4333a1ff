//! Gateway context.
//!
//! All shared state (provider registry, rate limiter, circuit breakers,
//! response caches, token manager, HTTP client) is built once from the config
//! and handed to the pipeline and HTTP surfaces explicitly.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::auth::{CredentialStore, TokenManager, TokenSettings};
use crate::cache::{CacheManager, CacheStats};
use crate::config::GatewayConfig;
use crate::pipeline::response::ApiResponse;
use crate::providers::{ProviderRegistry, RegistryError};
use crate::resilience::{CircuitBreakerManager, CircuitStatus};
use crate::security::{BucketStatus, RateLimiter};

#[derive(Debug, Error)]
pub enum ContextError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Shared state for every outbound call.
pub struct GatewayContext {
    pub config: GatewayConfig,
    pub registry: Arc<ProviderRegistry>,
    pub limiter: RateLimiter,
    pub breakers: CircuitBreakerManager,
    pub caches: CacheManager<ApiResponse>,
    pub tokens: TokenManager,
    pub client: reqwest::Client,
}

/// Aggregate snapshot for monitoring.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayStatus {
    pub providers: Vec<String>,
    pub rate_limits: BTreeMap<String, BucketStatus>,
    pub circuits: BTreeMap<String, CircuitStatus>,
    pub caches: BTreeMap<String, CacheStats>,
    pub cached_tokens: usize,
}

impl GatewayContext {
    pub fn from_config(config: GatewayConfig, store: Arc<dyn CredentialStore>) -> Result<Self, ContextError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(config.timeouts.connect_ms))
            .build()?;

        let registry = Arc::new(ProviderRegistry::from_configs(&config.providers)?);
        let limiter = RateLimiter::new();
        let breakers = CircuitBreakerManager::new(config.circuit_breaker);
        let caches = CacheManager::new();

        for provider in &config.providers {
            limiter.configure(&provider.name, provider.rate_limit);
            if let Some(overrides) = provider.circuit_breaker {
                breakers.configure_provider(&provider.name, overrides, None);
            }
            caches.configure(
                &provider.name,
                Duration::from_millis(provider.cache.ttl_ms.unwrap_or(config.cache.ttl_ms)),
                provider.cache.max_size.unwrap_or(config.cache.max_size),
                provider.cache.key_prefix.as_deref().unwrap_or(&provider.name),
            );
        }

        let tokens = TokenManager::new(
            registry.clone(),
            store,
            client.clone(),
            TokenSettings {
                expiry_buffer: Duration::from_secs(config.tokens.expiry_buffer_secs),
                refresh_timeout: Duration::from_millis(config.timeouts.token_refresh_ms),
            },
        );

        tracing::info!(providers = registry.len(), "Gateway context initialized");

        Ok(Self {
            config,
            registry,
            limiter,
            breakers,
            caches,
            tokens,
            client,
        })
    }

    pub fn status(&self) -> GatewayStatus {
        GatewayStatus {
            providers: self.registry.names(),
            rate_limits: self.limiter.status(),
            circuits: self.breakers.status(),
            caches: self.caches.stats(),
            cached_tokens: self.tokens.cached_count(),
        }
    }
}
