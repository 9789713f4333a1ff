//! Configuration validation.
//!
//! Serde handles syntax; this module checks semantics and reports every
//! problem at once rather than stopping at the first.

use std::collections::HashSet;
use thiserror::Error;

use crate::config::schema::{AuthConfig, CircuitBreakerConfig, GatewayConfig, ProviderConfig};

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("provider name must not be empty")]
    EmptyProviderName,

    #[error("provider '{0}' is defined more than once")]
    DuplicateProvider(String),

    #[error("provider '{name}' has invalid base_url '{url}'")]
    InvalidBaseUrl { name: String, url: String },

    #[error("provider '{name}': {reason}")]
    InvalidRateLimit { name: String, reason: &'static str },

    #[error("{scope}: {reason}")]
    InvalidCircuitBreaker { scope: String, reason: &'static str },

    #[error("provider '{name}' has invalid token_url '{url}'")]
    InvalidTokenUrl { name: String, url: String },

    #[error("provider '{0}' api_key auth needs either `value` or `env`")]
    MissingApiKeySource(String),

    #[error("retries: {0}")]
    InvalidRetry(&'static str),

    #[error("timeouts: request_ms must be greater than zero")]
    ZeroRequestTimeout,

    #[error("cache: {0}")]
    InvalidCache(&'static str),

    #[error("invoke: api_keys must not contain empty keys")]
    EmptyInvokeKey,
}

/// Validate a parsed configuration.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.timeouts.request_ms == 0 {
        errors.push(ValidationError::ZeroRequestTimeout);
    }

    let retries = &config.retries;
    if retries.max_attempts == 0 {
        errors.push(ValidationError::InvalidRetry("max_attempts must be at least 1"));
    }
    if retries.backoff_multiplier < 1.0 {
        errors.push(ValidationError::InvalidRetry("backoff_multiplier must be >= 1.0"));
    }
    if !(0.0..=1.0).contains(&retries.jitter_factor) {
        errors.push(ValidationError::InvalidRetry("jitter_factor must be within [0, 1]"));
    }
    if retries.max_delay_ms < retries.initial_delay_ms {
        errors.push(ValidationError::InvalidRetry("max_delay_ms must be >= initial_delay_ms"));
    }

    if config.cache.max_size == 0 {
        errors.push(ValidationError::InvalidCache("max_size must be greater than zero"));
    }
    if config.cache.sweep_interval_secs == 0 {
        errors.push(ValidationError::InvalidCache("sweep_interval_secs must be greater than zero"));
    }

    if config.invoke.api_keys.iter().any(|k| k.is_empty()) {
        errors.push(ValidationError::EmptyInvokeKey);
    }

    check_breaker("circuit_breaker", &config.circuit_breaker, &mut errors);

    let mut seen = HashSet::new();
    for provider in &config.providers {
        if !seen.insert(provider.name.as_str()) {
            errors.push(ValidationError::DuplicateProvider(provider.name.clone()));
        }
        check_provider(provider, &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_provider(provider: &ProviderConfig, errors: &mut Vec<ValidationError>) {
    if provider.name.trim().is_empty() {
        errors.push(ValidationError::EmptyProviderName);
    }

    if url::Url::parse(&provider.base_url).is_err() {
        errors.push(ValidationError::InvalidBaseUrl {
            name: provider.name.clone(),
            url: provider.base_url.clone(),
        });
    }

    let limit = &provider.rate_limit;
    if limit.max_requests == 0 {
        errors.push(ValidationError::InvalidRateLimit {
            name: provider.name.clone(),
            reason: "rate_limit.max_requests must be greater than zero",
        });
    }
    if limit.window_ms == 0 {
        errors.push(ValidationError::InvalidRateLimit {
            name: provider.name.clone(),
            reason: "rate_limit.window_ms must be greater than zero",
        });
    }
    if limit.max_burst == Some(0) {
        errors.push(ValidationError::InvalidRateLimit {
            name: provider.name.clone(),
            reason: "rate_limit.max_burst must be greater than zero",
        });
    }

    if let Some(breaker) = &provider.circuit_breaker {
        check_breaker(&format!("provider '{}'", provider.name), breaker, errors);
    }

    match &provider.auth {
        AuthConfig::Oauth(oauth) => {
            if url::Url::parse(&oauth.token_url).is_err() {
                errors.push(ValidationError::InvalidTokenUrl {
                    name: provider.name.clone(),
                    url: oauth.token_url.clone(),
                });
            }
        }
        AuthConfig::ApiKey(key) => {
            if key.value.is_none() && key.env.is_none() {
                errors.push(ValidationError::MissingApiKeySource(provider.name.clone()));
            }
        }
        AuthConfig::None => {}
    }
}

fn check_breaker(scope: &str, breaker: &CircuitBreakerConfig, errors: &mut Vec<ValidationError>) {
    if breaker.failure_threshold == 0 {
        errors.push(ValidationError::InvalidCircuitBreaker {
            scope: scope.to_string(),
            reason: "failure_threshold must be at least 1",
        });
    }
    if breaker.success_threshold == 0 {
        errors.push(ValidationError::InvalidCircuitBreaker {
            scope: scope.to_string(),
            reason: "success_threshold must be at least 1",
        });
    }
}
