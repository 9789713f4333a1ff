//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Root configuration for the integration gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener for the invoke and admin HTTP surfaces.
    pub listener: ListenerConfig,

    /// Outbound timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Retry configuration shared by every provider.
    pub retries: RetryConfig,

    /// Circuit breaker defaults, overridable per provider.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Response cache defaults and sweeper cadence.
    pub cache: CacheConfig,

    /// OAuth token handling.
    pub tokens: TokenConfig,

    /// Credential store settings.
    pub credentials: CredentialsConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Callers allowed to use `/v1/invoke`.
    pub invoke: InvokeConfig,

    #[serde(default)]
    pub admin: AdminConfig,

    /// Provider definitions (the static provider lookup table).
    pub providers: Vec<ProviderConfig>,
}

impl GatewayConfig {
    /// Look up a provider definition by name.
    pub fn provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.name == name)
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "127.0.0.1:8080").
    pub bind_address: String,

    /// Maximum accepted invoke body in bytes.
    pub max_body_size: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8080".to_string(),
            max_body_size: 2 * 1024 * 1024,
        }
    }
}

/// Timeout configuration for outbound calls.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Per-call deadline in milliseconds.
    pub request_ms: u64,

    /// Connection establishment timeout in milliseconds.
    pub connect_ms: u64,

    /// Deadline for token endpoint calls in milliseconds.
    pub token_refresh_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_ms: 30_000,
            connect_ms: 10_000,
            token_refresh_ms: 15_000,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Enable retries.
    pub enabled: bool,

    /// Maximum number of attempts, including the first one.
    pub max_attempts: u32,

    /// Delay before the second attempt in milliseconds.
    pub initial_delay_ms: u64,

    /// Upper bound for any single delay in milliseconds.
    pub max_delay_ms: u64,

    /// Growth factor between consecutive delays.
    pub backoff_multiplier: f64,

    /// Symmetric jitter as a fraction of the delay (0.1 = ±10%).
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

/// Circuit breaker thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Counted failures required (with enough volume) to open.
    pub failure_threshold: u32,

    /// Consecutive half-open successes required to close.
    pub success_threshold: u32,

    /// How long the breaker stays open, in milliseconds.
    pub timeout_ms: u64,

    /// Minimum requests observed before the breaker may open.
    pub volume_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout_ms: 60_000,
            volume_threshold: 10,
        }
    }
}

/// Response cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Default entry lifetime in milliseconds.
    pub ttl_ms: u64,

    /// Maximum entries per provider cache.
    pub max_size: usize,

    /// Interval of the background expiry sweep in seconds.
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_ms: 5 * 60 * 1000,
            max_size: 1000,
            sweep_interval_secs: 60,
        }
    }
}

/// Per-provider cache override.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProviderCacheConfig {
    pub ttl_ms: Option<u64>,
    pub max_size: Option<usize>,
    /// Prefix for every key in this provider's cache (defaults to the provider name).
    pub key_prefix: Option<String>,
}

/// OAuth token handling.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TokenConfig {
    /// Treat tokens as expired this many seconds early.
    pub expiry_buffer_secs: u64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            expiry_buffer_secs: 300,
        }
    }
}

/// Credential store settings.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct CredentialsConfig {
    /// Optional JSON file used to seed and persist the in-memory store.
    pub path: Option<String>,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Caller authentication for `/v1/invoke`.
///
/// Callers send `Authorization: Bearer <key>`. With no keys configured every
/// invoke is refused.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct InvokeConfig {
    pub api_keys: Vec<String>,
}

impl InvokeConfig {
    pub fn accepts(&self, key: &str) -> bool {
        self.api_keys.iter().any(|k| !k.is_empty() && k == key)
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin endpoints.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
        }
    }
}

/// Static definition of one upstream provider.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    /// Provider identifier used by callers (e.g. "hubspot").
    pub name: String,

    /// Base URL every request path is joined onto.
    pub base_url: String,

    /// How requests authenticate.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Headers sent with every request to this provider.
    #[serde(default)]
    pub default_headers: BTreeMap<String, String>,

    /// Token-bucket admission limits.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Breaker thresholds overriding the global defaults.
    #[serde(default)]
    pub circuit_breaker: Option<CircuitBreakerConfig>,

    /// Cache settings overriding the global defaults.
    #[serde(default)]
    pub cache: ProviderCacheConfig,

    /// Shape of the provider's error bodies.
    #[serde(default)]
    pub error_format: ErrorFormat,
}

impl ProviderConfig {
    /// Minimal provider with no authentication, mostly for tests and tooling.
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            auth: AuthConfig::None,
            default_headers: BTreeMap::new(),
            rate_limit: RateLimitConfig::default(),
            circuit_breaker: None,
            cache: ProviderCacheConfig::default(),
            error_format: ErrorFormat::default(),
        }
    }
}

/// Token-bucket limits for one provider.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Requests admitted per window at steady state.
    pub max_requests: u32,

    /// Window length in milliseconds.
    pub window_ms: u64,

    /// Bucket capacity; defaults to `max_requests`.
    pub max_burst: Option<u32>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window_ms: 10_000,
            max_burst: None,
        }
    }
}

/// Authentication style of a provider.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthConfig {
    /// Per-user OAuth2 access tokens refreshed through the token endpoint.
    Oauth(OAuthConfig),
    /// A system-wide API key rendered into a header.
    ApiKey(ApiKeyConfig),
    #[default]
    None,
}

/// OAuth2 client settings for refresh-token grants.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OAuthConfig {
    /// Token endpoint URL.
    pub token_url: String,

    /// Client identifier, inline or via `client_id_env`.
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_id_env: Option<String>,

    /// Client secret, inline or via `client_secret_env`.
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub client_secret_env: Option<String>,

    /// Where client credentials go on refresh.
    #[serde(default)]
    pub client_auth: ClientAuthStyle,

    #[serde(default)]
    pub scopes: Vec<String>,
}

/// Placement of client credentials on the token endpoint call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClientAuthStyle {
    /// `client_id` / `client_secret` form fields.
    #[default]
    Body,
    /// `Authorization: Basic base64(id:secret)`.
    Basic,
}

/// System API key settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiKeyConfig {
    /// Environment variable holding the key.
    #[serde(default)]
    pub env: Option<String>,

    /// Inline key (takes precedence over `env`).
    #[serde(default)]
    pub value: Option<String>,

    /// Header carrying the key.
    #[serde(default = "default_api_key_header")]
    pub header: String,

    /// Header value template; `{key}` is replaced by the key.
    #[serde(default = "default_api_key_template")]
    pub template: String,
}

fn default_api_key_header() -> String {
    "Authorization".to_string()
}

fn default_api_key_template() -> String {
    "Bearer {key}".to_string()
}

/// Where a provider puts the human-readable part of an error body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ErrorFormat {
    /// `{"message": ...}` or plain text.
    #[default]
    Generic,
    /// `{"error": {"message": ..., "type"|"code": ...}}` (payment / LLM APIs).
    Nested,
    /// `{"error": "...", "error_description": ...}` (OAuth-style APIs).
    #[serde(rename = "oauth")]
    OAuth,
    /// `{"errors": [{"message": ...}]}` (CRM / accounting APIs).
    ErrorList,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [[providers]]
            name = "crm"
            base_url = "https://api.crm.example"
            "#,
        )
        .unwrap();

        assert_eq!(config.timeouts.request_ms, 30_000);
        assert_eq!(config.retries.max_attempts, 3);
        assert_eq!(config.tokens.expiry_buffer_secs, 300);
        let crm = config.provider("crm").unwrap();
        assert!(matches!(crm.auth, AuthConfig::None));
        assert_eq!(crm.rate_limit.max_requests, 100);
    }

    #[test]
    fn test_auth_variants_parse() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [[providers]]
            name = "docs"
            base_url = "https://docs.example/api"
            error_format = "nested"
            [providers.auth]
            type = "oauth"
            token_url = "https://docs.example/oauth/token"
            client_id = "abc"
            client_secret_env = "DOCS_SECRET"
            client_auth = "basic"
            [providers.rate_limit]
            max_requests = 10
            window_ms = 1000
            max_burst = 5

            [[providers]]
            name = "llm"
            base_url = "https://llm.example/v1"
            [providers.auth]
            type = "api_key"
            env = "LLM_KEY"
            header = "x-api-key"
            template = "{key}"
            "#,
        )
        .unwrap();

        let docs = config.provider("docs").unwrap();
        match &docs.auth {
            AuthConfig::Oauth(oauth) => {
                assert_eq!(oauth.client_auth, ClientAuthStyle::Basic);
                assert_eq!(oauth.client_secret_env.as_deref(), Some("DOCS_SECRET"));
            }
            other => panic!("unexpected auth {:?}", other),
        }
        assert_eq!(docs.error_format, ErrorFormat::Nested);
        assert_eq!(docs.rate_limit.max_burst, Some(5));

        let llm = config.provider("llm").unwrap();
        match &llm.auth {
            AuthConfig::ApiKey(key) => {
                assert_eq!(key.header, "x-api-key");
                assert_eq!(key.template, "{key}");
            }
            other => panic!("unexpected auth {:?}", other),
        }
    }
}
