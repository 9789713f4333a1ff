//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → consumed once by GatewayContext::from_config
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AdminConfig, ApiKeyConfig, AuthConfig, CacheConfig, CircuitBreakerConfig, ClientAuthStyle,
    ErrorFormat, GatewayConfig, InvokeConfig, ListenerConfig, LogFormat, OAuthConfig, ObservabilityConfig,
    ProviderCacheConfig, ProviderConfig, RateLimitConfig, RetryConfig, TimeoutConfig, TokenConfig,
};
