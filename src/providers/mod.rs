//! Provider lookup and per-provider behavior.
//!
//! # Data Flow
//! ```text
//! GatewayConfig.providers
//!     → registry.rs (validate base URLs, pick an adapter per provider)
//!     → adapter.rs (auth headers, refresh grant, error mapping)
//!     → errors.rs (error body shape → ApiError)
//! ```

pub mod adapter;
pub mod errors;
pub mod registry;

pub use adapter::{AuthScheme, ConfiguredAdapter, ProviderAdapter};
pub use registry::{ProviderRegistry, RegisteredProvider, RegistryError};
