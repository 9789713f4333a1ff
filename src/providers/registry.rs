//! Provider registry.
//!
//! The static lookup table of providers, each paired with the adapter chosen
//! for it at build time.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;
use url::Url;

use crate::config::ProviderConfig;
use crate::pipeline::error::{ApiError, ErrorCode};
use crate::providers::adapter::{ConfiguredAdapter, ProviderAdapter};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("provider '{provider}' has an invalid base_url: {source}")]
    InvalidBaseUrl {
        provider: String,
        #[source]
        source: url::ParseError,
    },

    #[error("provider '{0}' is registered twice")]
    Duplicate(String),
}

/// One provider: its static configuration and adapter.
pub struct RegisteredProvider {
    pub config: ProviderConfig,
    pub adapter: Arc<dyn ProviderAdapter>,
    base_url: Url,
}

impl RegisteredProvider {
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Join `path` onto the base URL (keeping any base path) and append `query`.
    ///
    /// Paths with `..` segments are refused: URL parsing would resolve them
    /// and the request could leave the base path with the provider's credentials.
    pub fn url_for(&self, path: &str, query: &BTreeMap<String, String>, operation: &str) -> Result<Url, ApiError> {
        if path.split(['/', '\\']).any(is_parent_segment) {
            return Err(ApiError::new(
                ErrorCode::BadRequest,
                format!("request path '{}' must not contain '..' segments", path),
                self.name(),
                operation,
            ));
        }
        let joined = format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        let mut url = Url::parse(&joined).map_err(|e| {
            ApiError::new(
                ErrorCode::BadRequest,
                format!("invalid request path '{}': {}", path, e),
                self.name(),
                operation,
            )
        })?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query.iter());
        }
        Ok(url)
    }
}

fn is_parent_segment(segment: &str) -> bool {
    matches!(
        segment.to_ascii_lowercase().as_str(),
        ".." | ".%2e" | "%2e." | "%2e%2e"
    )
}

/// Provider name → registered provider.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<RegisteredProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every provider with a [`ConfiguredAdapter`].
    pub fn from_configs(configs: &[ProviderConfig]) -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        for config in configs {
            registry.register(config.clone())?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, config: ProviderConfig) -> Result<(), RegistryError> {
        let adapter = Arc::new(ConfiguredAdapter::from_config(&config));
        self.register_with_adapter(config, adapter)
    }

    /// Register a provider with a custom adapter.
    pub fn register_with_adapter(
        &mut self,
        config: ProviderConfig,
        adapter: Arc<dyn ProviderAdapter>,
    ) -> Result<(), RegistryError> {
        if self.providers.contains_key(&config.name) {
            return Err(RegistryError::Duplicate(config.name));
        }
        let base_url = Url::parse(&config.base_url).map_err(|source| RegistryError::InvalidBaseUrl {
            provider: config.name.clone(),
            source,
        })?;

        tracing::debug!(provider = %config.name, base_url = %base_url, "Registered provider");
        self.providers.insert(
            config.name.clone(),
            Arc::new(RegisteredProvider {
                config,
                adapter,
                base_url,
            }),
        );
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<RegisteredProvider>> {
        self.providers.get(name).cloned()
    }

    /// Look up a provider, failing with a non-retryable error if unknown.
    pub fn require(&self, name: &str, operation: &str) -> Result<Arc<RegisteredProvider>, ApiError> {
        self.get(name).ok_or_else(|| {
            ApiError::new(
                ErrorCode::BadRequest,
                format!("unknown provider '{}'", name),
                name,
                operation,
            )
        })
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
