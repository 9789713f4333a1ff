//! OAuth access-token management.
//!
//! # Responsibilities
//! - Hand out a valid access token per `(user, provider)`
//! - Refresh expired tokens through the provider's token endpoint
//! - Collapse concurrent resolutions for one key onto a single refresh
//!
//! # Data Flow
//! ```text
//! get_valid_token(user, provider)
//!     → memory cache hit (valid)        → token
//!     → in-flight resolution exists     → await its shared result
//!     → else start one: credential store → still valid? → cache, return
//!                                        → refresh grant → persist, cache, return
//! ```
//!
//! # Design Decisions
//! - Refresh failures surface as non-retryable `TOKEN_INVALID`
//! - The in-flight handle is dropped once the resolution settles, success or not

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;

use crate::auth::credentials::CredentialStore;
use crate::auth::types::{now_secs, TokenInfo, TokenResponse};
use crate::observability::metrics;
use crate::pipeline::error::ApiError;
use crate::providers::{AuthScheme, ProviderRegistry};

type TokenKey = (String, String);
type Resolution = Arc<OnceCell<Result<String, ApiError>>>;

/// Token manager settings.
#[derive(Debug, Clone, Copy)]
pub struct TokenSettings {
    /// Tokens are treated as expired this long before their expiry.
    pub expiry_buffer: Duration,
    /// Deadline for the token endpoint call.
    pub refresh_timeout: Duration,
}

impl Default for TokenSettings {
    fn default() -> Self {
        Self {
            expiry_buffer: Duration::from_secs(300),
            refresh_timeout: Duration::from_secs(15),
        }
    }
}

/// Validates, refreshes, and caches OAuth access tokens.
pub struct TokenManager {
    registry: Arc<ProviderRegistry>,
    store: Arc<dyn CredentialStore>,
    client: reqwest::Client,
    settings: TokenSettings,
    tokens: DashMap<TokenKey, TokenInfo>,
    inflight: DashMap<TokenKey, Resolution>,
}

impl TokenManager {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        store: Arc<dyn CredentialStore>,
        client: reqwest::Client,
        settings: TokenSettings,
    ) -> Self {
        Self {
            registry,
            store,
            client,
            settings,
            tokens: DashMap::new(),
            inflight: DashMap::new(),
        }
    }

    fn key(user_id: &str, provider: &str) -> TokenKey {
        (user_id.to_string(), provider.to_string())
    }

    /// Return a usable access token, refreshing it if needed.
    pub async fn get_valid_token(&self, user_id: &str, provider: &str) -> Result<String, ApiError> {
        let key = Self::key(user_id, provider);
        if let Some(info) = self.tokens.get(&key) {
            if info.is_valid(self.settings.expiry_buffer) {
                return Ok(info.access_token.clone());
            }
        }

        let resolution: Resolution = self
            .inflight
            .entry(key.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .value()
            .clone();

        let result = resolution
            .get_or_init(|| self.resolve(user_id, provider))
            .await
            .clone();

        self.inflight
            .remove_if(&key, |_, current| Arc::ptr_eq(current, &resolution));
        result
    }

    async fn resolve(&self, user_id: &str, provider: &str) -> Result<String, ApiError> {
        let stored = self
            .store
            .get(user_id, provider)
            .await
            .map_err(|e| ApiError::token_invalid(provider, format!("credential store error: {}", e)))?
            .ok_or_else(|| {
                ApiError::token_invalid(provider, "no stored credential; connect the integration first")
            })?;

        let current = TokenInfo::from_credential(user_id, provider, stored);
        if current.is_valid(self.settings.expiry_buffer) {
            let token = current.access_token.clone();
            self.tokens.insert(Self::key(user_id, provider), current);
            return Ok(token);
        }

        let refresh_token = current
            .refresh_token
            .clone()
            .ok_or_else(|| ApiError::token_invalid(provider, "access token expired and no refresh token is stored"))?;

        match self.refresh(user_id, provider, &refresh_token).await {
            Ok(info) => {
                metrics::record_token_refresh(provider, true);
                let token = info.access_token.clone();
                if let Err(e) = self.store.update(user_id, provider, info.to_credential()).await {
                    tracing::error!(provider = %provider, user_id = %user_id, error = %e, "Failed to persist refreshed token");
                }
                self.tokens.insert(Self::key(user_id, provider), info);
                tracing::info!(provider = %provider, user_id = %user_id, "Refreshed access token");
                Ok(token)
            }
            Err(error) => {
                metrics::record_token_refresh(provider, false);
                tracing::warn!(provider = %provider, user_id = %user_id, error = %error.message, "Token refresh failed");
                Err(error)
            }
        }
    }

    async fn refresh(&self, user_id: &str, provider: &str, refresh_token: &str) -> Result<TokenInfo, ApiError> {
        let registered = self
            .registry
            .get(provider)
            .ok_or_else(|| ApiError::token_invalid(provider, "unknown provider"))?;
        if registered.adapter.auth_scheme() != AuthScheme::OAuth {
            return Err(ApiError::token_invalid(provider, "provider does not use OAuth"));
        }

        let response = registered
            .adapter
            .refresh_request(&self.client, refresh_token)?
            .timeout(self.settings.refresh_timeout)
            .send()
            .await
            .map_err(|e| ApiError::token_invalid(provider, format!("token endpoint unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let upstream = registered
                .adapter
                .map_error(status.as_u16(), &reqwest::header::HeaderMap::new(), &body, "token_refresh");
            return Err(ApiError::token_invalid(
                provider,
                format!("token endpoint rejected refresh ({}): {}", status.as_u16(), upstream.message),
            )
            .with_context(serde_json::json!({ "tokenEndpointStatus": status.as_u16() })));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| ApiError::token_invalid(provider, format!("malformed token response: {}", e)))?;

        Ok(TokenInfo {
            access_token: body.access_token,
            // Providers that do not rotate refresh tokens omit the field.
            refresh_token: body.refresh_token.or_else(|| Some(refresh_token.to_string())),
            expires_at: body.expires_in.map(|secs| now_secs() + secs),
            provider: provider.to_string(),
            user_id: user_id.to_string(),
        })
    }

    /// Cache and persist a token obtained outside the gateway (OAuth connect).
    pub async fn store_token(&self, info: TokenInfo) -> Result<(), ApiError> {
        self.store
            .update(&info.user_id, &info.provider, info.to_credential())
            .await
            .map_err(|e| ApiError::token_invalid(&info.provider, format!("credential store error: {}", e)))?;
        self.tokens
            .insert(Self::key(&info.user_id, &info.provider), info);
        Ok(())
    }

    /// Drop the in-memory token; the next call re-resolves from the store.
    pub fn invalidate(&self, user_id: &str, provider: &str) -> bool {
        let removed = self.tokens.remove(&Self::key(user_id, provider)).is_some();
        if removed {
            tracing::debug!(provider = %provider, user_id = %user_id, "Invalidated cached token");
        }
        removed
    }

    pub fn cached_count(&self) -> usize {
        self.tokens.len()
    }
}
