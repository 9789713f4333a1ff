//! Provider adapters.
//!
//! A [`ProviderAdapter`] carries everything that differs between providers
//! at call time: how requests authenticate, how error bodies are read, and
//! how a refresh-token grant is sent. One adapter is chosen per provider when
//! the registry is built.

use base64::{engine::general_purpose, Engine as _};
use reqwest::header::{HeaderMap, AUTHORIZATION};

use crate::config::{AuthConfig, ClientAuthStyle, ErrorFormat, ProviderConfig};
use crate::pipeline::error::{ApiError, ErrorCode};
use crate::providers::errors;

/// How a provider's requests authenticate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    /// Per-user OAuth access token.
    OAuth,
    /// System-wide API key.
    ApiKey,
    None,
}

pub trait ProviderAdapter: Send + Sync {
    fn auth_scheme(&self) -> AuthScheme;

    /// Authentication headers for one call. `token` is the user's access
    /// token and is only consulted for OAuth providers.
    fn auth_headers(&self, token: Option<&str>) -> Result<Vec<(String, String)>, ApiError>;

    /// Classify a non-success response.
    fn map_error(&self, status: u16, headers: &HeaderMap, body: &str, operation: &str) -> ApiError;

    /// Build the refresh-token grant request.
    fn refresh_request(
        &self,
        client: &reqwest::Client,
        refresh_token: &str,
    ) -> Result<reqwest::RequestBuilder, ApiError>;
}

#[derive(Debug, Clone)]
enum ResolvedAuth {
    OAuth {
        token_url: String,
        client_id: Option<String>,
        client_secret: Option<String>,
        client_auth: ClientAuthStyle,
        scopes: Vec<String>,
    },
    ApiKey {
        header: String,
        value: Option<String>,
    },
    None,
}

/// Adapter driven entirely by a [`ProviderConfig`].
pub struct ConfiguredAdapter {
    name: String,
    auth: ResolvedAuth,
    error_format: ErrorFormat,
}

impl ConfiguredAdapter {
    /// Resolve inline and environment-sourced secrets once.
    pub fn from_config(config: &ProviderConfig) -> Self {
        let auth = match &config.auth {
            AuthConfig::Oauth(oauth) => ResolvedAuth::OAuth {
                token_url: oauth.token_url.clone(),
                client_id: inline_or_env(&oauth.client_id, &oauth.client_id_env),
                client_secret: inline_or_env(&oauth.client_secret, &oauth.client_secret_env),
                client_auth: oauth.client_auth,
                scopes: oauth.scopes.clone(),
            },
            AuthConfig::ApiKey(key) => ResolvedAuth::ApiKey {
                header: key.header.clone(),
                value: inline_or_env(&key.value, &key.env).map(|k| key.template.replace("{key}", &k)),
            },
            AuthConfig::None => ResolvedAuth::None,
        };

        Self {
            name: config.name.clone(),
            auth,
            error_format: config.error_format,
        }
    }
}

fn inline_or_env(inline: &Option<String>, env: &Option<String>) -> Option<String> {
    inline
        .clone()
        .or_else(|| env.as_ref().and_then(|name| std::env::var(name).ok()))
        .filter(|v| !v.is_empty())
}

impl ProviderAdapter for ConfiguredAdapter {
    fn auth_scheme(&self) -> AuthScheme {
        match self.auth {
            ResolvedAuth::OAuth { .. } => AuthScheme::OAuth,
            ResolvedAuth::ApiKey { .. } => AuthScheme::ApiKey,
            ResolvedAuth::None => AuthScheme::None,
        }
    }

    fn auth_headers(&self, token: Option<&str>) -> Result<Vec<(String, String)>, ApiError> {
        match &self.auth {
            ResolvedAuth::OAuth { .. } => match token {
                Some(token) => Ok(vec![(AUTHORIZATION.to_string(), format!("Bearer {}", token))]),
                None => Err(ApiError::new(
                    ErrorCode::Unauthorized,
                    "no access token available",
                    self.name.as_str(),
                    "auth",
                )),
            },
            ResolvedAuth::ApiKey { header, value } => match value {
                Some(value) => Ok(vec![(header.to_ascii_lowercase(), value.clone())]),
                None => Err(ApiError::new(
                    ErrorCode::Unauthorized,
                    "system API key is not configured",
                    self.name.as_str(),
                    "auth",
                )),
            },
            ResolvedAuth::None => Ok(Vec::new()),
        }
    }

    fn map_error(&self, status: u16, headers: &HeaderMap, body: &str, operation: &str) -> ApiError {
        errors::map_error(self.error_format, status, headers, body, &self.name, operation)
    }

    fn refresh_request(
        &self,
        client: &reqwest::Client,
        refresh_token: &str,
    ) -> Result<reqwest::RequestBuilder, ApiError> {
        let ResolvedAuth::OAuth {
            token_url,
            client_id,
            client_secret,
            client_auth,
            scopes,
        } = &self.auth
        else {
            return Err(ApiError::token_invalid(&self.name, "provider does not use OAuth"));
        };

        let client_id = client_id
            .as_deref()
            .ok_or_else(|| ApiError::token_invalid(&self.name, "OAuth client id is not configured"))?;

        let mut fields: Vec<(&str, &str)> = vec![("grant_type", "refresh_token"), ("refresh_token", refresh_token)];
        let scope = scopes.join(" ");
        if !scope.is_empty() {
            fields.push(("scope", scope.as_str()));
        }

        let mut builder = client.post(token_url.as_str());
        match client_auth {
            ClientAuthStyle::Body => {
                fields.push(("client_id", client_id));
                if let Some(secret) = client_secret.as_deref() {
                    fields.push(("client_secret", secret));
                }
            }
            ClientAuthStyle::Basic => {
                let credentials = format!("{}:{}", client_id, client_secret.as_deref().unwrap_or_default());
                let encoded = general_purpose::STANDARD.encode(credentials.as_bytes());
                builder = builder.header(AUTHORIZATION, format!("Basic {}", encoded));
            }
        }

        Ok(builder.form(&fields))
    }
}
