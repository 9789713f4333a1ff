//! Request descriptors.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }

    pub fn to_reqwest(self) -> reqwest::Method {
        match self {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which credential a request is sent with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    /// Whatever the provider is configured for.
    #[default]
    Auto,
    /// The user's OAuth access token.
    #[serde(rename = "oauth")]
    OAuth,
    /// The provider's system API key.
    SystemKey,
    /// No credentials.
    None,
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AuthMethod::Auto => "auto",
            AuthMethod::OAuth => "oauth",
            AuthMethod::SystemKey => "system_key",
            AuthMethod::None => "none",
        };
        f.write_str(name)
    }
}

fn default_true() -> bool {
    true
}

/// Per-request cache opt-in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheOptions {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Overrides the provider's cache TTL.
    #[serde(default)]
    pub ttl_ms: Option<u64>,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_ms: None,
        }
    }
}

/// Everything the pipeline needs to perform one provider call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestDescriptor {
    pub provider: String,
    pub user_id: String,
    #[serde(default)]
    pub account_id: Option<String>,
    pub path: String,
    /// Logical operation name; keys the circuit breaker.
    pub operation: String,
    #[serde(default)]
    pub method: HttpMethod,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<serde_json::Value>,
    #[serde(default)]
    pub query: BTreeMap<String, String>,
    #[serde(default)]
    pub cache_options: Option<CacheOptions>,
    #[serde(default)]
    pub auth_method: AuthMethod,
    /// Set to false to make exactly one attempt.
    #[serde(default = "default_true")]
    pub retry: bool,
    /// Overrides the default per-call deadline.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl RequestDescriptor {
    pub fn new(
        method: HttpMethod,
        provider: impl Into<String>,
        user_id: impl Into<String>,
        path: impl Into<String>,
        operation: impl Into<String>,
    ) -> Self {
        Self {
            provider: provider.into(),
            user_id: user_id.into(),
            account_id: None,
            path: path.into(),
            operation: operation.into(),
            method,
            headers: BTreeMap::new(),
            body: None,
            query: BTreeMap::new(),
            cache_options: None,
            auth_method: AuthMethod::Auto,
            retry: true,
            timeout_ms: None,
        }
    }

    /// Only GETs with an explicit opt-in are cached.
    pub fn is_cacheable(&self) -> bool {
        self.method == HttpMethod::Get && self.cache_options.as_ref().map(|c| c.enabled).unwrap_or(false)
    }

    pub fn cache_ttl(&self) -> Option<Duration> {
        self.cache_options
            .as_ref()
            .and_then(|c| c.ttl_ms)
            .map(Duration::from_millis)
    }

    /// Apply verb-helper options.
    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.headers.extend(options.headers);
        self.query.extend(options.query);
        if options.body.is_some() {
            self.body = options.body;
        }
        if options.cache.is_some() {
            self.cache_options = options.cache;
        }
        self.auth_method = options.auth_method;
        self.retry = options.retry;
        if let Some(timeout) = options.timeout {
            self.timeout_ms = Some(timeout.as_millis() as u64);
        }
        self
    }
}

/// Optional parts of a request for the verb helpers.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub headers: BTreeMap<String, String>,
    pub query: BTreeMap<String, String>,
    pub body: Option<serde_json::Value>,
    pub cache: Option<CacheOptions>,
    pub auth_method: AuthMethod,
    pub retry: bool,
    pub timeout: Option<Duration>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            headers: BTreeMap::new(),
            query: BTreeMap::new(),
            body: None,
            cache: None,
            auth_method: AuthMethod::Auto,
            retry: true,
            timeout: None,
        }
    }
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_string(), value.into());
        self
    }

    pub fn query(mut self, name: &str, value: impl Into<String>) -> Self {
        self.query.insert(name.to_string(), value.into());
        self
    }

    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Opt into caching, optionally overriding the provider TTL.
    pub fn cached(mut self, ttl: Option<Duration>) -> Self {
        self.cache = Some(CacheOptions {
            enabled: true,
            ttl_ms: ttl.map(|t| t.as_millis() as u64),
        });
        self
    }

    pub fn auth(mut self, method: AuthMethod) -> Self {
        self.auth_method = method;
        self
    }

    pub fn no_retry(mut self) -> Self {
        self.retry = false;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_json_defaults() {
        let descriptor: RequestDescriptor = serde_json::from_str(
            r#"{"provider":"crm","userId":"u1","path":"/contacts","operation":"list_contacts"}"#,
        )
        .unwrap();
        assert_eq!(descriptor.method, HttpMethod::Get);
        assert_eq!(descriptor.auth_method, AuthMethod::Auto);
        assert!(descriptor.retry);
        assert!(!descriptor.is_cacheable());
    }

    #[test]
    fn test_only_get_with_opt_in_is_cacheable() {
        let get = RequestDescriptor::new(HttpMethod::Get, "crm", "u1", "/contacts", "list")
            .with_options(RequestOptions::new().cached(Some(Duration::from_secs(5))));
        assert!(get.is_cacheable());
        assert_eq!(get.cache_ttl(), Some(Duration::from_secs(5)));

        let post = RequestDescriptor::new(HttpMethod::Post, "crm", "u1", "/contacts", "create")
            .with_options(RequestOptions::new().cached(None));
        assert!(!post.is_cacheable());
    }

    #[test]
    fn test_auth_method_names() {
        let parsed: AuthMethod = serde_json::from_str(r#""system_key""#).unwrap();
        assert_eq!(parsed, AuthMethod::SystemKey);
        let parsed: AuthMethod = serde_json::from_str(r#""oauth""#).unwrap();
        assert_eq!(parsed, AuthMethod::OAuth);
    }
}
