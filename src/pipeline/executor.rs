//! The request pipeline.
//!
//! # Data Flow
//! ```text
//! request(descriptor)
//!     → cache lookup (cacheable GETs only)             → hit: cached = true
//!     → retry policy, per attempt:
//!         → rate limiter acquire (provider, user)
//!         → circuit breaker "provider:operation"
//!             → timeout
//!                 → auth headers (token manager or system key)
//!                 → send, parse, classify
//!     → cache populate on success
//! ```
//!
//! # Design Decisions
//! - Each retry attempt takes its own rate-limit slot
//! - A breaker fast-fail consumes an attempt without network I/O
//! - Auth headers are applied last so caller headers cannot replace them

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::Instrument;
use uuid::Uuid;

use crate::cache::request_key;
use crate::config::AuthConfig;
use crate::context::{GatewayContext, GatewayStatus};
use crate::observability::metrics;
use crate::pipeline::error::{ApiError, ErrorCode};
use crate::pipeline::request::{AuthMethod, HttpMethod, RequestDescriptor, RequestOptions};
use crate::pipeline::response::ApiResponse;
use crate::providers::{AuthScheme, RegisteredProvider};
use crate::resilience::timeouts::with_timeout;
use crate::resilience::RetryPolicy;
use crate::security::headers::redact_headers;

pub const X_REQUEST_ID: &str = "x-request-id";

/// Runs provider calls through cache, limiter, breaker, timeout, and retry.
pub struct RequestPipeline {
    ctx: Arc<GatewayContext>,
    retry: RetryPolicy,
    default_timeout: Duration,
}

impl RequestPipeline {
    pub fn new(ctx: Arc<GatewayContext>) -> Self {
        let retry = RetryPolicy::new(ctx.config.retries.clone());
        let default_timeout = Duration::from_millis(ctx.config.timeouts.request_ms);
        Self {
            ctx,
            retry,
            default_timeout,
        }
    }

    pub fn context(&self) -> &Arc<GatewayContext> {
        &self.ctx
    }

    pub fn status(&self) -> GatewayStatus {
        self.ctx.status()
    }

    pub async fn get(
        &self,
        provider: &str,
        user_id: &str,
        account_id: Option<&str>,
        path: &str,
        operation: &str,
        options: RequestOptions,
    ) -> Result<ApiResponse, ApiError> {
        self.verb(HttpMethod::Get, provider, user_id, account_id, path, operation, options)
            .await
    }

    pub async fn post(
        &self,
        provider: &str,
        user_id: &str,
        account_id: Option<&str>,
        path: &str,
        operation: &str,
        options: RequestOptions,
    ) -> Result<ApiResponse, ApiError> {
        self.verb(HttpMethod::Post, provider, user_id, account_id, path, operation, options)
            .await
    }

    pub async fn put(
        &self,
        provider: &str,
        user_id: &str,
        account_id: Option<&str>,
        path: &str,
        operation: &str,
        options: RequestOptions,
    ) -> Result<ApiResponse, ApiError> {
        self.verb(HttpMethod::Put, provider, user_id, account_id, path, operation, options)
            .await
    }

    pub async fn patch(
        &self,
        provider: &str,
        user_id: &str,
        account_id: Option<&str>,
        path: &str,
        operation: &str,
        options: RequestOptions,
    ) -> Result<ApiResponse, ApiError> {
        self.verb(HttpMethod::Patch, provider, user_id, account_id, path, operation, options)
            .await
    }

    pub async fn delete(
        &self,
        provider: &str,
        user_id: &str,
        account_id: Option<&str>,
        path: &str,
        operation: &str,
        options: RequestOptions,
    ) -> Result<ApiResponse, ApiError> {
        self.verb(HttpMethod::Delete, provider, user_id, account_id, path, operation, options)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn verb(
        &self,
        method: HttpMethod,
        provider: &str,
        user_id: &str,
        account_id: Option<&str>,
        path: &str,
        operation: &str,
        options: RequestOptions,
    ) -> Result<ApiResponse, ApiError> {
        let mut descriptor = RequestDescriptor::new(method, provider, user_id, path, operation).with_options(options);
        descriptor.account_id = account_id.map(str::to_string);
        self.request(descriptor).await
    }

    /// Run one request descriptor through the pipeline.
    pub async fn request(&self, descriptor: RequestDescriptor) -> Result<ApiResponse, ApiError> {
        let request_id = Uuid::new_v4().to_string();
        let span = tracing::info_span!(
            "outbound",
            request_id = %request_id,
            provider = %descriptor.provider,
            operation = %descriptor.operation,
        );
        self.run(descriptor, request_id).instrument(span).await
    }

    async fn run(&self, descriptor: RequestDescriptor, request_id: String) -> Result<ApiResponse, ApiError> {
        let start = Instant::now();
        let provider = self.ctx.registry.require(&descriptor.provider, &descriptor.operation)?;

        // 1. Cache lookup.
        let cache_slot = if descriptor.is_cacheable() {
            self.ctx.caches.get(&descriptor.provider).map(|cache| {
                let key = request_key(
                    cache.key_prefix(),
                    &descriptor.provider,
                    &descriptor.user_id,
                    descriptor.account_id.as_deref(),
                    &descriptor.path,
                    &descriptor.query,
                );
                (cache, key)
            })
        } else {
            None
        };

        if let Some((cache, key)) = &cache_slot {
            if let Some(hit) = cache.get(key) {
                tracing::debug!(path = %descriptor.path, "Served from cache");
                metrics::record_request(&descriptor.provider, &descriptor.operation, "cache_hit", start);
                return Ok(hit.from_cache());
            }
        }

        // 2-5. Attempts under the retry policy.
        let policy = if descriptor.retry {
            self.retry.clone()
        } else {
            self.retry.without_retries()
        };
        let attempts = AtomicU32::new(0);
        let (provider_ref, descriptor_ref, request_id_ref, attempts_ref) =
            (&provider, &descriptor, request_id.as_str(), &attempts);

        let result = policy
            .execute_with(
                move |attempt| {
                    attempts_ref.store(attempt, Ordering::Relaxed);
                    self.attempt(provider_ref, descriptor_ref, request_id_ref)
                },
                |next_attempt, error, delay| {
                    tracing::warn!(
                        attempt = next_attempt,
                        code = %error.code,
                        delay_ms = delay.as_millis() as u64,
                        error = %error.message,
                        "Retrying provider call"
                    );
                    metrics::record_retry(&descriptor.provider, &descriptor.operation);
                },
            )
            .await;

        let attempts = attempts.load(Ordering::Relaxed);
        match result {
            Ok(response) => {
                // 6. Cache populate.
                if let Some((cache, key)) = &cache_slot {
                    cache.set(key, response.clone(), descriptor.cache_ttl());
                }
                tracing::info!(
                    status = response.status,
                    attempts,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Provider call succeeded"
                );
                metrics::record_request(&descriptor.provider, &descriptor.operation, "success", start);
                Ok(response)
            }
            Err(error) => {
                tracing::warn!(
                    code = %error.code,
                    status = ?error.status,
                    attempts,
                    duration_ms = start.elapsed().as_millis() as u64,
                    error = %error.message,
                    "Provider call failed"
                );
                metrics::record_request(&descriptor.provider, &descriptor.operation, "error", start);
                Err(error)
            }
        }
    }

    async fn attempt(
        &self,
        provider: &RegisteredProvider,
        descriptor: &RequestDescriptor,
        request_id: &str,
    ) -> Result<ApiResponse, ApiError> {
        self.ctx
            .limiter
            .acquire(&descriptor.provider, &descriptor.user_id)
            .await
            .map_err(|e| {
                ApiError::new(
                    ErrorCode::BadRequest,
                    e.to_string(),
                    descriptor.provider.as_str(),
                    descriptor.operation.as_str(),
                )
            })?;

        let timeout = descriptor
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.default_timeout);

        self.ctx
            .breakers
            .execute(&descriptor.provider, &descriptor.operation, || {
                with_timeout(
                    timeout,
                    &descriptor.provider,
                    &descriptor.operation,
                    self.send(provider, descriptor, request_id),
                )
            })
            .await
    }

    async fn auth_headers(
        &self,
        provider: &RegisteredProvider,
        descriptor: &RequestDescriptor,
    ) -> Result<Vec<(String, String)>, ApiError> {
        let scheme = provider.adapter.auth_scheme();
        match (descriptor.auth_method, scheme) {
            (AuthMethod::None, _) => Ok(Vec::new()),
            (AuthMethod::Auto | AuthMethod::OAuth, AuthScheme::OAuth) => {
                let token = self
                    .ctx
                    .tokens
                    .get_valid_token(&descriptor.user_id, &descriptor.provider)
                    .await?;
                provider.adapter.auth_headers(Some(&token))
            }
            (AuthMethod::Auto, _) | (AuthMethod::SystemKey, AuthScheme::ApiKey) => provider.adapter.auth_headers(None),
            (requested, _) => Err(ApiError::new(
                ErrorCode::BadRequest,
                format!("{} does not support {} authentication", descriptor.provider, requested),
                descriptor.provider.as_str(),
                descriptor.operation.as_str(),
            )),
        }
    }

    async fn send(
        &self,
        provider: &RegisteredProvider,
        descriptor: &RequestDescriptor,
        request_id: &str,
    ) -> Result<ApiResponse, ApiError> {
        let name = descriptor.provider.as_str();
        let operation = descriptor.operation.as_str();
        let url = provider.url_for(&descriptor.path, &descriptor.query, operation)?;

        let mut headers = HeaderMap::new();
        let auth = self.auth_headers(provider, descriptor).await?;
        let merged = provider
            .config
            .default_headers
            .iter()
            .chain(descriptor.headers.iter())
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .chain(auth.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .chain(std::iter::once((X_REQUEST_ID, request_id)));
        for (name_str, value) in merged {
            let header_name = HeaderName::from_bytes(name_str.as_bytes()).map_err(|_| {
                ApiError::new(ErrorCode::BadRequest, format!("invalid header name '{}'", name_str), name, operation)
            })?;
            let header_value = HeaderValue::from_str(value).map_err(|_| {
                ApiError::new(
                    ErrorCode::BadRequest,
                    format!("invalid value for header '{}'", name_str),
                    name,
                    operation,
                )
            })?;
            headers.insert(header_name, header_value);
        }

        let secret_headers = provider_secret_headers(provider);
        tracing::debug!(
            method = %descriptor.method,
            url = %url.as_str().split('?').next().unwrap_or_default(),
            headers = ?redact_headers(&headers, &secret_headers),
            "Sending provider request"
        );

        let mut builder = self
            .ctx
            .client
            .request(descriptor.method.to_reqwest(), url)
            .headers(headers);
        if let Some(body) = &descriptor.body {
            if descriptor.method != HttpMethod::Get {
                builder = builder.json(body);
            }
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ApiError::from_transport(&e, name, operation))?;

        let status = response.status().as_u16();
        let response_headers = response.headers().clone();
        let body = response
            .text()
            .await
            .map_err(|e| ApiError::from_transport(&e, name, operation))?;

        tracing::debug!(
            status,
            headers = ?redact_headers(&response_headers, &secret_headers),
            body_bytes = body.len(),
            "Received provider response"
        );

        if !(200..300).contains(&status) {
            let error = provider.adapter.map_error(status, &response_headers, &body, operation);
            if status == 401 && provider.adapter.auth_scheme() == AuthScheme::OAuth {
                self.ctx.tokens.invalidate(&descriptor.user_id, name);
            }
            return Err(error);
        }

        let data = parse_body(&response_headers, &body).map_err(|e| {
            ApiError::new(
                ErrorCode::Unknown,
                format!("provider returned malformed JSON: {}", e),
                name,
                operation,
            )
            .with_retryable(false)
        })?;

        Ok(ApiResponse {
            data,
            status,
            headers: header_map(&response_headers),
            cached: false,
        })
    }
}

/// Custom API-key header names, redacted alongside the well-known ones.
fn provider_secret_headers(provider: &RegisteredProvider) -> Vec<&str> {
    match &provider.config.auth {
        AuthConfig::ApiKey(key) => vec![key.header.as_str()],
        _ => Vec::new(),
    }
}

/// JSON when the content type says so, text otherwise.
fn parse_body(headers: &HeaderMap, body: &str) -> Result<serde_json::Value, serde_json::Error> {
    if body.trim().is_empty() {
        return Ok(serde_json::Value::Null);
    }
    let is_json = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.contains("json"))
        .unwrap_or(false);
    if is_json {
        serde_json::from_str(body)
    } else {
        Ok(serde_json::Value::String(body.to_string()))
    }
}

fn header_map(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str().to_string(), v.to_string())))
        .collect()
}
