//! Error taxonomy for outbound API calls.
//!
//! Every failure that leaves the pipeline is an [`ApiError`]. Raw transport
//! failures and upstream non-success responses are classified exactly once
//! (see [`ApiError::from_transport`] and `providers::errors`) so downstream
//! logic only ever matches on [`ErrorCode`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Stable error codes surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    ValidationError,
    RateLimited,
    QuotaExceeded,
    InternalError,
    ServiceUnavailable,
    GatewayTimeout,
    NetworkError,
    Timeout,
    TokenExpired,
    TokenInvalid,
    Unknown,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::BadRequest => "BAD_REQUEST",
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::Forbidden => "FORBIDDEN",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::Conflict => "CONFLICT",
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::RateLimited => "RATE_LIMITED",
            ErrorCode::QuotaExceeded => "QUOTA_EXCEEDED",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ErrorCode::GatewayTimeout => "GATEWAY_TIMEOUT",
            ErrorCode::NetworkError => "NETWORK_ERROR",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::TokenExpired => "TOKEN_EXPIRED",
            ErrorCode::TokenInvalid => "TOKEN_INVALID",
            ErrorCode::Unknown => "UNKNOWN",
        }
    }

    /// Whether a failure with this code is worth another attempt.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            ErrorCode::RateLimited
                | ErrorCode::InternalError
                | ErrorCode::ServiceUnavailable
                | ErrorCode::GatewayTimeout
                | ErrorCode::NetworkError
                | ErrorCode::Timeout
        )
    }

    /// Errors that only a user reconnecting the integration can fix.
    pub fn is_auth(self) -> bool {
        matches!(
            self,
            ErrorCode::Unauthorized | ErrorCode::TokenExpired | ErrorCode::TokenInvalid
        )
    }

    /// Generic mapping from an upstream HTTP status.
    pub fn from_status(status: u16) -> Self {
        match status {
            400 => ErrorCode::BadRequest,
            401 => ErrorCode::Unauthorized,
            402 => ErrorCode::QuotaExceeded,
            403 => ErrorCode::Forbidden,
            404 => ErrorCode::NotFound,
            409 => ErrorCode::Conflict,
            422 => ErrorCode::ValidationError,
            429 => ErrorCode::RateLimited,
            502 | 503 => ErrorCode::ServiceUnavailable,
            504 => ErrorCode::GatewayTimeout,
            s if s >= 500 => ErrorCode::InternalError,
            s if s >= 400 => ErrorCode::BadRequest,
            _ => ErrorCode::Unknown,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified outbound API failure.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[error("{code} from {provider}/{operation}: {message}")]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    pub provider: String,
    pub operation: String,
    pub retryable: bool,
    /// Seconds the upstream asked us to wait, from `Retry-After`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    /// Upstream HTTP status, when the failure came from a response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

impl ApiError {
    /// Build an error whose retryability follows its code.
    pub fn new(
        code: ErrorCode,
        message: impl Into<String>,
        provider: impl Into<String>,
        operation: impl Into<String>,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            provider: provider.into(),
            operation: operation.into(),
            retryable: code.is_transient(),
            retry_after: None,
            status: None,
            context: None,
        }
    }

    /// Classify an upstream non-success status with no provider-specific hints.
    pub fn from_status(status: u16, message: impl Into<String>, provider: &str, operation: &str) -> Self {
        let mut err = Self::new(ErrorCode::from_status(status), message, provider, operation);
        err.status = Some(status);
        err
    }

    /// Classify a transport-level failure (no response was received).
    pub fn from_transport(error: &reqwest::Error, provider: &str, operation: &str) -> Self {
        if error.is_timeout() {
            return Self::new(ErrorCode::Timeout, "request timed out", provider, operation);
        }
        if let Some(status) = error.status() {
            return Self::from_status(status.as_u16(), error.to_string(), provider, operation);
        }
        if error.is_decode() || error.is_body() {
            return Self::new(
                ErrorCode::Unknown,
                format!("failed to read response: {}", error),
                provider,
                operation,
            );
        }
        if error.is_builder() {
            return Self::new(ErrorCode::BadRequest, error.to_string(), provider, operation);
        }
        Self::new(ErrorCode::NetworkError, error.to_string(), provider, operation)
    }

    /// The per-call deadline elapsed before the upstream answered.
    pub fn timeout(provider: &str, operation: &str, after: Duration) -> Self {
        Self::new(
            ErrorCode::Timeout,
            format!("request timed out after {}ms", after.as_millis()),
            provider,
            operation,
        )
    }

    /// The breaker for this operation is open; no call was attempted.
    pub fn circuit_open(provider: &str, operation: &str, retry_in: Duration) -> Self {
        let mut err = Self::new(
            ErrorCode::ServiceUnavailable,
            format!("{} is temporarily unavailable (circuit open)", provider),
            provider,
            operation,
        );
        err.retry_after = Some(retry_in.as_secs().max(1));
        err.context = Some(serde_json::json!({ "circuit": "open" }));
        err
    }

    /// The stored credential cannot produce a usable token.
    pub fn token_invalid(provider: &str, message: impl Into<String>) -> Self {
        Self::new(ErrorCode::TokenInvalid, message, provider, "token_refresh")
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn with_retry_after(mut self, retry_after: Option<u64>) -> Self {
        self.retry_after = retry_after;
        self
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = Some(context);
        self
    }

    /// True when this error is the breaker's fast-fail signal.
    pub fn is_circuit_open(&self) -> bool {
        self.code == ErrorCode::ServiceUnavailable
            && self
                .context
                .as_ref()
                .and_then(|c| c.get("circuit"))
                .and_then(|v| v.as_str())
                == Some("open")
    }

    /// Whether the circuit breaker should count this failure.
    pub fn counts_as_failure(&self) -> bool {
        matches!(self.code, ErrorCode::NetworkError | ErrorCode::Timeout)
            || self.status.map(|s| s >= 500).unwrap_or(false)
            || (self.status.is_none()
                && matches!(
                    self.code,
                    ErrorCode::InternalError | ErrorCode::ServiceUnavailable | ErrorCode::GatewayTimeout
                ))
    }

    /// HTTP status to answer with when this error is surfaced by the gateway.
    pub fn http_status(&self) -> u16 {
        match self.code {
            ErrorCode::BadRequest => 400,
            ErrorCode::Unauthorized | ErrorCode::TokenExpired | ErrorCode::TokenInvalid => 401,
            ErrorCode::QuotaExceeded => 402,
            ErrorCode::Forbidden => 403,
            ErrorCode::NotFound => 404,
            ErrorCode::Conflict => 409,
            ErrorCode::ValidationError => 422,
            ErrorCode::RateLimited => 429,
            ErrorCode::InternalError | ErrorCode::Unknown => 502,
            ErrorCode::ServiceUnavailable => 503,
            ErrorCode::GatewayTimeout | ErrorCode::Timeout => 504,
            ErrorCode::NetworkError => 502,
        }
    }

    /// Human-readable explanation for tool handlers and end users.
    pub fn user_message(&self) -> String {
        match self.code {
            c if c.is_auth() => format!(
                "Your {} connection needs to be re-authorized. Please reconnect the integration and try again.",
                self.provider
            ),
            ErrorCode::Forbidden => format!(
                "The connected {} account does not have permission to {}.",
                self.provider, self.operation
            ),
            ErrorCode::NotFound => format!("The requested {} resource was not found.", self.provider),
            ErrorCode::RateLimited | ErrorCode::QuotaExceeded => match self.retry_after {
                Some(secs) => format!(
                    "{} is rate limiting requests. Try again in {} seconds.",
                    self.provider, secs
                ),
                None => format!("{} is rate limiting requests. Try again shortly.", self.provider),
            },
            ErrorCode::ValidationError | ErrorCode::BadRequest | ErrorCode::Conflict => {
                format!("{} rejected the request: {}", self.provider, self.message)
            }
            ErrorCode::Timeout | ErrorCode::GatewayTimeout => {
                format!("{} took too long to respond.", self.provider)
            }
            _ => format!(
                "{} is having trouble right now ({}). Please try again later.",
                self.provider, self.code
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ErrorCode::from_status(401), ErrorCode::Unauthorized);
        assert_eq!(ErrorCode::from_status(422), ErrorCode::ValidationError);
        assert_eq!(ErrorCode::from_status(429), ErrorCode::RateLimited);
        assert_eq!(ErrorCode::from_status(503), ErrorCode::ServiceUnavailable);
        assert_eq!(ErrorCode::from_status(507), ErrorCode::InternalError);
        assert_eq!(ErrorCode::from_status(418), ErrorCode::BadRequest);
    }

    #[test]
    fn test_retryability_follows_code() {
        assert!(ApiError::from_status(500, "boom", "crm", "list").retryable);
        assert!(ApiError::from_status(429, "slow down", "crm", "list").retryable);
        assert!(!ApiError::from_status(401, "nope", "crm", "list").retryable);
        assert!(!ApiError::from_status(404, "missing", "crm", "list").retryable);
    }

    #[test]
    fn test_breaker_filter_ignores_client_errors() {
        assert!(ApiError::from_status(502, "", "crm", "list").counts_as_failure());
        assert!(ApiError::new(ErrorCode::Timeout, "", "crm", "list").counts_as_failure());
        assert!(!ApiError::from_status(429, "", "crm", "list").counts_as_failure());
        assert!(!ApiError::from_status(400, "", "crm", "list").counts_as_failure());
    }

    #[test]
    fn test_serialized_shape() {
        let err = ApiError::from_status(429, "slow down", "crm", "list_contacts")
            .with_retry_after(Some(12));
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["code"], "RATE_LIMITED");
        assert_eq!(json["retryAfter"], 12);
        assert_eq!(json["retryable"], true);
        assert!(json.get("context").is_none());
    }

    #[test]
    fn test_auth_errors_carry_reconnect_hint() {
        let err = ApiError::token_invalid("docs", "refresh token revoked");
        assert!(err.user_message().contains("reconnect"));
        assert!(!err.retryable);
        assert!(ApiError::circuit_open("crm", "list", Duration::from_secs(30)).is_circuit_open());
    }
}
