//! Upstream error classification.
//!
//! Turns a non-success response into an [`ApiError`] once, using the
//! provider's declared error body shape. Anything the shape-specific parser
//! cannot read falls back to plain status mapping.

use reqwest::header::{HeaderMap, RETRY_AFTER, WWW_AUTHENTICATE};
use serde_json::Value;

use crate::config::ErrorFormat;
use crate::pipeline::error::{ApiError, ErrorCode};

/// Detail pulled out of an error body.
#[derive(Debug, Default, PartialEq)]
struct ErrorDetail {
    message: Option<String>,
    code: Option<String>,
}

/// Classify a non-success upstream response.
pub fn map_error(
    format: ErrorFormat,
    status: u16,
    headers: &HeaderMap,
    body: &str,
    provider: &str,
    operation: &str,
) -> ApiError {
    let detail = serde_json::from_str::<Value>(body)
        .ok()
        .map(|json| extract_detail(format, &json))
        .unwrap_or_default();

    let message = detail
        .message
        .clone()
        .or_else(|| {
            let trimmed = body.trim();
            (!trimmed.is_empty() && trimmed.len() <= 512).then(|| trimmed.to_string())
        })
        .unwrap_or_else(|| format!("upstream returned HTTP {}", status));

    let code = refine_code(status, detail.code.as_deref(), headers);
    let mut error = ApiError::new(code, message, provider, operation);
    error.status = Some(status);
    if matches!(code, ErrorCode::RateLimited | ErrorCode::ServiceUnavailable | ErrorCode::QuotaExceeded) {
        error.retry_after = parse_retry_after(headers);
    }
    if let Some(upstream_code) = detail.code {
        error.context = Some(serde_json::json!({ "upstreamCode": upstream_code }));
    }
    error
}

/// Seconds from a `Retry-After` header (delta-seconds form only).
pub fn parse_retry_after(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
}

fn refine_code(status: u16, upstream_code: Option<&str>, headers: &HeaderMap) -> ErrorCode {
    let base = ErrorCode::from_status(status);
    let upstream = upstream_code.map(|c| c.to_ascii_lowercase()).unwrap_or_default();

    match base {
        ErrorCode::Unauthorized => {
            let challenge = headers
                .get(WWW_AUTHENTICATE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_ascii_lowercase();
            if upstream.contains("invalid_token")
                || upstream.contains("expired")
                || challenge.contains("invalid_token")
            {
                ErrorCode::TokenExpired
            } else {
                ErrorCode::Unauthorized
            }
        }
        ErrorCode::RateLimited | ErrorCode::Forbidden if upstream.contains("quota") => ErrorCode::QuotaExceeded,
        ErrorCode::BadRequest if upstream.contains("invalid_grant") => ErrorCode::TokenInvalid,
        other => other,
    }
}

fn extract_detail(format: ErrorFormat, json: &Value) -> ErrorDetail {
    let parsed = match format {
        ErrorFormat::Generic => ErrorDetail {
            message: str_field(json, "message").or_else(|| str_field(json, "error")),
            code: str_field(json, "code"),
        },
        ErrorFormat::Nested => match json.get("error") {
            Some(inner) if inner.is_object() => ErrorDetail {
                message: str_field(inner, "message"),
                code: str_field(inner, "code").or_else(|| str_field(inner, "type")),
            },
            _ => ErrorDetail::default(),
        },
        ErrorFormat::OAuth => ErrorDetail {
            message: str_field(json, "error_description").or_else(|| str_field(json, "error")),
            code: str_field(json, "error"),
        },
        ErrorFormat::ErrorList => match json.get("errors").and_then(|e| e.as_array()) {
            Some(errors) => {
                let messages: Vec<String> = errors
                    .iter()
                    .filter_map(|e| str_field(e, "message").or_else(|| str_field(e, "detail")))
                    .collect();
                ErrorDetail {
                    message: (!messages.is_empty()).then(|| messages.join("; ")),
                    code: errors
                        .first()
                        .and_then(|e| str_field(e, "code").or_else(|| str_field(e, "type"))),
                }
            }
            None => ErrorDetail::default(),
        },
    };

    // Providers drift from their documented shape; try the generic one too.
    if parsed.message.is_none() && format != ErrorFormat::Generic {
        return extract_detail(ErrorFormat::Generic, json);
    }
    parsed
}

fn str_field(value: &Value, name: &str) -> Option<String> {
    match value.get(name)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
