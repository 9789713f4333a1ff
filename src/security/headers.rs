//! Secret redaction for logged headers.

use reqwest::header::HeaderMap;
use std::collections::BTreeMap;

pub const REDACTED: &str = "[REDACTED]";

const SENSITIVE_HEADERS: &[&str] = &[
    "authorization",
    "proxy-authorization",
    "cookie",
    "set-cookie",
    "x-api-key",
    "api-key",
    "x-auth-token",
];

const SENSITIVE_FRAGMENTS: &[&str] = &["token", "secret", "api-key", "apikey", "password"];

/// Whether a header's value must never reach a log line.
pub fn is_sensitive(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    SENSITIVE_HEADERS.contains(&name.as_str())
        || SENSITIVE_FRAGMENTS.iter().any(|fragment| name.contains(fragment))
}

/// Copy of `headers` safe to log; `extra` names additional secret headers
/// (e.g. a provider's custom API-key header).
pub fn redact_headers(headers: &HeaderMap, extra: &[&str]) -> BTreeMap<String, String> {
    headers
        .iter()
        .map(|(name, value)| {
            let name = name.as_str().to_string();
            let secret = is_sensitive(&name) || extra.iter().any(|e| e.eq_ignore_ascii_case(&name));
            let value = if secret {
                REDACTED.to_string()
            } else {
                value.to_str().unwrap_or("<binary>").to_string()
            };
            (name, value)
        })
        .collect()
}

/// Same as [`redact_headers`] for plain string maps.
pub fn redact_map(headers: &BTreeMap<String, String>, extra: &[&str]) -> BTreeMap<String, String> {
    headers
        .iter()
        .map(|(name, value)| {
            let secret = is_sensitive(name) || extra.iter().any(|e| e.eq_ignore_ascii_case(name));
            let value = if secret { REDACTED.to_string() } else { value.clone() };
            (name.clone(), value)
        })
        .collect()
}
