//! Canonical cache keys.
//!
//! Keys are built from named fields kept in a sorted map, and query pairs are
//! sorted by name, so two callers describing the same read in a different
//! order land on the same entry. Names and values are form-encoded before
//! joining, so separators inside a value cannot forge another field.

use std::collections::BTreeMap;
use url::form_urlencoded::byte_serialize;

const FIELD_SEPARATOR: char = '|';

fn encode(raw: &str) -> String {
    byte_serialize(raw.as_bytes()).collect()
}

/// Builder for canonical cache keys.
#[derive(Debug, Clone, Default)]
pub struct CacheKeyBuilder {
    prefix: String,
    fields: BTreeMap<String, String>,
}

impl CacheKeyBuilder {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn field(mut self, name: &str, value: impl Into<String>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    /// Add a field only when `value` is present.
    pub fn optional_field(self, name: &str, value: Option<&str>) -> Self {
        match value {
            Some(value) => self.field(name, value),
            None => self,
        }
    }

    /// Add the query string as a single field with pairs sorted by name.
    pub fn query<'a, I>(self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        let mut pairs: Vec<_> = pairs.into_iter().collect();
        if pairs.is_empty() {
            return self;
        }
        pairs.sort();
        let rendered = pairs
            .iter()
            .map(|(k, v)| format!("{}={}", encode(k), encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        self.field("query", rendered)
    }

    /// Prefix of every key for one user, for `invalidate_prefix`.
    pub fn user_prefix(prefix: &str, user_id: &str) -> String {
        format!(
            "{}{sep}userId={}{sep}",
            encode(prefix),
            encode(user_id),
            sep = FIELD_SEPARATOR
        )
    }

    pub fn build(self) -> String {
        let mut key = encode(&self.prefix);
        // userId leads so that per-user prefix invalidation works.
        if let Some(user) = self.fields.get("userId") {
            key.push(FIELD_SEPARATOR);
            key.push_str("userId=");
            key.push_str(&encode(user));
        }
        for (name, value) in self.fields.iter().filter(|(name, _)| name.as_str() != "userId") {
            key.push(FIELD_SEPARATOR);
            key.push_str(&encode(name));
            key.push('=');
            // The query field is already encoded pair by pair.
            if name == "query" {
                key.push_str(value);
            } else {
                key.push_str(&encode(value));
            }
        }
        key
    }
}

/// Key for one provider read.
pub fn request_key(
    prefix: &str,
    provider: &str,
    user_id: &str,
    account_id: Option<&str>,
    path: &str,
    query: &BTreeMap<String, String>,
) -> String {
    CacheKeyBuilder::new(prefix)
        .field("provider", provider)
        .field("userId", user_id)
        .optional_field("accountId", account_id)
        .field("path", path)
        .query(query)
        .build()
}
