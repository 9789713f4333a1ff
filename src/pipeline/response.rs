//! Pipeline response type.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The result of a successful provider call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    /// Parsed body: JSON when the upstream says so, otherwise a string.
    pub data: serde_json::Value,
    pub status: u16,
    /// Response headers (lower-cased names).
    pub headers: BTreeMap<String, String>,
    /// True when served from the response cache.
    pub cached: bool,
}

impl ApiResponse {
    pub fn new(status: u16, data: serde_json::Value) -> Self {
        Self {
            data,
            status,
            headers: BTreeMap::new(),
            cached: false,
        }
    }

    /// Copy of this response flagged as a cache hit.
    pub fn from_cache(&self) -> Self {
        Self {
            cached: true,
            ..self.clone()
        }
    }
}
