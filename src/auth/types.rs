//! Credential and token types.

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Current wall-clock time in seconds since the epoch.
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// A durable credential for one `(user, provider)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCredential {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Expiry in seconds since the epoch.
    #[serde(default)]
    pub access_token_expires_at: Option<u64>,
}

/// An access token held in memory by the token manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Expiry in seconds since the epoch; `None` never expires.
    pub expires_at: Option<u64>,
    pub provider: String,
    pub user_id: String,
}

impl TokenInfo {
    pub fn from_credential(user_id: &str, provider: &str, credential: StoredCredential) -> Self {
        Self {
            access_token: credential.access_token,
            refresh_token: credential.refresh_token,
            expires_at: credential.access_token_expires_at,
            provider: provider.to_string(),
            user_id: user_id.to_string(),
        }
    }

    pub fn to_credential(&self) -> StoredCredential {
        StoredCredential {
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
            access_token_expires_at: self.expires_at,
        }
    }

    /// Usable only while `now + buffer < expires_at`.
    pub fn is_valid(&self, buffer: Duration) -> bool {
        self.is_valid_at(now_secs(), buffer)
    }

    pub fn is_valid_at(&self, now_secs: u64, buffer: Duration) -> bool {
        match self.expires_at {
            Some(expires_at) => now_secs + buffer.as_secs() < expires_at,
            None => true,
        }
    }
}

/// Token endpoint response for a refresh grant.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Lifetime in seconds.
    #[serde(default)]
    pub expires_in: Option<u64>,
}
