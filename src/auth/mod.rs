//! Credentials and OAuth tokens.
//!
//! # Responsibilities
//! - Abstract the durable credential store (`get` / `update`)
//! - Keep valid access tokens in memory and refresh them on expiry
//! - Guarantee at most one refresh in flight per `(user, provider)`

pub mod credentials;
pub mod token;
pub mod types;

pub use credentials::{CredentialStore, CredentialStoreError, InMemoryCredentialStore};
pub use token::{TokenManager, TokenSettings};
pub use types::{StoredCredential, TokenInfo};
