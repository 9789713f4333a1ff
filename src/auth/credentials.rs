//! Credential storage.
//!
//! The durable store is an external collaborator; the gateway only needs
//! `get` and `update`. [`InMemoryCredentialStore`] backs single-instance
//! deployments and tests, optionally seeded from and saved to a JSON file.
//! With a file set, every `update` rewrites it so rotated refresh tokens
//! survive a crash.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

use super::types::StoredCredential;

#[derive(Debug, Error)]
pub enum CredentialStoreError {
    #[error("credential store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("credential file is malformed: {0}")]
    Format(#[from] serde_json::Error),

    #[error("credential store unavailable: {0}")]
    Unavailable(String),
}

/// Durable per-user credential storage.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get(&self, user_id: &str, provider: &str) -> Result<Option<StoredCredential>, CredentialStoreError>;

    async fn update(
        &self,
        user_id: &str,
        provider: &str,
        credential: StoredCredential,
    ) -> Result<(), CredentialStoreError>;
}

/// One row of the credential file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CredentialRecord {
    user_id: String,
    provider: String,
    #[serde(flatten)]
    credential: StoredCredential,
}

/// A thread-safe in-memory credential store.
#[derive(Clone, Default)]
pub struct InMemoryCredentialStore {
    inner: Arc<DashMap<(String, String), StoredCredential>>,
    persistence_path: Option<String>,
    /// Serializes snapshot-and-write so a stale snapshot never lands last.
    write_lock: Arc<Mutex<()>>,
}

impl InMemoryCredentialStore {
    pub fn new(persistence_path: Option<String>) -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
            persistence_path,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Load from `path` if it exists; the store saves back to the same file.
    pub fn load_from_file(path: &str) -> Result<Self, CredentialStoreError> {
        let store = Self::new(Some(path.to_string()));
        if Path::new(path).exists() {
            let reader = BufReader::new(File::open(path)?);
            let records: Vec<CredentialRecord> = serde_json::from_reader(reader)?;
            for record in records {
                store.insert(&record.user_id, &record.provider, record.credential);
            }
            tracing::info!(count = store.len(), path = %path, "Loaded credentials");
        }
        Ok(store)
    }

    /// Write every credential to the persistence file, if one is set.
    ///
    /// The file is written beside the target and renamed over it, readable by
    /// the owner only.
    pub fn save_to_file(&self) -> Result<(), CredentialStoreError> {
        let Some(path) = &self.persistence_path else {
            return Ok(());
        };
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());

        let mut records: Vec<CredentialRecord> = self
            .inner
            .iter()
            .map(|entry| CredentialRecord {
                user_id: entry.key().0.clone(),
                provider: entry.key().1.clone(),
                credential: entry.value().clone(),
            })
            .collect();
        records.sort_by(|a, b| (&a.user_id, &a.provider).cmp(&(&b.user_id, &b.provider)));

        let temp = format!("{}.tmp", path);
        let mut writer = BufWriter::new(create_private(&temp)?);
        serde_json::to_writer_pretty(&mut writer, &records)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        drop(writer);
        fs::rename(&temp, path)?;

        tracing::debug!(count = records.len(), path = %path, "Saved credentials");
        Ok(())
    }

    pub fn insert(&self, user_id: &str, provider: &str, credential: StoredCredential) {
        self.inner
            .insert((user_id.to_string(), provider.to_string()), credential);
    }

    pub fn remove(&self, user_id: &str, provider: &str) -> bool {
        self.inner
            .remove(&(user_id.to_string(), provider.to_string()))
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn get(&self, user_id: &str, provider: &str) -> Result<Option<StoredCredential>, CredentialStoreError> {
        Ok(self
            .inner
            .get(&(user_id.to_string(), provider.to_string()))
            .map(|entry| entry.value().clone()))
    }

    async fn update(
        &self,
        user_id: &str,
        provider: &str,
        credential: StoredCredential,
    ) -> Result<(), CredentialStoreError> {
        self.insert(user_id, provider, credential);
        if self.persistence_path.is_none() {
            return Ok(());
        }
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.save_to_file())
            .await
            .map_err(|e| CredentialStoreError::Unavailable(e.to_string()))?
    }
}

fn create_private(path: &str) -> Result<File, std::io::Error> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path)
}
