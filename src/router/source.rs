//! Credential Sources
//!
//! Where the pool loads its credentials from: a local key file, or a remote key
//! server that can also delete keys and hand out single keys.

use crate::client::KeyServerClient;
use crate::error::{KeyrelayError, Result};
use crate::router::key_pool::CapabilityTier;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// A credential as stored in a key file or returned by the key server
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRecord {
    /// The secret
    pub key: String,

    /// Capability tier ("gpt-3" or "gpt-4" on the wire)
    #[serde(rename = "type")]
    pub tier: CapabilityTier,
}

impl KeyRecord {
    pub fn new(key: impl Into<String>, tier: CapabilityTier) -> Self {
        Self {
            key: key.into(),
            tier,
        }
    }
}

impl fmt::Debug for KeyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyRecord")
            .field("key", &crate::router::key_pool::redact(&self.key))
            .field("tier", &self.tier)
            .finish()
    }
}

/// Backing store of a [`CredentialPool`](crate::router::CredentialPool)
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Load the complete credential list
    async fn load(&self) -> Result<Vec<KeyRecord>>;

    /// Permanently delete a credential. Returns whether the source reported success.
    async fn delete(&self, _key: &str) -> Result<bool> {
        Err(KeyrelayError::KeyServerNotConfigured)
    }

    /// Hand out a single credential of the given tier
    async fn fetch_one(&self, _tier: CapabilityTier) -> Result<KeyRecord> {
        Err(KeyrelayError::KeyServerNotConfigured)
    }
}

/// Key file containing a JSON array of `{"key": ..., "type": ...}` records
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CredentialSource for FileSource {
    async fn load(&self) -> Result<Vec<KeyRecord>> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            KeyrelayError::Config(format!("Failed to read {}: {}", self.path.display(), e))
        })?;

        serde_json::from_str(&content).map_err(|e| {
            KeyrelayError::Config(format!("Failed to parse {}: {}", self.path.display(), e))
        })
    }
}

/// Remote key server
#[derive(Debug, Clone)]
pub struct KeyServerSource {
    client: KeyServerClient,
}

impl KeyServerSource {
    pub fn new(client: KeyServerClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CredentialSource for KeyServerSource {
    async fn load(&self) -> Result<Vec<KeyRecord>> {
        self.client.get_keys().await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.client.delete_key(key).await
    }

    async fn fetch_one(&self, tier: CapabilityTier) -> Result<KeyRecord> {
        self.client.get_key(tier).await
    }
}
