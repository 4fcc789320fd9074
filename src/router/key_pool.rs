//! Credential Pool Management
//!
//! Holds the known API credentials partitioned by capability tier, loads them
//! lazily from a [`CredentialSource`], selects one per upstream call and evicts
//! credentials the upstream has revoked.
//!
//! Loading and eviction are serialized through one async lock, so concurrent
//! callers hitting an uninitialized pool trigger exactly one load, and an
//! eviction never interleaves with a load in flight.

use crate::client::KeyServerClient;
use crate::config::CredentialsConfig;
use crate::error::{KeyrelayError, Result};
use crate::router::source::{CredentialSource, FileSource, KeyRecord, KeyServerSource};
use crate::router::strategy::TierPreference;
use parking_lot::RwLock;
use rand::seq::IteratorRandom;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Capability tier of a credential, ordered by capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CapabilityTier {
    #[serde(rename = "gpt-3")]
    Standard,

    #[serde(rename = "gpt-4")]
    Premium,
}

impl fmt::Display for CapabilityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapabilityTier::Standard => write!(f, "gpt-3"),
            CapabilityTier::Premium => write!(f, "gpt-4"),
        }
    }
}

/// Short, log-safe form of a secret
pub(crate) fn redact(secret: &str) -> String {
    let tail: String = secret
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("...{}", tail)
}

/// A single API credential
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Credential {
    key: String,
    tier: CapabilityTier,
}

impl Credential {
    pub fn new(key: impl Into<String>, tier: CapabilityTier) -> Self {
        Self {
            key: key.into(),
            tier,
        }
    }

    /// The secret value
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn tier(&self) -> CapabilityTier {
        self.tier
    }

    /// Log-safe form of the key
    pub fn redacted(&self) -> String {
        redact(&self.key)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("key", &self.redacted())
            .field("tier", &self.tier)
            .finish()
    }
}

#[derive(Debug, Default)]
struct PoolState {
    standard: HashSet<String>,
    premium: HashSet<String>,
    initialized: bool,
    loads: u64,
}

impl PoolState {
    fn set(&self, tier: CapabilityTier) -> &HashSet<String> {
        match tier {
            CapabilityTier::Standard => &self.standard,
            CapabilityTier::Premium => &self.premium,
        }
    }

    /// Replace both sets with `records`. A key listed twice keeps its first tier.
    fn populate(&mut self, records: Vec<KeyRecord>) {
        self.standard.clear();
        self.premium.clear();
        for record in records {
            if self.standard.contains(&record.key) || self.premium.contains(&record.key) {
                continue;
            }
            match record.tier {
                CapabilityTier::Standard => self.standard.insert(record.key),
                CapabilityTier::Premium => self.premium.insert(record.key),
            };
        }
        self.initialized = true;
        self.loads += 1;
    }

    fn reset(&mut self) {
        self.standard.clear();
        self.premium.clear();
        self.initialized = false;
    }

    fn select(&self, preference: TierPreference, excluded: &HashSet<String>) -> Result<Credential> {
        let mut rng = rand::thread_rng();
        for tier in preference.search_order() {
            let candidates = self.set(tier).iter().filter(|key| !excluded.contains(*key));
            if let Some(key) = candidates.choose(&mut rng) {
                return Ok(Credential::new(key.clone(), tier));
            }
        }
        Err(KeyrelayError::NoCredentialsAvailable(preference.to_string()))
    }
}

/// Pool of API credentials shared across concurrent requests
pub struct CredentialPool {
    /// Where credentials are loaded from; `None` for override-only pools
    source: Option<Arc<dyn CredentialSource>>,

    /// Statically configured credential that bypasses the pool entirely
    override_key: Option<String>,

    state: RwLock<PoolState>,

    /// Serializes loads and evictions
    load_lock: Mutex<()>,
}

impl CredentialPool {
    /// Create an empty pool that loads from `source` on first use
    pub fn new(source: Arc<dyn CredentialSource>) -> Self {
        Self {
            source: Some(source),
            override_key: None,
            state: RwLock::new(PoolState::default()),
            load_lock: Mutex::new(()),
        }
    }

    /// Create a pool that always hands out `key` and has no backing source
    pub fn from_override(key: impl Into<String>) -> Self {
        Self {
            source: None,
            override_key: Some(key.into()),
            state: RwLock::new(PoolState::default()),
            load_lock: Mutex::new(()),
        }
    }

    /// Build a pool from configuration. A key server takes precedence over a key file.
    pub fn from_config(config: &CredentialsConfig, client: reqwest::Client) -> Result<Self> {
        let source: Option<Arc<dyn CredentialSource>> = match (&config.key_server, &config.key_file) {
            (Some(server), _) => Some(Arc::new(KeyServerSource::new(KeyServerClient::new(
                client, server,
            )))),
            (None, Some(path)) => Some(Arc::new(FileSource::new(path.clone()))),
            (None, None) => None,
        };
        let override_key = config.override_key.clone().filter(|k| !k.is_empty());

        if source.is_none() && override_key.is_none() {
            return Err(KeyrelayError::Config(
                "no credential source configured".to_string(),
            ));
        }

        Ok(Self {
            source,
            override_key,
            state: RwLock::new(PoolState::default()),
            load_lock: Mutex::new(()),
        })
    }

    /// Always hand out `key`, bypassing pool state. Empty keys are ignored.
    pub fn with_override(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.override_key = if key.is_empty() { None } else { Some(key) };
        self
    }

    fn source(&self) -> Result<&Arc<dyn CredentialSource>> {
        self.source
            .as_ref()
            .ok_or_else(|| KeyrelayError::Config("credential pool has no source".to_string()))
    }

    /// Select a credential for one upstream call
    pub async fn acquire(&self, preference: TierPreference) -> Result<Credential> {
        self.acquire_excluding(preference, &HashSet::new()).await
    }

    /// Like [`acquire`](Self::acquire), but never hands out a key in `excluded`
    ///
    /// Used by a single relay request to skip keys the upstream already
    /// rejected but that could not be evicted.
    pub async fn acquire_excluding(
        &self,
        preference: TierPreference,
        excluded: &HashSet<String>,
    ) -> Result<Credential> {
        if let Some(key) = &self.override_key {
            if excluded.contains(key) {
                return Err(KeyrelayError::NoCredentialsAvailable(format!(
                    "{} (override credential rejected)",
                    preference
                )));
            }
            return Ok(Credential::new(key.clone(), preference.preferred_tier()));
        }

        {
            let state = self.state.read();
            if state.initialized {
                return state.select(preference, excluded);
            }
        }

        let _guard = self.load_lock.lock().await;
        // Another caller may have finished loading while we waited.
        let initialized = self.state.read().initialized;
        if !initialized {
            self.load().await?;
        }
        self.state.read().select(preference, excluded)
    }

    /// Caller must hold `load_lock`.
    async fn load(&self) -> Result<()> {
        let records = match self.source()?.load().await {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "failed to load credentials");
                return Err(e);
            }
        };

        let mut state = self.state.write();
        state.populate(records);
        info!(
            standard = state.standard.len(),
            premium = state.premium.len(),
            loads = state.loads,
            "credential pool loaded"
        );
        Ok(())
    }

    /// Permanently delete `credential` at the key server
    ///
    /// On success the whole pool is reset and reloaded on the next
    /// [`acquire`](Self::acquire). Returns `false` if the server reported
    /// failure; the pool is left untouched in that case.
    pub async fn evict(&self, credential: &Credential) -> Result<bool> {
        if self.override_key.as_deref() == Some(credential.key()) {
            debug!("override credential is not pooled, skipping eviction");
            return Ok(false);
        }

        let source = match &self.source {
            Some(source) => source,
            None => return Err(KeyrelayError::KeyServerNotConfigured),
        };

        let _guard = self.load_lock.lock().await;
        let deleted = source.delete(credential.key()).await?;

        if deleted {
            self.state.write().reset();
            info!(
                credential = %credential.redacted(),
                tier = %credential.tier(),
                "credential evicted, pool will reload"
            );
        } else {
            warn!(
                credential = %credential.redacted(),
                "key server refused to delete credential"
            );
        }

        Ok(deleted)
    }

    /// Fetch one credential straight from the key server, bypassing pool state
    pub async fn acquire_single(&self, tier: CapabilityTier) -> Result<Credential> {
        if let Some(key) = &self.override_key {
            return Ok(Credential::new(key.clone(), tier));
        }

        let source = self
            .source
            .as_ref()
            .ok_or(KeyrelayError::KeyServerNotConfigured)?;
        let record = source.fetch_one(tier).await?;
        Ok(Credential::new(record.key, record.tier))
    }

    /// Whether a static override credential is configured
    pub fn has_override(&self) -> bool {
        self.override_key.is_some()
    }

    /// Get statistics about the pool
    pub fn stats(&self) -> PoolStats {
        let state = self.state.read();
        PoolStats {
            standard: state.standard.len(),
            premium: state.premium.len(),
            initialized: state.initialized,
            loads: state.loads,
        }
    }
}

impl fmt::Debug for CredentialPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialPool")
            .field("has_override", &self.has_override())
            .field("stats", &self.stats())
            .finish()
    }
}

/// Statistics about a credential pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub standard: usize,
    pub premium: usize,
    pub initialized: bool,
    /// Completed loads from the source since creation
    pub loads: u64,
}
