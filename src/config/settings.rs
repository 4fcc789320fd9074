//! Relay Configuration
//!
//! Defines the configuration schema for the upstream endpoint, the credential
//! sources and the retry budget.

use crate::error::{KeyrelayError, Result};
use crate::router::{CapabilityTier, ModelTiers};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Default OpenAI-compatible base URL
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Upstream completion endpoint
    pub upstream: UpstreamConfig,

    /// Where credentials come from
    pub credentials: CredentialsConfig,

    /// Budget for retrying with replacement credentials
    pub retry: RetryConfig,

    /// Extra model to tier entries, merged over the built-in table
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub models: HashMap<String, CapabilityTier>,
}

impl RelayConfig {
    /// Check that a pool can be built from this configuration
    pub fn validate(&self) -> Result<()> {
        let credentials = &self.credentials;
        if credentials.override_key.is_none()
            && credentials.key_file.is_none()
            && credentials.key_server.is_none()
        {
            return Err(KeyrelayError::Config(
                "no credential source: set credentials.override_key, credentials.key_file or credentials.key_server".to_string(),
            ));
        }

        if let Some(server) = &credentials.key_server {
            if server.url.is_empty() {
                return Err(KeyrelayError::Config("key_server.url is empty".to_string()));
            }
        }

        if self.retry.max_attempts == 0 {
            return Err(KeyrelayError::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Built-in model tiers with the configured entries applied on top
    pub fn model_tiers(&self) -> ModelTiers {
        let mut tiers = ModelTiers::builtin();
        tiers.extend(self.models.clone());
        tiers
    }
}

/// Upstream endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL, `/chat/completions` is appended
    pub base_url: String,

    /// How the credential is attached to requests
    pub auth_mode: AuthMode,

    /// Optional organization header value
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            auth_mode: AuthMode::default(),
            organization: None,
        }
    }
}

/// Credential header style, fixed per deployment
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    /// `Authorization: Bearer <key>`
    #[default]
    Bearer,

    /// `api-key: <key>` (Azure-style deployments)
    ApiKey,
}

impl std::str::FromStr for AuthMode {
    type Err = KeyrelayError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bearer" => Ok(AuthMode::Bearer),
            "api_key" | "api-key" | "azure" => Ok(AuthMode::ApiKey),
            other => Err(KeyrelayError::Config(format!(
                "Unknown auth mode '{}'. Expected 'bearer' or 'api_key'",
                other
            ))),
        }
    }
}

/// Credential source configuration
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    /// Single static credential; bypasses the pool when set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub override_key: Option<String>,

    /// Local key file (JSON array of `{key, type}`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_file: Option<PathBuf>,

    /// Remote key server; takes precedence over `key_file`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_server: Option<KeyServerConfig>,
}

impl fmt::Debug for CredentialsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialsConfig")
            .field("override_key", &self.override_key.as_ref().map(|_| "<redacted>"))
            .field("key_file", &self.key_file)
            .field("key_server", &self.key_server)
            .finish()
    }
}

/// Remote key server location and shared secret
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct KeyServerConfig {
    pub url: String,
    pub auth_key: String,
}

impl fmt::Debug for KeyServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyServerConfig")
            .field("url", &self.url)
            .field("auth_key", &"<redacted>")
            .finish()
    }
}

/// Retry budget for credential rejections
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Upstream attempts per relay call, including the first
    pub max_attempts: u32,

    /// First wait between attempts
    pub initial_interval_ms: u64,

    /// Cap on a single wait
    pub max_interval_ms: u64,

    /// Total time budget across all attempts
    pub max_elapsed_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            initial_interval_ms: 100,
            max_interval_ms: 2_000,
            max_elapsed_secs: 30,
        }
    }
}

impl RetryConfig {
    /// Backoff schedule for one relay call
    pub fn backoff(&self) -> backoff::ExponentialBackoff {
        backoff::ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(self.initial_interval_ms))
            .with_max_interval(Duration::from_millis(self.max_interval_ms))
            .with_max_elapsed_time(Some(Duration::from_secs(self.max_elapsed_secs)))
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backoff::backoff::Backoff;

    #[test]
    fn test_deserialize_relay_config() {
        let json = r#"{
            "upstream": {
                "base_url": "https://example.openai.azure.com/openai",
                "auth_mode": "api_key",
                "organization": "org-123"
            },
            "credentials": {
                "key_server": { "url": "https://keys.internal", "auth_key": "secret" }
            },
            "retry": { "max_attempts": 3 },
            "models": { "my-finetune": "gpt-4" }
        }"#;

        let config: RelayConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.upstream.auth_mode, AuthMode::ApiKey);
        assert_eq!(config.upstream.organization.as_deref(), Some("org-123"));
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.max_elapsed_secs, 30);
        assert!(config.validate().is_ok());
        assert_eq!(
            config.model_tiers().tier_for("my-finetune"),
            Some(CapabilityTier::Premium)
        );
    }

    #[test]
    fn test_defaults() {
        let config: RelayConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.upstream.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.upstream.auth_mode, AuthMode::Bearer);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let mut config = RelayConfig::default();
        config.credentials.override_key = Some("sk-x".to_string());
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_auth_mode_from_str() {
        assert_eq!("Bearer".parse::<AuthMode>().unwrap(), AuthMode::Bearer);
        assert_eq!("azure".parse::<AuthMode>().unwrap(), AuthMode::ApiKey);
        assert!("basic".parse::<AuthMode>().is_err());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let credentials = CredentialsConfig {
            override_key: Some("sk-topsecret".to_string()),
            key_file: None,
            key_server: Some(KeyServerConfig {
                url: "https://keys.internal".to_string(),
                auth_key: "hunter2".to_string(),
            }),
        };
        let debug = format!("{:?}", credentials);
        assert!(!debug.contains("topsecret"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_backoff_respects_initial_interval() {
        let retry = RetryConfig {
            initial_interval_ms: 10,
            ..Default::default()
        };
        let wait = retry.backoff().next_backoff().unwrap();
        // Default randomization factor is 0.5.
        assert!(wait <= Duration::from_millis(15));
    }
}
