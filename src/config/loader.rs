//! Configuration Loader
//!
//! Loads the relay configuration from a JSON file and applies environment
//! variable overrides on top.

use crate::config::settings::{KeyServerConfig, RelayConfig};
use crate::error::{KeyrelayError, Result};
use std::path::{Path, PathBuf};

/// Environment variable naming an explicit config file
pub const CONFIG_PATH_ENV: &str = "KEYRELAY_CONFIG";

/// Configuration loader with support for multiple sources
pub struct ConfigLoader {
    config: RelayConfig,
}

impl ConfigLoader {
    /// Load from the first existing default path, then the environment
    pub fn new() -> Result<Self> {
        let mut loader = Self {
            config: RelayConfig::default(),
        };

        loader.load_from_default_paths()?;
        loader.apply_env_overrides()?;

        Ok(loader)
    }

    /// Load a specific config file, then the environment
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let mut loader = Self {
            config: RelayConfig::default(),
        };

        loader.load_from_file(path)?;
        loader.apply_env_overrides()?;

        Ok(loader)
    }

    /// Load configuration from default paths
    fn load_from_default_paths(&mut self) -> Result<()> {
        if let Some(path) = Self::get_config_paths().into_iter().find(|p| p.exists()) {
            self.load_from_file(&path)?;
        }
        Ok(())
    }

    /// Get list of config paths to check, most specific first
    fn get_config_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        // 1. Environment variable
        if let Ok(custom_path) = std::env::var(CONFIG_PATH_ENV) {
            paths.push(PathBuf::from(custom_path));
        }

        // 2. Current directory
        paths.push(PathBuf::from("keyrelay.json"));

        // 3. User config directory
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("keyrelay").join("config.json"));
        }

        // 4. Home directory
        if let Some(home_dir) = dirs::home_dir() {
            paths.push(home_dir.join(".keyrelay").join("config.json"));
        }

        paths
    }

    /// Load configuration from a specific file
    fn load_from_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            KeyrelayError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let config: RelayConfig = serde_json::from_str(&content).map_err(|e| {
            KeyrelayError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })?;

        self.merge_config(config);
        Ok(())
    }

    /// Merge another config into this one (sections are replaced, model tiers merged)
    fn merge_config(&mut self, other: RelayConfig) {
        let mut models = std::mem::take(&mut self.config.models);
        models.extend(other.models);
        self.config = RelayConfig { models, ..other };
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides looked up through `var`; empty values are ignored
    pub fn apply_overrides_from<F>(&mut self, var: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| var(name).filter(|v| !v.trim().is_empty());
        let config = &mut self.config;

        if let Some(key) = var("OPENAI_API_KEY") {
            config.credentials.override_key = Some(key);
        }
        if let Some(org) = var("OPENAI_ORGANIZATION") {
            config.upstream.organization = Some(org);
        }
        if let Some(url) = var("OPENAI_BASE_URL") {
            config.upstream.base_url = url;
        }
        if let Some(mode) = var("KEYRELAY_AUTH_MODE") {
            config.upstream.auth_mode = mode.parse()?;
        }
        if let Some(path) = var("KEYS_FILE") {
            config.credentials.key_file = Some(PathBuf::from(path));
        }

        match (var("KEY_SERVER_URL"), var("KEY_SERVER_AUTH_KEY")) {
            (Some(url), Some(auth_key)) => {
                config.credentials.key_server = Some(KeyServerConfig { url, auth_key });
            }
            (Some(url), None) => match config.credentials.key_server.as_mut() {
                Some(server) => server.url = url,
                None => {
                    return Err(KeyrelayError::Config(
                        "KEY_SERVER_URL is set but KEY_SERVER_AUTH_KEY is missing".to_string(),
                    ))
                }
            },
            (None, Some(auth_key)) => {
                if let Some(server) = config.credentials.key_server.as_mut() {
                    server.auth_key = auth_key;
                }
            }
            (None, None) => {}
        }

        Ok(())
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Take ownership of the configuration
    pub fn into_config(self) -> RelayConfig {
        self.config
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new().unwrap_or_else(|_| Self {
            config: RelayConfig::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::AuthMode;
    use crate::router::CapabilityTier;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    fn empty_loader() -> ConfigLoader {
        ConfigLoader {
            config: RelayConfig::default(),
        }
    }

    #[test]
    fn test_load_from_custom_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{
                "upstream": {{ "base_url": "https://proxy.example.com/v1" }},
                "credentials": {{ "key_file": "/etc/keyrelay/keys.json" }},
                "models": {{ "gpt-4-custom": "gpt-4" }}
            }}"#
        )
        .unwrap();

        let mut loader = empty_loader();
        loader.load_from_file(file.path()).unwrap();

        let config = loader.config();
        assert_eq!(config.upstream.base_url, "https://proxy.example.com/v1");
        assert_eq!(
            config.credentials.key_file,
            Some(PathBuf::from("/etc/keyrelay/keys.json"))
        );
        assert_eq!(
            config.models.get("gpt-4-custom"),
            Some(&CapabilityTier::Premium)
        );
    }

    #[test]
    fn test_load_invalid_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "not json").unwrap();

        let mut loader = empty_loader();
        assert!(matches!(
            loader.load_from_file(file.path()),
            Err(KeyrelayError::Config(_))
        ));
    }

    #[test]
    fn test_merge_keeps_model_entries() {
        let mut loader = empty_loader();
        loader
            .config
            .models
            .insert("a".to_string(), CapabilityTier::Standard);

        let mut other = RelayConfig::default();
        other.models.insert("b".to_string(), CapabilityTier::Premium);
        other.retry.max_attempts = 2;
        loader.merge_config(other);

        assert_eq!(loader.config().models.len(), 2);
        assert_eq!(loader.config().retry.max_attempts, 2);
    }

    #[test]
    fn test_env_overrides() {
        let mut loader = empty_loader();
        loader
            .apply_overrides_from(env(&[
                ("OPENAI_API_KEY", "sk-env"),
                ("OPENAI_ORGANIZATION", "org-env"),
                ("KEYRELAY_AUTH_MODE", "api_key"),
                ("KEY_SERVER_URL", "https://keys.example.com"),
                ("KEY_SERVER_AUTH_KEY", "shared"),
            ]))
            .unwrap();

        let config = loader.config();
        assert_eq!(config.credentials.override_key.as_deref(), Some("sk-env"));
        assert_eq!(config.upstream.organization.as_deref(), Some("org-env"));
        assert_eq!(config.upstream.auth_mode, AuthMode::ApiKey);
        let server = config.credentials.key_server.as_ref().unwrap();
        assert_eq!(server.url, "https://keys.example.com");
        assert_eq!(server.auth_key, "shared");
    }

    #[test]
    fn test_empty_env_values_are_ignored() {
        let mut loader = empty_loader();
        loader
            .apply_overrides_from(env(&[("OPENAI_API_KEY", "  ")]))
            .unwrap();
        assert!(loader.config().credentials.override_key.is_none());
    }

    #[test]
    fn test_key_server_url_without_auth_key() {
        let mut loader = empty_loader();
        assert!(loader
            .apply_overrides_from(env(&[("KEY_SERVER_URL", "https://keys.example.com")]))
            .is_err());
    }
}
