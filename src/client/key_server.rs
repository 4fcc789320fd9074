//! Key Server Client
//!
//! Talks to the remote key server that owns the credential inventory. Every
//! call carries the shared `authKey`.

use crate::config::KeyServerConfig;
use crate::error::{KeyrelayError, Result};
use crate::router::{CapabilityTier, KeyRecord};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

const NO_KEYS_MESSAGE: &str = "No keys available";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AuthRequest<'a> {
    auth_key: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DeleteKeyRequest<'a> {
    auth_key: &'a str,
    key: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GetKeyRequest<'a> {
    auth_key: &'a str,
    key_type: CapabilityTier,
}

#[derive(Deserialize)]
struct DeleteKeyResponse {
    success: bool,
}

/// `/getKey` answers with either a record or a bare key string
#[derive(Deserialize)]
#[serde(untagged)]
enum GetKeyResponse {
    Record {
        key: String,
        #[serde(rename = "type", default)]
        tier: Option<CapabilityTier>,
    },
    Bare(String),
}

/// Client for the remote key server
#[derive(Clone)]
pub struct KeyServerClient {
    client: Client,
    base_url: String,
    auth_key: String,
}

impl fmt::Debug for KeyServerClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyServerClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl KeyServerClient {
    pub fn new(client: Client, config: &KeyServerConfig) -> Self {
        Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            auth_key: config.auth_key.clone(),
        }
    }

    /// Bulk-fetch every credential (`POST /getKeys`)
    pub async fn get_keys(&self) -> Result<Vec<KeyRecord>> {
        let records: Vec<KeyRecord> = self
            .post(
                "getKeys",
                &AuthRequest {
                    auth_key: &self.auth_key,
                },
            )
            .await?;
        debug!(count = records.len(), "fetched keys from key server");
        Ok(records)
    }

    /// Permanently delete a credential (`POST /deleteKey`)
    pub async fn delete_key(&self, key: &str) -> Result<bool> {
        let response: DeleteKeyResponse = self
            .post(
                "deleteKey",
                &DeleteKeyRequest {
                    auth_key: &self.auth_key,
                    key,
                },
            )
            .await?;
        Ok(response.success)
    }

    /// Fetch a single credential of `tier` (`POST /getKey`)
    pub async fn get_key(&self, tier: CapabilityTier) -> Result<KeyRecord> {
        let response = self
            .client
            .post(self.endpoint("getKey"))
            .json(&GetKeyRequest {
                auth_key: &self.auth_key,
                key_type: tier,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status == StatusCode::SERVICE_UNAVAILABLE || body.contains(NO_KEYS_MESSAGE) {
                return Err(KeyrelayError::NoCredentialsAvailable(tier.to_string()));
            }
            return Err(Self::status_error(status, body));
        }

        let body = response.text().await?;
        if body.contains(NO_KEYS_MESSAGE) {
            return Err(KeyrelayError::NoCredentialsAvailable(tier.to_string()));
        }

        let record = match serde_json::from_str::<GetKeyResponse>(&body).map_err(|e| {
            KeyrelayError::KeyServer(format!("Failed to parse getKey response: {}", e))
        })? {
            GetKeyResponse::Record { key, tier: served } => {
                KeyRecord::new(key, served.unwrap_or(tier))
            }
            GetKeyResponse::Bare(key) => KeyRecord::new(key, tier),
        };
        Ok(record)
    }

    fn endpoint(&self, operation: &str) -> String {
        format!("{}/{}", self.base_url, operation)
    }

    async fn post<T, R>(&self, operation: &str, body: &T) -> Result<R>
    where
        T: Serialize,
        R: DeserializeOwned,
    {
        let response = self
            .client
            .post(self.endpoint(operation))
            .json(body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(Self::status_error(status, text));
        }

        serde_json::from_str(&text).map_err(|e| {
            KeyrelayError::KeyServer(format!(
                "Failed to parse {} response: {}. Body: {}",
                operation,
                e,
                text.chars().take(200).collect::<String>()
            ))
        })
    }

    fn status_error(status: StatusCode, body: String) -> KeyrelayError {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => {
                KeyrelayError::InvalidKeyServerAccess(format!("status {}", status.as_u16()))
            }
            _ => KeyrelayError::KeyServer(format!("status {}: {}", status.as_u16(), body)),
        }
    }
}
