//! Stream Relay
//!
//! Resolves a credential, issues the streamed upstream call, evicts and replaces
//! credentials the upstream rejects, and hands back the re-framed text stream.

use crate::api::{reframe, ApiError, CompletionRequest, RelayRequest, TextStream};
use crate::client::{build_http_client, UpstreamClient};
use crate::config::{RelayConfig, RetryConfig};
use crate::error::{KeyrelayError, Result};
use crate::router::{Credential, CredentialPool, ModelTiers};
use backoff::backoff::Backoff;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

/// Outcome of one upstream attempt
enum Attempt {
    Streaming(TextStream),
    Rejected(ApiError),
}

/// Relays completion requests through the credential pool
pub struct StreamRelay {
    pool: Arc<CredentialPool>,
    upstream: UpstreamClient,
    tiers: ModelTiers,
    retry: RetryConfig,
}

impl StreamRelay {
    pub fn new(
        pool: Arc<CredentialPool>,
        upstream: UpstreamClient,
        tiers: ModelTiers,
        retry: RetryConfig,
    ) -> Self {
        Self {
            pool,
            upstream,
            tiers,
            retry,
        }
    }

    /// Build the pool and clients described by `config`
    pub fn from_config(config: &RelayConfig) -> Result<Self> {
        config.validate()?;
        let client = build_http_client()?;
        let pool = CredentialPool::from_config(&config.credentials, client.clone())?;

        Ok(Self::new(
            Arc::new(pool),
            UpstreamClient::new(client, &config.upstream),
            config.model_tiers(),
            config.retry.clone(),
        ))
    }

    /// The shared credential pool
    pub fn pool(&self) -> &Arc<CredentialPool> {
        &self.pool
    }

    /// Start a streamed completion and return its text stream
    ///
    /// A non-empty `credential_override` is used as-is: it is never evicted, and
    /// an upstream rejection surfaces as [`KeyrelayError::UpstreamAuth`].
    /// Otherwise pooled credentials are tried until one is accepted, the pool
    /// runs dry (`NoCredentialsAvailable`) or the retry budget is spent
    /// (`RetriesExhausted`). A rejected key is never retried within the same
    /// call, even when it could not be evicted.
    pub async fn relay(
        &self,
        request: &RelayRequest,
        credential_override: Option<&str>,
    ) -> Result<TextStream> {
        let body = request.to_completion_request();
        let preference = self.tiers.preference_for(&request.model);

        if let Some(key) = credential_override.filter(|k| !k.is_empty()) {
            let credential = Credential::new(key, preference.preferred_tier());
            return match self.attempt(&body, &credential).await? {
                Attempt::Streaming(stream) => Ok(stream),
                Attempt::Rejected(error) => Err(KeyrelayError::UpstreamAuth(error)),
            };
        }

        let mut backoff = self.retry.backoff();
        let mut attempts = 0;
        let mut rejected = HashSet::new();

        loop {
            let credential = self.pool.acquire_excluding(preference, &rejected).await?;
            attempts += 1;

            let error = match self.attempt(&body, &credential).await? {
                Attempt::Streaming(stream) => return Ok(stream),
                Attempt::Rejected(error) => error,
            };

            warn!(
                credential = %credential.redacted(),
                tier = %credential.tier(),
                attempt = attempts,
                message = %error.message,
                "upstream rejected credential"
            );

            match self.pool.evict(&credential).await {
                Ok(true) => info!(credential = %credential.redacted(), "rejected credential evicted"),
                Ok(false) => warn!(credential = %credential.redacted(), "rejected credential not evicted"),
                Err(e) => warn!(credential = %credential.redacted(), error = %e, "eviction failed"),
            }
            rejected.insert(credential.key().to_string());

            if attempts >= self.retry.max_attempts {
                return Err(KeyrelayError::RetriesExhausted { attempts });
            }
            match backoff.next_backoff() {
                Some(wait) => tokio::time::sleep(wait).await,
                None => return Err(KeyrelayError::RetriesExhausted { attempts }),
            }
        }
    }

    async fn attempt(&self, body: &CompletionRequest, credential: &Credential) -> Result<Attempt> {
        let response = self.upstream.post_stream(body, credential).await?;
        let status = response.status();

        if status.is_success() {
            return Ok(Attempt::Streaming(reframe(response.bytes_stream())));
        }

        let text = match response.text().await {
            Ok(text) => text,
            Err(e) => {
                warn!(status = status.as_u16(), error = %e, "failed to read upstream error body");
                return Err(KeyrelayError::Request(format!(
                    "upstream returned {} and the body could not be read: {}",
                    status.as_u16(),
                    e
                )));
            }
        };
        match ApiError::from_body(&text) {
            Some(error) if error.is_invalid_credential() => Ok(Attempt::Rejected(error)),
            _ => {
                warn!(status = status.as_u16(), body = %text, "upstream request failed");
                Err(KeyrelayError::Upstream {
                    status: status.as_u16(),
                    body: text,
                })
            }
        }
    }
}
