//! HTTP Client
//!
//! Upstream completion client: attaches the credential headers for the
//! configured auth mode and issues streamed requests.

use crate::api::CompletionRequest;
use crate::config::{AuthMode, UpstreamConfig};
use crate::error::{KeyrelayError, Result};
use crate::router::Credential;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Response};
use std::time::Duration;
use tracing::debug;

const API_KEY_HEADER: &str = "api-key";
const ORGANIZATION_HEADER: &str = "openai-organization";

/// Build the shared reqwest client
///
/// No overall timeout: completions stream for as long as the model generates.
pub fn build_http_client() -> Result<Client> {
    Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .pool_max_idle_per_host(10)
        .build()
        .map_err(|e| KeyrelayError::Config(format!("Failed to create HTTP client: {}", e)))
}

/// Client for the upstream chat completion endpoint
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    /// Inner reqwest client
    client: Client,

    /// Full `/chat/completions` URL
    url: String,

    auth_mode: AuthMode,

    organization: Option<String>,
}

impl UpstreamClient {
    /// Create a client for `config` on top of a shared reqwest client
    pub fn new(client: Client, config: &UpstreamConfig) -> Self {
        Self {
            client,
            url: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            auth_mode: config.auth_mode,
            organization: config.organization.clone().filter(|o| !o.is_empty()),
        }
    }

    /// The completion URL requests go to
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Headers carrying `credential` for the configured auth mode
    pub fn headers(&self, credential: &Credential) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));

        let invalid = |e: reqwest::header::InvalidHeaderValue| {
            KeyrelayError::Config(format!("Invalid API key format: {}", e))
        };
        match self.auth_mode {
            AuthMode::Bearer => {
                let mut value = HeaderValue::from_str(&format!("Bearer {}", credential.key()))
                    .map_err(invalid)?;
                value.set_sensitive(true);
                headers.insert(AUTHORIZATION, value);
            }
            AuthMode::ApiKey => {
                let mut value = HeaderValue::from_str(credential.key()).map_err(invalid)?;
                value.set_sensitive(true);
                headers.insert(HeaderName::from_static(API_KEY_HEADER), value);
            }
        }

        if let Some(org) = &self.organization {
            let value = HeaderValue::from_str(org).map_err(|e| {
                KeyrelayError::Config(format!("Invalid organization header: {}", e))
            })?;
            headers.insert(HeaderName::from_static(ORGANIZATION_HEADER), value);
        }

        Ok(headers)
    }

    /// Make a streaming POST request
    ///
    /// Returns the raw response whatever its status; the caller decides between
    /// re-streaming the body and reading the error object.
    pub async fn post_stream(
        &self,
        body: &CompletionRequest,
        credential: &Credential,
    ) -> Result<Response> {
        let headers = self.headers(credential)?;
        debug!(
            model = %body.model,
            credential = %credential.redacted(),
            "sending upstream completion request"
        );

        let response = self
            .client
            .post(&self.url)
            .headers(headers)
            .json(body)
            .send()
            .await?;

        Ok(response)
    }
}
