//! Keyrelay Error Types
//!
//! Error taxonomy shared by the credential pool, the key-server client and the
//! streaming relay.

use crate::api::ApiError;

/// Main error type for keyrelay operations
#[derive(Debug, thiserror::Error)]
pub enum KeyrelayError {
    /// Configuration errors (invalid JSON, missing sources, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// The pool has no credential for the requested tier (after fallback)
    #[error("No credentials available for {0}")]
    NoCredentialsAvailable(String),

    /// Eviction or single-key fetch requested on a pool without a key server
    #[error("No key server configured; file-backed pools cannot evict or fetch single keys")]
    KeyServerNotConfigured,

    /// The key server rejected our auth key
    #[error("Key server rejected access: {0}")]
    InvalidKeyServerAccess(String),

    /// Any other key server failure
    #[error("Key server error: {0}")]
    KeyServer(String),

    /// Upstream rejected the credential. Handled by the relay's retry loop;
    /// only surfaced for caller-supplied credentials.
    #[error("Upstream rejected credential: {}", .0.message)]
    UpstreamAuth(ApiError),

    /// Any other non-success upstream status
    #[error("Upstream request failed with status {status}: {body}")]
    Upstream { status: u16, body: String },

    /// Malformed event payload in the upstream stream
    #[error("Failed to parse stream event: {0}")]
    StreamParse(String),

    /// Transport failure while reading the upstream stream
    #[error("Streaming error: {0}")]
    Stream(String),

    /// Replacement credentials kept being rejected
    #[error("Gave up after {attempts} attempts with rejected credentials")]
    RetriesExhausted { attempts: u32 },

    /// HTTP request failed before a response arrived
    #[error("Request failed: {0}")]
    Request(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl KeyrelayError {
    /// HTTP status a request handler should answer with for this error.
    ///
    /// Credential exhaustion is distinguishable (503) from upstream failures (502).
    pub fn status_hint(&self) -> u16 {
        match self {
            KeyrelayError::NoCredentialsAvailable(_) | KeyrelayError::RetriesExhausted { .. } => {
                503
            }
            KeyrelayError::UpstreamAuth(_) => 401,
            KeyrelayError::Upstream { .. }
            | KeyrelayError::StreamParse(_)
            | KeyrelayError::Stream(_)
            | KeyrelayError::Request(_) => 502,
            _ => 500,
        }
    }
}

impl From<reqwest::Error> for KeyrelayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            KeyrelayError::Request(format!("Timed out: {}", err))
        } else if err.is_connect() {
            KeyrelayError::Request(format!("Connection failed: {}", err))
        } else if err.is_decode() {
            KeyrelayError::Request(format!("Failed to decode response: {}", err))
        } else {
            KeyrelayError::Request(err.to_string())
        }
    }
}

/// Result type alias for keyrelay operations
pub type Result<T> = std::result::Result<T, KeyrelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_hints() {
        assert_eq!(
            KeyrelayError::NoCredentialsAvailable("premium".into()).status_hint(),
            503
        );
        assert_eq!(
            KeyrelayError::Upstream {
                status: 500,
                body: "boom".into()
            }
            .status_hint(),
            502
        );
        assert_eq!(KeyrelayError::KeyServerNotConfigured.status_hint(), 500);
    }

    #[test]
    fn test_upstream_auth_display_uses_message() {
        let err = KeyrelayError::UpstreamAuth(ApiError {
            message: "Incorrect API key provided".into(),
            error_type: Some("invalid_request_error".into()),
            param: None,
            code: Some("invalid_api_key".into()),
        });
        assert_eq!(
            err.to_string(),
            "Upstream rejected credential: Incorrect API key provided"
        );
    }
}
