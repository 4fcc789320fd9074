//! Chat Completion API
//!
//! Request and error types exchanged with the upstream completion endpoint.

use serde::{Deserialize, Serialize};

/// Error code the upstream uses for invalid or revoked keys
pub const INVALID_API_KEY_CODE: &str = "invalid_api_key";

/// A message in a chat conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Role: "system", "user" or "assistant"
    pub role: String,

    /// Message text
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// An incoming relay request, as handed over by the request handler
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayRequest {
    /// Model identifier, also used for the tier lookup
    pub model: String,

    /// Optional system prompt, sent ahead of the conversation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// Sampling temperature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Conversation so far
    pub messages: Vec<Message>,
}

impl RelayRequest {
    /// Create a new relay request
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            system_prompt: None,
            temperature: None,
            messages,
        }
    }

    /// Set the system prompt
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Set temperature
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Build the streamed upstream request body
    pub fn to_completion_request(&self) -> CompletionRequest {
        let mut messages = Vec::with_capacity(self.messages.len() + 1);
        if let Some(prompt) = self.system_prompt.as_deref().filter(|p| !p.is_empty()) {
            messages.push(Message::system(prompt));
        }
        messages.extend(self.messages.iter().cloned());

        CompletionRequest {
            model: self.model.clone(),
            messages,
            temperature: self.temperature,
            stream: true,
        }
    }
}

/// Chat completion request as sent upstream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,

    pub messages: Vec<Message>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    pub stream: bool,
}

/// Error body returned by the upstream on failure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ApiError,
}

/// Upstream-reported error details
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    /// Human readable message
    #[serde(default)]
    pub message: String,

    /// Error class, e.g. "invalid_request_error"
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,

    /// Offending parameter, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub param: Option<String>,

    /// Machine readable code, e.g. "invalid_api_key"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ApiError {
    /// Parse an upstream error body; `None` if it is not the documented shape
    pub fn from_body(body: &str) -> Option<Self> {
        serde_json::from_str::<ErrorResponse>(body)
            .ok()
            .map(|r| r.error)
    }

    /// Whether the upstream rejected the credential itself
    pub fn is_invalid_credential(&self) -> bool {
        self.code.as_deref() == Some(INVALID_API_KEY_CODE)
    }
}
