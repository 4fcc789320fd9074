//! Configuration Module
//!
//! Handles relay configuration loading and validation.

pub mod loader;
pub mod settings;

pub use loader::ConfigLoader;
pub use settings::{
    AuthMode, CredentialsConfig, KeyServerConfig, RelayConfig, RetryConfig, UpstreamConfig,
    DEFAULT_BASE_URL,
};
