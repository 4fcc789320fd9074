//! Keyrelay - credential pool and streaming relay
//!
//! Sits in front of an OpenAI-style chat completion API. Keeps a pool of API
//! keys split by capability tier, picks one per call, evicts keys the upstream
//! reports as invalid and retries with a replacement, then turns the upstream
//! SSE stream into a plain stream of generated text.
//!
//! ```no_run
//! use futures::StreamExt;
//! use keyrelay::{ConfigLoader, Message, RelayRequest, StreamRelay};
//!
//! # async fn run() -> keyrelay::Result<()> {
//! let relay = StreamRelay::from_config(ConfigLoader::new()?.config())?;
//! let request = RelayRequest::new("gpt-4", vec![Message::user("Hello")]);
//!
//! let mut stream = relay.relay(&request, None).await?;
//! while let Some(segment) = stream.next().await {
//!     print!("{}", String::from_utf8_lossy(&segment?));
//! }
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod relay;
pub mod router;

pub use api::{ApiError, Message, RelayRequest, TextStream, UpstreamEvent};
pub use config::{ConfigLoader, RelayConfig};
pub use error::{KeyrelayError, Result};
pub use relay::StreamRelay;
pub use router::{
    CapabilityTier, Credential, CredentialPool, CredentialSource, KeyRecord, ModelTiers,
    PoolStats, TierPreference,
};
