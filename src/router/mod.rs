//! Router Module
//!
//! Credential pool, credential sources and model tier selection.

pub mod key_pool;
pub mod source;
pub mod strategy;

pub use key_pool::{CapabilityTier, Credential, CredentialPool, PoolStats};
pub use source::{CredentialSource, FileSource, KeyRecord, KeyServerSource};
pub use strategy::{ModelTiers, TierPreference};
