//! Client Module
//!
//! HTTP clients for the upstream completion API and the key server.

pub mod http;
pub mod key_server;

pub use http::{build_http_client, UpstreamClient};
pub use key_server::KeyServerClient;
