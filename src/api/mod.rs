//! API Module
//!
//! Upstream wire types and the SSE re-framing stream.

pub mod completion;
pub mod streaming;

pub use completion::{
    ApiError, CompletionRequest, ErrorResponse, Message, RelayRequest, INVALID_API_KEY_CODE,
};
pub use streaming::{
    parse_event, reframe, StreamChoice, StreamChunk, StreamDelta, TextStream, UpstreamEvent,
};
