//! @ai:module:intent Streaming path: SSE frame decoding and delta relay
//! @ai:module:layer application
//! @ai:module:public_api SseDecoder, SseFrame, StreamRelay, RelayEvent, RelayOutcome

pub mod relay;
pub mod sse;

pub use relay::{RelayEvent, RelayOutcome, StreamRelay};
pub use sse::{SseDecoder, SseFrame};
