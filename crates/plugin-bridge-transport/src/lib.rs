//! Transports for the plugin bridge.
//!
//! Provides:
//! - `ChannelTransport` - In-memory duplex pair for in-process wiring and tests
//! - WebSocket endpoint serving an `Executor` (feature: websocket)

pub mod channel;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use channel::ChannelTransport;
