//! Core traits for moving frames between contexts.

use async_trait::async_trait;
use thiserror::Error;

use crate::ExecutionContext;

/// Transport error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Transport closed")]
    Closed,
    #[error("Transport error: {0}")]
    Io(String),
}

/// One end of a bidirectional, order-preserving message channel.
///
/// Transports move JSON text frames and never interpret them. Every frame
/// sent on one end is delivered to the other end's `recv`.
///
/// This trait is object-safe (`Arc<dyn Transport>`).
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// The context this endpoint lives in.
    fn context(&self) -> ExecutionContext;

    /// Send a frame to the peer.
    async fn send(&self, frame: String) -> Result<(), TransportError>;

    /// Receive the next frame, or `None` once the peer has gone away.
    async fn recv(&self) -> Result<Option<String>, TransportError>;
}
