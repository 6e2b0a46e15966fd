//! In-memory duplex transport.

use async_trait::async_trait;
use plugin_bridge_core::{ExecutionContext, Transport, TransportError};
use tokio::sync::{Mutex, mpsc};

/// One end of an in-memory channel pair.
///
/// Frames sent on one end arrive, in order, on the other end's `recv`.
/// Dropping an end closes the channel for its peer.
pub struct ChannelTransport {
    context: ExecutionContext,
    tx: mpsc::UnboundedSender<String>,
    rx: Mutex<mpsc::UnboundedReceiver<String>>,
}

impl ChannelTransport {
    /// Create an endpoint from raw channel halves.
    #[must_use]
    pub fn new(
        context: ExecutionContext,
        tx: mpsc::UnboundedSender<String>,
        rx: mpsc::UnboundedReceiver<String>,
    ) -> Self {
        Self {
            context,
            tx,
            rx: Mutex::new(rx),
        }
    }

    /// Create a connected `(ui, host)` pair.
    #[must_use]
    pub fn pair() -> (Self, Self) {
        let (ui_tx, host_rx) = mpsc::unbounded_channel();
        let (host_tx, ui_rx) = mpsc::unbounded_channel();

        let ui = Self::new(ExecutionContext::Ui, ui_tx, ui_rx);
        let host = Self::new(ExecutionContext::Host, host_tx, host_rx);

        (ui, host)
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    fn context(&self) -> ExecutionContext {
        self.context
    }

    async fn send(&self, frame: String) -> Result<(), TransportError> {
        self.tx.send(frame).map_err(|_| TransportError::Closed)
    }

    async fn recv(&self) -> Result<Option<String>, TransportError> {
        Ok(self.rx.lock().await.recv().await)
    }
}

impl std::fmt::Debug for ChannelTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelTransport")
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}
