//! WebSocket endpoint serving an executor.
//!
//! Each upgraded connection is the host end of one bridge: the UI sends
//! call frames as text messages and receives replies the same way.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt, stream::SplitStream};
use plugin_bridge_core::{ExecutionContext, Transport, TransportError};
use plugin_bridge_executor::Executor;
use tokio::sync::{Mutex, mpsc};

/// Host end of a bridge carried over a WebSocket.
pub struct WebSocketTransport {
    tx: mpsc::UnboundedSender<String>,
    rx: Mutex<SplitStream<WebSocket>>,
}

impl WebSocketTransport {
    /// Wrap an upgraded socket.
    ///
    /// Outgoing frames are written by a forwarding task that ends when the
    /// transport is dropped or the socket stops accepting writes.
    #[must_use]
    pub fn new(socket: WebSocket) -> Self {
        let (mut sink, stream) = socket.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if sink.send(Message::Text(frame.into())).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        Self {
            tx,
            rx: Mutex::new(stream),
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn context(&self) -> ExecutionContext {
        ExecutionContext::Host
    }

    async fn send(&self, frame: String) -> Result<(), TransportError> {
        self.tx.send(frame).map_err(|_| TransportError::Closed)
    }

    async fn recv(&self) -> Result<Option<String>, TransportError> {
        let mut stream = self.rx.lock().await;
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text.to_string())),
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => return Ok(Some(text)),
                    Err(_) => {
                        tracing::debug!("Ignoring non-UTF-8 binary frame");
                    }
                },
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(TransportError::Io(e.to_string())),
            }
        }
    }
}

impl std::fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketTransport").finish_non_exhaustive()
    }
}

/// WebSocket handler state.
#[derive(Clone, Debug)]
pub struct WsState {
    /// Executor serving every connection.
    pub executor: Executor,
}

impl WsState {
    /// Create new WebSocket state.
    #[must_use]
    pub const fn new(executor: Executor) -> Self {
        Self { executor }
    }
}

/// WebSocket upgrade handler.
///
/// Use this as an Axum route handler.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<WsState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: WsState) {
    tracing::info!("Bridge connection opened");
    let transport: Arc<dyn Transport> = Arc::new(WebSocketTransport::new(socket));
    match state.executor.serve(transport).await {
        Ok(()) => tracing::info!("Bridge connection closed"),
        Err(e) => tracing::error!("Bridge connection failed: {e}"),
    }
}

/// Create WebSocket router.
///
/// # Example
/// ```ignore
/// let app = Router::new()
///     .merge(create_ws_router(executor));
/// ```
#[must_use]
pub fn create_ws_router(executor: Executor) -> axum::Router {
    axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .with_state(WsState::new(executor))
}
