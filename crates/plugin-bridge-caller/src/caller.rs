//! Request side of the bridge.
//!
//! A [`Caller`] owns the UI end of a transport. Each call gets the next
//! correlation id, is registered in the pending table, and is then sent. A
//! background pump reads replies and resolves the matching call; replies
//! for unknown ids and frames that are not replies are ignored.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use plugin_bridge_core::{
    CallId, CallRequest, Envelope, ExecutionContext, PluginMessage, RemoteOperation, Transport,
};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::{
    CallerConfig,
    pending::{PendingCall, PendingTable},
};

/// Message used when the host rejects a call without one.
pub const DEFAULT_REJECT_MESSAGE: &str = "An error occurred while running a host operation";

/// Caller error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CallError {
    #[error("No transport available to reach the host")]
    TransportUnavailable,
    #[error("Caller must run in the ui context, not the {0} context")]
    WrongContext(ExecutionContext),
    /// The host operation failed; carries the host's message verbatim.
    #[error("{0}")]
    HostExecution(String),
    #[error("Failed to encode call parameters: {0}")]
    Encode(String),
    #[error("Failed to decode call result: {0}")]
    Decode(String),
    #[error("Call {0} timed out")]
    Timeout(CallId),
    #[error("Call {0} was cancelled")]
    Cancelled(CallId),
}

struct Inner {
    transport: Arc<dyn Transport>,
    pending: Arc<PendingTable>,
    next_id: AtomicU64,
    config: CallerConfig,
    pump: JoinHandle<()>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.pump.abort();
        self.pending.close(&CallError::TransportUnavailable);
    }
}

/// Runs operations in the host and awaits their replies.
///
/// Cheap to clone; clones share the correlation id sequence and the
/// pending table. Concurrent calls are independent and may resolve in any
/// order.
#[derive(Clone)]
pub struct Caller {
    inner: Arc<Inner>,
}

impl Caller {
    /// Create a caller on the UI end of `transport` and start its reply pump.
    ///
    /// Must be called within a tokio runtime.
    ///
    /// # Errors
    /// Returns `WrongContext` if `transport` is a host-side endpoint.
    pub fn spawn(transport: Arc<dyn Transport>, config: CallerConfig) -> Result<Self, CallError> {
        let context = transport.context();
        if context != ExecutionContext::Ui {
            return Err(CallError::WrongContext(context));
        }

        let pending = Arc::new(PendingTable::new());
        let pump = tokio::spawn(pump(Arc::clone(&transport), Arc::clone(&pending)));

        Ok(Self {
            inner: Arc::new(Inner {
                transport,
                pending,
                next_id: AtomicU64::new(0),
                config,
                pump,
            }),
        })
    }

    /// The configuration this caller was created with.
    #[must_use]
    pub fn config(&self) -> &CallerConfig {
        &self.inner.config
    }

    /// Number of calls still awaiting a reply.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    /// Whether the transport is still open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.inner.pending.is_closed()
    }

    /// Send a call and return a handle to await its reply.
    ///
    /// # Errors
    /// Returns `Encode` if `params` cannot be serialized, or
    /// `TransportUnavailable` if the call cannot be sent.
    pub async fn start<P>(&self, op: &str, params: Option<&P>) -> Result<PendingCall, CallError>
    where
        P: Serialize + ?Sized,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let request =
            CallRequest::new(id, op, params).map_err(|e| CallError::Encode(e.to_string()))?;
        let frame = Envelope::for_plugin(PluginMessage::Eval(request), &self.inner.config.plugin_id)
            .encode()
            .map_err(|e| CallError::Encode(e.to_string()))?;

        // Register before sending so a fast reply cannot beat the entry.
        let rx = self.inner.pending.register(id)?;
        if let Err(e) = self.inner.transport.send(frame).await {
            self.inner.pending.remove(id);
            tracing::warn!(id, op, "Failed to send call: {e}");
            return Err(CallError::TransportUnavailable);
        }
        tracing::debug!(id, op, "Sent call");

        Ok(PendingCall::new(
            id,
            rx,
            Arc::clone(&self.inner.pending),
            self.inner.config.default_timeout(),
        ))
    }

    /// Run the operation named `op` and wait for its result.
    ///
    /// `Ok(None)` means the operation completed without producing a value.
    ///
    /// # Errors
    /// Returns `HostExecution` with the host's message if the operation
    /// failed, or any error from [`start`](Self::start) and
    /// [`PendingCall::wait`].
    pub async fn run<P>(&self, op: &str, params: Option<&P>) -> Result<Option<Value>, CallError>
    where
        P: Serialize + ?Sized,
    {
        self.start(op, params).await?.wait().await
    }

    /// Run a typed operation.
    ///
    /// # Errors
    /// Returns `Decode` if the host's result does not match `O::Output`,
    /// or any error from [`run`](Self::run).
    pub async fn call<O: RemoteOperation>(
        &self,
        params: &O::Params,
    ) -> Result<Option<O::Output>, CallError> {
        self.run(O::NAME, Some(params))
            .await?
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| CallError::Decode(e.to_string()))
    }
}

impl std::fmt::Debug for Caller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Caller")
            .field("config", &self.inner.config)
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

async fn pump(transport: Arc<dyn Transport>, pending: Arc<PendingTable>) {
    loop {
        match transport.recv().await {
            Ok(Some(frame)) => route(&pending, &frame),
            Ok(None) => {
                tracing::debug!("Caller transport closed");
                break;
            }
            Err(e) => {
                tracing::error!("Caller transport error: {e}");
                break;
            }
        }
    }
    pending.close(&CallError::TransportUnavailable);
}

fn route(pending: &PendingTable, frame: &str) {
    let envelope = match Envelope::decode(frame) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::trace!("Ignoring unrelated frame: {e}");
            return;
        }
    };
    let Some(response) = envelope.plugin_message.into_response() else {
        tracing::trace!("Ignoring call frame on the ui side");
        return;
    };

    let id = response.id();
    let outcome = response.into_result().map_err(|error| {
        CallError::HostExecution(error.unwrap_or_else(|| DEFAULT_REJECT_MESSAGE.to_string()))
    });
    if !pending.complete(id, outcome) {
        tracing::debug!(id, "Ignoring reply for unknown call");
    }
}

#[cfg(test)]
mod tests {
    use plugin_bridge_core::{CallResponse, ops::GetValue, ops::KeyParams};
    use plugin_bridge_transport::ChannelTransport;
    use serde_json::json;
    use tokio_test::assert_err;

    use super::*;

    fn connected() -> (Caller, ChannelTransport) {
        let (ui, host) = ChannelTransport::pair();
        let caller = Caller::spawn(Arc::new(ui), CallerConfig::default()).unwrap();
        (caller, host)
    }

    async fn next_request(host: &ChannelTransport) -> CallRequest {
        let frame = host.recv().await.unwrap().unwrap();
        match Envelope::decode(&frame).unwrap().plugin_message {
            PluginMessage::Eval(request) => request,
            other => panic!("expected a call, got {other:?}"),
        }
    }

    async fn reply(host: &ChannelTransport, response: CallResponse) {
        let frame = Envelope::new(response.into()).encode().unwrap();
        host.send(frame).await.unwrap();
    }

    #[tokio::test]
    async fn test_rejects_host_endpoint() {
        let (_ui, host) = ChannelTransport::pair();
        let result = Caller::spawn(Arc::new(host), CallerConfig::default());
        assert_eq!(
            result.err(),
            Some(CallError::WrongContext(ExecutionContext::Host))
        );
    }

    #[tokio::test]
    async fn test_ids_increase_and_params_are_encoded() {
        let (caller, host) = connected();

        let first = caller.start("a", Some(&json!({ "x": 1 }))).await.unwrap();
        let second = caller.start::<Value>("b", None).await.unwrap();
        assert!(second.id() > first.id());

        let req = next_request(&host).await;
        assert_eq!(req.code, "a");
        assert_eq!(req.params.as_deref(), Some(r#"{"x":1}"#));
        let req = next_request(&host).await;
        assert_eq!(req.code, "b");
        assert_eq!(req.params, None);
    }

    #[tokio::test]
    async fn test_success_resolves_with_result() {
        let (caller, host) = connected();
        let call = caller.start::<Value>("op", None).await.unwrap();
        let req = next_request(&host).await;

        reply(&host, CallResponse::success(req.id, Some(json!({ "a": [1, null] })))).await;
        assert_eq!(call.wait().await, Ok(Some(json!({ "a": [1, null] }))));
        assert_eq!(caller.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_failure_carries_message_or_fallback() {
        let (caller, host) = connected();
        let with_message = caller.start::<Value>("op", None).await.unwrap();
        let without_message = caller.start::<Value>("op", None).await.unwrap();
        let a = next_request(&host).await;
        let b = next_request(&host).await;

        reply(&host, CallResponse::failure(a.id, Some("boom".into()))).await;
        reply(&host, CallResponse::failure(b.id, None)).await;

        let err = with_message.wait().await.unwrap_err();
        assert_eq!(err.to_string(), "boom");
        let err = without_message.wait().await.unwrap_err();
        assert_eq!(err.to_string(), DEFAULT_REJECT_MESSAGE);
    }

    #[tokio::test]
    async fn test_non_string_error_uses_fallback() {
        let (caller, host) = connected();
        let call = caller.start::<Value>("op", None).await.unwrap();
        let req = next_request(&host).await;

        let frame = json!({
            "pluginMessage": { "kind": "EVAL_REJECT", "id": req.id, "error": { "code": 42 } }
        });
        host.send(frame.to_string()).await.unwrap();

        let outcome = tokio::time::timeout(std::time::Duration::from_secs(1), call.wait())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            Err(CallError::HostExecution(DEFAULT_REJECT_MESSAGE.into()))
        );
    }

    #[tokio::test]
    async fn test_out_of_order_replies_keep_identity() {
        let (caller, host) = connected();
        let a = caller.start::<Value>("a", None).await.unwrap();
        let b = caller.start::<Value>("b", None).await.unwrap();
        let req_a = next_request(&host).await;
        let req_b = next_request(&host).await;

        reply(&host, CallResponse::success(req_b.id, Some(json!("B")))).await;
        reply(&host, CallResponse::success(req_a.id, Some(json!("A")))).await;

        assert_eq!(a.wait().await, Ok(Some(json!("A"))));
        assert_eq!(b.wait().await, Ok(Some(json!("B"))));
    }

    #[tokio::test]
    async fn test_duplicate_and_unknown_replies_are_ignored() {
        let (caller, host) = connected();
        let call = caller.start::<Value>("op", None).await.unwrap();
        let req = next_request(&host).await;

        host.send(r#"{"unrelated":true}"#.to_string()).await.unwrap();
        reply(&host, CallResponse::success(999, Some(json!("stray")))).await;
        reply(&host, CallResponse::success(req.id, Some(json!(1)))).await;
        reply(&host, CallResponse::success(req.id, Some(json!(2)))).await;

        assert_eq!(call.wait().await, Ok(Some(json!(1))));
    }

    #[tokio::test]
    async fn test_typed_call_decodes_output() {
        let (caller, host) = connected();
        let responder = tokio::spawn(async move {
            let req = next_request(&host).await;
            assert_eq!(req.code, GetValue::NAME);
            reply(&host, CallResponse::success(req.id, Some(json!(5)))).await;
            host
        });

        let value = caller
            .call::<GetValue>(&KeyParams { key: "count".into() })
            .await
            .unwrap();
        assert_eq!(value, Some(json!(5)));
        drop(responder.await.unwrap());
    }

    #[tokio::test]
    async fn test_closed_transport_fails_pending_calls() {
        let (caller, host) = connected();
        let call = caller.start::<Value>("op", None).await.unwrap();
        let _ = next_request(&host).await;

        drop(host);
        assert_eq!(call.wait().await, Err(CallError::TransportUnavailable));
        assert_err!(caller.run::<Value>("op", None).await);
    }

    #[tokio::test]
    async fn test_dropping_caller_fails_pending_calls() {
        let (caller, host) = connected();
        let call = caller.start::<Value>("op", None).await.unwrap();
        let _ = next_request(&host).await;

        drop(caller);
        let outcome = tokio::time::timeout(std::time::Duration::from_secs(1), call.wait())
            .await
            .unwrap();
        assert_eq!(outcome, Err(CallError::TransportUnavailable));
    }

    #[tokio::test]
    async fn test_configured_timeout_applies() {
        let (ui, _host) = ChannelTransport::pair();
        let config = CallerConfig::new().timeout(std::time::Duration::from_millis(20));
        let caller = Caller::spawn(Arc::new(ui), config).unwrap();

        let result = caller.run::<Value>("never", None).await;
        assert!(matches!(result, Err(CallError::Timeout(_))));
        assert_eq!(caller.pending_count(), 0);
    }
}
