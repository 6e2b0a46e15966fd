//! Execution side of the bridge.
//!
//! The executor reads call frames from the host end of a transport, runs
//! the named operation with the privileged [`HostApi`], and sends exactly one
//! reply per call. Calls run concurrently, so replies may leave in a
//! different order than the calls arrived.

use std::{any::Any, future::Future, sync::Arc};

use plugin_bridge_core::{
    CallRequest, CallResponse, Envelope, ExecutionContext, PluginMessage, RemoteOperation,
    Transport, TransportError,
};
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::{FunctionTable, HostApi, HostError, OperationRegistry, builtins};

/// Serve error.
#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("Executor must run in the host context, not the {0} context")]
    WrongContext(ExecutionContext),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

struct Inner {
    api: HostApi,
    registry: OperationRegistry,
}

/// Dispatches calls to registered operations.
///
/// Cheap to clone; clones share the registry and host API.
#[derive(Clone)]
pub struct Executor {
    inner: Arc<Inner>,
}

impl Executor {
    /// Create an executor with no operations registered.
    #[must_use]
    pub fn new(api: HostApi) -> Self {
        Self {
            inner: Arc::new(Inner {
                api,
                registry: OperationRegistry::new(),
            }),
        }
    }

    /// Create an executor with the built-in storage and node-target
    /// operations registered.
    #[must_use]
    pub fn with_builtins(api: HostApi) -> Self {
        let executor = Self::new(api);
        builtins::register(&executor.inner.registry);
        executor
    }

    /// The host API passed to operations.
    #[must_use]
    pub fn api(&self) -> &HostApi {
        &self.inner.api
    }

    /// Host functions addressable by `FunctionRef`.
    #[must_use]
    pub fn functions(&self) -> &FunctionTable {
        self.inner.api.functions()
    }

    /// The operation registry.
    #[must_use]
    pub fn registry(&self) -> &OperationRegistry {
        &self.inner.registry
    }

    /// Register a typed operation.
    pub fn register<O, F, Fut>(&self, f: F)
    where
        O: RemoteOperation,
        F: Fn(HostApi, O::Params) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<O::Output>, HostError>> + Send + 'static,
    {
        self.inner.registry.register::<O, F, Fut>(f);
    }

    /// Register an operation over untyped JSON parameters.
    pub fn register_raw<F, Fut>(&self, name: impl Into<String>, f: F)
    where
        F: Fn(HostApi, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Value>, HostError>> + Send + 'static,
    {
        self.inner.registry.register_raw(name, f);
    }

    /// Run one call and produce its reply.
    ///
    /// Operation failures, including panics, become failure replies. A
    /// panic payload that is a string is reported as the message; any
    /// other payload is reported without one.
    pub async fn handle(&self, request: CallRequest) -> CallResponse {
        let CallRequest { id, code, params } = request;

        let outcome = match self.inner.registry.get(&code) {
            Some(handler) => {
                let task = tokio::spawn(handler(self.inner.api.clone(), params));
                match task.await {
                    Ok(outcome) => outcome,
                    Err(e) if e.is_panic() => Err(panic_error(e.into_panic())),
                    Err(_) => Err(HostError::msg("Host operation was cancelled")),
                }
            }
            None => Err(HostError::UnknownOperation(code.clone())),
        };

        match outcome {
            Ok(result) => {
                tracing::debug!(id, op = %code, "Call succeeded");
                CallResponse::success(id, result)
            }
            Err(e) => {
                tracing::warn!(id, op = %code, "Call failed: {e}");
                CallResponse::failure(id, e.message())
            }
        }
    }

    /// Serve calls arriving on the host end of `transport` until it closes.
    ///
    /// Frames that are not calls are ignored.
    ///
    /// # Errors
    /// Returns `WrongContext` if `transport` is a UI-side endpoint, or the
    /// transport's error if receiving fails.
    pub async fn serve(&self, transport: Arc<dyn Transport>) -> Result<(), ServeError> {
        let context = transport.context();
        if context != ExecutionContext::Host {
            return Err(ServeError::WrongContext(context));
        }

        while let Some(frame) = transport.recv().await? {
            let request = match Envelope::decode(&frame) {
                Ok(Envelope {
                    plugin_message: PluginMessage::Eval(request),
                    ..
                }) => request,
                Ok(_) => {
                    tracing::trace!("Ignoring non-call frame on the host side");
                    continue;
                }
                Err(e) => {
                    tracing::trace!("Ignoring unrelated frame: {e}");
                    continue;
                }
            };

            let executor = self.clone();
            let transport = Arc::clone(&transport);
            tokio::spawn(async move {
                let id = request.id;
                let Some(frame) = encode_reply(executor.handle(request).await) else {
                    return;
                };
                if let Err(e) = transport.send(frame).await {
                    tracing::warn!(id, "Failed to send reply: {e}");
                }
            });
        }

        tracing::debug!("Executor transport closed");
        Ok(())
    }

    /// Serve `transport` on a background task.
    #[must_use]
    pub fn spawn_serve(&self, transport: Arc<dyn Transport>) -> JoinHandle<Result<(), ServeError>> {
        let executor = self.clone();
        tokio::spawn(async move { executor.serve(transport).await })
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("registry", &self.inner.registry)
            .finish_non_exhaustive()
    }
}

fn panic_error(payload: Box<dyn Any + Send>) -> HostError {
    if let Some(message) = payload.downcast_ref::<&str>() {
        HostError::msg(*message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        HostError::msg(message.clone())
    } else {
        HostError::Opaque
    }
}

/// Encode a reply, falling back to a failure reply if the result cannot be
/// encoded so the caller still hears back exactly once.
fn encode_reply(response: CallResponse) -> Option<String> {
    let id = response.id();
    match Envelope::new(response.into()).encode() {
        Ok(frame) => Some(frame),
        Err(e) => {
            tracing::error!(id, "Failed to encode reply: {e}");
            let fallback = CallResponse::failure(id, Some(format!("Failed to encode result: {e}")));
            Envelope::new(fallback.into()).encode().ok()
        }
    }
}

#[cfg(test)]
mod tests {
    use plugin_bridge_core::ops::{GetValue, KeyParams};
    use serde_json::json;

    use super::*;
    use crate::MemoryClientStorage;

    fn executor() -> Executor {
        let storage = MemoryClientStorage::with_entries([("count", json!(5))]);
        Executor::with_builtins(HostApi::new(Arc::new(storage)))
    }

    fn request<P: serde::Serialize>(id: u64, code: &str, params: Option<&P>) -> CallRequest {
        CallRequest::new(id, code, params).unwrap()
    }

    #[tokio::test]
    async fn test_builtin_get() {
        let response = executor()
            .handle(request(1, GetValue::NAME, Some(&KeyParams { key: "count".into() })))
            .await;
        assert_eq!(response, CallResponse::success(1, Some(json!(5))));
    }

    #[tokio::test]
    async fn test_unset_key_yields_no_result() {
        let response = executor()
            .handle(request(2, GetValue::NAME, Some(&KeyParams { key: "missing".into() })))
            .await;
        assert_eq!(response, CallResponse::success(2, None));
    }

    #[tokio::test]
    async fn test_unknown_operation_is_rejected() {
        let response = executor().handle(request::<Value>(3, "nope", None)).await;
        assert_eq!(
            response,
            CallResponse::failure(3, Some("Unknown operation: nope".into()))
        );
    }

    #[tokio::test]
    async fn test_thrown_message_is_reported() {
        let executor = executor();
        executor.register_raw("fail", |_, _| async { Err(HostError::msg("boom")) });
        executor.register_raw("opaque", |_, _| async { Err(HostError::Opaque) });

        let response = executor.handle(request::<Value>(4, "fail", None)).await;
        assert_eq!(response, CallResponse::failure(4, Some("boom".into())));
        let response = executor.handle(request::<Value>(5, "opaque", None)).await;
        assert_eq!(response, CallResponse::failure(5, None));
    }

    #[tokio::test]
    async fn test_panics_become_failures() {
        let executor = executor();
        executor.register_raw("panic_str", |_, arg: Value| async move {
            let n = arg.as_i64().expect("kaboom");
            Ok(Some(json!(n)))
        });
        executor.register_raw("panic_any", |_, arg: Value| async move {
            if arg.is_null() {
                std::panic::panic_any(42_u32);
            }
            Ok(Some(arg))
        });

        let response = executor.handle(request::<Value>(6, "panic_str", None)).await;
        assert_eq!(response, CallResponse::failure(6, Some("kaboom".into())));
        let response = executor.handle(request::<Value>(7, "panic_any", None)).await;
        assert_eq!(response, CallResponse::failure(7, None));
    }

    #[tokio::test]
    async fn test_rejects_ui_endpoint() {
        let (ui, _host) = plugin_bridge_transport::ChannelTransport::pair();
        let result = executor().serve(Arc::new(ui)).await;
        assert!(matches!(
            result,
            Err(ServeError::WrongContext(ExecutionContext::Ui))
        ));
    }
}
