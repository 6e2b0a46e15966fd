//! Registry of operations the executor can run.

use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, PoisonError, RwLock},
};

use futures::FutureExt;
use plugin_bridge_core::RemoteOperation;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::{HostApi, HostError, functions::HostFuture};

/// Type-erased operation handler.
///
/// Receives the host API and the raw JSON parameter string, if any.
pub type OpHandler = Arc<dyn Fn(HostApi, Option<String>) -> HostFuture + Send + Sync>;

/// Operation name -> handler.
#[derive(Default)]
pub struct OperationRegistry {
    handlers: RwLock<HashMap<String, OpHandler>>,
}

impl OperationRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, name: String, handler: OpHandler) {
        let replaced = self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.clone(), handler)
            .is_some();
        if replaced {
            tracing::debug!(op = %name, "Replaced operation handler");
        }
    }

    /// Register a typed operation.
    ///
    /// Parameters are decoded into `O::Params` before `f` runs; an
    /// undecodable payload fails the call with `InvalidParams`.
    pub fn register<O, F, Fut>(&self, f: F)
    where
        O: RemoteOperation,
        F: Fn(HostApi, O::Params) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<O::Output>, HostError>> + Send + 'static,
    {
        let f = Arc::new(f);
        let handler: OpHandler = Arc::new(move |api: HostApi, params: Option<String>| {
            let f = Arc::clone(&f);
            async move {
                let params: O::Params = decode_params(O::NAME, params.as_deref())?;
                f(api, params)
                    .await?
                    .map(serde_json::to_value)
                    .transpose()
                    .map_err(|e| HostError::Encode(e.to_string()))
            }
            .boxed()
        });
        self.insert(O::NAME.to_string(), handler);
    }

    /// Register an operation over untyped JSON parameters.
    ///
    /// Absent parameters arrive as `Value::Null`.
    pub fn register_raw<F, Fut>(&self, name: impl Into<String>, f: F)
    where
        F: Fn(HostApi, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Value>, HostError>> + Send + 'static,
    {
        let name = name.into();
        let op = name.clone();
        let f = Arc::new(f);
        let handler: OpHandler = Arc::new(move |api: HostApi, params: Option<String>| {
            let f = Arc::clone(&f);
            let op = op.clone();
            async move {
                let params: Value = decode_params(&op, params.as_deref())?;
                f(api, params).await
            }
            .boxed()
        });
        self.insert(name, handler);
    }

    /// Look up the handler for `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<OpHandler> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Registered operation names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for OperationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationRegistry")
            .field("names", &self.names())
            .finish()
    }
}

fn decode_params<P: DeserializeOwned>(op: &str, params: Option<&str>) -> Result<P, HostError> {
    serde_json::from_str(params.unwrap_or("null")).map_err(|e| HostError::InvalidParams {
        op: op.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use plugin_bridge_core::ops::{GetValue, KeyParams};
    use serde_json::json;

    use super::*;
    use crate::MemoryClientStorage;

    fn api() -> HostApi {
        HostApi::new(Arc::new(MemoryClientStorage::new()))
    }

    #[tokio::test]
    async fn test_typed_handler_decodes_params() {
        let registry = OperationRegistry::new();
        registry.register::<GetValue, _, _>(|_, params: KeyParams| async move {
            Ok(Some(json!(format!("value of {}", params.key))))
        });

        let handler = registry.get(GetValue::NAME).unwrap();
        let result = handler(api(), Some(r#"{"key":"count"}"#.into())).await;
        assert_eq!(result, Ok(Some(json!("value of count"))));
    }

    #[tokio::test]
    async fn test_typed_handler_rejects_bad_params() {
        let registry = OperationRegistry::new();
        registry.register::<GetValue, _, _>(|_, _| async move { Ok(None) });

        let handler = registry.get(GetValue::NAME).unwrap();
        let result = handler(api(), Some(r#"{"nope":1}"#.into())).await;
        assert!(matches!(result, Err(HostError::InvalidParams { .. })));
        let result = handler(api(), None).await;
        assert!(matches!(result, Err(HostError::InvalidParams { .. })));
    }

    #[tokio::test]
    async fn test_raw_handler_sees_null_for_absent_params() {
        let registry = OperationRegistry::new();
        registry.register_raw("echo", |_, params| async move { Ok(Some(params)) });

        let handler = registry.get("echo").unwrap();
        assert_eq!(handler(api(), None).await, Ok(Some(Value::Null)));
        assert_eq!(registry.names(), vec!["echo"]);
    }
}
