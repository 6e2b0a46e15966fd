//! Host functions addressable by [`FunctionRef`].
//!
//! Callers cannot ship code. Anything dynamic they need done on the host,
//! such as a store transform or a node-target resolver, is registered here
//! up front and named by id.

use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, PoisonError, RwLock},
};

use futures::{FutureExt, future::BoxFuture};
use plugin_bridge_core::FunctionRef;
use serde_json::Value;

use crate::{HostApi, HostError};

/// Future returned by host functions and operation handlers.
pub type HostFuture = BoxFuture<'static, Result<Option<Value>, HostError>>;

/// A registered host function.
///
/// Receives the host API and one JSON argument. `Ok(None)` means the
/// function produced nothing.
pub type HostFn = Arc<dyn Fn(HostApi, Value) -> HostFuture + Send + Sync>;

/// Registry of host functions.
#[derive(Default)]
pub struct FunctionTable {
    functions: RwLock<HashMap<String, HostFn>>,
}

impl FunctionTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an async function under `id`, replacing any previous one.
    pub fn register<F, Fut>(&self, id: impl Into<String>, f: F)
    where
        F: Fn(HostApi, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Value>, HostError>> + Send + 'static,
    {
        let f: HostFn = Arc::new(move |api: HostApi, arg: Value| f(api, arg).boxed());
        self.functions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.into(), f);
    }

    /// Register a synchronous function under `id`.
    pub fn register_sync<F>(&self, id: impl Into<String>, f: F)
    where
        F: Fn(&HostApi, Value) -> Result<Option<Value>, HostError> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        self.register(id, move |api, arg| {
            let f = Arc::clone(&f);
            async move { f(&api, arg) }
        });
    }

    /// Whether a function is registered under `id`.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.functions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(id)
    }

    /// Look up the function a reference names.
    ///
    /// # Errors
    /// Returns `UnknownFunction` if nothing is registered under the id.
    pub fn resolve(&self, function: &FunctionRef) -> Result<HostFn, HostError> {
        self.functions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&function.id)
            .cloned()
            .ok_or_else(|| HostError::UnknownFunction(function.id.clone()))
    }

    /// Resolve and run a function.
    ///
    /// # Errors
    /// Returns `UnknownFunction`, or whatever the function fails with.
    pub async fn invoke(
        &self,
        api: &HostApi,
        function: &FunctionRef,
        arg: Value,
    ) -> Result<Option<Value>, HostError> {
        let f = self.resolve(function)?;
        f(api.clone(), arg).await
    }
}

impl std::fmt::Debug for FunctionTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let functions = self.functions.read().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<&String> = functions.keys().collect();
        ids.sort();
        f.debug_struct("FunctionTable").field("ids", &ids).finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::MemoryClientStorage;

    fn api() -> HostApi {
        HostApi::new(Arc::new(MemoryClientStorage::new()))
    }

    #[tokio::test]
    async fn test_invoke_registered_function() {
        let table = FunctionTable::new();
        table.register_sync("double", |_, arg| {
            let n = arg.as_i64().ok_or_else(|| HostError::msg("expected a number"))?;
            Ok(Some(json!(n * 2)))
        });

        let result = table
            .invoke(&api(), &FunctionRef::new("double"), json!(21))
            .await;
        assert_eq!(result, Ok(Some(json!(42))));
    }

    #[tokio::test]
    async fn test_unknown_function_is_an_error() {
        let table = FunctionTable::new();
        let result = table
            .invoke(&api(), &FunctionRef::new("missing"), Value::Null)
            .await;
        assert_eq!(result, Err(HostError::UnknownFunction("missing".into())));
    }

    #[tokio::test]
    async fn test_async_function_can_use_host_storage() {
        let table = FunctionTable::new();
        table.register("read_other", |api, arg| async move {
            let key = arg.as_str().unwrap_or_default().to_string();
            Ok::<_, HostError>(api.client_storage().get(&key).await?)
        });

        let api = api();
        api.client_storage().set("other", json!("x")).await.unwrap();
        let result = table
            .invoke(&api, &FunctionRef::new("read_other"), json!("other"))
            .await;
        assert_eq!(result, Ok(Some(json!("x"))));
        assert!(table.contains("read_other"));
    }
}
