//! Built-in storage and node-target operations.

use plugin_bridge_core::ops::{
    DeleteValue, GetValue, KeyParams, ListKeys, ResolveNodeTarget, ResolveNodeTargetParams,
    SetValue, SetValueParams, UpdateValue, UpdateValueParams,
};
use serde_json::Value;

use crate::{HostApi, HostError, OperationRegistry};

/// Register every built-in operation.
pub fn register(registry: &OperationRegistry) {
    registry.register::<GetValue, _, _>(get_value);
    registry.register::<SetValue, _, _>(set_value);
    registry.register::<UpdateValue, _, _>(update_value);
    registry.register::<DeleteValue, _, _>(delete_value);
    registry.register::<ListKeys, _, _>(list_keys);
    registry.register::<ResolveNodeTarget, _, _>(resolve_node_target);
}

/// Empty keys address nothing.
async fn get_value(api: HostApi, KeyParams { key }: KeyParams) -> Result<Option<Value>, HostError> {
    if key.is_empty() {
        return Ok(None);
    }
    Ok(api.client_storage().get(&key).await?)
}

async fn set_value(
    api: HostApi,
    SetValueParams { key, value }: SetValueParams,
) -> Result<Option<Value>, HostError> {
    if key.is_empty() {
        return Ok(None);
    }
    let _guard = api.lock_key(&key).await;
    api.client_storage().set(&key, value.clone()).await?;
    tracing::debug!(%key, "Stored value");
    Ok(Some(value))
}

/// Read-modify-write under the key lock, so no other write to `key` through
/// this executor lands between the read and the write.
async fn update_value(
    api: HostApi,
    UpdateValueParams {
        key,
        transform,
        initial_value,
    }: UpdateValueParams,
) -> Result<Option<Value>, HostError> {
    if key.is_empty() {
        return Ok(None);
    }
    let _guard = api.lock_key(&key).await;

    let current = api
        .client_storage()
        .get(&key)
        .await?
        .unwrap_or(initial_value);

    let Some(updated) = api.functions().invoke(&api, &transform, current).await? else {
        tracing::debug!(%key, transform = %transform.id, "Transform declined update");
        return Ok(None);
    };

    api.client_storage().set(&key, updated.clone()).await?;
    tracing::debug!(%key, transform = %transform.id, "Updated value");
    Ok(Some(updated))
}

async fn delete_value(api: HostApi, KeyParams { key }: KeyParams) -> Result<Option<bool>, HostError> {
    if key.is_empty() {
        return Ok(Some(false));
    }
    let _guard = api.lock_key(&key).await;
    Ok(Some(api.client_storage().delete(&key).await?))
}

async fn list_keys(api: HostApi, (): ()) -> Result<Option<Vec<String>>, HostError> {
    Ok(Some(api.client_storage().keys().await?))
}

async fn resolve_node_target(
    api: HostApi,
    ResolveNodeTargetParams { resolver, params }: ResolveNodeTargetParams,
) -> Result<Option<Value>, HostError> {
    api.functions().invoke(&api, &resolver, params).await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use plugin_bridge_core::{FunctionRef, RemoteOperation};
    use serde_json::json;

    use super::*;
    use crate::MemoryClientStorage;

    fn api() -> HostApi {
        HostApi::new(Arc::new(MemoryClientStorage::with_entries([(
            "count",
            json!(5),
        )])))
    }

    #[tokio::test]
    async fn test_empty_key_is_a_no_op() {
        let api = api();
        let get = get_value(api.clone(), KeyParams { key: String::new() }).await;
        assert_eq!(get, Ok(None));

        let set = set_value(
            api.clone(),
            SetValueParams {
                key: String::new(),
                value: json!(1),
            },
        )
        .await;
        assert_eq!(set, Ok(None));
        assert_eq!(api.client_storage().keys().await.unwrap(), vec!["count"]);
    }

    #[tokio::test]
    async fn test_update_applies_transform_and_writes_back() {
        let api = api();
        api.functions().register_sync("increment", |_, v| {
            Ok(Some(json!(v.as_i64().unwrap_or_default() + 1)))
        });

        let params = UpdateValueParams {
            key: "count".into(),
            transform: FunctionRef::new("increment"),
            initial_value: json!(0),
        };
        assert_eq!(update_value(api.clone(), params).await, Ok(Some(json!(6))));
        assert_eq!(
            api.client_storage().get("count").await,
            Ok(Some(json!(6)))
        );
    }

    #[tokio::test]
    async fn test_update_falls_back_to_initial_value() {
        let api = api();
        api.functions()
            .register_sync("append", |_, v| Ok(Some(json!(format!("{}!", v.as_str().unwrap_or_default())))));

        let params = UpdateValueParams {
            key: "greeting".into(),
            transform: FunctionRef::new("append"),
            initial_value: json!("hi"),
        };
        assert_eq!(update_value(api.clone(), params).await, Ok(Some(json!("hi!"))));
    }

    #[tokio::test]
    async fn test_declined_update_leaves_storage_alone() {
        let api = api();
        api.functions().register_sync("decline", |_, _| Ok(None));

        let params = UpdateValueParams {
            key: "count".into(),
            transform: FunctionRef::new("decline"),
            initial_value: json!(0),
        };
        assert_eq!(update_value(api.clone(), params).await, Ok(None));
        assert_eq!(
            api.client_storage().get("count").await,
            Ok(Some(json!(5)))
        );
    }

    #[tokio::test]
    async fn test_builtins_are_registered() {
        let registry = OperationRegistry::new();
        register(&registry);
        for name in [
            GetValue::NAME,
            SetValue::NAME,
            UpdateValue::NAME,
            DeleteValue::NAME,
            ListKeys::NAME,
            ResolveNodeTarget::NAME,
        ] {
            assert!(registry.get(name).is_some(), "{name} missing");
        }
    }
}
