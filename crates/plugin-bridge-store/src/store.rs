//! Replicated store: a local value mirrored to host storage.
//!
//! Reads are served from the local copy. `set` and `update` apply locally
//! and notify subscribers at once, then persist in the background through a
//! per-key write queue. Persistence failures are logged and never rolled
//! back; the local value stays authoritative until the next
//! [`initialize`](ReplicatedStore::initialize) or
//! [`update_async`](ReplicatedStore::update_async).

use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicU64, Ordering},
};

use plugin_bridge_caller::{CallError, Caller};
use plugin_bridge_core::{
    FunctionRef,
    ops::{GetValue, KeyParams, ResolveNodeTarget, ResolveNodeTargetParams},
};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use tokio_stream::wrappers::WatchStream;
use uuid::Uuid;

use crate::{
    NodeTarget, Observable, Subscription, node_target::NodeResolver, write_queue::WriteQueue,
};

/// Lifecycle of a store instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Holding the initial value; the durable copy has not been read.
    Uninitialized,
    /// Reading the durable copy.
    Initializing,
    /// The durable copy, if any, has been applied.
    Ready,
}

struct Inner<T> {
    instance: Uuid,
    key: String,
    initial: T,
    caller: Caller,
    value: Observable<T>,
    /// Bumped by every local write.
    version: AtomicU64,
    phase: Mutex<Phase>,
    init_lock: tokio::sync::Mutex<()>,
    node_target: Option<NodeResolver>,
    writes: WriteQueue,
}

/// A value of type `T` replicated to the host's durable storage under a key.
///
/// Cheap to clone; clones share the value and write queue.
pub struct ReplicatedStore<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for ReplicatedStore<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Builder for a [`ReplicatedStore`].
pub struct StoreBuilder<T> {
    caller: Caller,
    key: String,
    initial: T,
    resolver: Option<FunctionRef>,
    params: Value,
}

impl<T> StoreBuilder<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Attach a host function that finds the nodes this store is about.
    #[must_use]
    pub fn node_target(mut self, resolver: FunctionRef) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Parameters passed to the node-target resolver.
    #[must_use]
    pub fn params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }

    /// Build the store without reading the durable copy.
    ///
    /// Must be called within a tokio runtime.
    #[must_use]
    pub fn build(self) -> ReplicatedStore<T> {
        let instance = Uuid::new_v4();
        let initial_json = serde_json::to_value(&self.initial).unwrap_or_else(|e| {
            tracing::error!(key = %self.key, "Failed to encode initial value: {e}");
            Value::Null
        });
        let writes = WriteQueue::spawn(self.caller.clone(), self.key.clone(), initial_json, instance);
        let node_target = self.resolver.map(|function| NodeResolver {
            function,
            params: self.params,
        });

        ReplicatedStore {
            inner: Arc::new(Inner {
                instance,
                value: Observable::new(self.initial.clone()),
                version: AtomicU64::new(0),
                key: self.key,
                initial: self.initial,
                caller: self.caller,
                phase: Mutex::new(Phase::Uninitialized),
                init_lock: tokio::sync::Mutex::new(()),
                node_target,
                writes,
            }),
        }
    }

    /// Build the store and initialize it from the durable copy.
    pub async fn create(self) -> ReplicatedStore<T> {
        let store = self.build();
        store.initialize().await;
        store
    }
}

impl<T> ReplicatedStore<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Create a store for `key` and load any durable value over `initial`.
    ///
    /// A failed load is logged and leaves the store holding `initial`.
    pub async fn create(caller: Caller, key: impl Into<String>, initial: T) -> Self {
        Self::builder(caller, key, initial).create().await
    }

    /// Start building a store for `key`.
    #[must_use]
    pub fn builder(caller: Caller, key: impl Into<String>, initial: T) -> StoreBuilder<T> {
        StoreBuilder {
            caller,
            key: key.into(),
            initial,
            resolver: None,
            params: Value::Null,
        }
    }

    /// The durable storage key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.inner.key
    }

    /// Current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        *self.inner.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_phase(&self, phase: Phase) {
        *self.inner.phase.lock().unwrap_or_else(PoisonError::into_inner) = phase;
    }

    /// Read the durable copy and apply it over the local value.
    ///
    /// Does nothing once the store is ready. Concurrent calls run one at a
    /// time. On failure the store returns to `Uninitialized` and may be
    /// initialized again.
    ///
    /// A local write made before the durable copy arrives wins; its persist
    /// is already queued.
    pub async fn initialize(&self) {
        let _guard = self.inner.init_lock.lock().await;
        if self.phase() == Phase::Ready {
            return;
        }
        self.set_phase(Phase::Initializing);

        let params = KeyParams {
            key: self.inner.key.clone(),
        };
        let version = self.inner.version.load(Ordering::SeqCst);
        let durable = match self.inner.caller.call::<GetValue>(&params).await {
            Ok(durable) => durable,
            Err(e) => {
                tracing::error!(key = %self.inner.key, instance = %self.inner.instance, "Failed to initialize store: {e}");
                self.set_phase(Phase::Uninitialized);
                return;
            }
        };

        if let Some(durable) = durable {
            match serde_json::from_value::<T>(durable) {
                Ok(_) if self.inner.version.load(Ordering::SeqCst) != version => {
                    tracing::debug!(key = %self.inner.key, instance = %self.inner.instance, "Keeping local value written during initialize");
                }
                Ok(value) => self.inner.value.set(value),
                Err(e) => {
                    tracing::error!(key = %self.inner.key, instance = %self.inner.instance, "Durable value has the wrong shape: {e}");
                    self.set_phase(Phase::Uninitialized);
                    return;
                }
            }
        }

        self.set_phase(Phase::Ready);
        tracing::debug!(key = %self.inner.key, instance = %self.inner.instance, "Store ready");
    }

    /// The local value.
    #[must_use]
    pub fn get(&self) -> T {
        self.inner.value.get()
    }

    fn write_local(&self, value: T) {
        self.inner.version.fetch_add(1, Ordering::SeqCst);
        self.inner.value.set(value);
    }

    /// Replace the local value, notify subscribers, and queue a persist.
    pub fn set(&self, value: T) {
        let encoded = serde_json::to_value(&value);
        self.write_local(value);
        match encoded {
            Ok(encoded) => self.inner.writes.persist(encoded),
            Err(e) => {
                tracing::error!(key = %self.inner.key, "Failed to encode value for persistence: {e}");
            }
        }
    }

    /// Apply `f` to the local value and [`set`](Self::set) the result.
    ///
    /// `None` from `f` leaves the store untouched. Returns whether a value
    /// was set.
    pub fn update<F>(&self, f: F) -> bool
    where
        F: FnOnce(&T) -> Option<T>,
    {
        match f(&self.get()) {
            Some(value) => {
                self.set(value);
                true
            }
            None => false,
        }
    }

    /// Run the host function `transform` against the durable value on the
    /// host and adopt its result locally.
    ///
    /// The host reads the durable value, falling back to this store's
    /// initial value, applies `transform`, and writes back a defined result
    /// in one step. Queued behind earlier writes from this store.
    ///
    /// A local write made while the update is in flight wins locally; it is
    /// queued after the update, so the host ends up with it too.
    ///
    /// Returns the new value, or `None` if the transform declined or the
    /// call failed (failures are logged).
    pub async fn update_async(&self, transform: FunctionRef) -> Option<T> {
        let transform_id = transform.id.clone();
        let version = self.inner.version.load(Ordering::SeqCst);
        let result = match self.inner.writes.update(transform).await {
            Ok(result) => result,
            Err(_) => {
                tracing::error!(key = %self.inner.key, "Store writer stopped before the update ran");
                return None;
            }
        };

        match result {
            Ok(Some(updated)) => match serde_json::from_value::<T>(updated) {
                Ok(value) => {
                    if self.inner.version.load(Ordering::SeqCst) == version {
                        self.inner.value.set(value.clone());
                    }
                    Some(value)
                }
                Err(e) => {
                    tracing::error!(key = %self.inner.key, transform = %transform_id, "Updated value has the wrong shape: {e}");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::error!(key = %self.inner.key, transform = %transform_id, "Failed to update value: {e}");
                None
            }
        }
    }

    /// Reset to the initial value and delete the durable copy.
    pub fn clear(&self) {
        self.write_local(self.inner.initial.clone());
        self.inner.writes.delete();
    }

    /// Wait until every write queued so far has reached the host.
    pub async fn flush(&self) {
        self.inner.writes.flush().await;
    }

    /// Call `callback` now with the local value, then on every change.
    ///
    /// The callback must not write to this store.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.inner.value.subscribe(callback)
    }

    /// Stream of local values, starting with the current one.
    #[must_use]
    pub fn watch(&self) -> WatchStream<T> {
        self.inner.value.stream()
    }

    /// Resolve the nodes this store is about.
    ///
    /// Runs the resolver on every call; nothing is cached. `Ok(None)` if the
    /// store has no resolver or the resolver found nothing.
    ///
    /// # Errors
    /// Returns the call's error, or `Decode` if the resolver returned
    /// something other than nodes.
    pub async fn get_node_target(&self) -> Result<Option<NodeTarget>, CallError> {
        let Some(resolver) = &self.inner.node_target else {
            return Ok(None);
        };

        let params = ResolveNodeTargetParams {
            resolver: resolver.function.clone(),
            params: resolver.params.clone(),
        };
        let output = self.inner.caller.call::<ResolveNodeTarget>(&params).await?;
        NodeTarget::from_output(output).map_err(|e| CallError::Decode(e.to_string()))
    }
}

impl<T> std::fmt::Debug for ReplicatedStore<T>
where
    T: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicatedStore")
            .field("key", &self.inner.key)
            .field("instance", &self.inner.instance)
            .field("value", &self.inner.value)
            .finish_non_exhaustive()
    }
}
