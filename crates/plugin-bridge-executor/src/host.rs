//! The privileged host API handed to operations.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use thiserror::Error;
use tokio::sync::OwnedMutexGuard;

use crate::{FunctionTable, MemorySceneGraph, SceneGraph, storage::ClientStorage, StorageError};

/// Host operation error.
///
/// Every variant but `Opaque` carries a message that is sent back to the
/// caller verbatim.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HostError {
    /// Failure raised by operation code.
    #[error("{0}")]
    Message(String),
    #[error("Unknown operation: {0}")]
    UnknownOperation(String),
    #[error("Unknown function: {0}")]
    UnknownFunction(String),
    #[error("Invalid parameters for {op}: {reason}")]
    InvalidParams { op: String, reason: String },
    #[error("Failed to encode result: {0}")]
    Encode(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// Failure with no extractable message.
    #[error("Host operation failed")]
    Opaque,
}

impl HostError {
    /// Failure with a free-form message.
    #[must_use]
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }

    /// The message to report to the caller, if any.
    #[must_use]
    pub fn message(&self) -> Option<String> {
        match self {
            Self::Opaque => None,
            other => Some(other.to_string()),
        }
    }
}

/// Per-key locks serializing read-modify-write cycles on the host.
///
/// Only keys that are held or awaited keep an entry.
#[derive(Debug, Default)]
struct KeyLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyLocks {
    async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(key.to_string()).or_default())
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Privileged handle passed to every operation and host function.
///
/// Cheap to clone.
#[derive(Clone)]
pub struct HostApi {
    client_storage: Arc<dyn ClientStorage>,
    scene: Arc<dyn SceneGraph>,
    functions: Arc<FunctionTable>,
    key_locks: Arc<KeyLocks>,
}

impl HostApi {
    /// Create a host API over `client_storage`, with an empty document and
    /// no host functions.
    #[must_use]
    pub fn new(client_storage: Arc<dyn ClientStorage>) -> Self {
        Self {
            client_storage,
            scene: Arc::new(MemorySceneGraph::new()),
            functions: Arc::new(FunctionTable::new()),
            key_locks: Arc::new(KeyLocks::default()),
        }
    }

    /// Use `scene` as the host document.
    #[must_use]
    pub fn with_scene(mut self, scene: Arc<dyn SceneGraph>) -> Self {
        self.scene = scene;
        self
    }

    /// Use `functions` as the function table.
    #[must_use]
    pub fn with_functions(mut self, functions: Arc<FunctionTable>) -> Self {
        self.functions = functions;
        self
    }

    /// Durable storage for this plugin installation.
    #[must_use]
    pub fn client_storage(&self) -> &dyn ClientStorage {
        self.client_storage.as_ref()
    }

    /// The host document.
    #[must_use]
    pub fn scene(&self) -> &dyn SceneGraph {
        self.scene.as_ref()
    }

    /// Host functions addressable by `FunctionRef`.
    #[must_use]
    pub fn functions(&self) -> &FunctionTable {
        &self.functions
    }

    /// Hold exclusive access to a durable key until the guard drops.
    pub async fn lock_key(&self, key: &str) -> OwnedMutexGuard<()> {
        self.key_locks.lock(key).await
    }
}

impl std::fmt::Debug for HostApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostApi")
            .field("functions", &self.functions)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opaque_has_no_message() {
        assert_eq!(HostError::Opaque.message(), None);
        assert_eq!(HostError::msg("boom").message().as_deref(), Some("boom"));
        assert_eq!(
            HostError::UnknownOperation("x".into()).message().as_deref(),
            Some("Unknown operation: x")
        );
    }

    #[tokio::test]
    async fn test_key_lock_is_exclusive_per_key() {
        let api = HostApi::new(Arc::new(crate::MemoryClientStorage::new()));
        let guard = api.lock_key("a").await;

        // A different key is independent.
        drop(api.lock_key("b").await);

        let other = api.clone();
        let waiter = tokio::spawn(async move { drop(other.lock_key("a").await) });
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_idle_key_locks_are_released() {
        let api = HostApi::new(Arc::new(crate::MemoryClientStorage::new()));
        for n in 0..100 {
            drop(api.lock_key(&format!("key-{n}")).await);
        }
        assert_eq!(api.key_locks.len(), 1);

        let held = api.lock_key("held").await;
        drop(api.lock_key("other").await);
        assert_eq!(api.key_locks.len(), 2);

        drop(held);
        drop(api.lock_key("last").await);
        assert_eq!(api.key_locks.len(), 1);
    }
}
