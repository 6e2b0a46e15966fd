//! In-memory durable storage.

use std::{collections::HashMap, sync::RwLock};

use async_trait::async_trait;
use serde_json::Value;

use super::{ClientStorage, StorageError};

/// In-memory storage implementation.
///
/// Useful for tests and single-process wiring.
/// Data is lost on restart.
#[derive(Debug, Default)]
pub struct MemoryClientStorage {
    entries: RwLock<HashMap<String, Value>>,
}

impl MemoryClientStorage {
    /// Create an empty in-memory storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a storage pre-populated with `entries`.
    #[must_use]
    pub fn with_entries<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Self {
            entries: RwLock::new(entries.into_iter().map(|(k, v)| (k.into(), v)).collect()),
        }
    }
}

#[async_trait]
impl ClientStorage for MemoryClientStorage {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        Ok(self
            .entries
            .read()
            .map_err(|e| StorageError::Internal(e.to_string()))?
            .get(key)
            .cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        self.entries
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))?
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self
            .entries
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))?
            .remove(key)
            .is_some())
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        let mut keys: Vec<String> = self
            .entries
            .read()
            .map_err(|e| StorageError::Internal(e.to_string()))?
            .keys()
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}
