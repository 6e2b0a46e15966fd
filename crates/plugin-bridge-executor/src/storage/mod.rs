//! Durable key/value storage scoped to a plugin installation.

pub mod file;
pub mod memory;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub use file::FileClientStorage;
pub use memory::MemoryClientStorage;

/// Storage error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(String),
    #[error("Corrupt storage document: {0}")]
    Corrupt(String),
    #[error("Storage error: {0}")]
    Internal(String),
}

/// Trait for durable storage backends consumed by the executor.
///
/// Keys are opaque strings chosen by callers. Values are JSON.
#[async_trait]
pub trait ClientStorage: Send + Sync {
    /// Get the value stored under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError>;

    /// Replace the value stored under `key`.
    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError>;

    /// Remove `key`. Returns whether it was present.
    async fn delete(&self, key: &str) -> Result<bool, StorageError>;

    /// List all stored keys, sorted.
    async fn keys(&self) -> Result<Vec<String>, StorageError>;
}
