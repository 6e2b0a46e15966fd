//! JSON-file durable storage.

use std::{
    collections::HashMap,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{ClientStorage, StorageError};

type Entries = HashMap<String, Value>;

/// Storage backed by a single JSON document per plugin installation.
///
/// The document is loaded lazily and cached. Every mutation rewrites the
/// whole document through a temporary file followed by a rename, and the
/// cache only changes once the rename succeeded.
#[derive(Debug)]
pub struct FileClientStorage {
    path: PathBuf,
    entries: Mutex<Option<Entries>>,
}

impl FileClientStorage {
    /// Use the document at `path`. It is created on first write.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: Mutex::new(None),
        }
    }

    /// Location of the backing document.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read<R>(&self, f: impl FnOnce(&Entries) -> R) -> Result<R, StorageError> {
        let mut guard = self.entries.lock().await;
        if guard.is_none() {
            *guard = Some(load(&self.path).await?);
        }
        let entries = guard
            .as_ref()
            .ok_or_else(|| StorageError::Internal("storage cache not loaded".into()))?;
        Ok(f(entries))
    }

    /// Apply `f` to a copy of the entries and persist it if `f` reports a
    /// change.
    async fn write<R>(&self, f: impl FnOnce(&mut Entries) -> (R, bool)) -> Result<R, StorageError> {
        let mut guard = self.entries.lock().await;
        if guard.is_none() {
            *guard = Some(load(&self.path).await?);
        }
        let mut next = guard
            .as_ref()
            .ok_or_else(|| StorageError::Internal("storage cache not loaded".into()))?
            .clone();

        let (result, changed) = f(&mut next);
        if changed {
            store(&self.path, &next).await?;
            *guard = Some(next);
        }
        Ok(result)
    }
}

async fn load(path: &Path) -> Result<Entries, StorageError> {
    match tokio::fs::read(path).await {
        Ok(bytes) if bytes.is_empty() => Ok(Entries::new()),
        Ok(bytes) => {
            serde_json::from_slice(&bytes).map_err(|e| StorageError::Corrupt(e.to_string()))
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(Entries::new()),
        Err(e) => Err(StorageError::Io(e.to_string())),
    }
}

async fn store(path: &Path, entries: &Entries) -> Result<(), StorageError> {
    let bytes =
        serde_json::to_vec_pretty(entries).map_err(|e| StorageError::Internal(e.to_string()))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| StorageError::Io(e.to_string()))?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(format!(".{}.tmp", Uuid::new_v4()));
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(|e| StorageError::Io(e.to_string()))?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(StorageError::Io(e.to_string()));
    }

    tracing::trace!(path = %path.display(), entries = entries.len(), "Wrote storage document");
    Ok(())
}

#[async_trait]
impl ClientStorage for FileClientStorage {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        self.read(|entries| entries.get(key).cloned()).await
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        self.write(|entries| {
            entries.insert(key.to_string(), value);
            ((), true)
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        self.write(|entries| {
            let existed = entries.remove(key).is_some();
            (existed, existed)
        })
        .await
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        self.read(|entries| {
            let mut keys: Vec<String> = entries.keys().cloned().collect();
            keys.sort();
            keys
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn test_missing_document_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileClientStorage::new(dir.path().join("storage.json"));
        assert_eq!(storage.get("anything").await, Ok(None));
        assert!(storage.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plugin").join("storage.json");

        let storage = FileClientStorage::new(&path);
        storage.set("count", json!(5)).await.unwrap();
        storage.set("prefs", json!({ "theme": "dark" })).await.unwrap();
        assert_eq!(storage.delete("prefs").await, Ok(true));
        drop(storage);

        let reopened = FileClientStorage::new(&path);
        assert_eq!(reopened.get("count").await, Ok(Some(json!(5))));
        assert_eq!(reopened.get("prefs").await, Ok(None));
        assert_eq!(reopened.keys().await.unwrap(), vec!["count"]);
    }

    #[tokio::test]
    async fn test_instances_sharing_a_document_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage.json");
        let a = FileClientStorage::new(&path);
        let b = FileClientStorage::new(&path);

        let writes = (0..20).map(|n| {
            let storage = if n % 2 == 0 { &a } else { &b };
            storage.set("count", json!(n))
        });
        for result in futures::future::join_all(writes).await {
            assert_eq!(result, Ok(()));
        }

        let reopened = FileClientStorage::new(&path);
        let count = reopened.get("count").await.unwrap();
        assert!(matches!(count, Some(Value::Number(_))));

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .filter(|name| name != "storage.json")
            .collect();
        assert!(leftovers.is_empty(), "stray temp files: {leftovers:?}");
    }

    #[tokio::test]
    async fn test_corrupt_document_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage.json");
        std::fs::write(&path, b"{ not json").unwrap();

        let storage = FileClientStorage::new(&path);
        assert!(matches!(
            storage.get("count").await,
            Err(StorageError::Corrupt(_))
        ));
    }
}
