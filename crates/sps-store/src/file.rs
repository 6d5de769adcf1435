//! Single-file JSON store.
//!
//! The whole key space is one JSON object. Every mutation rewrites the file
//! through a temp file + rename so a crash mid-write leaves either the old or
//! the new contents, never a torn file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::{PersistedStore, StorageError};

#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    map: Mutex<BTreeMap<String, String>>,
}

impl JsonFileStore {
    /// Open (or lazily create) the store at `path`. A missing file is an
    /// empty store; an unreadable one is an error.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let map = match tokio::fs::read_to_string(&path).await {
            Ok(raw) if raw.trim().is_empty() => BTreeMap::new(),
            Ok(raw) => serde_json::from_str(&raw).map_err(|e| {
                StorageError::Corrupt(format!("{}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(StorageError::Io {
                    key: None,
                    message: format!("{}: {e}", path.display()),
                })
            }
        };
        debug!(path = %path.display(), keys = map.len(), "json store opened");
        Ok(Self {
            path,
            map: Mutex::new(map),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn flush_locked(
        &self,
        map: &BTreeMap<String, String>,
        key: Option<&str>,
    ) -> Result<(), StorageError> {
        let io_err = |e: std::io::Error| StorageError::Io {
            key: key.map(str::to_string),
            message: e.to_string(),
        };
        let body = serde_json::to_string_pretty(map)
            .map_err(|e| StorageError::Backend(format!("serialize: {e}")))?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, body).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(io_err)?;
        Ok(())
    }
}

#[async_trait]
impl PersistedStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.map.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StorageError> {
        let mut map = self.map.lock().await;
        let prev = map.insert(key.to_string(), value);
        if let Err(e) = self.flush_locked(&map, Some(key)).await {
            // Keep memory and disk in step: undo the insert.
            match prev {
                Some(p) => map.insert(key.to_string(), p),
                None => map.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut map = self.map.lock().await;
        let Some(prev) = map.remove(key) else {
            return Ok(());
        };
        if let Err(e) = self.flush_locked(&map, Some(key)).await {
            map.insert(key.to_string(), prev);
            return Err(e);
        }
        Ok(())
    }

    async fn multi_get(&self, keys: &[&str]) -> Result<Vec<Option<String>>, StorageError> {
        let map = self.map.lock().await;
        Ok(keys.iter().map(|k| map.get(*k).cloned()).collect())
    }

    async fn multi_remove(&self, keys: &[&str]) -> Result<(), StorageError> {
        let mut map = self.map.lock().await;
        let removed: Vec<(String, String)> = keys
            .iter()
            .filter_map(|k| map.remove(*k).map(|v| (k.to_string(), v)))
            .collect();
        if removed.is_empty() {
            return Ok(());
        }
        if let Err(e) = self.flush_locked(&map, None).await {
            map.extend(removed);
            return Err(e);
        }
        Ok(())
    }
}
