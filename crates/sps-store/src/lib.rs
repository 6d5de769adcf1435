//! sps-store
//!
//! Durable key/value boundary for entitlement state.
//!
//! This crate owns the [`PersistedStore`] contract, the persisted key layout
//! and the codec between [`sps_entitlement::EntitlementState`] and string
//! values. It does not decide WHEN to write; the runtime does.

pub mod codec;
pub mod file;
pub mod keys;
pub mod memory;

use std::fmt;

use async_trait::async_trait;

pub use file::JsonFileStore;
pub use memory::MemoryStore;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Failure of a durable read or write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Filesystem or device failure.
    Io { key: Option<String>, message: String },
    /// The backing store refused or lost the operation.
    Backend(String),
    /// Stored bytes could not be decoded by the backend itself.
    Corrupt(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::Io {
                key: Some(k),
                message,
            } => write!(f, "storage io error key={k}: {message}"),
            StorageError::Io { key: None, message } => write!(f, "storage io error: {message}"),
            StorageError::Backend(msg) => write!(f, "storage backend error: {msg}"),
            StorageError::Corrupt(msg) => write!(f, "storage corrupt: {msg}"),
        }
    }
}

impl std::error::Error for StorageError {}

// ---------------------------------------------------------------------------
// Store trait
// ---------------------------------------------------------------------------

/// Async string key/value store.
///
/// Object-safe so the runtime can hold an `Arc<dyn PersistedStore>`.
/// Every method may fail with [`StorageError`].
#[async_trait]
pub trait PersistedStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    async fn set(&self, key: &str, value: String) -> Result<(), StorageError>;

    async fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// Batch read; the result is positionally aligned with `keys`.
    async fn multi_get(&self, keys: &[&str]) -> Result<Vec<Option<String>>, StorageError> {
        let mut out = Vec::with_capacity(keys.len());
        for k in keys {
            out.push(self.get(k).await?);
        }
        Ok(out)
    }

    async fn multi_remove(&self, keys: &[&str]) -> Result<(), StorageError> {
        for k in keys {
            self.remove(k).await?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Write operations
// ---------------------------------------------------------------------------

/// One queued write, produced by the codec and applied by the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    Set { key: &'static str, value: String },
    Remove { key: &'static str },
    RemoveMany { keys: Vec<&'static str> },
}

impl StoreOp {
    pub fn set(key: &'static str, value: impl Into<String>) -> Self {
        StoreOp::Set {
            key,
            value: value.into(),
        }
    }

    /// Keys touched by this op, for logging.
    pub fn keys(&self) -> Vec<&'static str> {
        match self {
            StoreOp::Set { key, .. } | StoreOp::Remove { key } => vec![*key],
            StoreOp::RemoveMany { keys } => keys.clone(),
        }
    }

    pub async fn apply(&self, store: &dyn PersistedStore) -> Result<(), StorageError> {
        match self {
            StoreOp::Set { key, value } => store.set(key, value.clone()).await,
            StoreOp::Remove { key } => store.remove(key).await,
            StoreOp::RemoveMany { keys } => store.multi_remove(keys).await,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
