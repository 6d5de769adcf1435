//! Test harness for entitlement scenarios.
//!
//! - [`FaultyStore`]: in-memory store whose reads/writes can be switched to fail
//!   and which records every write in order.
//! - [`Harness`]: controller + manual clock over a shared store, with a
//!   cold-restart helper.
//! - Event builders for the real-time events the engine subscribes to.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use sps_config::EngineConfig;
use sps_entitlement::{ManualClock, RealtimeEvent};
use sps_runtime::{BootOutcome, EntitlementController};
use sps_store::{MemoryStore, PersistedStore, StorageError};
use tokio::sync::Mutex;

/// 2023-11-14T22:13:20Z
pub const T0: i64 = 1_700_000_000_000;

// ---------------------------------------------------------------------------
// Store with fault injection
// ---------------------------------------------------------------------------

/// One recorded write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WriteRecord {
    Set { key: String, value: String },
    Remove { key: String },
}

#[derive(Debug, Default)]
pub struct FaultyStore {
    inner: MemoryStore,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    writes: Mutex<Vec<WriteRecord>>,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            inner: MemoryStore::with_entries(entries),
            ..Self::default()
        }
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Successful writes, in the order they were applied.
    pub async fn writes(&self) -> Vec<WriteRecord> {
        self.writes.lock().await.clone()
    }

    pub async fn writes_to(&self, key: &str) -> Vec<WriteRecord> {
        self.writes
            .lock()
            .await
            .iter()
            .filter(|w| match w {
                WriteRecord::Set { key: k, .. } | WriteRecord::Remove { key: k } => k == key,
            })
            .cloned()
            .collect()
    }

    /// Current value, bypassing fault injection.
    pub async fn get_value(&self, key: &str) -> Option<String> {
        self.inner.snapshot().await.get(key).cloned()
    }

    pub async fn clear_write_log(&self) {
        self.writes.lock().await.clear();
    }

    fn check_write(&self, key: &str) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Io {
                key: Some(key.to_string()),
                message: "injected write failure".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl PersistedStore for FaultyStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("injected read failure".to_string()));
        }
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StorageError> {
        self.check_write(key)?;
        self.inner.set(key, value.clone()).await?;
        self.writes.lock().await.push(WriteRecord::Set {
            key: key.to_string(),
            value,
        });
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.check_write(key)?;
        self.inner.remove(key).await?;
        self.writes.lock().await.push(WriteRecord::Remove {
            key: key.to_string(),
        });
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub store: Arc<FaultyStore>,
    pub clock: Arc<ManualClock>,
    pub config: EngineConfig,
    pub controller: EntitlementController,
}

impl Harness {
    /// Fresh empty store, clock at [`T0`], default config. Not booted.
    pub fn new() -> Self {
        Self::over(Arc::new(FaultyStore::new()), Arc::new(ManualClock::new(T0)))
    }

    pub fn over(store: Arc<FaultyStore>, clock: Arc<ManualClock>) -> Self {
        Self::with_config(store, clock, EngineConfig::default())
    }

    pub fn with_config(
        store: Arc<FaultyStore>,
        clock: Arc<ManualClock>,
        config: EngineConfig,
    ) -> Self {
        let controller = EntitlementController::new(store.clone(), clock.clone(), &config);
        Self {
            store,
            clock,
            config,
            controller,
        }
    }

    pub async fn boot(&self) -> BootOutcome {
        self.controller.boot().await
    }

    /// Flush, shut the current controller down and boot a new one over the
    /// same store and clock.
    pub async fn cold_restart(self) -> (Self, BootOutcome) {
        self.controller.shutdown().await;
        let next = Self::with_config(self.store, self.clock, self.config);
        let outcome = next.boot().await;
        (next, outcome)
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Event builders
// ---------------------------------------------------------------------------

pub fn event(name: &str, payload: Value) -> RealtimeEvent {
    RealtimeEvent::new(name, payload)
}

pub fn subscription_granted(duration: i64, unit: &str) -> RealtimeEvent {
    event(
        "subscription-granted",
        json!({ "duration": duration, "unit": unit }),
    )
}

pub fn subscription_granted_until(end_at: i64) -> RealtimeEvent {
    event("subscription-granted", json!({ "endAt": end_at }))
}

pub fn admin_access_granted(duration: i64, unit: &str, granted_by: &str) -> RealtimeEvent {
    event(
        "access-granted",
        json!({
            "duration": duration,
            "unit": unit,
            "grantedBy": granted_by,
            "accessLevel": "premium",
        }),
    )
}

pub fn subscription_expired() -> RealtimeEvent {
    event("subscription-expired", json!({}))
}
