//! Shared runtime state for sps-daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum. The entitlement
//! controller owns the domain state; this module only adds the SSE bus and
//! build metadata around it.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sps_config::LoadedConfig;
use sps_entitlement::ClockSource;
use sps_runtime::{BootOutcome, EntitlementController, StateChange};
use sps_store::PersistedStore;
use tokio::sync::broadcast;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// BusMsg: SSE event bus payload
// ---------------------------------------------------------------------------

/// Messages broadcast over the daemon bus and surfaced as SSE events.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMsg {
    Heartbeat { ts_millis: i64 },
    Entitlement(StateChange),
}

// ---------------------------------------------------------------------------
// BuildInfo
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    pub bus: broadcast::Sender<BusMsg>,
    pub build: BuildInfo,
    pub config_hash: String,
    pub controller: EntitlementController,
}

impl AppState {
    pub fn new(controller: EntitlementController, config_hash: impl Into<String>) -> Self {
        let (bus, _rx) = broadcast::channel::<BusMsg>(1024);
        Self {
            bus,
            build: BuildInfo {
                service: "sps-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            config_hash: config_hash.into(),
            controller,
        }
    }

    /// Build the controller over `store`, boot it from persisted state and
    /// start forwarding its state changes onto the SSE bus.
    pub async fn boot(
        store: Arc<dyn PersistedStore>,
        clock: Arc<dyn ClockSource>,
        loaded: &LoadedConfig,
    ) -> (Arc<Self>, BootOutcome) {
        let controller = EntitlementController::new(store, clock, &loaded.config);
        let outcome = controller.boot().await;
        info!(?outcome, config_hash = %loaded.config_hash, "entitlement state booted");

        let state = Arc::new(Self::new(controller, loaded.config_hash.clone()));
        spawn_state_forwarder(Arc::clone(&state));
        (state, outcome)
    }
}

/// Spawn a background task that emits a heartbeat SSE every `interval`.
pub fn spawn_heartbeat(bus: broadcast::Sender<BusMsg>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let ts = chrono::Utc::now().timestamp_millis();
            let _ = bus.send(BusMsg::Heartbeat { ts_millis: ts });
        }
    });
}

/// Relay controller state changes onto the daemon bus until the controller
/// goes away.
pub fn spawn_state_forwarder(state: Arc<AppState>) {
    let mut rx = state.controller.on_state_change();
    let bus = state.bus.clone();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(change) => {
                    let _ = bus.send(BusMsg::Entitlement(change));
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "state forwarder lagged; SSE clients missed changes");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}
