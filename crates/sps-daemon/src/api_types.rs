//! Request and response types for all sps-daemon HTTP endpoints.
//!
//! These types are `Serialize + Deserialize` so they can be JSON-encoded
//! by Axum and decoded by tests.  No business logic lives here.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sps_entitlement::{AccessReason, UnlockMode};

// ---------------------------------------------------------------------------
// /v1/health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: String,
    pub version: String,
    /// SHA-256 of the effective engine config.
    pub config_hash: String,
    /// A durable write failed this session.
    pub unpersisted: bool,
}

// ---------------------------------------------------------------------------
// Errors (4xx)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    /// Current balance, when the refusal is about points.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance: Option<u64>,
}

// ---------------------------------------------------------------------------
// Access
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    pub accessible: bool,
    pub reason: AccessReason,
    /// "Nd Nh Nm" | "Nh Nm" | "Nm Ns" | "expired"
    pub remaining: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelAccessQuery {
    #[serde(default)]
    pub free: bool,
}

// ---------------------------------------------------------------------------
// /v1/events
// ---------------------------------------------------------------------------

/// A real-time event injected over HTTP (same shape the transport delivers).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRequest {
    pub name: String,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventResponse {
    /// "applied" | "expired" | "ignored" | "malformed"
    pub outcome: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minutes: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Points
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointsRequest {
    pub amount: u64,
    /// Award source or spend purpose, recorded in the points history.
    #[serde(default, alias = "purpose")]
    pub source: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointsResponse {
    pub balance: u64,
}

// ---------------------------------------------------------------------------
// Channel unlock / lock
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnlockRequest {
    pub mode: UnlockMode,
    /// When present, the unlock is paid for with this many points.
    #[serde(default)]
    pub cost: Option<u64>,
    /// Points-history source for a paid unlock. Defaults to "unlock".
    #[serde(default)]
    pub purpose: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockRequest {
    pub mode: UnlockMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnlockResponse {
    pub channel_id: String,
    pub mode: UnlockMode,
    /// The call changed the unlock set.
    pub changed: bool,
    pub accessible: bool,
    pub balance: u64,
}

// ---------------------------------------------------------------------------
// /v1/watch
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchRequest {
    pub channel_id: String,
    pub channel_name: String,
    #[serde(default)]
    pub channel_logo: Option<String>,
    /// When present, updates the duration of the existing entry instead.
    #[serde(default)]
    pub duration_secs: Option<u64>,
}
