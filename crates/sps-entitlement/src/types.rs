use serde::{Deserialize, Serialize};

/// Milliseconds per minute, used wherever durations are normalised.
pub const MS_PER_MINUTE: i64 = 60_000;

/// Milliseconds per day.
pub const MS_PER_DAY: i64 = 24 * 60 * MS_PER_MINUTE;

/// Opaque channel identifier as issued by the catalogue backend.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(String);

impl ChannelId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChannelId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// The minimal view of a channel the access decision needs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelRef {
    pub id: ChannelId,
    pub is_free: bool,
}

impl ChannelRef {
    pub fn new(id: impl Into<String>, is_free: bool) -> Self {
        Self {
            id: ChannelId::new(id),
            is_free,
        }
    }

    pub fn free(id: impl Into<String>) -> Self {
        Self::new(id, true)
    }

    pub fn premium(id: impl Into<String>) -> Self {
        Self::new(id, false)
    }
}

/// Which unlock set a points-unlock lands in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnlockMode {
    /// Lives for the current process only.
    Temporary,
    /// Persisted; survives restarts until explicitly locked.
    Permanent,
}

/// Admin-issued full-catalogue grant.
///
/// Serialized with the camelCase field names used by the persisted
/// `adminGrantedAccess` key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminGrant {
    pub granted_at: i64,
    pub expires_at: i64,
    pub duration_minutes: i64,
    pub access_level: String,
    pub granted_by: String,
}

impl AdminGrant {
    pub fn is_active_at(&self, now_ms: i64) -> bool {
        self.expires_at > now_ms
    }
}

/// One points movement. `amount` is signed: awards positive, spends negative.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointsHistoryEntry {
    pub id: String,
    pub amount: i64,
    pub source: String,
    /// RFC 3339 timestamp.
    pub timestamp: String,
}

/// One watched channel. At most one entry per channel is kept.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchHistoryEntry {
    pub channel_id: ChannelId,
    pub channel_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_logo: Option<String>,
    /// RFC 3339 timestamp of the most recent view.
    pub watched_at: String,
    #[serde(default)]
    pub duration_secs: u64,
}

/// Descriptive data recorded by a watch-history entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WatchedChannel {
    pub id: ChannelId,
    pub name: String,
    pub logo: Option<String>,
}

/// Tunables the pure core needs. Built from the engine config by the runtime.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntitlementPolicy {
    pub points_history_cap: usize,
    pub watch_history_cap: usize,
    /// Normalisation of the `months` duration unit.
    pub days_per_month: i64,
    /// A restored expiry further than this in the future is treated as clock skew.
    pub clock_skew_horizon_ms: i64,
    /// Countdown checkpoint interval, in ticks.
    pub checkpoint_every_ticks: u64,
}

impl Default for EntitlementPolicy {
    fn default() -> Self {
        Self {
            points_history_cap: 20,
            watch_history_cap: 10,
            days_per_month: 30,
            clock_skew_horizon_ms: 365 * MS_PER_DAY,
            checkpoint_every_ticks: 30,
        }
    }
}
