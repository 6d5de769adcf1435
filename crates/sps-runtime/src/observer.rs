//! State-change notifications.
//!
//! Collaborators (UI, the daemon's SSE stream) subscribe through
//! [`crate::EntitlementController::on_state_change`] instead of registering
//! ad hoc callback slots.

use serde::{Deserialize, Serialize};
use sps_entitlement::{
    can_access_catalogue, AdminGrant, CountdownPhase, EntitlementState, PointsHistoryEntry,
    RemainingTime, WatchHistoryEntry,
};

/// What kind of mutation produced a [`StateChange`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangeKind {
    Restored,
    /// A grant was accepted; `minutes` is the granted length as seen at receipt.
    Granted { minutes: i64 },
    /// Full access ended (countdown, server revocation, or boot-time convergence).
    Expired,
    PointsChanged,
    UnlocksChanged,
    HistoryChanged,
    ProfileChanged,
    Cleared,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateChange {
    pub kind: ChangeKind,
    pub snapshot: EntitlementSnapshot,
}

/// Point-in-time read model of the entitlement state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntitlementSnapshot {
    pub now_ms: i64,
    pub subscription_end_at: Option<i64>,
    /// Recomputed live against `now_ms`.
    pub is_subscribed: bool,
    pub admin_grant: Option<AdminGrant>,
    pub catalogue_access: bool,
    pub session_expires_at: Option<i64>,
    pub remaining: Option<RemainingTime>,
    pub remaining_display: String,
    pub points_balance: u64,
    pub permanent_unlocked: Vec<String>,
    pub temporary_unlocked: Vec<String>,
    pub trial_used: bool,
    /// "idle" | "running" | "expired"
    pub countdown: String,
    /// A write failed this session; state may not survive a restart.
    pub unpersisted: bool,
    pub points_history: Vec<PointsHistoryEntry>,
    pub watch_history: Vec<WatchHistoryEntry>,
}

impl EntitlementSnapshot {
    pub(crate) fn capture(
        st: &EntitlementState,
        phase: CountdownPhase,
        now_ms: i64,
        unpersisted: bool,
    ) -> Self {
        let remaining = st.session_remaining_ms(now_ms).map(RemainingTime::from_ms);
        Self {
            now_ms,
            subscription_end_at: st.subscription_end_at,
            is_subscribed: st.subscription_active_at(now_ms),
            admin_grant: st.admin_grant.clone(),
            catalogue_access: can_access_catalogue(st, now_ms).accessible,
            session_expires_at: st.session_expires_at(),
            remaining,
            remaining_display: render_remaining(remaining),
            points_balance: st.points_balance,
            permanent_unlocked: st
                .permanent_unlocked
                .iter()
                .map(|c| c.to_string())
                .collect(),
            temporary_unlocked: st.temporary_unlocked.iter().map(|c| c.to_string()).collect(),
            trial_used: st.trial_used,
            countdown: phase_str(phase).to_string(),
            unpersisted,
            points_history: st.points_history.clone(),
            watch_history: st.watch_history.clone(),
        }
    }
}

pub(crate) fn render_remaining(remaining: Option<RemainingTime>) -> String {
    match remaining {
        Some(r) => r.render(),
        None => "expired".to_string(),
    }
}

pub(crate) fn phase_str(phase: CountdownPhase) -> &'static str {
    match phase {
        CountdownPhase::Idle => "idle",
        CountdownPhase::Running => "running",
        CountdownPhase::Expired => "expired",
    }
}
