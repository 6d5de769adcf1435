//! Codec between [`EntitlementState`] and the persisted key layout.
//!
//! Decoding is fail-closed: a value that cannot be parsed is dropped and
//! reported in [`Restored::problems`]; a dropped grant key means no access,
//! never default access. The temporary unlock set has no key and is never
//! encoded.

use serde::Serialize;
use serde_json::Value;
use sps_entitlement::{
    AdminGrant, ChannelId, EntitlementState, PointsHistoryEntry, WatchHistoryEntry,
};
use tracing::error;

use crate::{keys, StoreOp};

// ---------------------------------------------------------------------------
// Decode
// ---------------------------------------------------------------------------

/// Result of decoding the boot batch read.
#[derive(Debug, Clone, Default)]
pub struct Restored {
    pub state: EntitlementState,
    /// The `remainingTime` display cache. Informational only.
    pub cached_remaining_minutes: Option<i64>,
    /// One line per key that was present but unreadable.
    pub problems: Vec<String>,
}

/// Decode values positionally aligned with [`keys::ALL`].
pub fn decode(values: &[Option<String>]) -> Restored {
    let lookup = |key: &str| -> Option<&str> {
        keys::ALL
            .iter()
            .position(|k| *k == key)
            .and_then(|i| values.get(i))
            .and_then(|v| v.as_deref())
    };

    let mut out = Restored::default();
    let st = &mut out.state;
    let problems = &mut out.problems;

    if let Some(raw) = lookup(keys::SUBSCRIPTION_END_TIME) {
        match raw.trim().parse::<i64>() {
            Ok(end) => st.subscription_end_at = Some(end),
            Err(e) => problems.push(format!("{}: {e}", keys::SUBSCRIPTION_END_TIME)),
        }
    }

    st.is_subscribed = lookup(keys::IS_SUBSCRIBED).is_some_and(|v| v.trim() == "true");

    if let Some(raw) = lookup(keys::ADMIN_GRANTED_ACCESS) {
        match serde_json::from_str::<AdminGrant>(raw) {
            Ok(g) => st.admin_grant = Some(g),
            Err(e) => problems.push(format!("{}: {e}", keys::ADMIN_GRANTED_ACCESS)),
        }
    }

    if let Some(raw) = lookup(keys::POINTS) {
        match raw.trim().parse::<i64>() {
            Ok(p) if p >= 0 => st.points_balance = p as u64,
            Ok(p) => problems.push(format!("{}: negative balance {p}", keys::POINTS)),
            Err(e) => problems.push(format!("{}: {e}", keys::POINTS)),
        }
    }

    if let Some(raw) = lookup(keys::UNLOCKED_CHANNELS) {
        match serde_json::from_str::<Vec<Value>>(raw) {
            Ok(ids) => {
                st.permanent_unlocked = ids.iter().filter_map(channel_id_from_json).collect();
            }
            Err(e) => problems.push(format!("{}: {e}", keys::UNLOCKED_CHANNELS)),
        }
    }

    if let Some(raw) = lookup(keys::POINTS_HISTORY) {
        match serde_json::from_str::<Vec<PointsHistoryEntry>>(raw) {
            Ok(h) => st.points_history = h,
            Err(e) => problems.push(format!("{}: {e}", keys::POINTS_HISTORY)),
        }
    }

    if let Some(raw) = lookup(keys::WATCH_HISTORY) {
        match serde_json::from_str::<Vec<WatchHistoryEntry>>(raw) {
            Ok(h) => st.watch_history = h,
            Err(e) => problems.push(format!("{}: {e}", keys::WATCH_HISTORY)),
        }
    }

    st.trial_used = lookup(keys::HAS_USED_TRIAL).is_some_and(|v| v.trim() == "true");

    if let Some(raw) = lookup(keys::USER) {
        match serde_json::from_str::<Value>(raw) {
            Ok(v @ Value::Object(_)) => st.user_profile = Some(v),
            Ok(_) => problems.push(format!("{}: not a JSON object", keys::USER)),
            Err(e) => problems.push(format!("{}: {e}", keys::USER)),
        }
    }

    out.cached_remaining_minutes =
        lookup(keys::REMAINING_TIME).and_then(|v| v.trim().parse::<i64>().ok());

    out
}

fn channel_id_from_json(v: &Value) -> Option<ChannelId> {
    match v {
        Value::String(s) => Some(ChannelId::new(s.clone())),
        Value::Number(n) => Some(ChannelId::new(n.to_string())),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Encode
// ---------------------------------------------------------------------------

fn json_op<T: Serialize + ?Sized>(key: &'static str, v: &T) -> Option<StoreOp> {
    match serde_json::to_string(v) {
        Ok(s) => Some(StoreOp::set(key, s)),
        Err(e) => {
            error!(key, error = %e, "encode failed; write skipped");
            None
        }
    }
}

fn bool_str(b: bool) -> &'static str {
    if b {
        "true"
    } else {
        "false"
    }
}

/// The authoritative subscription keys.
pub fn subscription_ops(st: &EntitlementState) -> Vec<StoreOp> {
    match st.subscription_end_at {
        Some(end) => vec![
            StoreOp::set(keys::SUBSCRIPTION_END_TIME, end.to_string()),
            StoreOp::set(keys::IS_SUBSCRIBED, bool_str(st.is_subscribed)),
        ],
        None => vec![
            StoreOp::Remove {
                key: keys::SUBSCRIPTION_END_TIME,
            },
            StoreOp::set(keys::IS_SUBSCRIBED, "false"),
        ],
    }
}

pub fn admin_grant_ops(st: &EntitlementState) -> Vec<StoreOp> {
    match &st.admin_grant {
        Some(g) => json_op(keys::ADMIN_GRANTED_ACCESS, g).into_iter().collect(),
        None => vec![StoreOp::Remove {
            key: keys::ADMIN_GRANTED_ACCESS,
        }],
    }
}

/// The session-expired transition: every full-access key goes at once.
pub fn clear_session_ops() -> Vec<StoreOp> {
    vec![
        StoreOp::RemoveMany {
            keys: keys::SESSION.to_vec(),
        },
        StoreOp::set(keys::IS_SUBSCRIBED, "false"),
    ]
}

pub fn points_ops(st: &EntitlementState) -> Vec<StoreOp> {
    let mut ops = vec![StoreOp::set(keys::POINTS, st.points_balance.to_string())];
    ops.extend(json_op(keys::POINTS_HISTORY, &st.points_history));
    ops
}

/// Permanent unlocks only.
pub fn unlocked_ops(st: &EntitlementState) -> Vec<StoreOp> {
    let ids: Vec<&str> = st.permanent_unlocked.iter().map(|c| c.as_str()).collect();
    json_op(keys::UNLOCKED_CHANNELS, &ids).into_iter().collect()
}

pub fn watch_history_ops(st: &EntitlementState) -> Vec<StoreOp> {
    json_op(keys::WATCH_HISTORY, &st.watch_history)
        .into_iter()
        .collect()
}

pub fn trial_ops(st: &EntitlementState) -> Vec<StoreOp> {
    vec![StoreOp::set(keys::HAS_USED_TRIAL, bool_str(st.trial_used))]
}

pub fn user_ops(st: &EntitlementState) -> Vec<StoreOp> {
    match &st.user_profile {
        Some(p) => json_op(keys::USER, p).into_iter().collect(),
        None => vec![StoreOp::Remove { key: keys::USER }],
    }
}

/// Countdown display-cache write. Stamps the cached profile in place.
pub fn checkpoint_ops(st: &mut EntitlementState, remaining_minutes: i64) -> Vec<StoreOp> {
    let mut ops = vec![StoreOp::set(
        keys::REMAINING_TIME,
        remaining_minutes.to_string(),
    )];
    if let Some(Value::Object(profile)) = st.user_profile.as_mut() {
        profile.insert("remainingTime".to_string(), Value::from(remaining_minutes));
        profile.insert("isActivated".to_string(), Value::Bool(remaining_minutes > 0));
        ops.extend(user_ops(st));
    }
    ops
}

/// Every persisted key derivable from the state, session keys included.
#[cfg(test)]
fn full_ops(st: &EntitlementState) -> Vec<StoreOp> {
    let mut ops = subscription_ops(st);
    ops.extend(admin_grant_ops(st));
    ops.extend(points_ops(st));
    ops.extend(unlocked_ops(st));
    ops.extend(watch_history_ops(st));
    ops.extend(trial_ops(st));
    ops.extend(user_ops(st));
    ops
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
