//! Access decisions.
//!
//! Strict precedence, first match wins:
//!
//! | # | Condition                                         | Reason          |
//! |---|---------------------------------------------------|-----------------|
//! | 1 | admin grant present and `expires_at > now`        | `admin`         |
//! | 2 | `is_subscribed && subscription_end_at > now`      | `subscription`  |
//! | 3 | channel is free                                   | `free`          |
//! | 4 | channel in permanent ∪ temporary unlock sets      | `points-unlock` |
//! | 5 | otherwise                                         | `locked`        |
//!
//! Expiry is always recomputed against the supplied `now_ms`; no cached
//! boolean is trusted.

use serde::{Deserialize, Serialize};

use crate::{ChannelRef, EntitlementState};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessReason {
    #[serde(rename = "admin")]
    Admin,
    #[serde(rename = "subscription")]
    Subscription,
    #[serde(rename = "free")]
    Free,
    #[serde(rename = "points-unlock")]
    PointsUnlock,
    #[serde(rename = "locked")]
    Locked,
}

impl AccessReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessReason::Admin => "admin",
            AccessReason::Subscription => "subscription",
            AccessReason::Free => "free",
            AccessReason::PointsUnlock => "points-unlock",
            AccessReason::Locked => "locked",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessDecision {
    pub accessible: bool,
    pub reason: AccessReason,
}

impl AccessDecision {
    fn allow(reason: AccessReason) -> Self {
        Self {
            accessible: true,
            reason,
        }
    }

    fn locked() -> Self {
        Self {
            accessible: false,
            reason: AccessReason::Locked,
        }
    }
}

/// Catalogue-wide gate: steps 1–2 only.
pub fn can_access_catalogue(state: &EntitlementState, now_ms: i64) -> AccessDecision {
    if state.admin_active_at(now_ms) {
        return AccessDecision::allow(AccessReason::Admin);
    }
    if state.subscription_active_at(now_ms) {
        return AccessDecision::allow(AccessReason::Subscription);
    }
    AccessDecision::locked()
}

pub fn can_access_channel(
    state: &EntitlementState,
    channel: &ChannelRef,
    now_ms: i64,
) -> AccessDecision {
    let catalogue = can_access_catalogue(state, now_ms);
    if catalogue.accessible {
        return catalogue;
    }
    if channel.is_free {
        return AccessDecision::allow(AccessReason::Free);
    }
    if state.is_points_unlocked(&channel.id) {
        return AccessDecision::allow(AccessReason::PointsUnlock);
    }
    AccessDecision::locked()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AdminGrant;

    const NOW: i64 = 1_700_000_000_000;

    fn subscribed(end: i64) -> EntitlementState {
        let mut st = EntitlementState::empty();
        st.subscription_end_at = Some(end);
        st.is_subscribed = true;
        st
    }

    #[test]
    fn empty_state_is_locked_for_premium_channels() {
        let st = EntitlementState::empty();
        let d = can_access_channel(&st, &ChannelRef::premium("c1"), NOW);
        assert!(!d.accessible);
        assert_eq!(d.reason, AccessReason::Locked);
        assert!(!can_access_catalogue(&st, NOW).accessible);
    }

    #[test]
    fn admin_takes_precedence_over_subscription() {
        let mut st = subscribed(NOW + 1_000);
        st.admin_grant = Some(AdminGrant {
            granted_at: NOW,
            expires_at: NOW + 1_000,
            duration_minutes: 1,
            access_level: "premium".to_string(),
            granted_by: "ops".to_string(),
        });
        let d = can_access_channel(&st, &ChannelRef::free("c1"), NOW);
        assert_eq!(d.reason, AccessReason::Admin);
    }

    #[test]
    fn expired_admin_grant_falls_through() {
        let mut st = EntitlementState::empty();
        st.admin_grant = Some(AdminGrant {
            granted_at: NOW - 2_000,
            expires_at: NOW - 1,
            duration_minutes: 1,
            access_level: "premium".to_string(),
            granted_by: "ops".to_string(),
        });
        assert!(!can_access_catalogue(&st, NOW).accessible);
    }

    #[test]
    fn stale_is_subscribed_flag_is_not_trusted() {
        let st = subscribed(NOW - 1);
        assert!(!can_access_catalogue(&st, NOW).accessible);
        assert_eq!(
            can_access_channel(&st, &ChannelRef::premium("c1"), NOW).reason,
            AccessReason::Locked
        );
    }

    #[test]
    fn subscription_beats_free() {
        let st = subscribed(NOW + 1);
        assert_eq!(
            can_access_channel(&st, &ChannelRef::free("c1"), NOW).reason,
            AccessReason::Subscription
        );
    }

    #[test]
    fn free_beats_points_unlock() {
        let mut st = EntitlementState::empty();
        st.unlock_permanent("c1".into());
        assert_eq!(
            can_access_channel(&st, &ChannelRef::free("c1"), NOW).reason,
            AccessReason::Free
        );
    }

    #[test]
    fn either_unlock_set_grants_points_unlock() {
        let mut st = EntitlementState::empty();
        st.unlock_permanent("p".into());
        st.unlock_temporary("t".into());
        for id in ["p", "t"] {
            let d = can_access_channel(&st, &ChannelRef::premium(id), NOW);
            assert!(d.accessible);
            assert_eq!(d.reason, AccessReason::PointsUnlock);
        }
        assert!(!can_access_channel(&st, &ChannelRef::premium("x"), NOW).accessible);
    }

    #[test]
    fn reason_strings_are_stable() {
        assert_eq!(AccessReason::PointsUnlock.as_str(), "points-unlock");
        assert_eq!(
            serde_json::to_string(&AccessReason::PointsUnlock).unwrap(),
            "\"points-unlock\""
        );
    }
}
