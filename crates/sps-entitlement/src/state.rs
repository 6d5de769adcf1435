//! The authoritative entitlement snapshot.
//!
//! # Invariants
//!
//! - `is_subscribed` is a read cache only; every access decision recomputes
//!   `subscription_end_at > now`.
//! - `points_balance` never goes negative: a spend that would overdraw is
//!   rejected with [`InsufficientPoints`] and leaves the state untouched.
//! - `temporary_unlocked` is never encoded by the persistence codec and is
//!   empty after every cold start.
//! - Histories are most-recent-first and capped; they are audit trails and
//!   never consulted by the access decision.

use std::collections::BTreeSet;

use crate::{
    AdminGrant, ChannelId, PointsHistoryEntry, TransientUnlockCache, WatchHistoryEntry,
    WatchedChannel,
};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A spend was rejected because the balance does not cover it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InsufficientPoints {
    pub balance: u64,
    pub requested: u64,
}

impl std::fmt::Display for InsufficientPoints {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "insufficient points: balance={} requested={}",
            self.balance, self.requested
        )
    }
}

impl std::error::Error for InsufficientPoints {}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq)]
pub struct EntitlementState {
    /// Absolute end of the paid subscription (epoch ms).
    pub subscription_end_at: Option<i64>,
    pub is_subscribed: bool,
    pub admin_grant: Option<AdminGrant>,
    pub points_balance: u64,
    pub permanent_unlocked: BTreeSet<ChannelId>,
    pub temporary_unlocked: TransientUnlockCache,
    pub points_history: Vec<PointsHistoryEntry>,
    pub watch_history: Vec<WatchHistoryEntry>,
    pub trial_used: bool,
    /// Cached account profile as handed over by the account service.
    pub user_profile: Option<serde_json::Value>,
}

impl EntitlementState {
    pub fn empty() -> Self {
        Self::default()
    }

    // -----------------------------------------------------------------------
    // Full-access grants
    // -----------------------------------------------------------------------

    pub fn subscription_active_at(&self, now_ms: i64) -> bool {
        self.is_subscribed && self.subscription_end_at.is_some_and(|end| end > now_ms)
    }

    pub fn admin_active_at(&self, now_ms: i64) -> bool {
        self.admin_grant
            .as_ref()
            .is_some_and(|g| g.is_active_at(now_ms))
    }

    /// When the session ends: the earliest expiry among the full-access
    /// grants present, expired or not. Once any grant lapses both are
    /// cleared, so the later expiry is never reached.
    pub fn session_expires_at(&self) -> Option<i64> {
        let sub = self.subscription_end_at;
        let admin = self.admin_grant.as_ref().map(|g| g.expires_at);
        match (sub, admin) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Furthest expiry on record. Used for the clock-skew check at restore.
    pub fn latest_grant_expiry(&self) -> Option<i64> {
        let sub = self.subscription_end_at;
        let admin = self.admin_grant.as_ref().map(|g| g.expires_at);
        sub.max(admin)
    }

    /// `true` when some full-access grant is recorded and at least one of
    /// them is past.
    pub fn session_lapsed_at(&self, now_ms: i64) -> bool {
        self.session_expires_at().is_some_and(|end| end <= now_ms)
    }

    /// Milliseconds left on the session, `None` when no session is active.
    pub fn session_remaining_ms(&self, now_ms: i64) -> Option<i64> {
        self.session_expires_at()
            .map(|end| end - now_ms)
            .filter(|rem| *rem > 0)
    }

    /// The "session expired" transition: both full-access grants go together.
    pub fn clear_session(&mut self) {
        self.subscription_end_at = None;
        self.is_subscribed = false;
        self.admin_grant = None;
    }

    // -----------------------------------------------------------------------
    // Points
    // -----------------------------------------------------------------------

    /// Credit points. Always succeeds; returns the new balance.
    pub fn award_points(&mut self, amount: u64, source: &str, now_ms: i64, cap: usize) -> u64 {
        self.points_balance = self.points_balance.saturating_add(amount);
        self.push_points_history(signed(amount), source, now_ms, cap);
        self.points_balance
    }

    /// Debit points, rejecting (not clamping) an overdraw.
    pub fn spend_points(
        &mut self,
        amount: u64,
        purpose: &str,
        now_ms: i64,
        cap: usize,
    ) -> Result<u64, InsufficientPoints> {
        if self.points_balance < amount {
            return Err(InsufficientPoints {
                balance: self.points_balance,
                requested: amount,
            });
        }
        self.points_balance -= amount;
        self.push_points_history(-signed(amount), purpose, now_ms, cap);
        Ok(self.points_balance)
    }

    fn push_points_history(&mut self, amount: i64, source: &str, now_ms: i64, cap: usize) {
        let entry = PointsHistoryEntry {
            id: uuid::Uuid::new_v4().to_string(),
            amount,
            source: source.to_string(),
            timestamp: rfc3339(now_ms),
        };
        self.points_history.insert(0, entry);
        self.points_history.truncate(cap);
    }

    // -----------------------------------------------------------------------
    // Channel unlocks
    // -----------------------------------------------------------------------

    pub fn unlock_permanent(&mut self, id: ChannelId) -> bool {
        self.permanent_unlocked.insert(id)
    }

    pub fn lock_permanent(&mut self, id: &ChannelId) -> bool {
        self.permanent_unlocked.remove(id)
    }

    pub fn unlock_temporary(&mut self, id: ChannelId) -> bool {
        self.temporary_unlocked.unlock(id)
    }

    pub fn lock_temporary(&mut self, id: &ChannelId) -> bool {
        self.temporary_unlocked.lock(id)
    }

    pub fn is_points_unlocked(&self, id: &ChannelId) -> bool {
        self.permanent_unlocked.contains(id) || self.temporary_unlocked.contains(id)
    }

    // -----------------------------------------------------------------------
    // Watch history
    // -----------------------------------------------------------------------

    /// Move (or insert) the channel to the front of the watch history.
    pub fn record_watch(&mut self, channel: WatchedChannel, now_ms: i64, cap: usize) {
        self.watch_history.retain(|e| e.channel_id != channel.id);
        self.watch_history.insert(
            0,
            WatchHistoryEntry {
                channel_id: channel.id,
                channel_name: channel.name,
                channel_logo: channel.logo,
                watched_at: rfc3339(now_ms),
                duration_secs: 0,
            },
        );
        self.watch_history.truncate(cap);
    }

    /// Returns `false` if the channel has no history entry.
    pub fn update_watch_duration(&mut self, id: &ChannelId, secs: u64, now_ms: i64) -> bool {
        match self.watch_history.iter_mut().find(|e| &e.channel_id == id) {
            Some(entry) => {
                entry.duration_secs = secs;
                entry.watched_at = rfc3339(now_ms);
                true
            }
            None => false,
        }
    }
}

fn signed(amount: u64) -> i64 {
    i64::try_from(amount).unwrap_or(i64::MAX)
}

fn rfc3339(now_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(now_ms)
        .unwrap_or_default()
        .to_rfc3339()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000_000;

    fn admin(expires_at: i64) -> AdminGrant {
        AdminGrant {
            granted_at: NOW,
            expires_at,
            duration_minutes: 60,
            access_level: "premium".to_string(),
            granted_by: "ops".to_string(),
        }
    }

    #[test]
    fn spend_rejects_overdraw_and_leaves_balance() {
        let mut st = EntitlementState::empty();
        st.award_points(10, "ad", NOW, 20);
        let err = st.spend_points(11, "unlock", NOW, 20).unwrap_err();
        assert_eq!(
            err,
            InsufficientPoints {
                balance: 10,
                requested: 11
            }
        );
        assert_eq!(st.points_balance, 10);
        assert_eq!(st.points_history.len(), 1, "rejected spend must not log");
    }

    #[test]
    fn spend_then_award_restores_balance() {
        let mut st = EntitlementState::empty();
        st.award_points(120, "ad", NOW, 20);
        st.spend_points(50, "unlock", NOW, 20).unwrap();
        st.award_points(50, "refund", NOW, 20);
        assert_eq!(st.points_balance, 120);
        assert_eq!(st.points_history[0].amount, 50);
        assert_eq!(st.points_history[1].amount, -50);
        assert_eq!(st.points_history[1].source, "unlock");
    }

    #[test]
    fn points_history_is_capped_most_recent_first() {
        let mut st = EntitlementState::empty();
        for i in 0..25 {
            st.award_points(1, &format!("s{i}"), NOW + i, 20);
        }
        assert_eq!(st.points_history.len(), 20);
        assert_eq!(st.points_history[0].source, "s24");
        assert_eq!(st.points_history[19].source, "s5");
    }

    #[test]
    fn watch_history_dedupes_per_channel() {
        let mut st = EntitlementState::empty();
        let ch = |id: &str| WatchedChannel {
            id: ChannelId::new(id),
            name: id.to_uppercase(),
            logo: None,
        };
        st.record_watch(ch("a"), NOW, 10);
        st.record_watch(ch("b"), NOW + 1, 10);
        st.record_watch(ch("a"), NOW + 2, 10);
        let ids: Vec<&str> = st.watch_history.iter().map(|e| e.channel_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);

        assert!(st.update_watch_duration(&ChannelId::new("b"), 90, NOW + 3));
        assert_eq!(st.watch_history[1].duration_secs, 90);
        assert!(!st.update_watch_duration(&ChannelId::new("zz"), 1, NOW));
    }

    #[test]
    fn session_ends_at_the_earlier_grant() {
        let mut st = EntitlementState::empty();
        assert_eq!(st.session_expires_at(), None);

        st.subscription_end_at = Some(NOW + 10);
        st.is_subscribed = true;
        st.admin_grant = Some(admin(NOW + 50));
        assert_eq!(st.session_expires_at(), Some(NOW + 10));
        assert_eq!(st.latest_grant_expiry(), Some(NOW + 50));
        assert_eq!(st.session_remaining_ms(NOW), Some(10));
        assert!(!st.session_lapsed_at(NOW + 9));
        assert!(st.session_lapsed_at(NOW + 10));

        st.subscription_end_at = None;
        assert_eq!(st.session_expires_at(), Some(NOW + 50));
    }

    #[test]
    fn subscription_requires_live_timestamp_not_just_flag() {
        let mut st = EntitlementState::empty();
        st.is_subscribed = true;
        st.subscription_end_at = Some(NOW);
        assert!(!st.subscription_active_at(NOW));
        assert!(st.subscription_active_at(NOW - 1));
    }

    #[test]
    fn clear_session_drops_both_grants() {
        let mut st = EntitlementState::empty();
        st.subscription_end_at = Some(NOW + 10);
        st.is_subscribed = true;
        st.admin_grant = Some(admin(NOW + 10));
        st.clear_session();
        assert_eq!(st.subscription_end_at, None);
        assert!(!st.is_subscribed);
        assert!(st.admin_grant.is_none());
    }
}
