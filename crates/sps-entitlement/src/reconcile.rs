use crate::{AdminGrant, EntitlementState, GrantEvent};

/// Side-effect instructions for the runtime. The reconciler never performs IO.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Effect {
    /// Write `subscriptionEndTime` / `isSubscribed`.
    PersistSubscription,
    /// Write `adminGrantedAccess`.
    PersistAdminGrant,
    /// Remove every full-access key ("session expired").
    ClearSession,
    /// Cancel any running countdown and start a new one at this absolute expiry.
    RestartCountdown { expires_at: i64 },
    StopCountdown,
    /// Surface a "you have been granted N minutes" notice.
    NotifyGranted { minutes: i64 },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Reconciled {
    pub state: EntitlementState,
    pub effects: Vec<Effect>,
}

/// Merge one normalised event into the state.
///
/// - Grants REPLACE `subscription_end_at`; a duplicate delivery reproduces
///   the same state rather than extending it.
/// - An admin-attributed grant also replaces the admin record. A duplicate
///   (same expiry, same issuer) keeps the stored record as it was.
/// - `Expire` clears both full-access grants unconditionally; server-driven
///   revocation wins over the local countdown.
/// - A grant that leaves any recorded full-access grant in the past
///   converges straight to the expired state, clearing both.
pub fn reconcile(state: &EntitlementState, event: &GrantEvent, now_ms: i64) -> Reconciled {
    let mut next = state.clone();
    let mut effects = Vec::new();

    match event {
        GrantEvent::Expire => {
            next.clear_session();
            effects.push(Effect::ClearSession);
            effects.push(Effect::StopCountdown);
        }
        GrantEvent::Grant {
            end_at,
            duration_minutes,
            admin,
            ..
        } => {
            next.subscription_end_at = Some(*end_at);
            next.is_subscribed = true;
            effects.push(Effect::PersistSubscription);

            if let Some(attr) = admin {
                let redelivered = state.admin_grant.as_ref().filter(|prev| {
                    prev.expires_at == *end_at && prev.granted_by == attr.granted_by
                });
                next.admin_grant = Some(match redelivered {
                    Some(prev) => prev.clone(),
                    None => AdminGrant {
                        granted_at: now_ms,
                        expires_at: *end_at,
                        duration_minutes: *duration_minutes,
                        access_level: attr.access_level.clone(),
                        granted_by: attr.granted_by.clone(),
                    },
                });
                effects.push(Effect::PersistAdminGrant);
            }

            match next.session_expires_at() {
                Some(expires_at) if expires_at > now_ms => {
                    effects.push(Effect::RestartCountdown { expires_at });
                    effects.push(Effect::NotifyGranted {
                        minutes: *duration_minutes,
                    });
                }
                _ => {
                    next.clear_session();
                    effects.clear();
                    effects.push(Effect::ClearSession);
                    effects.push(Effect::StopCountdown);
                }
            }
        }
    }

    Reconciled {
        state: next,
        effects,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::AdminAttribution;
    use crate::GrantKind;

    const NOW: i64 = 1_700_000_000_000;

    fn grant(end_at: i64) -> GrantEvent {
        GrantEvent::Grant {
            kind: GrantKind::SubscriptionGranted,
            end_at,
            duration_minutes: (end_at - NOW) / 60_000,
            admin: None,
        }
    }

    fn admin_grant(end_at: i64) -> GrantEvent {
        GrantEvent::Grant {
            kind: GrantKind::AccessGranted,
            end_at,
            duration_minutes: (end_at - NOW) / 60_000,
            admin: Some(AdminAttribution {
                access_level: "premium".to_string(),
                granted_by: "ops".to_string(),
            }),
        }
    }

    #[test]
    fn duplicate_grant_does_not_compound() {
        let t = NOW + 3_600_000;
        let once = reconcile(&EntitlementState::empty(), &grant(t), NOW);
        let twice = reconcile(&once.state, &grant(t), NOW + 10);
        assert_eq!(once.state, twice.state);
        assert_eq!(twice.state.subscription_end_at, Some(t));
    }

    #[test]
    fn grant_replaces_rather_than_extends() {
        let first = reconcile(&EntitlementState::empty(), &grant(NOW + 10_000_000), NOW);
        let second = reconcile(&first.state, &grant(NOW + 5_000_000), NOW);
        assert_eq!(second.state.subscription_end_at, Some(NOW + 5_000_000));
    }

    #[test]
    fn grant_emits_persist_and_restart() {
        let r = reconcile(&EntitlementState::empty(), &grant(NOW + 60_000), NOW);
        assert!(r.state.is_subscribed);
        assert_eq!(
            r.effects,
            vec![
                Effect::PersistSubscription,
                Effect::RestartCountdown {
                    expires_at: NOW + 60_000
                },
                Effect::NotifyGranted { minutes: 1 },
            ]
        );
    }

    #[test]
    fn duplicate_admin_grant_keeps_original_granted_at() {
        let t = NOW + 3_600_000;
        let once = reconcile(&EntitlementState::empty(), &admin_grant(t), NOW);
        let twice = reconcile(&once.state, &admin_grant(t), NOW + 5_000);
        assert_eq!(once.state, twice.state);
        assert_eq!(twice.state.admin_grant.unwrap().granted_at, NOW);
    }

    #[test]
    fn expire_clears_admin_grant_it_does_not_name() {
        let granted = reconcile(&EntitlementState::empty(), &admin_grant(NOW + 60_000), NOW);
        assert!(granted.state.admin_grant.is_some());

        let r = reconcile(&granted.state, &GrantEvent::Expire, NOW + 1);
        assert!(r.state.admin_grant.is_none());
        assert_eq!(r.state.subscription_end_at, None);
        assert!(!r.state.is_subscribed);
        assert_eq!(r.effects, vec![Effect::ClearSession, Effect::StopCountdown]);
    }

    #[test]
    fn grant_already_in_the_past_converges_to_expired() {
        let r = reconcile(&EntitlementState::empty(), &grant(NOW - 1), NOW);
        assert_eq!(r.state.subscription_end_at, None);
        assert!(!r.state.is_subscribed);
        assert_eq!(r.effects, vec![Effect::ClearSession, Effect::StopCountdown]);
    }

    #[test]
    fn countdown_runs_to_the_earlier_expiry() {
        let admin = reconcile(&EntitlementState::empty(), &admin_grant(NOW + 100_000), NOW);
        let r = reconcile(&admin.state, &grant(NOW + 10_000), NOW);
        assert!(r.effects.contains(&Effect::RestartCountdown {
            expires_at: NOW + 10_000
        }));
    }

    #[test]
    fn lapsed_subscription_grant_clears_live_admin_grant() {
        let admin = reconcile(&EntitlementState::empty(), &admin_grant(NOW + 100_000), NOW);
        let r = reconcile(&admin.state, &grant(NOW - 1), NOW);
        assert!(r.state.admin_grant.is_none());
        assert_eq!(r.state.subscription_end_at, None);
        assert_eq!(r.effects, vec![Effect::ClearSession, Effect::StopCountdown]);
    }

    #[test]
    fn redelivered_end_at_grant_is_identical_after_clock_moves() {
        let end_at = NOW + 120 * 60_000;
        let ev = crate::RealtimeEvent::new(
            "access-granted",
            serde_json::json!({ "endAt": end_at, "grantedBy": "ops" }),
        );
        let first = GrantEvent::parse(&ev, NOW, 30).unwrap().unwrap();
        let later = NOW + 5 * 60_000;
        let again = GrantEvent::parse(&ev, later, 30).unwrap().unwrap();

        let once = reconcile(&EntitlementState::empty(), &first, NOW);
        let twice = reconcile(&once.state, &again, later);
        assert_eq!(once.state, twice.state);
        assert_eq!(twice.state.admin_grant.unwrap().duration_minutes, 120);
    }

    #[test]
    fn points_and_unlocks_survive_reconcile() {
        let mut st = EntitlementState::empty();
        st.points_balance = 42;
        st.unlock_permanent("ch-1".into());
        st.unlock_temporary("ch-2".into());
        let r = reconcile(&st, &GrantEvent::Expire, NOW);
        assert_eq!(r.state.points_balance, 42);
        assert!(r.state.is_points_unlocked(&"ch-1".into()));
        assert!(r.state.is_points_unlocked(&"ch-2".into()));
    }
}
