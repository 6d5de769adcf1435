//! Scenario: points ledger and channel unlocks
//!
//! # Invariants under test
//!
//! 1. Spending 50 of 120 points for an unlock leaves 70, unlocks the channel
//!    and records one `{amount: -50, source: "unlock"}` history entry.
//! 2. A spend that would overdraw is rejected and changes nothing.
//! 3. The balance equals the sum of accepted awards minus accepted spends.
//! 4. A temporary unlock does not survive a cold restart; a permanent one does.

use std::sync::Arc;

use sps_entitlement::{AccessReason, ChannelId, ChannelRef, ManualClock, UnlockMode};
use sps_store::keys;
use sps_testkit::{FaultyStore, Harness, T0};

#[tokio::test]
async fn spend_for_unlock_debits_and_records_history() {
    let store = Arc::new(FaultyStore::with_entries([(keys::POINTS, "120")]));
    let h = Harness::over(store, Arc::new(ManualClock::new(T0)));
    h.boot().await;
    assert_eq!(h.controller.points_balance().await, 120);

    let ch = ChannelId::new("movies-4");
    assert!(
        h.controller
            .unlock_channel_with_points(&ch, 50, UnlockMode::Temporary, "unlock")
            .await
    );

    let st = h.controller.state().await;
    assert_eq!(st.points_balance, 70);
    assert!(st.temporary_unlocked.contains(&ch));
    assert_eq!(st.points_history.len(), 1);
    assert_eq!(st.points_history[0].amount, -50);
    assert_eq!(st.points_history[0].source, "unlock");
    assert_eq!(
        h.controller
            .can_access_channel(&ChannelRef::premium("movies-4"))
            .await
            .reason,
        AccessReason::PointsUnlock
    );

    h.controller.flush().await;
    assert_eq!(h.store.get_value(keys::POINTS).await.as_deref(), Some("70"));
}

#[tokio::test]
async fn overdraw_is_rejected_without_side_effects() {
    let h = Harness::new();
    h.boot().await;
    h.controller.award_points(30, "daily-bonus").await;
    h.controller.flush().await;
    h.store.clear_write_log().await;

    assert!(!h.controller.spend_points(31, "unlock").await);
    assert!(
        !h.controller
            .unlock_channel_with_points(&ChannelId::new("x"), 31, UnlockMode::Permanent, "unlock")
            .await
    );

    let st = h.controller.state().await;
    assert_eq!(st.points_balance, 30);
    assert_eq!(st.points_history.len(), 1);
    assert!(st.permanent_unlocked.is_empty());

    h.controller.flush().await;
    assert!(h.store.writes().await.is_empty(), "rejected spend must not write");
}

#[tokio::test]
async fn balance_tracks_accepted_operations() {
    let h = Harness::new();
    h.boot().await;

    let ops: [(bool, u64); 8] = [
        (true, 40),
        (false, 15),
        (false, 30),
        (true, 5),
        (false, 100),
        (false, 20),
        (true, 1),
        (false, 11),
    ];
    let mut expected: u64 = 0;
    for (award, amount) in ops {
        if award {
            h.controller.award_points(amount, "watch-reward").await;
            expected += amount;
        } else if h.controller.spend_points(amount, "unlock").await {
            expected -= amount;
        } else {
            assert!(amount > expected, "only overdraws may be rejected");
        }
        assert_eq!(h.controller.points_balance().await, expected);
    }
    assert_eq!(expected, 0);
}

#[tokio::test]
async fn history_is_capped_most_recent_first() {
    let h = Harness::new();
    h.boot().await;
    for i in 1..=25u64 {
        h.controller.award_points(i, "watch-reward").await;
    }
    let st = h.controller.state().await;
    assert_eq!(st.points_history.len(), 20);
    assert_eq!(st.points_history[0].amount, 25);
    assert_eq!(st.points_history[19].amount, 6);
}

#[tokio::test]
async fn temporary_unlock_does_not_survive_cold_restart() {
    let h = Harness::new();
    h.boot().await;
    let temp = ChannelId::new("ch-temp");
    let perm = ChannelId::new("ch-perm");

    assert!(h.controller.unlock_channel_temporarily(&temp).await);
    assert!(h.controller.unlock_channel_permanently(&perm).await);
    assert!(
        h.controller
            .can_access_channel(&ChannelRef::premium("ch-temp"))
            .await
            .accessible
    );

    let (h, _) = h.cold_restart().await;

    assert!(
        !h.controller
            .can_access_channel(&ChannelRef::premium("ch-temp"))
            .await
            .accessible,
        "temporary unlock must be gone after restart"
    );
    assert!(
        h.controller
            .can_access_channel(&ChannelRef::premium("ch-perm"))
            .await
            .accessible,
        "permanent unlock must survive restart"
    );
    assert!(h.controller.state().await.temporary_unlocked.is_empty());
    assert_eq!(
        h.store.get_value(keys::UNLOCKED_CHANNELS).await.as_deref(),
        Some(r#"["ch-perm"]"#)
    );
}

#[tokio::test]
async fn lock_reverses_unlock() {
    let h = Harness::new();
    h.boot().await;
    let ch = ChannelId::new("ch-1");

    assert!(h.controller.unlock_channel_permanently(&ch).await);
    assert!(!h.controller.unlock_channel_permanently(&ch).await);
    assert!(h.controller.lock_channel_permanently(&ch).await);
    assert!(!h.controller.lock_channel_temporarily(&ch).await);
    assert!(
        !h.controller
            .can_access_channel(&ChannelRef::premium("ch-1"))
            .await
            .accessible
    );
}

#[tokio::test]
async fn unlock_history_records_caller_purpose() {
    let store = Arc::new(FaultyStore::with_entries([(keys::POINTS, "80")]));
    let h = Harness::over(store, Arc::new(ManualClock::new(T0)));
    h.boot().await;

    let ch = ChannelId::new("kids-2");
    assert!(
        h.controller
            .unlock_channel_with_points(&ch, 25, UnlockMode::Permanent, "unlock:kids-2")
            .await
    );

    let st = h.controller.state().await;
    assert_eq!(st.points_balance, 55);
    assert_eq!(st.points_history[0].amount, -25);
    assert_eq!(st.points_history[0].source, "unlock:kids-2");
}
