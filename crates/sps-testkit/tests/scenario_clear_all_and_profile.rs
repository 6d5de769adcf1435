//! Scenario: logout, watch history, trial and profile
//!
//! # Invariants under test
//!
//! 1. `clear_all` removes every key and resets memory, including the
//!    countdown and temporary unlocks.
//! 2. Watch history keeps one entry per channel, most recent first, capped.
//! 3. Countdown checkpoints stamp the cached profile.

use sps_entitlement::{ChannelId, CountdownPhase, WatchedChannel};
use sps_runtime::ChangeKind;
use sps_store::keys;
use sps_testkit::{subscription_granted, Harness};

fn watched(id: &str) -> WatchedChannel {
    WatchedChannel {
        id: ChannelId::new(id),
        name: format!("Channel {id}"),
        logo: None,
    }
}

#[tokio::test]
async fn clear_all_wipes_memory_and_store() {
    let h = Harness::new();
    h.boot().await;
    h.controller.grant(subscription_granted(3, "days")).await;
    h.controller.award_points(80, "signup").await;
    h.controller
        .unlock_channel_temporarily(&ChannelId::new("t"))
        .await;
    h.controller.record_watch(watched("a")).await;
    h.controller.mark_trial_used().await;
    h.controller
        .update_user_profile(serde_json::json!({ "name": "viewer" }))
        .await;

    let mut rx = h.controller.on_state_change();
    h.controller.clear_all().await;
    assert_eq!(rx.recv().await.unwrap().kind, ChangeKind::Cleared);

    let st = h.controller.state().await;
    assert_eq!(st, sps_entitlement::EntitlementState::empty());
    assert_eq!(h.controller.countdown_phase().await, CountdownPhase::Idle);

    h.controller.flush().await;
    for key in keys::ALL {
        assert!(h.store.get_value(key).await.is_none(), "{key} must be removed");
    }
}

#[tokio::test]
async fn watch_history_dedupes_and_caps() {
    let h = Harness::new();
    h.boot().await;
    for i in 0..12 {
        h.controller.record_watch(watched(&format!("ch{i}"))).await;
    }
    h.controller.record_watch(watched("ch5")).await;
    assert!(
        h.controller
            .update_watch_duration(&ChannelId::new("ch5"), 320)
            .await
    );
    assert!(
        !h.controller
            .update_watch_duration(&ChannelId::new("ch0"), 5)
            .await,
        "ch0 fell off the capped history"
    );

    let hist = h.controller.state().await.watch_history;
    assert_eq!(hist.len(), 10);
    assert_eq!(hist[0].channel_id.as_str(), "ch5");
    assert_eq!(hist[0].duration_secs, 320);
    assert_eq!(hist.iter().filter(|e| e.channel_id.as_str() == "ch5").count(), 1);
}

#[tokio::test]
async fn trial_flag_and_profile_persist() {
    let h = Harness::new();
    h.boot().await;
    assert!(!h.controller.has_used_trial().await);
    h.controller.mark_trial_used().await;
    h.controller
        .update_user_profile(serde_json::json!({ "name": "viewer", "isActivated": false }))
        .await;
    h.controller.grant(subscription_granted(90, "minutes")).await;

    let (h, _) = h.cold_restart().await;
    assert!(h.controller.has_used_trial().await);
    let profile = h.controller.user_profile().await.unwrap();
    assert_eq!(profile["name"], "viewer");
    assert_eq!(profile["remainingTime"], 90);
    assert_eq!(profile["isActivated"], true);
}
