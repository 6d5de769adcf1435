//! Scenario: real-time events through an attached source
//!
//! # Invariants under test
//!
//! 1. Subscribed events reach the reconciler; others are ignored.
//! 2. A malformed payload is dropped and the pump keeps running.
//! 3. Shutdown releases the source.

use sps_entitlement::AccessReason;
use sps_runtime::{ChangeKind, ChannelEventSource};
use sps_testkit::{admin_access_granted, event, subscription_expired, Harness};

#[tokio::test]
async fn pump_forwards_subscribed_events_only() {
    let h = Harness::new();
    h.boot().await;
    let mut rx = h.controller.on_state_change();
    let (tx, source) = ChannelEventSource::new(16);
    h.controller.attach_event_source(source);

    tx.send(event("chat-message", serde_json::json!({ "duration": 5 })))
        .await
        .unwrap();
    tx.send(event("access-granted", serde_json::json!({ "duration": "soon" })))
        .await
        .unwrap();
    tx.send(admin_access_granted(1, "days", "ops")).await.unwrap();

    let change = rx.recv().await.unwrap();
    assert_eq!(change.kind, ChangeKind::Granted { minutes: 1_440 });
    assert_eq!(
        h.controller.can_access_catalogue().await.reason,
        AccessReason::Admin
    );

    tx.send(subscription_expired()).await.unwrap();
    assert_eq!(rx.recv().await.unwrap().kind, ChangeKind::Expired);
    assert!(!h.controller.can_access_catalogue().await.accessible);
}

#[tokio::test]
async fn shutdown_releases_the_source() {
    let h = Harness::new();
    h.boot().await;
    let (tx, source) = ChannelEventSource::new(4);
    h.controller.attach_event_source(source);

    h.controller.shutdown().await;
    for _ in 0..16 {
        if tx.is_closed() {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert!(tx.is_closed(), "receiver must be dropped with the pump task");
}
