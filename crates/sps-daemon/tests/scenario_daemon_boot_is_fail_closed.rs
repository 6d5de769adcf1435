//! Scenario: daemon boot is fail-closed
//!
//! # Invariants under test
//!
//! 1. A fresh store boots with no catalogue access.
//! 2. A lapsed stored session is cleared before the first request.
//! 3. A live stored session is served from its absolute expiry.

use std::sync::Arc;

use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use sps_config::load_layered_yaml_from_strings;
use sps_daemon::{routes, state};
use sps_entitlement::{ManualClock, MS_PER_MINUTE};
use sps_runtime::BootOutcome;
use sps_store::{keys, MemoryStore};
use tower::ServiceExt;

const T0: i64 = 1_700_000_000_000;

async fn catalogue(st: Arc<state::AppState>) -> (StatusCode, serde_json::Value) {
    let req = Request::builder()
        .method("GET")
        .uri("/v1/catalogue/access")
        .body(axum::body::Body::empty())
        .unwrap();
    let resp = routes::build_router(st).oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn fresh_store_boots_without_access() {
    let loaded = load_layered_yaml_from_strings(&[]).unwrap();
    let (st, outcome) = state::AppState::boot(
        Arc::new(MemoryStore::new()),
        Arc::new(ManualClock::new(T0)),
        &loaded,
    )
    .await;
    assert_eq!(outcome, BootOutcome::NoSession);

    let (status, json) = catalogue(st).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["accessible"], false);
    assert_eq!(json["remaining"], "expired");
}

#[tokio::test]
async fn lapsed_session_is_cleared_at_boot() {
    let store = Arc::new(MemoryStore::with_entries([
        (keys::SUBSCRIPTION_END_TIME, (T0 - 1).to_string()),
        (keys::IS_SUBSCRIBED, "true".to_string()),
    ]));
    let loaded = load_layered_yaml_from_strings(&[]).unwrap();
    let (st, outcome) =
        state::AppState::boot(store.clone(), Arc::new(ManualClock::new(T0)), &loaded).await;
    assert_eq!(outcome, BootOutcome::Expired { expires_at: T0 - 1 });

    let (_, json) = catalogue(Arc::clone(&st)).await;
    assert_eq!(json["accessible"], false);

    st.controller.flush().await;
    let snap = store.snapshot().await;
    assert_eq!(snap.get(keys::IS_SUBSCRIBED).map(String::as_str), Some("false"));
    assert!(!snap.contains_key(keys::SUBSCRIPTION_END_TIME));
}

#[tokio::test]
async fn live_session_is_served_from_absolute_expiry() {
    let end = T0 + 2 * 60 * MS_PER_MINUTE + 5 * MS_PER_MINUTE;
    let store = Arc::new(MemoryStore::with_entries([
        (keys::SUBSCRIPTION_END_TIME, end.to_string()),
        (keys::IS_SUBSCRIBED, "true".to_string()),
        (keys::REMAINING_TIME, "9999".to_string()),
    ]));
    let loaded =
        load_layered_yaml_from_strings(&["countdown:\n  checkpoint_every_ticks: 10\n"]).unwrap();
    let (st, outcome) =
        state::AppState::boot(store, Arc::new(ManualClock::new(T0)), &loaded).await;
    assert_eq!(outcome, BootOutcome::Resumed { expires_at: end });

    let (_, json) = catalogue(st).await;
    assert_eq!(json["accessible"], true);
    assert_eq!(json["remaining"], "2h 5m");
}
