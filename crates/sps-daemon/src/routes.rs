//! Axum router and all HTTP handlers for sps-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers.  All handlers are `pub(crate)` so the scenario tests in
//! `tests/` can compose the router directly.

use std::{convert::Infallible, sync::Arc};

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures_util::{Stream, StreamExt};
use sps_entitlement::{
    ChannelId, ChannelRef, EntitlementState, RealtimeEvent, UnlockMode, WatchedChannel,
};
use sps_runtime::GrantOutcome;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::info;

use crate::{
    api_types::{
        AccessResponse, ChannelAccessQuery, ErrorResponse, EventRequest, EventResponse,
        HealthResponse, LockRequest, PointsRequest, PointsResponse, UnlockRequest,
        UnlockResponse, WatchRequest,
    },
    state::{AppState, BusMsg},
};

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here; `main.rs`
/// attaches them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/entitlement", get(entitlement))
        .route("/v1/stream", get(stream))
        .route("/v1/catalogue/access", get(catalogue_access))
        .route("/v1/channels/:id/access", get(channel_access))
        .route("/v1/channels/:id/unlock", post(channel_unlock))
        .route("/v1/channels/:id/lock", post(channel_lock))
        .route("/v1/events", post(post_event))
        .route("/v1/points/award", post(points_award))
        .route("/v1/points/spend", post(points_spend))
        .route("/v1/watch", post(watch))
        .route("/v1/reset", post(reset))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service.to_string(),
            version: st.build.version.to_string(),
            config_hash: st.config_hash.clone(),
            unpersisted: st.controller.is_unpersisted(),
        }),
    )
}

// ---------------------------------------------------------------------------
// GET /v1/entitlement
// ---------------------------------------------------------------------------

pub(crate) async fn entitlement(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (StatusCode::OK, Json(st.controller.snapshot().await))
}

// ---------------------------------------------------------------------------
// Access decisions
// ---------------------------------------------------------------------------

pub(crate) async fn catalogue_access(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    let decision = st.controller.can_access_catalogue().await;
    (
        StatusCode::OK,
        Json(AccessResponse {
            channel_id: None,
            accessible: decision.accessible,
            reason: decision.reason,
            remaining: st.controller.format_remaining().await,
        }),
    )
}

pub(crate) async fn channel_access(
    State(st): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(q): Query<ChannelAccessQuery>,
) -> impl IntoResponse {
    let channel = ChannelRef::new(id.clone(), q.free);
    let decision = st.controller.can_access_channel(&channel).await;
    (
        StatusCode::OK,
        Json(AccessResponse {
            channel_id: Some(id),
            accessible: decision.accessible,
            reason: decision.reason,
            remaining: st.controller.format_remaining().await,
        }),
    )
}

// ---------------------------------------------------------------------------
// POST /v1/events
// ---------------------------------------------------------------------------

/// Inject one real-time event. Unknown events are accepted and ignored;
/// malformed payloads are refused with 422 and change nothing.
pub(crate) async fn post_event(
    State(st): State<Arc<AppState>>,
    Json(req): Json<EventRequest>,
) -> Response {
    let outcome = st
        .controller
        .grant(RealtimeEvent::new(req.name.clone(), req.payload))
        .await;
    info!(event = %req.name, ?outcome, "events/post");

    let (status, body) = match outcome {
        GrantOutcome::Applied {
            minutes,
            expires_at,
        } => (
            StatusCode::OK,
            EventResponse {
                outcome: "applied".to_string(),
                minutes: Some(minutes),
                expires_at: Some(expires_at),
                error: None,
            },
        ),
        GrantOutcome::Expired => (StatusCode::OK, bare_outcome("expired")),
        GrantOutcome::Ignored => (StatusCode::ACCEPTED, bare_outcome("ignored")),
        GrantOutcome::Malformed(e) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            EventResponse {
                error: Some(e.to_string()),
                ..bare_outcome("malformed")
            },
        ),
    };
    (status, Json(body)).into_response()
}

fn bare_outcome(outcome: &str) -> EventResponse {
    EventResponse {
        outcome: outcome.to_string(),
        minutes: None,
        expires_at: None,
        error: None,
    }
}

// ---------------------------------------------------------------------------
// Points
// ---------------------------------------------------------------------------

pub(crate) async fn points_award(
    State(st): State<Arc<AppState>>,
    Json(req): Json<PointsRequest>,
) -> impl IntoResponse {
    let source = req.source.as_deref().unwrap_or("manual");
    let balance = st.controller.award_points(req.amount, source).await;
    info!(amount = req.amount, source, balance, "points/award");
    (StatusCode::OK, Json(PointsResponse { balance }))
}

/// 409 when the balance does not cover the spend; nothing changes.
pub(crate) async fn points_spend(
    State(st): State<Arc<AppState>>,
    Json(req): Json<PointsRequest>,
) -> Response {
    let purpose = req.source.as_deref().unwrap_or("spend");
    if !st.controller.spend_points(req.amount, purpose).await {
        return insufficient_points(st.controller.points_balance().await);
    }
    let balance = st.controller.points_balance().await;
    info!(amount = req.amount, purpose, balance, "points/spend");
    (StatusCode::OK, Json(PointsResponse { balance })).into_response()
}

fn insufficient_points(balance: u64) -> Response {
    (
        StatusCode::CONFLICT,
        Json(ErrorResponse {
            error: "INSUFFICIENT_POINTS".to_string(),
            balance: Some(balance),
        }),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// Channel unlock / lock
// ---------------------------------------------------------------------------

pub(crate) async fn channel_unlock(
    State(st): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<UnlockRequest>,
) -> Response {
    let channel = ChannelId::new(id.clone());
    let changed = match req.cost {
        Some(cost) => {
            let before = unlocked_as(&st.controller.state().await, &channel, req.mode);
            let purpose = req.purpose.as_deref().unwrap_or("unlock");
            if !st
                .controller
                .unlock_channel_with_points(&channel, cost, req.mode, purpose)
                .await
            {
                return insufficient_points(st.controller.points_balance().await);
            }
            !before
        }
        None => match req.mode {
            UnlockMode::Permanent => st.controller.unlock_channel_permanently(&channel).await,
            UnlockMode::Temporary => st.controller.unlock_channel_temporarily(&channel).await,
        },
    };
    info!(channel = %channel, mode = ?req.mode, cost = ?req.cost, changed, "channels/unlock");
    unlock_response(&st, id, req.mode, changed).await
}

/// Whether a paid unlock of `channel` in `mode` would leave the state unchanged.
fn unlocked_as(state: &EntitlementState, channel: &ChannelId, mode: UnlockMode) -> bool {
    match mode {
        UnlockMode::Permanent => state.permanent_unlocked.contains(channel),
        UnlockMode::Temporary => state.is_points_unlocked(channel),
    }
}

pub(crate) async fn channel_lock(
    State(st): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<LockRequest>,
) -> Response {
    let channel = ChannelId::new(id.clone());
    let changed = match req.mode {
        UnlockMode::Permanent => st.controller.lock_channel_permanently(&channel).await,
        UnlockMode::Temporary => st.controller.lock_channel_temporarily(&channel).await,
    };
    info!(channel = %channel, mode = ?req.mode, changed, "channels/lock");
    unlock_response(&st, id, req.mode, changed).await
}

async fn unlock_response(st: &AppState, id: String, mode: UnlockMode, changed: bool) -> Response {
    let accessible = st
        .controller
        .can_access_channel(&ChannelRef::premium(id.clone()))
        .await
        .accessible;
    (
        StatusCode::OK,
        Json(UnlockResponse {
            channel_id: id,
            mode,
            changed,
            accessible,
            balance: st.controller.points_balance().await,
        }),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// POST /v1/watch
// ---------------------------------------------------------------------------

pub(crate) async fn watch(
    State(st): State<Arc<AppState>>,
    Json(req): Json<WatchRequest>,
) -> Response {
    let channel = ChannelId::new(req.channel_id);
    match req.duration_secs {
        Some(secs) => {
            if !st.controller.update_watch_duration(&channel, secs).await {
                return (
                    StatusCode::NOT_FOUND,
                    Json(ErrorResponse {
                        error: format!("NO_WATCH_ENTRY: {channel}"),
                        balance: None,
                    }),
                )
                    .into_response();
            }
        }
        None => {
            st.controller
                .record_watch(WatchedChannel {
                    id: channel,
                    name: req.channel_name,
                    logo: req.channel_logo,
                })
                .await;
        }
    }
    let history = st.controller.snapshot().await.watch_history;
    (StatusCode::OK, Json(history)).into_response()
}

// ---------------------------------------------------------------------------
// POST /v1/reset  (logout)
// ---------------------------------------------------------------------------

pub(crate) async fn reset(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    st.controller.clear_all().await;
    info!("reset");
    (StatusCode::OK, Json(st.controller.snapshot().await))
}

// ---------------------------------------------------------------------------
// GET /v1/stream  (SSE)
// ---------------------------------------------------------------------------

pub(crate) async fn stream(State(st): State<Arc<AppState>>) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));
    headers.insert("Connection", HeaderValue::from_static("keep-alive"));

    let rx = st.bus.subscribe();
    let events = broadcast_to_sse(rx);

    (headers, Sse::new(events).keep_alive(KeepAlive::new())).into_response()
}

fn broadcast_to_sse(
    rx: broadcast::Receiver<BusMsg>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    BroadcastStream::new(rx).filter_map(|msg| async move {
        match msg {
            Ok(m) => {
                let event_name = match &m {
                    BusMsg::Heartbeat { .. } => "heartbeat",
                    BusMsg::Entitlement(_) => "entitlement",
                };
                let data = serde_json::to_string(&m).ok()?;
                Some(Ok(Event::default().event(event_name).data(data)))
            }
            Err(_) => None, // lagged / closed
        }
    })
}
