//! sps-daemon entry point.
//!
//! Boots the entitlement controller over the on-disk store and serves HTTP.
//! Route handlers live in `routes.rs`; shared state types live in `state.rs`.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use sps_config::{load_layered_yaml, load_layered_yaml_from_strings, LoadedConfig};
use sps_daemon::{routes, state};
use sps_entitlement::SystemClock;
use sps_store::JsonFileStore;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};

const DEFAULT_STORE_PATH: &str = "sps-store.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env.local if present (dev convenience).
    // Silent if the file does not exist; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let loaded = load_config_from_env()?;
    info!(config_hash = %loaded.config_hash, "engine config loaded");

    // A corrupt store file stops startup rather than being overwritten.
    let store_path =
        std::env::var("SPS_STORE_PATH").unwrap_or_else(|_| DEFAULT_STORE_PATH.to_string());
    let store = JsonFileStore::open(&store_path)
        .await
        .with_context(|| format!("open store: {store_path}"))?;

    let (shared, _boot) =
        state::AppState::boot(Arc::new(store), Arc::new(SystemClock), &loaded).await;

    state::spawn_heartbeat(shared.bus.clone(), Duration::from_secs(1));

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let addr = bind_addr_from_env().unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8898)));
    info!("sps-daemon listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server crashed")?;

    shared.controller.shutdown().await;
    info!("sps-daemon stopped");
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

fn bind_addr_from_env() -> Option<SocketAddr> {
    std::env::var("SPS_DAEMON_ADDR").ok()?.parse().ok()
}

/// `SPS_CONFIG` is a comma-separated list of YAML layers, base first.
fn load_config_from_env() -> anyhow::Result<LoadedConfig> {
    match std::env::var("SPS_CONFIG") {
        Ok(raw) if !raw.trim().is_empty() => {
            let paths: Vec<&str> = raw
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .collect();
            load_layered_yaml(&paths)
        }
        _ => load_layered_yaml_from_strings(&[]),
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}

/// Player front-ends served from localhost during development.
const ALLOWED_ORIGINS: &[&str] = &[
    "http://localhost",
    "http://127.0.0.1",
    "http://localhost:8081",
    "http://127.0.0.1:8081",
    "http://localhost:19006",
];

fn cors_localhost_only() -> CorsLayer {
    let origins: Vec<HeaderValue> = ALLOWED_ORIGINS
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any)
}
