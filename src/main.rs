// src/main.rs
// tablechat-server: HTTP health surface + duplex push channel for the
// chat-over-datasets core.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::http::{header, Method};
use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tablechat_core::api::http::{health_check, liveness_check, readiness_check};
use tablechat_core::api::ws::ws_handler;
use tablechat_core::config::CONFIG;
use tablechat_core::state::AppState;

fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/live", get(liveness_check))
        .route("/ws", get(ws_handler))
        .layer(cors)
        .with_state(state)
}

/// Periodically trims both cache layers so neither grows unbounded between
/// requests. Failures are logged and swallowed; this loop never exits.
fn spawn_maintenance_loop(state: Arc<AppState>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(CONFIG.query_cache.cleanup_interval_secs));
        loop {
            interval.tick().await;

            if let Err(e) = state.query_cache.cleanup_expired().await {
                warn!(error = %e, "query cache expired-entry cleanup failed");
            }
            if let Err(e) = state.query_cache.cleanup_lru().await {
                warn!(error = %e, "query cache lru cleanup failed");
            }

            state.file_cache.evict_lru();
            state
                .file_cache
                .cleanup_stale_temp_files(CONFIG.file_cache.stale_temp_file_age_secs);
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(CONFIG.logging.level.clone()))
        .with_ansi(false)
        .init();

    info!("starting tablechat-server");

    let state = Arc::new(AppState::new().await?);
    spawn_maintenance_loop(state.clone());

    let app = create_router(state);
    let addr = CONFIG.bind_address();

    info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
