//! HTTP server setup and routing

use crate::engine::EngineHandle;
use crate::error::{Error, Result};
use axum::{
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use tower_http::cors::CorsLayer;
use tracing::info;

/// Shared application context passed to all handlers
#[derive(Clone)]
pub struct AppContext {
    pub engine: EngineHandle,
}

/// Build the router with all routes attached to `ctx`
pub fn create_router(ctx: AppContext) -> Router {
    Router::new()
        .route("/health", get(super::handlers::health))
        // Audio output and post-processing
        .route("/audio/outputs", get(super::handlers::list_outputs))
        .route("/audio/volume", get(super::handlers::get_volume))
        .route("/audio/volume", post(super::handlers::set_volume))
        .route("/audio/equalizer", post(super::handlers::set_equalizer))
        .route(
            "/audio/equalizer/enabled",
            post(super::handlers::set_equalizer_enabled),
        )
        .route("/audio/balance", post(super::handlers::set_balance))
        // Playback control
        .route("/playback/load", post(super::handlers::load))
        .route("/playback/preload", post(super::handlers::preload))
        .route("/playback/play", post(super::handlers::play))
        .route("/playback/pause", post(super::handlers::pause))
        .route("/playback/unpause", post(super::handlers::unpause))
        .route("/playback/stop", post(super::handlers::stop))
        .route("/playback/seek", post(super::handlers::seek))
        .route("/playback/state", get(super::handlers::get_playback_state))
        .route("/playback/position", get(super::handlers::get_position))
        .route("/playback/scope", get(super::handlers::get_scope))
        .route("/settings/reload", post(super::handlers::reload_settings))
        .route("/events", get(super::sse::event_stream))
        .with_state(ctx)
        .layer(CorsLayer::permissive())
}

/// Serve the API on `port` until `shutdown` resolves
pub async fn run<F>(port: u16, engine: EngineHandle, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = create_router(AppContext { engine });

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Http(format!("Failed to bind to {}: {}", addr, e)))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| Error::Http(format!("Server error: {}", e)))?;

    info!("HTTP server stopped");
    Ok(())
}
