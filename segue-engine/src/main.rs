//! segue-engine - gapless and crossfading playback service
//!
//! Loads engine settings, starts the engine task on the native backend and
//! serves the HTTP/SSE API until Ctrl-C.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use segue_common::config::resolve_settings_path;
use segue_engine::config::{FileSettings, SettingsSource};
use segue_engine::pipeline::native::NativeBackend;
use segue_engine::EngineHandle;

/// Command-line arguments for segue-engine
#[derive(Parser, Debug)]
#[command(name = "segue-engine")]
#[command(about = "Gapless and crossfading audio playback engine")]
#[command(version)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "5740", env = "SEGUE_PORT")]
    port: u16,

    /// Settings file (TOML). Falls back to SEGUE_SETTINGS, then the user
    /// config directory.
    #[arg(short, long)]
    settings: Option<PathBuf>,

    /// Number of recent buffers kept for the scope
    #[arg(long, default_value = "16")]
    scope_chunks: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "segue_engine=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    info!("Starting segue-engine on port {}", args.port);

    let settings_path = resolve_settings_path(args.settings.as_deref());
    let settings = FileSettings::new(settings_path);
    info!("Settings: {}", settings.describe());
    // Fail early on a broken file rather than on the first Load
    settings
        .load()
        .with_context(|| format!("Failed to read settings from {}", settings.describe()))?;

    let backend = Arc::new(NativeBackend::new());
    let engine = EngineHandle::spawn(backend, Arc::new(settings), args.scope_chunks);

    segue_engine::api::run(args.port, engine.clone(), shutdown_signal())
        .await
        .context("HTTP server failed")?;

    if let Err(e) = engine.shutdown().await {
        warn!("Engine shutdown: {}", e);
    }
    info!("segue-engine stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
