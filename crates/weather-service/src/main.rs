//! Weather Service - station ingestion, retention, relay and HTTP API.
//!
//! Run with: `cargo run -p weather-service`

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use clap::Parser;
use time::OffsetDateTime;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use weather_service::packet::source_from_config;
use weather_service::{
    AppState, Config, PacketListener, RetentionManager, Syncer, api, http, logging,
};

/// Weather Service - receives station uploads and keeps a local history.
#[derive(Parser, Debug)]
#[command(name = "weather-service")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address (overrides config).
    #[arg(short, long)]
    bind: Option<String>,

    /// Database path (overrides config).
    #[arg(short, long)]
    database: Option<PathBuf>,

    /// Disable the upstream relay even if configured.
    #[arg(long)]
    no_sync: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };

    // Override config with CLI args
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(db_path) = args.database {
        config.storage.path = db_path;
    }
    if args.no_sync {
        config.sync.enabled = false;
    }
    config.validate()?;

    // Initialize logging
    let today = OffsetDateTime::now_utc()
        .to_offset(config.station.utc_offset())
        .date();
    let active_log = logging::init(config.retention.log_dir.as_deref(), today)
        .context("Failed to initialize logging")?;
    if let Some(path) = &active_log {
        info!("Writing logs to {}", path.display());
    }

    let addr: SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("Invalid bind address {}", config.server.bind))?;

    // Open the database; failure here aborts startup
    let db_path = config.storage.path.clone();
    let state = AppState::open(config, active_log)
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;

    // Start background tasks
    RetentionManager::new(Arc::clone(&state)).start();

    if state.config.sync.enabled {
        Syncer::from_state(Arc::clone(&state))
            .context("Failed to build relay client")?
            .start();
    } else {
        info!("Upstream relay disabled");
    }

    match state.config.ingest.packet_source.as_ref() {
        Some(source_config) => match source_from_config(source_config) {
            Some(source) => {
                PacketListener::new(Arc::clone(&state), source).start();
            }
            None => warn!("Packet source is configured but empty, not starting listener"),
        },
        None => info!("Packet listener disabled"),
    }

    // Build the router
    let app = Router::new()
        .merge(api::router())
        .merge(http::router(&state.config.ingest.paths))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    info!("Starting server on {}", addr);

    // Run the server
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
