//! Loam Service - sensor data ingestion and HTTP API.
//!
//! Run with: `cargo run -p loam-service`

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use clap::Parser;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use loam_service::{AppState, Config, api, ecowitt};

/// Loam Service - sensor data ingestion and HTTP REST API.
#[derive(Parser, Debug)]
#[command(name = "loam-service")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address (overrides config).
    #[arg(short, long)]
    bind: Option<String>,

    /// Storage backend (overrides config; "csv" or "sqlite").
    #[arg(long)]
    backend: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("loam_service=info".parse()?)
                .add_directive("loam_store=info".parse()?)
                .add_directive("tower_http=debug".parse()?),
        )
        .init();

    // Load configuration
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };

    // Override config with CLI args
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(backend) = args.backend {
        config.storage.backend = match backend.as_str() {
            "csv" | "file" => loam_service::Backend::Csv,
            "sqlite" | "relational" => loam_service::Backend::Sqlite,
            other => anyhow::bail!("unknown backend '{other}' (expected csv or sqlite)"),
        };
    }

    // A bad configuration is fatal before any listener opens
    config.validate()?;

    // Open the storage backend
    let storage = loam_store::open(&config.storage.to_storage_config());
    storage.initialize()?;

    // Create application state
    let state = AppState::new(storage, config.clone());

    // Build the router
    let mut app = Router::new().merge(api::router());
    if config.ecowitt.enabled {
        app = app.merge(ecowitt::router(&config.ecowitt.path));
    }
    let app = app
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(Arc::clone(&state));

    // Parse bind address
    let addr: SocketAddr = config.server.bind.parse()?;

    info!("Starting server on {}", addr);

    // Run the server until shutdown is requested
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // In-flight requests have drained; release storage resources
    state.storage.close()?;
    info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C signal"),
        _ = terminate => info!("Received terminate signal"),
    }
}
