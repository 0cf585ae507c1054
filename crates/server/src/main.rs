//! Hopper server binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use hopper_core::config::AppConfig;
use hopper_metadata::SessionStore;
use hopper_server::{AppState, create_router};
use hopper_storage::{JsonDedupIndex, MediaStore, StagingArea};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Hopper - a resumable chunked-upload ingest server for media files
#[derive(Parser, Debug)]
#[command(name = "hopperd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "HOPPER_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Hopper v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration. The file is optional: every option has a default
    // and HOPPER_* environment variables can provide or override anything.
    let config_path = std::path::Path::new(&args.config);
    let mut figment = Figment::new();
    if config_path.exists() {
        tracing::info!(config_path = %args.config, "Loading configuration from file");
        figment = figment.merge(Toml::file(&args.config));
    } else {
        tracing::debug!("No config file found at {}", args.config);
    }
    let config: AppConfig = figment
        .merge(Env::prefixed("HOPPER_").split("__"))
        .extract()
        .context("failed to load configuration")?;

    // Register Prometheus metrics
    hopper_server::metrics::register_metrics();

    // Initialize filesystem components
    let staging = Arc::new(
        StagingArea::new(&config.storage.staging_root)
            .await
            .context("failed to initialize staging area")?,
    );
    let objects = Arc::new(
        MediaStore::new(&config.storage.storage_root)
            .await
            .context("failed to initialize object store")?,
    );
    let dedup = Arc::new(JsonDedupIndex::new(objects.clone()));
    tracing::info!(
        staging_root = %config.storage.staging_root.display(),
        storage_root = %config.storage.storage_root.display(),
        "Storage initialized"
    );

    // Initialize session store (runs migrations)
    let sessions = hopper_metadata::from_config(&config.metadata)
        .await
        .context("failed to initialize session store")?;
    sessions
        .health_check()
        .await
        .context("session store health check failed")?;
    tracing::info!(path = %config.metadata.path.display(), "Session store initialized");

    // Create application state
    let state = AppState::new(config.clone(), sessions, staging, objects, dedup);

    // Spawn lifecycle sweepers
    let _sweeper_handles = hopper_server::sweeper::spawn_sweepers(&state);

    // Create router
    let app = create_router(state);

    // Parse bind address and serve
    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Resolve when ctrl-c is received, letting in-flight requests drain.
async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutdown signal received, draining connections"),
        Err(e) => {
            // Without a signal handler the server can only be killed hard;
            // keep serving rather than exiting on our own.
            tracing::error!(error = %e, "failed to install shutdown signal handler");
            std::future::pending::<()>().await;
        }
    }
}
