//! Pserve - authenticated static-file download server

mod auth;
mod resolve;
mod server;
mod stats;
mod stream;

use anyhow::{Context, Result};
use pserve_common::PserveConfig;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Shared application state
pub struct AppState {
    /// Immutable for the process lifetime
    pub config: Arc<PserveConfig>,

    /// Canonicalized document root
    pub root: PathBuf,

    /// Download statistics, the only mutable shared resource
    pub stats: Arc<RwLock<stats::Stats>>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Determine config path
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("pserve.toml"));

    // Load or create default configuration
    let (config, created) = if config_path.exists() {
        (PserveConfig::load(&config_path)?, false)
    } else {
        let config = PserveConfig::default();
        config.save(&config_path).with_context(|| {
            format!("failed to write default config to {}", config_path.display())
        })?;
        (config, true)
    };

    let _guard = init_logging(&config)?;

    info!("Starting pserve v{}", env!("CARGO_PKG_VERSION"));
    if created {
        info!(
            "No configuration file found, wrote defaults to {}",
            config_path.display()
        );
    } else {
        info!("Loaded configuration from {}", config_path.display());
    }

    config.validate().context("invalid configuration")?;

    let root = tokio::fs::canonicalize(&config.files.root)
        .await
        .with_context(|| format!("document root {} is not accessible", config.files.root))?;

    let state = Arc::new(AppState {
        config: Arc::new(config),
        root,
        stats: Arc::new(RwLock::new(stats::Stats::default())),
    });

    info!(
        "Serving {} on http://{}:{}",
        state.root.display(),
        state.config.server.bind_address,
        state.config.server.port
    );

    let server_state = state.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server::run_server(server_state).await {
            error!("HTTP server error: {}", e);
        }
    });

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = server_handle => {
            if let Err(e) = result {
                error!("Server task failed: {}", e);
            }
        }
    }

    info!("pserve shutdown complete");
    Ok(())
}

/// Initialize tracing: console output always, plus a daily-rotated file
/// when a log directory is configured. The returned guard must stay alive
/// so buffered file output is flushed on shutdown.
fn init_logging(config: &PserveConfig) -> Result<Option<WorkerGuard>> {
    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("pserve_server=info".parse()?);

    match &config.log.directory {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "pserve.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false),
                )
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
            Ok(None)
        }
    }
}
