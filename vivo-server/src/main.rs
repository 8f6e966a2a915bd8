//! vivo-server - authoritative study store for field devices
//!
//! Serves the sync endpoints (push, pull), experiment setup, and the
//! survival and endpoint reports over HTTP.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::info;
use vivo_common::config::{load_toml_config, resolve_root_folder};
use vivo_server::config::{ServerConfig, MODULE_NAME};
use vivo_server::{build_router, db, AppState};

/// Command-line arguments for vivo-server
#[derive(Parser, Debug)]
#[command(name = "vivo-server")]
#[command(about = "Authoritative study store and sync endpoint for Vivo field devices")]
#[command(version)]
struct Args {
    /// Path to the TOML config file
    #[arg(short, long, env = "VIVO_SERVER_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "VIVO_SERVER_PORT")]
    port: Option<u16>,

    /// Address to bind
    #[arg(long, env = "VIVO_SERVER_BIND")]
    bind: Option<String>,

    /// Data folder holding the database
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    /// Explicit database file (overrides the data folder)
    #[arg(long, env = "VIVO_SERVER_DATABASE")]
    database: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config: ServerConfig =
        load_toml_config(args.config.as_deref(), MODULE_NAME).context("Failed to load configuration")?;
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(bind) = args.bind {
        config.bind_address = bind;
    }
    if let Some(database) = args.database {
        config.database_path = Some(database);
    }

    vivo_common::logging::init_tracing(&config.logging, &["vivo_server", "vivo_common"])
        .context("Failed to initialize logging")?;

    info!("Starting Vivo server v{}", env!("CARGO_PKG_VERSION"));

    let root_folder = resolve_root_folder(args.root_folder.as_deref(), config.root_folder.as_deref());
    let db_path = config.database_path(&root_folder);
    info!("Database path: {}", db_path.display());

    let pool = db::init_database_pool(&db_path)
        .await
        .context("Failed to initialize database")?;
    info!("✓ Database ready");

    let app = build_router(AppState::new(pool, config.pull_window_days));

    let addr: SocketAddr = format!("{}:{}", config.bind_address, config.port)
        .parse()
        .context("Invalid bind address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!("vivo-server listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
