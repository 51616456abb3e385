//! reconlab-engine - reconciliation service
//!
//! Serves the task initialization, enrichment and resolution API over HTTP.
//! The database and the CSV tables live under the root folder.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use reconlab_common::config;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use reconlab_engine::services::CsvDirectory;
use reconlab_engine::AppState;

const DEFAULT_PORT: u16 = 5780;

/// Command-line arguments for reconlab-engine
#[derive(Parser, Debug)]
#[command(name = "reconlab-engine")]
#[command(about = "Record reconciliation engine")]
#[command(version)]
struct Args {
    /// Port to listen on (default 5780)
    #[arg(short, long, env = "RECONLAB_PORT")]
    port: Option<u16>,

    /// Root folder holding the database and the tables directory
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let toml_config =
        config::load_toml_config(args.config.as_deref()).context("Failed to load configuration")?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter(&toml_config.logging.level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting reconlab-engine");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let root_folder = config::resolve_root_folder(args.root_folder.as_deref(), &toml_config);
    let tables_dir = config::tables_dir(&root_folder);
    std::fs::create_dir_all(&tables_dir)
        .with_context(|| format!("Failed to create {}", tables_dir.display()))?;
    info!("Root folder: {}", root_folder.display());

    let db_path = config::database_path(&root_folder);
    let db_pool = reconlab_common::db::init_database(&db_path)
        .await
        .context("Failed to open database")?;
    info!("Database: {}", db_path.display());

    let port = args.port.or(toml_config.port).unwrap_or(DEFAULT_PORT);
    let state = AppState::new(db_pool, Arc::new(CsvDirectory::new(tables_dir)), toml_config);
    let supervisor = state.supervisor.clone();

    let app = reconlab_engine::build_router(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    supervisor.shutdown().await;
    info!("Server shutdown complete");
    Ok(())
}

/// EnvFilter directive from the configured log level
///
/// A bare level applies to the service crates; anything containing `=` is
/// used as a full directive.
fn default_filter(level: &str) -> String {
    if level.contains('=') {
        level.to_string()
    } else {
        format!(
            "reconlab_engine={0},reconlab_common={0},tower_http={0}",
            level
        )
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
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
                tracing::error!("Failed to install signal handler: {}", e);
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
