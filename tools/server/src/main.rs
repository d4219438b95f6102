//! NoteVault sync server.
//!
//! Stores client-encrypted notes, reconciles devices through delta sync
//! and batch diff, records version conflicts for explicit resolution, and
//! pushes changes to connected devices over WebSocket.

mod config;
mod error;
mod handlers;
mod identity;
mod server;
mod state;

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use notevault_storage::{MemoryStore, SqliteStore, Stores};

use crate::config::ServerConfig;
use crate::state::AppState;

#[derive(Parser)]
#[command(name = "notevault")]
#[command(about = "NoteVault - Encrypted note sync server")]
#[command(version)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, default_value = "notevault.toml")]
    config: PathBuf,

    /// Listen address override.
    #[arg(short, long)]
    listen: Option<String>,

    /// SQLite store path override.
    #[arg(short, long)]
    storage: Option<PathBuf>,

    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut cfg = if cli.config.exists() {
        ServerConfig::load(&cli.config)?
    } else {
        ServerConfig::default()
    };
    if let Some(listen) = cli.listen {
        cfg.listen_addr = listen;
    }
    if let Some(storage) = cli.storage {
        cfg.storage_path = Some(storage);
    }

    let level = if cli.verbose { "debug" } else { cfg.log_level.as_str() };
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    cfg.validate().context("Invalid configuration")?;

    let stores = match &cfg.storage_path {
        Some(path) => {
            info!(path = %path.display(), "Opening SQLite store");
            Stores::from_backend(Arc::new(SqliteStore::open(path)?))
        }
        None => {
            info!("No storage path configured, keeping notes in memory");
            Stores::from_backend(Arc::new(MemoryStore::new()))
        }
    };

    let (state, dispatcher) = AppState::new(stores, cfg.realtime.clone(), cfg.sync.clone());
    tokio::spawn(dispatcher.run());

    let app = server::build_router(state, &cfg);
    let listener = tokio::net::TcpListener::bind(&cfg.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", cfg.listen_addr))?;
    info!(addr = %cfg.listen_addr, "NoteVault listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
