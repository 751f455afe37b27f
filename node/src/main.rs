// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # keyseal server
//!
//! Entry point for the `keyseal-node` binary. Parses CLI arguments,
//! initializes logging and metrics, restores the seal state from disk, and
//! serves the HTTP API.
//!
//! The binary supports two subcommands:
//!
//! - `run`     — start the server (sealed, if a master key exists)
//! - `version` — print build version information

mod api;
mod cli;
mod error;
mod logging;
mod metrics;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::signal;

use keyseal_protocol::seal::{KeyManagementService, KeyManager};
use keyseal_protocol::secrets::SecretsService;
use keyseal_protocol::storage::VaultDB;

use cli::{Commands, KeysealCli};
use logging::LogFormat;
use metrics::NodeMetrics;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = KeysealCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Starts the API and metrics servers and runs until a shutdown signal.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(&args.log_level, LogFormat::from_str_lossy(&args.log_format));

    tracing::info!(
        api_port = args.api_port,
        metrics_port = args.metrics_port,
        data_dir = %args.data_dir.display(),
        "starting keyseal-node"
    );

    // --- Persistent storage ---
    let db_path = args.data_dir.join("db");
    std::fs::create_dir_all(&db_path)
        .with_context(|| format!("failed to create database directory: {}", db_path.display()))?;

    let db = Arc::new(
        VaultDB::open(&db_path)
            .with_context(|| format!("failed to open database at {}", db_path.display()))?,
    );
    tracing::info!(path = %db_path.display(), secrets = db.secret_count(), "database opened");

    // --- Seal state ---
    let key_manager = Arc::new(KeyManager::new());
    let keys = KeyManagementService::new(Arc::clone(&key_manager), db.clone(), db.clone())
        .context("failed to restore key settings")?;
    let secrets = SecretsService::new(Arc::clone(&key_manager), db.clone());
    tracing::info!(state = ?key_manager.state(), "seal state restored");

    // --- Metrics ---
    let node_metrics = Arc::new(NodeMetrics::new());
    node_metrics.record_seal_state(key_manager.state());

    // --- Application state ---
    let app_state = api::AppState {
        version: format!(
            "{} (protocol {})",
            env!("CARGO_PKG_VERSION"),
            keyseal_protocol::config::PROTOCOL_VERSION,
        ),
        keys: Arc::new(keys),
        secrets: Arc::new(secrets),
        metrics: Arc::clone(&node_metrics),
    };

    // --- API server ---
    let api_router = api::create_router(app_state);
    let api_addr = format!("{}:{}", args.bind, args.api_port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {}", api_addr))?;
    tracing::info!("API server listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&node_metrics));
    let metrics_addr = format!("{}:{}", args.bind, args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("Metrics server listening on {}", metrics_addr);

    // --- Serve ---
    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!("API server error: {}", e);
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("Metrics server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, draining connections");
        }
    }

    db.flush().context("failed to flush database on shutdown")?;
    tracing::info!("keyseal-node stopped");
    Ok(())
}

/// Prints version information to stdout.
fn print_version() {
    println!("keyseal-node {}", env!("CARGO_PKG_VERSION"));
    println!("protocol     {}", keyseal_protocol::config::PROTOCOL_VERSION);
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
