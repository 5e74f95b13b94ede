//! synapse-daemon, the Synapse clearing house service.
//!
//! Reads its configuration from the environment exactly once at
//! startup, then serves two surfaces:
//!
//! - the exchange WebSocket endpoint (`/ws` on `SYNAPSE_PORT`), and
//! - the spectator surface (`/observer` and `POST /api/demo/timeout`
//!   on `SYNAPSE_SPECTATOR_PORT`).
//!
//! Persistence is enabled when `DATABASE_URL` points at a `SQLite`
//! path; otherwise the in-memory projection is authoritative and
//! snapshots are served from it.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use synapse_core::ExchangeConfig;
use synapse_daemon::evaluator::KeywordEvaluator;
use synapse_daemon::persistence::{SqliteStore, Store};
use synapse_daemon::{protocol, spectator, Exchange};

/// Synapse exchange daemon.
#[derive(Parser, Debug)]
#[command(name = "synapse-daemon")]
#[command(version, about, long_about = None)]
struct Args {
    /// Exchange WebSocket port (overrides SYNAPSE_PORT).
    #[arg(long)]
    port: Option<u16>,

    /// Spectator port (overrides SYNAPSE_SPECTATOR_PORT).
    #[arg(long)]
    spectator_port: Option<u16>,

    /// SQLite database path (overrides DATABASE_URL).
    #[arg(long)]
    database: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log to file instead of stdout.
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn init_tracing(args: &Args) -> Result<()> {
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    if let Some(log_file) = &args.log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)
            .context("failed to open log file")?;
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(file)
                    .with_ansi(false),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args)?;

    // The one place the environment is read; everything downstream
    // receives the record.
    let mut config = ExchangeConfig::from_env();
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(port) = args.spectator_port {
        config.spectator_port = port;
    }
    if let Some(database) = &args.database {
        config.database_url = Some(database.display().to_string());
    }

    let store: Option<Arc<dyn Store>> = match &config.database_url {
        Some(url) => {
            let store = SqliteStore::open(url)
                .with_context(|| format!("failed to open database at {url}"))?;
            info!(database = %url, "persistence enabled");
            Some(Arc::new(store))
        }
        None => {
            info!("DATABASE_URL unset, running with the in-memory projection only");
            None
        }
    };

    let exchange = Exchange::new(config.clone(), store, Box::new(KeywordEvaluator));

    let exchange_addr: SocketAddr = ([0, 0, 0, 0], config.port).into();
    let exchange_listener = tokio::net::TcpListener::bind(exchange_addr)
        .await
        .with_context(|| format!("failed to bind exchange port {exchange_addr}"))?;
    let exchange_app = protocol::server::router(Arc::clone(&exchange));
    let exchange_task = tokio::spawn(async move {
        if let Err(e) = axum::serve(exchange_listener, exchange_app).await {
            error!("exchange server error: {e}");
        }
    });

    let spectator_addr: SocketAddr = ([0, 0, 0, 0], config.spectator_port).into();
    let spectator_listener = tokio::net::TcpListener::bind(spectator_addr)
        .await
        .with_context(|| format!("failed to bind spectator port {spectator_addr}"))?;
    let spectator_app = spectator::router(Arc::clone(&exchange));
    let spectator_task = tokio::spawn(async move {
        if let Err(e) = axum::serve(spectator_listener, spectator_app).await {
            error!("spectator server error: {e}");
        }
    });

    info!(
        pid = std::process::id(),
        exchange = %exchange_addr,
        spectator = %spectator_addr,
        "synapse-daemon started"
    );

    let mut sigterm = signal(SignalKind::terminate()).context("failed to register SIGTERM")?;
    let mut sigint = signal(SignalKind::interrupt()).context("failed to register SIGINT")?;
    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM"),
        _ = sigint.recv() => info!("received SIGINT"),
        _ = exchange_task => error!("exchange server exited unexpectedly"),
        _ = spectator_task => error!("spectator server exited unexpectedly"),
    }

    info!(
        sessions = exchange.sessions.len(),
        "shutting down, closing sessions"
    );
    Ok(())
}
