//! crowdq-server - Main entry point
//!
//! Loads configuration, seeds the in-memory account directory, starts the
//! session reaper and serves the HTTP API.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crowdq_common::config::load_config;
use crowdq_server::accounts::InMemoryAccounts;
use crowdq_server::catalog::StaticCatalog;
use crowdq_server::reaper::spawn_reaper;
use crowdq_server::{build_router, AppState};

/// Command-line arguments for crowdq-server
#[derive(Parser, Debug)]
#[command(name = "crowdq-server")]
#[command(about = "Collaborative music-queue voting service")]
#[command(version)]
struct Args {
    /// Config file (overrides CROWDQ_CONFIG)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides server.port)
    #[arg(short, long, env = "CROWDQ_PORT")]
    port: Option<u16>,

    /// Address to bind (overrides server.bind)
    #[arg(short, long, env = "CROWDQ_BIND")]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Config is read before tracing so logging.level can seed the filter
    let config = load_config(args.config.as_deref()).context("Failed to load configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "crowdq_server={level},crowdq_common={level},tower_http={level}",
                    level = config.logging.level
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting crowdq-server v{}", env!("CARGO_PKG_VERSION"));

    let accounts = Arc::new(InMemoryAccounts::with_token_idle_timeout(
        config.voting.privileged_bonus_votes,
        config.auth.token_idle_timeout(),
    ));
    for seed in &config.accounts {
        accounts
            .seed(seed)
            .await
            .with_context(|| format!("Failed to seed account {}", seed.email))?;
    }
    info!("Account directory ready ({} seeded)", config.accounts.len());

    let catalog = Arc::new(StaticCatalog::demo());
    let state = AppState::from_config(&config, accounts, catalog);

    let _reaper = spawn_reaper(
        state.sessions.clone(),
        state.identity.clone(),
        config.sessions.reaper_interval(),
    );

    let app = build_router(state);

    let bind = args.bind.unwrap_or(config.server.bind);
    let port = args.port.unwrap_or(config.server.port);
    let addr: SocketAddr = format!("{}:{}", bind, port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", bind, port))?;

    info!("Starting HTTP server on {}", addr);
    info!("Health check: http://{}/health", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
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
