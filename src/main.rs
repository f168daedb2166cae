// Wager Ledger - Main Entry Point

use std::net::SocketAddr;

use anyhow::Context;
use tracing::{error, info};

use wager_ledger::{build_router, init_tracing, AppState, LedgerConfig, WageringService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    info!("═══════════════════════════════════════════════");
    info!("     🎲 Wager Ledger & Risk Engine");
    info!("═══════════════════════════════════════════════");

    let config = LedgerConfig::from_env();
    let addr: SocketAddr = config
        .server
        .bind_addr
        .parse()
        .with_context(|| format!("invalid bind address {}", config.server.bind_addr))?;

    // Initialize application state
    let service = WageringService::from_config(config).context("failed to initialize ledger")?;
    let state = AppState::shared(service);
    let _jobs = state.scheduler.start();

    // Clone state for shutdown handler before moving into router
    let shutdown_state = state.clone();
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(addr = %addr, "🚀 server running");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "❌ failed to install CTRL+C handler");
            }
            info!("🛑 shutdown signal received");
        })
        .await
        .context("server error")?;

    match shutdown_state.save_to_disk() {
        Ok(true) => info!("✅ state saved"),
        Ok(false) => info!("ℹ️ no snapshot path configured, state not saved"),
        Err(e) => error!(error = %e, "❌ failed to save state"),
    }
    info!("👋 goodbye");
    Ok(())
}
