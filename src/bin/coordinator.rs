//! FLIPFLEET coordinator
//!
//! Serves the fleet coordination API (`/report`, `/list`, `/health`,
//! `/stats`, `/clear`) until Ctrl+C.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

use flipfleet::clock::SystemClock;
use flipfleet::config::AppConfig;
use flipfleet::coord::server::{self, CoordinatorState};

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenv::dotenv();

    let cfg = AppConfig::load_default()?;
    init_logging();

    let addr: SocketAddr = format!("{}:{}", cfg.server.host, cfg.server.port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", cfg.server.host, cfg.server.port))?;

    let state = Arc::new(CoordinatorState::new(Arc::new(SystemClock)));
    info!(%addr, ttl_secs = server::SERVER_TTL_SECS, "Coordinator starting up");

    server::serve(addr, state, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received.");
    })
    .await?;

    info!("Coordinator shut down cleanly.");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("flipfleet=info,tower_http=info"));

    if std::env::var("FLIPFLEET_LOG_JSON").is_ok() {
        fmt().json().with_env_filter(env_filter).with_target(true).init();
    } else {
        fmt().with_env_filter(env_filter).with_target(true).init();
    }
}
