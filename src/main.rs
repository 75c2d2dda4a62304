//! FLIPFLEET: flipping agent
//!
//! Entry point. Loads configuration, initialises structured logging,
//! restores the limit snapshot from disk, wires the coordinator transport
//! and runs the trading state machine with graceful shutdown.

use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use flipfleet::catalog::{Catalog, SharedCatalog};
use flipfleet::clock::{Clock, SystemClock};
use flipfleet::config::{AppConfig, TransportKind};
use flipfleet::coord::file::SharedDocumentTransport;
use flipfleet::coord::http::HttpTransport;
use flipfleet::coord::{CoordinationTransport, Coordinator, DisabledTransport};
use flipfleet::engine::ledger::ProfitLedger;
use flipfleet::engine::{Components, TradingStateMachine};
use flipfleet::limits::LimitTracker;
use flipfleet::notify::LogNotifier;
use flipfleet::storage;
use flipfleet::venue::paper::PaperVenue;

const BANNER: &str = r#"
  _____ _     ___ ____  _____ _     _____ _____ _____
 |  ___| |   |_ _|  _ \|  ___| |   | ____| ____|_   _|
 | |_  | |    | || |_) | |_  | |   |  _| |  _|   | |
 |  _| | |___ | ||  __/|  _| | |___| |___| |___  | |
 |_|   |_____|___|_|   |_|   |_____|_____|_____| |_|

  v0.1.0 : Flipping Agent
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = AppConfig::load_default()?;
    init_logging();
    cfg.validate()?;

    println!("{BANNER}");

    let agent_id = cfg.resolve_agent_id();
    let seed = cfg.seed_for(&agent_id);
    let mut rng = StdRng::seed_from_u64(seed);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    info!(
        agent = %agent_id,
        seed,
        bankroll = cfg.trading.bankroll,
        transport = ?cfg.coordinator.transport,
        "FLIPFLEET starting up"
    );

    // -- Catalog ----------------------------------------------------------

    let catalog = match storage::load_catalog_rows(&cfg.agent.catalog_path) {
        Ok(rows) => SharedCatalog::new(Catalog::load(&rows)),
        Err(e) => {
            warn!(error = %e, "No usable catalog, starting empty");
            SharedCatalog::default()
        }
    };
    let reloader = (cfg.agent.catalog_reload_secs > 0).then(|| {
        storage::spawn_catalog_reloader(
            cfg.agent.catalog_path.clone(),
            catalog.clone(),
            Duration::from_secs(cfg.agent.catalog_reload_secs),
        )
    });

    // -- Limits -----------------------------------------------------------

    let limits = Arc::new(LimitTracker::new(clock.clone()));
    let active = storage::load_limits(&cfg.agent.data_dir, &agent_id, &limits);
    if active > 0 {
        info!(active, "Resumed with active limit blocks");
    }

    // -- Coordinator ------------------------------------------------------

    let transport: Arc<dyn CoordinationTransport> = match cfg.coordinator.transport {
        TransportKind::Http => {
            let transport_rng = StdRng::seed_from_u64(rng.random());
            match HttpTransport::new(cfg.coordinator.http_settings(), clock.clone(), transport_rng) {
                Ok(t) => Arc::new(t),
                Err(e) => {
                    error!(error = %e, "Failed to build HTTP transport, running without fleet");
                    Arc::new(DisabledTransport)
                }
            }
        }
        TransportKind::File => Arc::new(SharedDocumentTransport::new(
            cfg.coordinator.document_path.clone(),
            clock.clone(),
            cfg.coordinator.cache_ttl(),
        )),
        TransportKind::Disabled => Arc::new(DisabledTransport),
    };
    let coordinator = Coordinator::new(agent_id.clone(), transport, clock.clone());
    let health = coordinator.health().await;
    info!(
        transport = coordinator.transport_name(),
        available = health.available,
        entries = ?health.entries,
        "Coordinator ready"
    );

    // -- Trading loop -----------------------------------------------------

    // Real venue adapters plug in here; the paper venue is the dry run.
    warn!("No live venue adapter configured, running against the paper venue");
    let venue = Arc::new(PaperVenue::new(cfg.agent.paper_slots));

    let ledger = Arc::new(ProfitLedger::new(clock.clone()));
    let parts = Components {
        venue,
        catalog,
        limits: limits.clone(),
        coordinator,
        ledger: ledger.clone(),
        notifier: Arc::new(LogNotifier),
        clock,
    };

    let data_dir = cfg.agent.data_dir.clone();
    let hook_agent = agent_id.clone();
    let mut machine = TradingStateMachine::new(parts, cfg.machine_config(), rng).with_rotate_hook(Box::new(
        move |limits: &LimitTracker| {
            if let Err(e) = storage::save_limits(&data_dir, &hook_agent, limits) {
                error!(error = %e, "Failed to save limits");
            }
        },
    ));

    info!("Entering trading loop. Press Ctrl+C to stop.");
    machine
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        })
        .await;

    if let Some(handle) = reloader {
        handle.abort();
    }

    // Save final state
    storage::save_limits(&cfg.agent.data_dir, &agent_id, &limits)?;
    for stats in ledger.top_items(5) {
        info!(
            item = %stats.name,
            realized = stats.realized(),
            bought = stats.bought_qty,
            sold = stats.sold_qty,
            "Top item"
        );
    }
    info!(
        summary = %ledger.summary(),
        cycles = machine.cycles(),
        active_limits = limits.active_count(),
        "FLIPFLEET shut down cleanly."
    );

    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("flipfleet=info"));

    let json_logging = std::env::var("FLIPFLEET_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
