//! Whole trading cycles on the paper venue, with a shared coordination
//! document between two agents.

use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use flipfleet::catalog::{Catalog, SharedCatalog};
use flipfleet::clock::ManualClock;
use flipfleet::coord::file::SharedDocumentTransport;
use flipfleet::coord::Coordinator;
use flipfleet::engine::ledger::ProfitLedger;
use flipfleet::engine::pacing::PacingSettings;
use flipfleet::engine::rotation::Tier;
use flipfleet::engine::{Components, MachineConfig, Phase, TradingSettings, TradingStateMachine};
use flipfleet::error::TradeError;
use flipfleet::limits::LimitTracker;
use flipfleet::notify::LogNotifier;
use flipfleet::types::CatalogRow;
use flipfleet::venue::paper::PaperVenue;

struct Agent {
    venue: Arc<PaperVenue>,
    limits: Arc<LimitTracker>,
    machine: TradingStateMachine,
}

fn rows() -> Vec<CatalogRow> {
    ["Maple logs", "Coal", "Feather"]
        .iter()
        .zip([(100, 120), (150, 175), (2, 10)])
        .map(|(name, (est_buy, est_sell))| CatalogRow {
            name: name.to_string(),
            id: None,
            est_buy,
            est_sell,
            rise_probability: 0.9,
            liquidity: 5_000.0,
            horizon_minutes: 60,
            expected_net_profit: None,
        })
        .collect()
}

fn agent(id: &str, document: &PathBuf, clock: &Arc<ManualClock>, seed: u64) -> Agent {
    let venue = Arc::new(PaperVenue::new(8));
    let limits = Arc::new(LimitTracker::new(clock.clone()));
    let transport = SharedDocumentTransport::new(document.clone(), clock.clone(), Duration::ZERO);
    let parts = Components {
        venue: venue.clone(),
        catalog: SharedCatalog::new(Catalog::load(&rows())),
        limits: limits.clone(),
        coordinator: Coordinator::new(id, Arc::new(transport), clock.clone()),
        ledger: Arc::new(ProfitLedger::new(clock.clone())),
        notifier: Arc::new(LogNotifier),
        clock: clock.clone(),
    };
    let config = MachineConfig {
        trading: TradingSettings {
            bankroll: 100_000,
            ..TradingSettings::default()
        },
        pacing: PacingSettings::instant(),
        ..MachineConfig::default()
    };
    Agent {
        venue,
        limits,
        machine: TradingStateMachine::new(parts, config, StdRng::seed_from_u64(seed)),
    }
}

fn document_path() -> PathBuf {
    std::env::temp_dir()
        .join(format!("flipfleet_cycle_{}", uuid::Uuid::new_v4().simple()))
        .join("limits.json")
}

/// Drive `agent` until it has picked an item.
async fn select_item(agent: &mut Agent) -> String {
    assert_eq!(agent.machine.tick().await, Phase::Travel);
    agent.machine.current().unwrap().name.clone()
}

#[tokio::test]
async fn test_capacity_in_buy_blocks_and_hands_item_to_sibling() {
    let document = document_path();
    let clock = Arc::new(ManualClock::at_epoch(1_700_000_000));
    let mut a = agent("A", &document, &clock, 7);
    let mut b = agent("B", &document, &clock, 8);

    let item = select_item(&mut a).await;
    // Enough volume left for the probe to pass, none for the bulk buy.
    let probe_qty = Catalog::load(&rows()).get(&item).unwrap().probe_qty;
    a.venue.set_capacity(&item, probe_qty);

    assert_eq!(a.machine.tick().await, Phase::Probe);
    assert_eq!(a.machine.tick().await, Phase::Buy);
    assert!(!a.limits.is_blocked(&item));

    assert_eq!(a.machine.tick().await, Phase::Rotate);
    assert!(a.limits.is_blocked(&item));
    assert!(matches!(
        a.machine.last_skip(),
        Some(TradeError::CapacityExhausted { .. })
    ));

    // A's next queue leaves the item out entirely.
    assert_eq!(a.machine.tick().await, Phase::Idle);
    assert!(a.machine.queue().iter().all(|e| e.profile.name != item));

    // B sees it as a takeover and goes for it first.
    assert_eq!(select_item(&mut b).await, item);
    assert_eq!(b.machine.queue()[0].tier, Tier::Takeover);
    assert!(!b.limits.is_blocked(&item));

    let _ = std::fs::remove_dir_all(document.parent().unwrap());
}

#[tokio::test]
async fn test_completed_cycle_books_profit() {
    let document = document_path();
    let clock = Arc::new(ManualClock::at_epoch(1_700_000_000));
    let mut a = agent("A", &document, &clock, 7);

    let mut phases = Vec::new();
    loop {
        let phase = a.machine.tick().await;
        phases.push(phase);
        if phase == Phase::Idle {
            break;
        }
    }
    assert!(phases.contains(&Phase::Sell));
    assert!(phases.contains(&Phase::Bank));
    assert_eq!(a.machine.cycles(), 1);
    assert!(a.machine.ledger().realized() > 0);
    assert!(a.venue.banked() > 0);

    let _ = std::fs::remove_dir_all(document.parent().unwrap());
}
