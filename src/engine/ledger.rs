//! Profit ledger.
//!
//! Records every placed buy and sell and reconciles realized profit on the
//! quantity that has been both bought and sold. Unsold stock is carried at
//! cost and does not count as profit until it is sold.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::info;

use crate::clock::Clock;
use crate::types::item_key;

/// Realized-profit milestones worth a log line.
const MILESTONES: [i64; 7] = [
    100_000,
    500_000,
    1_000_000,
    5_000_000,
    10_000_000,
    50_000_000,
    100_000_000,
];

// ---------------------------------------------------------------------------
// Per-item stats
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemStats {
    pub name: String,
    pub bought_qty: u64,
    pub sold_qty: u64,
    pub bought_value: i64,
    pub sold_value: i64,
}

impl ItemStats {
    pub fn avg_buy(&self) -> f64 {
        if self.bought_qty == 0 {
            0.0
        } else {
            self.bought_value as f64 / self.bought_qty as f64
        }
    }

    pub fn avg_sell(&self) -> f64 {
        if self.sold_qty == 0 {
            0.0
        } else {
            self.sold_value as f64 / self.sold_qty as f64
        }
    }

    /// Profit on the quantity both bought and sold.
    pub fn realized(&self) -> i64 {
        let matched = self.bought_qty.min(self.sold_qty) as f64;
        (matched * (self.avg_sell() - self.avg_buy())).round() as i64
    }

    /// Units bought and not yet sold.
    pub fn open_qty(&self) -> u64 {
        self.bought_qty.saturating_sub(self.sold_qty)
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct LedgerState {
    items: HashMap<String, ItemStats>,
    last_milestone: i64,
}

pub struct ProfitLedger {
    clock: Arc<dyn Clock>,
    started: DateTime<Utc>,
    state: Mutex<LedgerState>,
}

impl ProfitLedger {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let started = clock.now();
        Self {
            clock,
            started,
            state: Mutex::new(LedgerState::default()),
        }
    }

    pub fn record_buy(&self, item: &str, qty: u32, price: i64) {
        let mut state = self.lock();
        let stats = entry(&mut state, item);
        stats.bought_qty += qty as u64;
        stats.bought_value += qty as i64 * price;
    }

    pub fn record_sell(&self, item: &str, qty: u32, price: i64) {
        let mut state = self.lock();
        let stats = entry(&mut state, item);
        stats.sold_qty += qty as u64;
        stats.sold_value += qty as i64 * price;

        let realized: i64 = state.items.values().map(ItemStats::realized).sum();
        if let Some(m) = MILESTONES
            .iter()
            .rev()
            .find(|m| realized >= **m && state.last_milestone < **m)
        {
            state.last_milestone = *m;
            info!(milestone = *m, realized, "Profit milestone reached");
        }
    }

    pub fn realized(&self) -> i64 {
        self.lock().items.values().map(ItemStats::realized).sum()
    }

    /// Capital tied up in unsold units, at average cost.
    pub fn carried_cost(&self) -> i64 {
        self.lock()
            .items
            .values()
            .map(|s| (s.open_qty() as f64 * s.avg_buy()).round() as i64)
            .sum()
    }

    pub fn item(&self, item: &str) -> Option<ItemStats> {
        self.lock().items.get(&item_key(item)).cloned()
    }

    /// Best performers by realized profit.
    pub fn top_items(&self, count: usize) -> Vec<ItemStats> {
        let mut items: Vec<ItemStats> = self.lock().items.values().cloned().collect();
        items.sort_by(|a, b| b.realized().cmp(&a.realized()).then_with(|| a.name.cmp(&b.name)));
        items.truncate(count);
        items
    }

    pub fn per_hour(&self) -> i64 {
        let secs = (self.clock.now() - self.started).num_seconds();
        if secs <= 0 {
            return 0;
        }
        (self.realized() as f64 * 3600.0 / secs as f64).floor() as i64
    }

    pub fn runtime_formatted(&self) -> String {
        let secs = (self.clock.now() - self.started).num_seconds().max(0);
        let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
        if h > 0 {
            format!("{h}h {m}m")
        } else if m > 0 {
            format!("{m}m {s}s")
        } else {
            format!("{s}s")
        }
    }

    /// One-line summary for the log.
    pub fn summary(&self) -> String {
        let (buys, sells) = {
            let state = self.lock();
            state.items.values().fold((0_u64, 0_u64), |(b, s), i| {
                (b + i.bought_qty, s + i.sold_qty)
            })
        };
        format!(
            "P: {} | {}/h | B:{} S:{} | {}",
            self.realized(),
            self.per_hour(),
            buys,
            sells,
            self.runtime_formatted()
        )
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn entry<'a>(state: &'a mut LedgerState, item: &str) -> &'a mut ItemStats {
    state
        .items
        .entry(item_key(item))
        .or_insert_with(|| ItemStats {
            name: item.trim().to_string(),
            ..ItemStats::default()
        })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
