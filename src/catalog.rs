//! Item catalog.
//!
//! Validates raw rows, derives per-item guardrails, and exposes a shared,
//! hot-swappable view. The trading loop always works on a snapshot so a
//! reload never mutates a list underneath an in-progress cycle.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};

use crate::error::TradeError;
use crate::types::{item_key, CatalogRow, ProbeObservation, TradeProfile};

/// Bid guardrail above the raw buy estimate.
const MAX_BUY_MARKUP: f64 = 1.01;
/// Ask guardrail below the raw sell estimate.
const MIN_SELL_MARKDOWN: f64 = 0.99;
/// Share of recent liquidity we allow ourselves per cycle.
const LIQUIDITY_SHARE: f64 = 0.2;
const MIN_QTY_PER_CYCLE: u32 = 100;
const MAX_QTY_PER_CYCLE: u32 = 10_000;
const MIN_MARGIN_FLOOR: i64 = 2;

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    profiles: Vec<TradeProfile>,
}

/// Rows that did not make it into the catalog.
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    pub accepted: usize,
    pub rejected: Vec<TradeError>,
}

impl Catalog {
    /// Build a catalog from raw rows, dropping malformed rows individually.
    pub fn load(rows: &[CatalogRow]) -> Self {
        Self::load_with_report(rows).0
    }

    pub fn load_with_report(rows: &[CatalogRow]) -> (Self, LoadReport) {
        let mut report = LoadReport::default();
        let mut profiles: Vec<TradeProfile> = Vec::with_capacity(rows.len());
        let mut seen: HashMap<String, usize> = HashMap::new();

        for (idx, row) in rows.iter().enumerate() {
            match derive_profile(row) {
                Ok(profile) => {
                    let key = profile.key();
                    if seen.contains_key(&key) {
                        debug!(item = %profile.name, row = idx, "Duplicate catalog row ignored");
                        continue;
                    }
                    if profile.est_sell <= profile.est_buy {
                        warn!(
                            item = %profile.name,
                            est_buy = profile.est_buy,
                            est_sell = profile.est_sell,
                            "Inverted margin estimate, keeping row for probing"
                        );
                    }
                    seen.insert(key, profiles.len());
                    profiles.push(profile);
                }
                Err(reason) => {
                    warn!(row = idx, reason = %reason, "Catalog row dropped");
                    report.rejected.push(TradeError::ConfigurationInvalid { row: idx, reason });
                }
            }
        }

        // Best estimated margin first.
        profiles.sort_by(|a, b| (b.est_sell - b.est_buy).cmp(&(a.est_sell - a.est_buy)));
        report.accepted = profiles.len();

        info!(
            accepted = report.accepted,
            rejected = report.rejected.len(),
            "Catalog loaded"
        );

        (Self { profiles }, report)
    }

    pub fn profiles(&self) -> &[TradeProfile] {
        &self.profiles
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&TradeProfile> {
        let key = item_key(name);
        self.profiles.iter().find(|p| p.key() == key)
    }

    fn get_mut(&mut self, name: &str) -> Option<&mut TradeProfile> {
        let key = item_key(name);
        self.profiles.iter_mut().find(|p| p.key() == key)
    }
}

/// Validate one row and derive its guardrails.
fn derive_profile(row: &CatalogRow) -> Result<TradeProfile, String> {
    let name = row.name.trim();
    if name.is_empty() {
        return Err("empty item name".into());
    }
    if row.est_buy <= 0 || row.est_sell <= 0 {
        return Err(format!(
            "non-positive price (buy={}, sell={})",
            row.est_buy, row.est_sell
        ));
    }

    let rise_probability = if row.rise_probability.is_finite() {
        row.rise_probability.clamp(0.0, 1.0)
    } else {
        0.5
    };
    let liquidity = if row.liquidity.is_finite() { row.liquidity.max(0.0) } else { 0.0 };

    let max_buy = ((row.est_buy as f64 * MAX_BUY_MARKUP).ceil() as i64).max(row.est_buy);
    let min_sell = ((row.est_sell as f64 * MIN_SELL_MARKDOWN).floor() as i64).min(row.est_sell);

    let max_qty_per_cycle = ((liquidity * LIQUIDITY_SHARE).round() as u64)
        .clamp(MIN_QTY_PER_CYCLE as u64, MAX_QTY_PER_CYCLE as u64) as u32;

    let probe_qty = match row.est_buy {
        p if p > 5_000 => 1,
        p if p > 1_000 => 2,
        p if p > 200 => 5,
        _ => 10,
    };

    let expected = row
        .expected_net_profit
        .filter(|v| v.is_finite())
        .unwrap_or_else(|| (row.est_sell - row.est_buy).max(1) as f64);
    let min_margin = ((expected * 0.5).round() as i64).max(MIN_MARGIN_FLOOR);

    Ok(TradeProfile {
        name: name.to_string(),
        id: row.id,
        est_buy: row.est_buy,
        est_sell: row.est_sell,
        rise_probability,
        liquidity,
        horizon_minutes: row.horizon_minutes,
        max_buy,
        min_sell,
        max_qty_per_cycle,
        probe_qty,
        min_margin,
        last_probe: None,
    })
}

// ---------------------------------------------------------------------------
// Shared catalog
// ---------------------------------------------------------------------------

/// Thread-safe handle to the live catalog.
#[derive(Debug, Clone, Default)]
pub struct SharedCatalog {
    inner: Arc<RwLock<Catalog>>,
}

impl SharedCatalog {
    pub fn new(catalog: Catalog) -> Self {
        Self {
            inner: Arc::new(RwLock::new(catalog)),
        }
    }

    /// Copy of the current profiles.
    pub fn snapshot(&self) -> Vec<TradeProfile> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .profiles
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<TradeProfile> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Swap in a freshly loaded catalog, carrying over probe observations
    /// for items present in both.
    pub fn replace(&self, mut fresh: Catalog) {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        for profile in fresh.profiles.iter_mut() {
            if let Some(old) = guard.get(&profile.name) {
                profile.last_probe = old.last_probe;
            }
        }
        info!(before = guard.len(), after = fresh.len(), "Catalog replaced");
        *guard = fresh;
    }

    /// Store a successful probe. Returns false if the item has since been
    /// removed from the catalog.
    pub fn record_probe(&self, name: &str, buy: i64, sell: i64, at: DateTime<Utc>) -> bool {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        match guard.get_mut(name) {
            Some(profile) => {
                profile.last_probe = Some(ProbeObservation { buy, sell, at });
                true
            }
            None => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
