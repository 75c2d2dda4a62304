//! Shared types for the flipping agent.
//!
//! These types form the data model used across all modules. Prices are
//! whole units of the venue currency; margins are signed because a cached
//! estimate can be inverted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Case-folded lookup key for an item name.
pub fn item_key(name: &str) -> String {
    name.trim().to_lowercase()
}

// ---------------------------------------------------------------------------
// Catalog input
// ---------------------------------------------------------------------------

/// A raw catalog row as produced by the external loader.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CatalogRow {
    pub name: String,
    #[serde(default)]
    pub id: Option<u32>,
    pub est_buy: i64,
    pub est_sell: i64,
    /// Probability that the price moves in our favour over the horizon.
    #[serde(default = "default_rise_probability")]
    pub rise_probability: f64,
    /// Recently traded volume, used to cap quantity per cycle.
    #[serde(default)]
    pub liquidity: f64,
    #[serde(default = "default_horizon_minutes")]
    pub horizon_minutes: u32,
    /// Expected profit per unit after costs, if the loader knows it.
    #[serde(default)]
    pub expected_net_profit: Option<f64>,
}

fn default_rise_probability() -> f64 {
    0.5
}

fn default_horizon_minutes() -> u32 {
    60
}

// ---------------------------------------------------------------------------
// Trade profile
// ---------------------------------------------------------------------------

/// Last round-trip observed by the margin probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeObservation {
    pub buy: i64,
    pub sell: i64,
    pub at: DateTime<Utc>,
}

impl ProbeObservation {
    pub fn margin(&self) -> i64 {
        self.sell - self.buy
    }
}

/// Per-item trading parameters plus derived guardrails.
///
/// Guardrails only widen the raw estimate: `max_buy >= est_buy` and
/// `min_sell <= est_sell`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeProfile {
    pub name: String,
    pub id: Option<u32>,
    pub est_buy: i64,
    pub est_sell: i64,
    pub rise_probability: f64,
    pub liquidity: f64,
    pub horizon_minutes: u32,
    pub max_buy: i64,
    pub min_sell: i64,
    pub max_qty_per_cycle: u32,
    pub probe_qty: u32,
    pub min_margin: i64,
    pub last_probe: Option<ProbeObservation>,
}

impl TradeProfile {
    pub fn key(&self) -> String {
        item_key(&self.name)
    }

    /// Price to bid at: the probed price (capped by the guardrail) once one
    /// exists, otherwise the raw estimate.
    pub fn buy_price(&self) -> i64 {
        match self.last_probe {
            Some(p) if p.buy > 0 => p.buy.min(self.max_buy),
            _ => self.est_buy,
        }
    }

    /// Price to ask at, symmetric to [`buy_price`](Self::buy_price).
    pub fn sell_price(&self) -> i64 {
        match self.last_probe {
            Some(p) if p.sell > 0 => p.sell.max(self.min_sell),
            _ => self.est_sell,
        }
    }

    pub fn margin(&self) -> i64 {
        self.sell_price() - self.buy_price()
    }

    pub fn meets_min_margin(&self) -> bool {
        self.margin() >= self.min_margin
    }
}

impl fmt::Display for TradeProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (buy: {} | sell: {} | margin: {})",
            self.name,
            self.buy_price(),
            self.sell_price(),
            self.margin()
        )
    }
}

// ---------------------------------------------------------------------------
// Venue outcomes
// ---------------------------------------------------------------------------

/// Result of placing a single buy order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BuyOutcome {
    Placed,
    CapacityExhausted,
    Failed,
}

/// Result of placing a single sell order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SellOutcome {
    Placed,
    Failed,
}

/// Tri-state outcome of a bulk order loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderResult {
    Ok,
    CapacityExhausted,
    Failed,
}

impl fmt::Display for OrderResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderResult::Ok => write!(f, "OK"),
            OrderResult::CapacityExhausted => write!(f, "CAPACITY_EXHAUSTED"),
            OrderResult::Failed => write!(f, "FAILED"),
        }
    }
}

// ---------------------------------------------------------------------------
// Coordination
// ---------------------------------------------------------------------------

/// One advisory "item is cooling down for this agent" hint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinationEntry {
    pub item: String,
    pub owner: String,
    pub expires_at: DateTime<Utc>,
    pub reported_at: DateTime<Utc>,
}

impl CoordinationEntry {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    pub fn is_owned_by(&self, agent_id: &str) -> bool {
        self.owner.eq_ignore_ascii_case(agent_id)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(est_buy: i64, est_sell: i64) -> TradeProfile {
        TradeProfile {
            name: "Maple logs".into(),
            id: Some(1517),
            est_buy,
            est_sell,
            rise_probability: 0.6,
            liquidity: 10_000.0,
            horizon_minutes: 60,
            max_buy: est_buy + 1,
            min_sell: est_sell - 1,
            max_qty_per_cycle: 2_000,
            probe_qty: 5,
            min_margin: 2,
            last_probe: None,
        }
    }

    #[test]
    fn test_item_key_case_folds() {
        assert_eq!(item_key("  Maple Logs "), "maple logs");
    }

    #[test]
    fn test_prices_fall_back_to_estimates() {
        let p = profile(100, 110);
        assert_eq!(p.buy_price(), 100);
        assert_eq!(p.sell_price(), 110);
        assert_eq!(p.margin(), 10);
        assert!(p.meets_min_margin());
    }

    #[test]
    fn test_probe_prices_respect_guardrails() {
        let mut p = profile(100, 110);
        p.last_probe = Some(ProbeObservation {
            buy: 150,
            sell: 50,
            at: Utc::now(),
        });
        // Probe prices outside the guardrails are clamped back to them.
        assert_eq!(p.buy_price(), 101);
        assert_eq!(p.sell_price(), 109);
    }

    #[test]
    fn test_coordination_entry_ownership() {
        let now = Utc::now();
        let entry = CoordinationEntry {
            item: "maple logs".into(),
            owner: "Bot1".into(),
            expires_at: now + chrono::Duration::hours(4),
            reported_at: now,
        };
        assert!(entry.is_owned_by("bot1"));
        assert!(!entry.is_owned_by("bot2"));
        assert!(entry.is_live(now));
        assert!(!entry.is_live(entry.expires_at));
    }

    #[test]
    fn test_catalog_row_defaults() {
        let row: CatalogRow =
            serde_json::from_str(r#"{"name":"Feather","est_buy":2,"est_sell":4}"#).unwrap();
        assert_eq!(row.rise_probability, 0.5);
        assert_eq!(row.horizon_minutes, 60);
        assert!(row.id.is_none());
    }
}
