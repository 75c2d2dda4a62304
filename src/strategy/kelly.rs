//! Kelly criterion position sizing.
//!
//! Turns a per-unit margin and a win probability into a quantity for one
//! flip, using fractional Kelly clamped to `[0, 1]` and the item's
//! per-cycle quantity guardrail.

use serde::Deserialize;
use std::fmt;
use tracing::debug;

use crate::types::TradeProfile;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Kelly sizing configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KellyConfig {
    /// Fractional Kelly multiplier (0.25 = quarter-Kelly). Lower = more conservative.
    pub multiplier: f64,
}

impl Default for KellyConfig {
    fn default() -> Self {
        Self { multiplier: 0.25 }
    }
}

// ---------------------------------------------------------------------------
// Risk bands
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RiskCategory {
    Skip,
    Minimal,
    Low,
    Medium,
    High,
}

impl fmt::Display for RiskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskCategory::Skip => write!(f, "SKIP"),
            RiskCategory::Minimal => write!(f, "MINIMAL"),
            RiskCategory::Low => write!(f, "LOW"),
            RiskCategory::Medium => write!(f, "MEDIUM"),
            RiskCategory::High => write!(f, "HIGH"),
        }
    }
}

/// Band a bankroll fraction at 0%, 5%, 10% and 20%.
pub fn risk_category(fraction: f64) -> RiskCategory {
    if fraction >= 0.20 {
        RiskCategory::High
    } else if fraction >= 0.10 {
        RiskCategory::Medium
    } else if fraction >= 0.05 {
        RiskCategory::Low
    } else if fraction > 0.0 {
        RiskCategory::Minimal
    } else {
        RiskCategory::Skip
    }
}

// ---------------------------------------------------------------------------
// Sizer
// ---------------------------------------------------------------------------

/// Sizing recommendation for one flip.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionSize {
    pub quantity: u32,
    /// Raw Kelly fraction before the multiplier (may be negative).
    pub kelly_fraction: f64,
    /// Fraction of bankroll actually committed, in `[0, 1]`.
    pub fraction: f64,
    pub risk: RiskCategory,
}

impl PositionSize {
    fn decline() -> Self {
        Self {
            quantity: 0,
            kelly_fraction: 0.0,
            fraction: 0.0,
            risk: RiskCategory::Skip,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PositionSizer {
    config: KellyConfig,
}

impl PositionSizer {
    pub fn new(config: KellyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &KellyConfig {
        &self.config
    }

    /// Clamped fractional-Kelly share of bankroll for a flip.
    ///
    /// Kelly formula: f* = (b·p − q) / b
    /// where b = margin / buy price, p = win probability, q = 1 − p.
    pub fn fraction(&self, buy_price: i64, sell_price: i64, win_probability: f64) -> (f64, f64) {
        if buy_price <= 0 || sell_price <= buy_price {
            return (0.0, 0.0);
        }
        let p = if win_probability.is_finite() {
            win_probability.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let q = 1.0 - p;
        let b = (sell_price - buy_price) as f64 / buy_price as f64;
        let raw = (b * p - q) / b;
        let clamped = (raw * self.config.multiplier).clamp(0.0, 1.0);
        (raw, clamped)
    }

    /// Size a flip of `profile` against `bankroll`.
    ///
    /// The cost of the returned quantity never exceeds the bankroll.
    pub fn size_position(
        &self,
        profile: &TradeProfile,
        bankroll: i64,
        win_probability: f64,
    ) -> PositionSize {
        let buy = profile.buy_price();
        let sell = profile.sell_price();

        if buy <= 0 || sell <= buy || bankroll <= 0 {
            debug!(item = %profile.name, buy, sell, bankroll, "Declined to size");
            return PositionSize::decline();
        }

        let (raw, fraction) = self.fraction(buy, sell, win_probability);
        if fraction <= 0.0 {
            debug!(item = %profile.name, raw_kelly = raw, "Non-positive Kelly, no trade");
            return PositionSize {
                kelly_fraction: raw,
                ..PositionSize::decline()
            };
        }

        let affordable = (bankroll as f64 * fraction / buy as f64).floor();
        let mut quantity = affordable.min(profile.max_qty_per_cycle as f64) as u32;
        if quantity == 0 && bankroll >= buy {
            quantity = 1;
        }

        let risk = risk_category(fraction);
        debug!(
            item = %profile.name,
            raw_kelly = format!("{:.2}%", raw * 100.0),
            fraction = format!("{:.2}%", fraction * 100.0),
            quantity,
            risk = %risk,
            "Position sized"
        );

        PositionSize {
            quantity,
            kelly_fraction: raw,
            fraction,
            risk,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::types::CatalogRow;

    fn profile(est_buy: i64, est_sell: i64) -> TradeProfile {
        let row = CatalogRow {
            name: "Test item".into(),
            id: None,
            est_buy,
            est_sell,
            rise_probability: 0.6,
            liquidity: 50_000.0,
            horizon_minutes: 60,
            expected_net_profit: None,
        };
        Catalog::load(&[row]).profiles()[0].clone()
    }

    #[test]
    fn test_inverted_margin_declines() {
        let sizer = PositionSizer::default();
        let size = sizer.size_position(&profile(1_000, 900), 10_000_000, 0.9);
        assert_eq!(size.quantity, 0);
        assert_eq!(size.risk, RiskCategory::Skip);
    }

    #[test]
    fn test_equal_prices_decline() {
        let sizer = PositionSizer::default();
        assert_eq!(sizer.size_position(&profile(500, 500), 1_000_000, 0.9).quantity, 0);
    }

    #[test]
    fn test_basic_sizing() {
        let sizer = PositionSizer::default();
        // b = 0.1, p = 0.95 → raw = (0.095 - 0.05) / 0.1 = 0.45, quarter = 0.1125
        let size = sizer.size_position(&profile(100, 110), 100_000, 0.95);
        assert!((size.kelly_fraction - 0.45).abs() < 1e-9);
        assert!((size.fraction - 0.1125).abs() < 1e-9);
        assert_eq!(size.quantity, 112);
        assert_eq!(size.risk, RiskCategory::Medium);
    }

    #[test]
    fn test_negative_kelly_is_zero() {
        let sizer = PositionSizer::default();
        let size = sizer.size_position(&profile(100, 101), 100_000, 0.5);
        assert!(size.kelly_fraction < 0.0);
        assert_eq!(size.fraction, 0.0);
        assert_eq!(size.quantity, 0);
    }

    #[test]
    fn test_clamped_to_max_qty() {
        let sizer = PositionSizer::new(KellyConfig { multiplier: 1.0 });
        let p = profile(10, 100);
        let size = sizer.size_position(&p, 1_000_000_000, 1.0);
        assert_eq!(size.quantity, p.max_qty_per_cycle);
    }

    #[test]
    fn test_floor_at_one() {
        let sizer = PositionSizer::default();
        // Tiny positive fraction on a bankroll that barely covers one unit.
        let size = sizer.size_position(&profile(1_000, 1_100), 1_500, 0.95);
        assert!(size.fraction > 0.0);
        assert_eq!(size.quantity, 1);
    }

    #[test]
    fn test_never_exceeds_bankroll() {
        let sizer = PositionSizer::new(KellyConfig { multiplier: 1.0 });
        for (buy, sell) in [(1, 2), (7, 9), (100, 250), (999, 1_001), (5_000, 9_000)] {
            let p = profile(buy, sell);
            for bankroll in [0_i64, 1, 6, 99, 1_000, 123_457, 10_000_000] {
                for prob in [0.0, 0.3, 0.5, 0.77, 1.0] {
                    let size = sizer.size_position(&p, bankroll, prob);
                    let cost = size.quantity as i64 * p.buy_price();
                    assert!(cost <= bankroll.max(0), "buy={buy} bankroll={bankroll} p={prob}");
                }
            }
        }
    }

    #[test]
    fn test_fraction_always_in_unit_interval() {
        let sizer = PositionSizer::new(KellyConfig { multiplier: 4.0 });
        for (buy, sell) in [(100, 50), (100, 100), (100, 101), (1, 1_000), (-5, 10)] {
            for prob in [-1.0, 0.0, 0.25, 0.5, 0.99, 1.0, 3.0, f64::NAN] {
                let (_, frac) = sizer.fraction(buy, sell, prob);
                assert!((0.0..=1.0).contains(&frac), "buy={buy} sell={sell} p={prob}");
            }
        }
    }

    #[test]
    fn test_risk_bands() {
        assert_eq!(risk_category(0.0), RiskCategory::Skip);
        assert_eq!(risk_category(0.01), RiskCategory::Minimal);
        assert_eq!(risk_category(0.05), RiskCategory::Low);
        assert_eq!(risk_category(0.10), RiskCategory::Medium);
        assert_eq!(risk_category(0.20), RiskCategory::High);
        assert_eq!(risk_category(-0.3), RiskCategory::Skip);
    }

    #[test]
    fn test_kelly_config_default() {
        assert_eq!(KellyConfig::default().multiplier, 0.25);
    }
}
