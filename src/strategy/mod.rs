//! Strategy: fractional-Kelly position sizing.

pub mod kelly;

pub use kelly::{risk_category, KellyConfig, PositionSize, PositionSizer, RiskCategory};
