//! Core engine: the probe → buy → sell → rotate trading loop.

pub mod executor;
pub mod ledger;
pub mod machine;
pub mod pacing;
pub mod probe;
pub mod retry;
pub mod rotation;

pub use machine::{Components, MachineConfig, Phase, TradingSettings, TradingStateMachine};
