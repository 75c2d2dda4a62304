//! Trade event notifications.
//!
//! The state machine emits a `TradeEvent` at each decision point. The
//! default sink writes them to the log; other sinks (webhooks, chat) can be
//! plugged in behind the same trait.

use std::fmt;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum TradeEvent {
    ProbeSucceeded { item: String, buy: i64, sell: i64 },
    ProbeFailed { item: String, reason: String },
    CapacityExhausted { item: String, unblock_in: String },
    BuyPlaced { item: String, qty: u32, price: i64 },
    SellPlaced { item: String, qty: u32, price: i64 },
    CycleSkipped { item: Option<String>, reason: String },
    CycleCompleted { item: String, summary: String },
}

impl fmt::Display for TradeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeEvent::ProbeSucceeded { item, buy, sell } => {
                write!(f, "Probe OK: {item} buy {buy} / sell {sell} (margin {})", sell - buy)
            }
            TradeEvent::ProbeFailed { item, reason } => write!(f, "Probe failed: {item} ({reason})"),
            TradeEvent::CapacityExhausted { item, unblock_in } => {
                write!(f, "Limit hit: {item} (unblocks in {unblock_in})")
            }
            TradeEvent::BuyPlaced { item, qty, price } => write!(f, "Buy placed: {qty}x {item} @ {price}"),
            TradeEvent::SellPlaced { item, qty, price } => write!(f, "Sell placed: {qty}x {item} @ {price}"),
            TradeEvent::CycleSkipped { item: Some(item), reason } => write!(f, "Skipped {item}: {reason}"),
            TradeEvent::CycleSkipped { item: None, reason } => write!(f, "Skipped cycle: {reason}"),
            TradeEvent::CycleCompleted { item, summary } => write!(f, "Cycle done: {item} | {summary}"),
        }
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, event: &TradeEvent);
}

/// Writes events through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, event: &TradeEvent) {
        match event {
            TradeEvent::ProbeFailed { .. } | TradeEvent::CapacityExhausted { .. } => {
                warn!(event = %event, "Trade event")
            }
            _ => info!(event = %event, "Trade event"),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_display() {
        let e = TradeEvent::ProbeSucceeded {
            item: "Coal".into(),
            buy: 100,
            sell: 110,
        };
        assert_eq!(e.to_string(), "Probe OK: Coal buy 100 / sell 110 (margin 10)");
        let e = TradeEvent::CycleSkipped {
            item: None,
            reason: "no eligible items".into(),
        };
        assert_eq!(e.to_string(), "Skipped cycle: no eligible items");
    }
}
