//! Error taxonomy.
//!
//! Everything below the trading state machine is absorbed into one of these
//! variants and turned into a ROTATE transition plus a log line. Only the
//! state machine decides between skip, retry and escalate.

use thiserror::Error;

/// Why a trading cycle did not produce a trade.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TradeError {
    /// Order rejected or a wait timed out. Retried with backoff, then the
    /// cycle is skipped.
    #[error("transient execution failure on {item}: {reason}")]
    TransientExecution { item: String, reason: String },

    /// Venue-enforced volume ceiling reached. A signal, not a fault: the item
    /// is blocked locally and broadcast to the fleet.
    #[error("capacity exhausted on {item}")]
    CapacityExhausted { item: String },

    /// Coordination transport unreachable. Treated as "no information".
    #[error("coordination unavailable: {0}")]
    CoordinationUnavailable(String),

    /// A probe disagreed with the cached estimate. The item is skipped for
    /// this cycle and the catalog is left untouched.
    #[error("stale data rejected for {item}: observed margin {margin} < minimum {min_margin}")]
    StaleDataRejected {
        item: String,
        margin: i64,
        min_margin: i64,
    },

    /// A malformed catalog row. The row is dropped, loading continues.
    #[error("invalid catalog row {row}: {reason}")]
    ConfigurationInvalid { row: usize, reason: String },
}

impl TradeError {
    pub fn transient(item: &str, reason: impl Into<String>) -> Self {
        TradeError::TransientExecution {
            item: item.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether the failure may clear up by itself on the next cycle.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TradeError::TransientExecution { .. }
                | TradeError::CoordinationUnavailable(_)
                | TradeError::StaleDataRejected { .. }
        )
    }
}

/// A failure reported by a venue adapter query.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VenueError {
    #[error("venue is not open")]
    NotOpen,
    #[error("venue unreachable: {0}")]
    Unreachable(String),
    #[error("venue rejected request: {0}")]
    Rejected(String),
}
