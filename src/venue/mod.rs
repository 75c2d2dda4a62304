//! Venue integrations.
//!
//! Defines the `VenueAdapter` capability trait the trading core consumes.
//! Concrete adapters for real venues live outside this crate; `paper`
//! provides an in-memory venue for dry runs and tests.

pub mod paper;

use async_trait::async_trait;

use crate::error::VenueError;
use crate::types::{BuyOutcome, SellOutcome};

/// Abstraction over a trading venue.
///
/// One adapter instance is constructed at startup and passed explicitly to
/// every component that needs it.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VenueAdapter: Send + Sync {
    /// Open the trading interface if it is not already open.
    async fn ensure_open(&self) -> Result<(), VenueError>;

    /// Close the trading interface.
    async fn close(&self);

    /// Order slots currently free.
    async fn free_slots(&self) -> Result<u32, VenueError>;

    /// Capital committed to open orders.
    async fn capital_in_flight(&self) -> Result<i64, VenueError>;

    /// Place a buy order for `qty` units at `price` each.
    async fn place_buy(&self, item: &str, price: i64, qty: u32) -> BuyOutcome;

    /// Place a sell order for `qty` units at `price` each.
    async fn place_sell(&self, item: &str, price: i64, qty: u32) -> SellOutcome;

    /// Collect filled goods and proceeds from completed orders.
    async fn collect(&self) -> Result<(), VenueError>;

    /// Units of `item` currently held.
    async fn holdings_count(&self, item: &str) -> Result<u32, VenueError>;

    /// Whether every open order on `item` has completed.
    async fn orders_settled(&self, item: &str) -> Result<bool, VenueError>;

    /// Deposit proceeds. Best-effort; an unreachable bank is not an error
    /// for the trading loop.
    async fn bank(&self) -> Result<(), VenueError>;

    /// Adapter name for logging.
    fn name(&self) -> &str;
}
