//! Paper venue.
//!
//! A deterministic in-memory `VenueAdapter`: orders, holdings and per-item
//! volume limits all live in process memory. Used by the binary's dry-run
//! mode and throughout the test suite. Failure modes can be injected from
//! the caller.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

use super::VenueAdapter;
use crate::error::VenueError;
use crate::types::{item_key, BuyOutcome, SellOutcome};

/// How resting orders fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillMode {
    /// Every order fills completely as soon as it is placed.
    Instant,
    /// Orders fill up to the given percentage and then stall.
    Partial { percent: u32 },
    /// Orders never fill.
    Never,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
}

/// An order accepted by the paper venue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaperOrder {
    pub item: String,
    pub side: OrderSide,
    pub price: i64,
    pub qty: u32,
    pub filled: u32,
    collected: u32,
}

impl PaperOrder {
    fn is_complete(&self) -> bool {
        self.filled >= self.qty
    }
}

#[derive(Debug)]
struct PaperState {
    open: bool,
    fail_open: bool,
    bank_reachable: bool,
    slots: u32,
    fill_mode: FillMode,
    orders: Vec<PaperOrder>,
    history: Vec<PaperOrder>,
    holdings: HashMap<String, u32>,
    capacity: HashMap<String, u32>,
    failing_buys: u32,
    failing_sells: u32,
    proceeds: i64,
    banked: i64,
}

pub struct PaperVenue {
    state: Mutex<PaperState>,
}

impl Default for PaperVenue {
    fn default() -> Self {
        Self::new(8)
    }
}

impl PaperVenue {
    pub fn new(slots: u32) -> Self {
        Self {
            state: Mutex::new(PaperState {
                open: false,
                fail_open: false,
                bank_reachable: true,
                slots,
                fill_mode: FillMode::Instant,
                orders: Vec::new(),
                history: Vec::new(),
                holdings: HashMap::new(),
                capacity: HashMap::new(),
                failing_buys: 0,
                failing_sells: 0,
                proceeds: 0,
                banked: 0,
            }),
        }
    }

    pub fn set_fill_mode(&self, mode: FillMode) {
        self.lock().fill_mode = mode;
    }

    /// Limit how many more units of `item` this account may buy.
    pub fn set_capacity(&self, item: &str, units: u32) {
        self.lock().capacity.insert(item_key(item), units);
    }

    /// Reject the next `n` buy placements.
    pub fn fail_next_buys(&self, n: u32) {
        self.lock().failing_buys = n;
    }

    /// Reject the next `n` sell placements.
    pub fn fail_next_sells(&self, n: u32) {
        self.lock().failing_sells = n;
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.lock().fail_open = fail;
    }

    pub fn set_bank_reachable(&self, reachable: bool) {
        self.lock().bank_reachable = reachable;
    }

    /// Seed holdings, as if bought in an earlier session.
    pub fn give(&self, item: &str, qty: u32) {
        *self.lock().holdings.entry(item_key(item)).or_insert(0) += qty;
    }

    /// Every order ever accepted, in placement order.
    pub fn history(&self) -> Vec<PaperOrder> {
        self.lock().history.clone()
    }

    pub fn banked(&self) -> i64 {
        self.lock().banked
    }

    pub fn proceeds(&self) -> i64 {
        self.lock().proceeds
    }

    fn lock(&self) -> MutexGuard<'_, PaperState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PaperState {
    fn fill_now(&self, qty: u32) -> u32 {
        match self.fill_mode {
            FillMode::Instant => qty,
            FillMode::Partial { percent } => qty.saturating_mul(percent.min(100)) / 100,
            FillMode::Never => 0,
        }
    }

    fn accept(&mut self, item: &str, side: OrderSide, price: i64, qty: u32) {
        let order = PaperOrder {
            item: item_key(item),
            side,
            price,
            qty,
            filled: self.fill_now(qty),
            collected: 0,
        };
        self.history.push(order.clone());
        self.orders.push(order);
    }
}

#[async_trait]
impl VenueAdapter for PaperVenue {
    async fn ensure_open(&self) -> Result<(), VenueError> {
        let mut s = self.lock();
        if s.fail_open {
            return Err(VenueError::Unreachable("paper venue refused to open".into()));
        }
        s.open = true;
        Ok(())
    }

    async fn close(&self) {
        self.lock().open = false;
    }

    async fn free_slots(&self) -> Result<u32, VenueError> {
        let s = self.lock();
        Ok(s.slots.saturating_sub(s.orders.len() as u32))
    }

    async fn capital_in_flight(&self) -> Result<i64, VenueError> {
        let s = self.lock();
        Ok(s.orders
            .iter()
            .filter(|o| o.side == OrderSide::Buy)
            .map(|o| o.price * (o.qty - o.collected) as i64)
            .sum())
    }

    async fn place_buy(&self, item: &str, price: i64, qty: u32) -> BuyOutcome {
        let mut s = self.lock();
        if !s.open || qty == 0 || price <= 0 || s.orders.len() as u32 >= s.slots {
            return BuyOutcome::Failed;
        }
        if s.failing_buys > 0 {
            s.failing_buys -= 1;
            return BuyOutcome::Failed;
        }
        let key = item_key(item);
        if let Some(remaining) = s.capacity.get_mut(&key) {
            if *remaining < qty {
                info!(item, "Paper venue: volume limit reached");
                return BuyOutcome::CapacityExhausted;
            }
            *remaining -= qty;
        }
        s.accept(item, OrderSide::Buy, price, qty);
        debug!(item, price, qty, "Paper buy accepted");
        BuyOutcome::Placed
    }

    async fn place_sell(&self, item: &str, price: i64, qty: u32) -> SellOutcome {
        let mut s = self.lock();
        if !s.open || qty == 0 || price <= 0 || s.orders.len() as u32 >= s.slots {
            return SellOutcome::Failed;
        }
        if s.failing_sells > 0 {
            s.failing_sells -= 1;
            return SellOutcome::Failed;
        }
        let key = item_key(item);
        let held = s.holdings.get(&key).copied().unwrap_or(0);
        if held < qty {
            return SellOutcome::Failed;
        }
        s.holdings.insert(key, held - qty);
        s.accept(item, OrderSide::Sell, price, qty);
        debug!(item, price, qty, "Paper sell accepted");
        SellOutcome::Placed
    }

    async fn collect(&self) -> Result<(), VenueError> {
        let mut s = self.lock();
        let mut holdings_delta: Vec<(String, u32)> = Vec::new();
        let mut proceeds = 0_i64;
        for order in s.orders.iter_mut() {
            let fresh = order.filled - order.collected;
            if fresh == 0 {
                continue;
            }
            order.collected = order.filled;
            match order.side {
                OrderSide::Buy => holdings_delta.push((order.item.clone(), fresh)),
                OrderSide::Sell => proceeds += order.price * fresh as i64,
            }
        }
        for (key, qty) in holdings_delta {
            *s.holdings.entry(key).or_insert(0) += qty;
        }
        s.proceeds += proceeds;
        s.orders.retain(|o| !o.is_complete());
        Ok(())
    }

    async fn holdings_count(&self, item: &str) -> Result<u32, VenueError> {
        Ok(self.lock().holdings.get(&item_key(item)).copied().unwrap_or(0))
    }

    async fn orders_settled(&self, item: &str) -> Result<bool, VenueError> {
        let key = item_key(item);
        Ok(self
            .lock()
            .orders
            .iter()
            .filter(|o| o.item == key)
            .all(PaperOrder::is_complete))
    }

    async fn bank(&self) -> Result<(), VenueError> {
        let mut s = self.lock();
        if !s.bank_reachable {
            return Err(VenueError::Unreachable("bank".into()));
        }
        s.banked += s.proceeds;
        s.proceeds = 0;
        Ok(())
    }

    fn name(&self) -> &str {
        "paper"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_buy_fill_collect_sell() {
        let venue = PaperVenue::new(8);
        venue.ensure_open().await.unwrap();

        assert_eq!(venue.place_buy("Maple logs", 100, 10).await, BuyOutcome::Placed);
        assert_eq!(venue.capital_in_flight().await.unwrap(), 1_000);
        assert_eq!(venue.free_slots().await.unwrap(), 7);
        assert_eq!(venue.holdings_count("maple logs").await.unwrap(), 0);
        assert!(venue.orders_settled("Maple logs").await.unwrap());

        venue.collect().await.unwrap();
        assert_eq!(venue.holdings_count("Maple logs").await.unwrap(), 10);
        assert_eq!(venue.free_slots().await.unwrap(), 8);
        assert_eq!(venue.capital_in_flight().await.unwrap(), 0);

        assert_eq!(venue.place_sell("Maple logs", 110, 10).await, SellOutcome::Placed);
        venue.collect().await.unwrap();
        assert_eq!(venue.holdings_count("Maple logs").await.unwrap(), 0);
        assert_eq!(venue.proceeds(), 1_100);

        venue.bank().await.unwrap();
        assert_eq!(venue.banked(), 1_100);
    }

    #[tokio::test]
    async fn test_closed_venue_rejects_orders() {
        let venue = PaperVenue::default();
        assert_eq!(venue.place_buy("x", 1, 1).await, BuyOutcome::Failed);
    }

    #[tokio::test]
    async fn test_capacity_limit() {
        let venue = PaperVenue::default();
        venue.ensure_open().await.unwrap();
        venue.set_capacity("x", 15);
        assert_eq!(venue.place_buy("x", 5, 10).await, BuyOutcome::Placed);
        assert_eq!(venue.place_buy("x", 5, 10).await, BuyOutcome::CapacityExhausted);
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let venue = PaperVenue::default();
        venue.ensure_open().await.unwrap();
        venue.fail_next_buys(1);
        assert_eq!(venue.place_buy("x", 5, 1).await, BuyOutcome::Failed);
        assert_eq!(venue.place_buy("x", 5, 1).await, BuyOutcome::Placed);
    }

    #[tokio::test]
    async fn test_partial_fill_never_settles() {
        let venue = PaperVenue::default();
        venue.ensure_open().await.unwrap();
        venue.set_fill_mode(FillMode::Partial { percent: 50 });
        venue.place_buy("x", 5, 10).await;
        assert!(!venue.orders_settled("x").await.unwrap());
        venue.collect().await.unwrap();
        assert_eq!(venue.holdings_count("x").await.unwrap(), 5);
        assert_eq!(venue.free_slots().await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_unreachable_bank() {
        let venue = PaperVenue::default();
        venue.set_bank_reachable(false);
        assert!(venue.bank().await.is_err());
    }
}
