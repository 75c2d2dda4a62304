//! Order executor.
//!
//! Places bulk buys and sells on the venue under slot and capital ceilings,
//! with bounded retry and price nudging from [`RetryPolicy`]. Orders that
//! were placed stay placed if the loop is interrupted; collecting fills is
//! the caller's job.

use rand::rngs::StdRng;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::coord::Coordinator;
use crate::engine::pacing::Pacer;
use crate::engine::retry::{NudgeDirection, RetryPolicy};
use crate::limits::LimitTracker;
use crate::types::{BuyOutcome, OrderResult, SellOutcome, TradeProfile};
use crate::venue::VenueAdapter;

// ---------------------------------------------------------------------------
// Capacity signal
// ---------------------------------------------------------------------------

/// Reaction to a venue-enforced volume ceiling: block the item locally for
/// the full window and tell the fleet.
#[derive(Clone)]
pub struct CapacitySignal {
    limits: Arc<LimitTracker>,
    coordinator: Coordinator,
}

impl CapacitySignal {
    pub fn new(limits: Arc<LimitTracker>, coordinator: Coordinator) -> Self {
        Self { limits, coordinator }
    }

    /// Returns the unblock time in epoch seconds.
    pub async fn raise(&self, item: &str) -> i64 {
        let until = self.limits.block(item);
        warn!(item, remaining = %self.limits.remaining_formatted(item), "Trade limit hit");
        self.coordinator.report(item).await;
        until
    }

    pub fn limits(&self) -> &LimitTracker {
        &self.limits
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutionSettings {
    /// Largest quantity a single order may carry.
    pub per_request_cap: u32,
    /// Capital a single flip may commit; 0 disables the cap.
    pub max_capital_per_flip: i64,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            per_request_cap: 100,
            max_capital_per_flip: 0,
        }
    }
}

/// One accepted order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlacedOrder {
    pub qty: u32,
    pub price: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuyReport {
    pub result: OrderResult,
    pub orders: Vec<PlacedOrder>,
}

impl BuyReport {
    fn new() -> Self {
        Self {
            result: OrderResult::Ok,
            orders: Vec::new(),
        }
    }

    pub fn placed_qty(&self) -> u32 {
        self.orders.iter().map(|o| o.qty).sum()
    }

    pub fn committed(&self) -> i64 {
        self.orders.iter().map(|o| o.qty as i64 * o.price).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SellReport {
    pub orders: Vec<PlacedOrder>,
    /// Retries were exhausted on some batch.
    pub gave_up: bool,
}

impl SellReport {
    pub fn placed_qty(&self) -> u32 {
        self.orders.iter().map(|o| o.qty).sum()
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

pub struct OrderExecutor {
    venue: Arc<dyn VenueAdapter>,
    capacity: CapacitySignal,
    buy_policy: RetryPolicy,
    sell_policy: RetryPolicy,
    settings: ExecutionSettings,
    pacer: Pacer,
}

impl OrderExecutor {
    pub fn new(
        venue: Arc<dyn VenueAdapter>,
        capacity: CapacitySignal,
        settings: ExecutionSettings,
        pacer: Pacer,
    ) -> Self {
        Self {
            venue,
            capacity,
            buy_policy: RetryPolicy::buys(),
            sell_policy: RetryPolicy::sells(),
            settings,
            pacer,
        }
    }

    pub fn with_policies(mut self, buys: RetryPolicy, sells: RetryPolicy) -> Self {
        self.buy_policy = buys;
        self.sell_policy = sells;
        self
    }

    /// Place buys for up to `target_qty` units.
    ///
    /// Returns `CapacityExhausted` as soon as the venue signals it (after
    /// blocking and reporting the item), `Failed` if retries ran out before
    /// anything was placed, and `Ok` otherwise, including when the slot or
    /// capital budget ran out first.
    pub async fn place_buys(
        &self,
        profile: &TradeProfile,
        target_qty: u32,
        capital_ceiling: i64,
        slot_ceiling: u32,
        rng: &mut StdRng,
    ) -> BuyReport {
        let item = profile.name.as_str();
        let mut report = BuyReport::new();
        let mut price = profile.buy_price();
        let mut placed = 0_u32;

        if price <= 0 {
            warn!(item, price, "Refusing to bid a non-positive price");
            report.result = OrderResult::Failed;
            return report;
        }

        while placed < target_qty {
            let free_slots = match self.venue.free_slots().await {
                Ok(n) => n,
                Err(e) => {
                    warn!(item, error = %e, "Slot query failed, stopping buys");
                    break;
                }
            };
            let usable_slots = free_slots.min(slot_ceiling.saturating_sub(report.orders.len() as u32));
            if usable_slots == 0 {
                debug!(item, placed, "No usable order slots");
                break;
            }

            let in_flight = match self.venue.capital_in_flight().await {
                Ok(c) => c,
                Err(e) => {
                    warn!(item, error = %e, "Capital query failed, stopping buys");
                    break;
                }
            };
            let batch = self.batch_size(target_qty - placed, capital_ceiling - in_flight, price);
            if batch == 0 {
                debug!(item, placed, in_flight, "Budget exhausted, buy loop done");
                break;
            }

            let mut failures = 0_u32;
            loop {
                match self.venue.place_buy(item, price, batch).await {
                    BuyOutcome::Placed => {
                        placed += batch;
                        report.orders.push(PlacedOrder { qty: batch, price });
                        info!(item, qty = batch, price, placed, target = target_qty, "Buy placed");
                        tokio::time::sleep(self.pacer.order_gap(rng)).await;
                        break;
                    }
                    BuyOutcome::CapacityExhausted => {
                        self.capacity.raise(item).await;
                        report.result = OrderResult::CapacityExhausted;
                        return report;
                    }
                    BuyOutcome::Failed => {
                        failures += 1;
                        if !self.buy_policy.should_retry(failures) {
                            warn!(item, attempts = failures, placed, "Buy failed after retries");
                            if placed == 0 {
                                report.result = OrderResult::Failed;
                            }
                            return report;
                        }
                        warn!(item, attempt = failures, max = self.buy_policy.max_attempts, "Buy failed, retrying");
                        tokio::time::sleep(self.buy_policy.delay(failures, rng)).await;
                        let nudged =
                            self.buy_policy
                                .nudge(price, failures, NudgeDirection::Up, profile.max_buy, rng);
                        if nudged != price {
                            info!(item, from = price, to = nudged, "Raising bid");
                            price = nudged;
                        }
                    }
                }
            }
        }

        if placed > 0 {
            info!(item, placed, "Buy loop finished");
        }
        report
    }

    /// List up to `available_qty` units for sale.
    pub async fn list_sells(&self, profile: &TradeProfile, available_qty: u32, rng: &mut StdRng) -> SellReport {
        let item = profile.name.as_str();
        let mut report = SellReport {
            orders: Vec::new(),
            gave_up: false,
        };
        let mut price = profile.sell_price();
        let mut remaining = available_qty;

        while remaining > 0 {
            match self.venue.free_slots().await {
                Ok(n) if n > 0 => {}
                Ok(_) => {
                    debug!(item, remaining, "No free slots for sells");
                    break;
                }
                Err(e) => {
                    warn!(item, error = %e, "Slot query failed, stopping sells");
                    break;
                }
            }

            let batch = remaining.min(self.settings.per_request_cap.max(1));
            let mut failures = 0_u32;
            loop {
                match self.venue.place_sell(item, price, batch).await {
                    SellOutcome::Placed => {
                        remaining -= batch;
                        report.orders.push(PlacedOrder { qty: batch, price });
                        info!(item, qty = batch, price, remaining, "Sell placed");
                        tokio::time::sleep(self.pacer.order_gap(rng)).await;
                        break;
                    }
                    SellOutcome::Failed => {
                        failures += 1;
                        if !self.sell_policy.should_retry(failures) {
                            warn!(item, attempts = failures, remaining, "Sell failed after retries");
                            report.gave_up = true;
                            return report;
                        }
                        warn!(item, attempt = failures, max = self.sell_policy.max_attempts, "Sell failed, retrying");
                        tokio::time::sleep(self.sell_policy.delay(failures, rng)).await;
                        let nudged =
                            self.sell_policy
                                .nudge(price, failures, NudgeDirection::Down, profile.min_sell, rng);
                        if nudged != price {
                            info!(item, from = price, to = nudged, "Undercutting ask");
                            price = nudged;
                        }
                    }
                }
            }
        }

        report
    }

    /// min(remaining target, affordable, per-request cap, per-flip cap).
    fn batch_size(&self, remaining: u32, available_capital: i64, price: i64) -> u32 {
        if price <= 0 || available_capital < price {
            return 0;
        }
        let affordable = (available_capital / price).min(u32::MAX as i64) as u32;
        let mut batch = remaining.min(affordable).min(self.settings.per_request_cap);
        if self.settings.max_capital_per_flip > 0 {
            let per_flip = (self.settings.max_capital_per_flip / price).min(u32::MAX as i64) as u32;
            batch = batch.min(per_flip);
        }
        batch
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
