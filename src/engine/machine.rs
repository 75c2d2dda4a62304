//! Trading state machine.
//!
//! One cooperative control loop per agent:
//!
//! ```text
//! IDLE -> TRAVEL -> [PROBE] -> BUY -> SELL -> BANK -> COOLDOWN -> ROTATE -> IDLE
//! ```
//!
//! Every failure below this level arrives here as a `TradeError` or an
//! outcome value and becomes a ROTATE transition with a log line and a
//! notification. This is the only place that decides skip versus retry.

use chrono::Duration as ChronoDuration;
use rand::rngs::StdRng;
use serde::Deserialize;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::catalog::SharedCatalog;
use crate::clock::Clock;
use crate::coord::Coordinator;
use crate::engine::executor::{CapacitySignal, ExecutionSettings, OrderExecutor};
use crate::engine::ledger::ProfitLedger;
use crate::engine::pacing::{Pacer, PacingSettings};
use crate::engine::probe::{is_stale, FillPoller, MarginProbe, PollSettings};
use crate::engine::retry::RetryPolicy;
use crate::engine::rotation::{build_queue, select, QueueEntry, RotationSettings};
use crate::error::TradeError;
use crate::limits::LimitTracker;
use crate::notify::{Notifier, TradeEvent};
use crate::strategy::{KellyConfig, PositionSizer};
use crate::types::{OrderResult, ProbeObservation, TradeProfile};
use crate::venue::VenueAdapter;

// ---------------------------------------------------------------------------
// Phases
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Idle,
    Travel,
    Probe,
    Buy,
    Sell,
    Bank,
    Cooldown,
    Rotate,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Idle => "IDLE",
            Phase::Travel => "TRAVEL",
            Phase::Probe => "PROBE",
            Phase::Buy => "BUY",
            Phase::Sell => "SELL",
            Phase::Bank => "BANK",
            Phase::Cooldown => "COOLDOWN",
            Phase::Rotate => "ROTATE",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TradingSettings {
    /// Capital the agent may commit to open buy orders.
    pub bankroll: i64,
    /// Order slots a single flip may use.
    pub slot_ceiling: u32,
    /// A probe older than this is stale.
    pub staleness_window_mins: i64,
    /// Ceiling on opening the venue.
    pub open_timeout_secs: u64,
    /// Holdings confirmation after the buy loop.
    pub holdings_wait_polls: u32,
    pub holdings_poll_ms: u64,
}

impl Default for TradingSettings {
    fn default() -> Self {
        Self {
            bankroll: 10_000_000,
            slot_ceiling: 8,
            staleness_window_mins: 30,
            open_timeout_secs: 10,
            holdings_wait_polls: 5,
            holdings_poll_ms: 2_000,
        }
    }
}

/// Everything tunable about one agent's trading loop.
#[derive(Debug, Clone)]
pub struct MachineConfig {
    pub trading: TradingSettings,
    pub kelly: KellyConfig,
    pub execution: ExecutionSettings,
    pub poll: PollSettings,
    pub pacing: PacingSettings,
    pub rotation: RotationSettings,
    pub buy_retry: RetryPolicy,
    pub sell_retry: RetryPolicy,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            trading: TradingSettings::default(),
            kelly: KellyConfig::default(),
            execution: ExecutionSettings::default(),
            poll: PollSettings::default(),
            pacing: PacingSettings::default(),
            rotation: RotationSettings::default(),
            buy_retry: RetryPolicy::buys(),
            sell_retry: RetryPolicy::sells(),
        }
    }
}

/// Shared collaborators, constructed once at startup.
#[derive(Clone)]
pub struct Components {
    pub venue: Arc<dyn VenueAdapter>,
    pub catalog: SharedCatalog,
    pub limits: Arc<LimitTracker>,
    pub coordinator: Coordinator,
    pub ledger: Arc<ProfitLedger>,
    pub notifier: Arc<dyn Notifier>,
    pub clock: Arc<dyn Clock>,
}

/// Called after every rotation, e.g. to persist the limit snapshot.
pub type RotateHook = Box<dyn FnMut(&LimitTracker) + Send>;

// ---------------------------------------------------------------------------
// Machine
// ---------------------------------------------------------------------------

pub struct TradingStateMachine {
    parts: Components,
    sizer: PositionSizer,
    probe: MarginProbe,
    executor: OrderExecutor,
    poller: FillPoller,
    pacer: Pacer,
    rotation: RotationSettings,
    settings: TradingSettings,
    rng: StdRng,
    phase: Phase,
    queue: Vec<QueueEntry>,
    current: Option<TradeProfile>,
    last_skip: Option<TradeError>,
    on_rotate: Option<RotateHook>,
    cycles: u64,
}

impl TradingStateMachine {
    pub fn new(parts: Components, config: MachineConfig, mut rng: StdRng) -> Self {
        let capacity = CapacitySignal::new(parts.limits.clone(), parts.coordinator.clone());
        let pacer = Pacer::new(config.pacing);
        let poller = FillPoller::for_agent(config.poll, &mut rng);
        let probe = MarginProbe::new(
            parts.venue.clone(),
            parts.catalog.clone(),
            capacity.clone(),
            poller.clone(),
            parts.clock.clone(),
            Duration::from_secs(config.trading.open_timeout_secs),
        );
        let executor = OrderExecutor::new(parts.venue.clone(), capacity, config.execution, pacer.clone())
            .with_policies(config.buy_retry, config.sell_retry);

        Self {
            parts,
            sizer: PositionSizer::new(config.kelly),
            probe,
            executor,
            poller,
            pacer,
            rotation: config.rotation,
            settings: config.trading,
            rng,
            phase: Phase::Idle,
            queue: Vec::new(),
            current: None,
            last_skip: None,
            on_rotate: None,
            cycles: 0,
        }
    }

    pub fn with_rotate_hook(mut self, hook: RotateHook) -> Self {
        self.on_rotate = Some(hook);
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn current(&self) -> Option<&TradeProfile> {
        self.current.as_ref()
    }

    pub fn queue(&self) -> &[QueueEntry] {
        &self.queue
    }

    /// Why the most recent cycle was skipped, if it was.
    pub fn last_skip(&self) -> Option<&TradeError> {
        self.last_skip.as_ref()
    }

    /// Completed rotations.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn ledger(&self) -> &ProfitLedger {
        &self.parts.ledger
    }

    /// Run until `shutdown` resolves. An in-flight tick is dropped on
    /// shutdown; everything it may have written is an idempotent upsert.
    pub async fn run<F: Future<Output = ()>>(&mut self, shutdown: F) {
        tokio::pin!(shutdown);
        info!(
            agent = %self.parts.coordinator.agent_id(),
            venue = self.parts.venue.name(),
            transport = self.parts.coordinator.transport_name(),
            items = self.parts.catalog.len(),
            "Trading loop started"
        );
        loop {
            let stop = tokio::select! {
                _ = &mut shutdown => true,
                _ = self.tick() => false,
            };
            if stop {
                break;
            }
        }
        info!(phase = %self.phase, "Shutdown requested, leaving trading loop");
        self.parts.venue.close().await;
    }

    /// Execute the current phase and move to the next one.
    pub async fn tick(&mut self) -> Phase {
        let from = self.phase;
        let next = match from {
            Phase::Idle => self.idle().await,
            Phase::Travel => self.travel().await,
            Phase::Probe => self.run_probe().await,
            Phase::Buy => self.buy().await,
            Phase::Sell => self.sell().await,
            Phase::Bank => self.bank().await,
            Phase::Cooldown => self.cooldown().await,
            Phase::Rotate => self.rotate().await,
        };
        if next != from {
            debug!(from = %from, to = %next, item = ?self.current.as_ref().map(|p| p.name.as_str()), "Phase transition");
        }
        self.phase = next;
        next
    }

    // -- Phases ------------------------------------------------------------

    async fn idle(&mut self) -> Phase {
        if self.queue.is_empty() {
            self.rebuild_queue().await;
        }
        let picked = select(&self.queue, &self.parts.limits, &self.rotation, &mut self.rng)
            .map(|e| (e.tier, e.profile.clone()));
        match picked {
            Some((tier, profile)) => {
                info!(item = %profile.name, tier = %tier, margin = profile.margin(), "Selected item");
                self.current = Some(profile);
                self.last_skip = None;
                Phase::Travel
            }
            None => {
                self.parts.notifier.notify(&TradeEvent::CycleSkipped {
                    item: None,
                    reason: "no eligible items".into(),
                });
                tokio::time::sleep(self.pacer.idle_retry()).await;
                self.rebuild_queue().await;
                Phase::Idle
            }
        }
    }

    async fn travel(&mut self) -> Phase {
        let Some(profile) = self.current.clone() else {
            return Phase::Idle;
        };
        let open_timeout = Duration::from_secs(self.settings.open_timeout_secs);
        match tokio::time::timeout(open_timeout, self.parts.venue.ensure_open()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return self.skip(&profile.name, TradeError::transient(&profile.name, e.to_string())),
            Err(_) => return self.skip(&profile.name, TradeError::transient(&profile.name, "venue open timed out")),
        }

        let window = ChronoDuration::minutes(self.settings.staleness_window_mins);
        if is_stale(&profile, self.parts.clock.now(), window) {
            Phase::Probe
        } else {
            debug!(item = %profile.name, "Probe still fresh, going straight to buy");
            Phase::Buy
        }
    }

    async fn run_probe(&mut self) -> Phase {
        let Some(profile) = self.current.clone() else {
            return Phase::Idle;
        };
        match self.probe.probe(&profile, &mut self.rng).await {
            Ok(report) => {
                self.parts.notifier.notify(&TradeEvent::ProbeSucceeded {
                    item: profile.name.clone(),
                    buy: report.buy,
                    sell: report.sell,
                });
                let mut probed = profile;
                probed.last_probe = Some(ProbeObservation {
                    buy: report.buy,
                    sell: report.sell,
                    at: report.at,
                });
                self.current = Some(probed);
                Phase::Buy
            }
            Err(failure) => {
                let err = failure.into_trade_error(&profile.name);
                if let TradeError::CapacityExhausted { .. } = err {
                    self.notify_capacity(&profile.name);
                } else {
                    self.parts.notifier.notify(&TradeEvent::ProbeFailed {
                        item: profile.name.clone(),
                        reason: err.to_string(),
                    });
                }
                self.last_skip = Some(err);
                Phase::Rotate
            }
        }
    }

    async fn buy(&mut self) -> Phase {
        let Some(profile) = self.current.clone() else {
            return Phase::Idle;
        };
        let item = profile.name.as_str();
        let bankroll = self.settings.bankroll;

        let size = self.sizer.size_position(&profile, bankroll, profile.rise_probability);
        if size.quantity == 0 {
            return self.skip(item, TradeError::transient(item, "position sized to zero"));
        }
        info!(item, qty = size.quantity, risk = %size.risk, fraction = format!("{:.2}%", size.fraction * 100.0), "Buying");

        let report = self
            .executor
            .place_buys(&profile, size.quantity, bankroll, self.settings.slot_ceiling, &mut self.rng)
            .await;
        for order in &report.orders {
            self.parts.ledger.record_buy(item, order.qty, order.price);
            self.parts.notifier.notify(&TradeEvent::BuyPlaced {
                item: item.to_string(),
                qty: order.qty,
                price: order.price,
            });
        }

        match report.result {
            OrderResult::CapacityExhausted => {
                self.notify_capacity(item);
                self.last_skip = Some(TradeError::CapacityExhausted { item: item.to_string() });
                Phase::Rotate
            }
            OrderResult::Failed => self.skip(item, TradeError::transient(item, "buy orders rejected")),
            OrderResult::Ok => {
                if self.await_holdings(item).await {
                    Phase::Sell
                } else {
                    self.skip(item, TradeError::transient(item, "no holdings after buy"))
                }
            }
        }
    }

    async fn sell(&mut self) -> Phase {
        let Some(profile) = self.current.clone() else {
            return Phase::Idle;
        };
        let item = profile.name.as_str();
        let held = match self.parts.venue.holdings_count(item).await {
            Ok(n) => n,
            Err(e) => {
                warn!(item, error = %e, "Holdings query failed before selling");
                0
            }
        };

        if held > 0 {
            let report = self.executor.list_sells(&profile, held, &mut self.rng).await;
            for order in &report.orders {
                self.parts.ledger.record_sell(item, order.qty, order.price);
                self.parts.notifier.notify(&TradeEvent::SellPlaced {
                    item: item.to_string(),
                    qty: order.qty,
                    price: order.price,
                });
            }
            if report.placed_qty() < held {
                info!(item, unsold = held - report.placed_qty(), "Residual left for next cycle");
            }
            if self
                .poller
                .await_settled(self.parts.venue.as_ref(), item, &mut self.rng)
                .await
                .is_none()
            {
                debug!(item, "Sells still resting, collecting what filled");
            }
            if let Err(e) = self.parts.venue.collect().await {
                warn!(item, error = %e, "Collect after selling failed");
            }
        }
        Phase::Bank
    }

    async fn bank(&mut self) -> Phase {
        if let Err(e) = self.parts.venue.bank().await {
            debug!(error = %e, "Banking skipped");
        }
        Phase::Cooldown
    }

    async fn cooldown(&mut self) -> Phase {
        if let Some(profile) = &self.current {
            self.parts.notifier.notify(&TradeEvent::CycleCompleted {
                item: profile.name.clone(),
                summary: self.parts.ledger.summary(),
            });
        }
        let cooldown = self.pacer.cooldown(&mut self.rng);
        if cooldown.is_break {
            info!(secs = cooldown.duration.as_secs(), "Taking a break");
        } else {
            debug!(secs = cooldown.duration.as_secs(), "Cooling down");
        }
        tokio::time::sleep(cooldown.duration).await;
        Phase::Rotate
    }

    async fn rotate(&mut self) -> Phase {
        tokio::time::sleep(self.pacer.settle(&mut self.rng)).await;
        self.rebuild_queue().await;
        if let Some(hook) = self.on_rotate.as_mut() {
            hook(&self.parts.limits);
        }
        self.cycles += 1;
        self.current = None;
        Phase::Idle
    }

    // -- Helpers -----------------------------------------------------------

    async fn rebuild_queue(&mut self) {
        let blocked_by_others = self.parts.coordinator.blocked_by_others().await;
        let profiles = self.parts.catalog.snapshot();
        self.queue = build_queue(&profiles, &self.parts.limits, &blocked_by_others, &self.rotation);
    }

    /// Bounded wait for the buy leg to land in holdings.
    async fn await_holdings(&mut self, item: &str) -> bool {
        let interval = Duration::from_millis(self.settings.holdings_poll_ms);
        for poll in 1..=self.settings.holdings_wait_polls.max(1) {
            if let Err(e) = self.parts.venue.collect().await {
                debug!(item, poll, error = %e, "Collect failed while waiting for holdings");
            }
            match self.parts.venue.holdings_count(item).await {
                Ok(n) if n > 0 => {
                    debug!(item, held = n, poll, "Holdings confirmed");
                    return true;
                }
                Ok(_) => {}
                Err(e) => debug!(item, poll, error = %e, "Holdings query failed"),
            }
            tokio::time::sleep(interval).await;
        }
        false
    }

    fn skip(&mut self, item: &str, err: TradeError) -> Phase {
        info!(item, reason = %err, "Skipping item this cycle");
        self.parts.notifier.notify(&TradeEvent::CycleSkipped {
            item: Some(item.to_string()),
            reason: err.to_string(),
        });
        self.last_skip = Some(err);
        Phase::Rotate
    }

    fn notify_capacity(&self, item: &str) {
        self.parts.notifier.notify(&TradeEvent::CapacityExhausted {
            item: item.to_string(),
            unblock_in: self.parts.limits.remaining_formatted(item),
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
