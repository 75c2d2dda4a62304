//! Margin probe.
//!
//! Before committing bulk capital, buy a handful of units at the bid
//! guardrail and sell them straight back at the ask guardrail. The round
//! trip only counts if both legs fill completely and the observed margin
//! clears the item's minimum. A failed probe skips the item for this cycle;
//! it never blocks it.
//!
//! Fill confirmation polls with bounded, jittered exponential backoff from a
//! per-agent base interval, so concurrent agents do not poll in lockstep.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::rngs::StdRng;
use rand::Rng;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::catalog::SharedCatalog;
use crate::clock::Clock;
use crate::engine::executor::CapacitySignal;
use crate::error::TradeError;
use crate::types::{BuyOutcome, SellOutcome, TradeProfile};
use crate::venue::VenueAdapter;

// ---------------------------------------------------------------------------
// Staleness
// ---------------------------------------------------------------------------

/// True when the item was never probed or the last probe is older than
/// `window`.
pub fn is_stale(profile: &TradeProfile, now: DateTime<Utc>, window: ChronoDuration) -> bool {
    match profile.last_probe {
        Some(p) => now - p.at > window,
        None => true,
    }
}

// ---------------------------------------------------------------------------
// Fill polling
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollSettings {
    /// Nominal base interval; each agent derives its own from this.
    pub base_interval_ms: u64,
    /// Spread of the per-agent base around the nominal value.
    pub base_spread: f64,
    /// Per-poll jitter, as a fraction of the current interval.
    pub jitter: f64,
    pub growth: f64,
    pub max_interval_ms: u64,
    pub max_polls: u32,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            base_interval_ms: 1_500,
            base_spread: 0.25,
            jitter: 0.25,
            growth: 1.5,
            max_interval_ms: 15_000,
            max_polls: 12,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FillPoller {
    base: Duration,
    settings: PollSettings,
}

impl FillPoller {
    /// Derive this agent's base interval once, from the agent generator.
    pub fn for_agent(settings: PollSettings, rng: &mut StdRng) -> Self {
        let spread = settings.base_spread.clamp(0.0, 0.9);
        let factor = if spread > 0.0 {
            rng.random_range(1.0 - spread..=1.0 + spread)
        } else {
            1.0
        };
        let base = Duration::from_millis((settings.base_interval_ms as f64 * factor).round() as u64);
        Self { base, settings }
    }

    pub fn base_interval(&self) -> Duration {
        self.base
    }

    /// Sleep schedule: base, ×growth, ... capped, each with ±jitter.
    fn next_interval(&self, current: Duration) -> Duration {
        let grown = current.as_millis() as f64 * self.settings.growth.max(1.0);
        Duration::from_millis(grown.min(self.settings.max_interval_ms as f64) as u64)
    }

    fn jittered(&self, interval: Duration, rng: &mut StdRng) -> Duration {
        let j = self.settings.jitter.clamp(0.0, 0.9);
        if j == 0.0 {
            return interval;
        }
        let factor = rng.random_range(1.0 - j..=1.0 + j);
        Duration::from_millis((interval.as_millis() as f64 * factor) as u64)
    }

    /// Wait until every order on `item` has completed. Returns the number
    /// of polls used, or `None` on timeout.
    pub async fn await_settled(&self, venue: &dyn VenueAdapter, item: &str, rng: &mut StdRng) -> Option<u32> {
        let mut interval = self.base;
        for poll in 1..=self.settings.max_polls.max(1) {
            match venue.orders_settled(item).await {
                Ok(true) => return Some(poll),
                Ok(false) => {}
                Err(e) => debug!(item, poll, error = %e, "Settlement query failed"),
            }
            if poll < self.settings.max_polls {
                tokio::time::sleep(self.jittered(interval, rng)).await;
                interval = self.next_interval(interval);
            }
        }
        None
    }
}

// ---------------------------------------------------------------------------
// Probe
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeFailure {
    VenueUnavailable(String),
    BuyRejected,
    CapacityExhausted,
    BuyTimeout,
    SellRejected,
    SellTimeout,
    /// A leg left residual quantity behind.
    PartialFill { bought: u32, residual: u32 },
    /// Observed margin below the item's minimum.
    MarginTooThin { margin: i64, min_margin: i64 },
}

impl fmt::Display for ProbeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeFailure::VenueUnavailable(e) => write!(f, "venue unavailable: {e}"),
            ProbeFailure::BuyRejected => write!(f, "probe buy rejected"),
            ProbeFailure::CapacityExhausted => write!(f, "capacity exhausted during probe"),
            ProbeFailure::BuyTimeout => write!(f, "probe buy did not fill in time"),
            ProbeFailure::SellRejected => write!(f, "probe sell rejected"),
            ProbeFailure::SellTimeout => write!(f, "probe sell did not fill in time"),
            ProbeFailure::PartialFill { bought, residual } => {
                write!(f, "partial fill (bought {bought}, residual {residual})")
            }
            ProbeFailure::MarginTooThin { margin, min_margin } => {
                write!(f, "margin {margin} below minimum {min_margin}")
            }
        }
    }
}

impl ProbeFailure {
    pub fn into_trade_error(self, item: &str) -> TradeError {
        match self {
            ProbeFailure::CapacityExhausted => TradeError::CapacityExhausted { item: item.to_string() },
            ProbeFailure::MarginTooThin { margin, min_margin } => TradeError::StaleDataRejected {
                item: item.to_string(),
                margin,
                min_margin,
            },
            other => TradeError::transient(item, other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeReport {
    pub buy: i64,
    pub sell: i64,
    pub qty: u32,
    pub at: DateTime<Utc>,
}

impl ProbeReport {
    pub fn margin(&self) -> i64 {
        self.sell - self.buy
    }
}

pub struct MarginProbe {
    venue: Arc<dyn VenueAdapter>,
    catalog: SharedCatalog,
    capacity: CapacitySignal,
    poller: FillPoller,
    clock: Arc<dyn Clock>,
    open_timeout: Duration,
}

impl MarginProbe {
    pub fn new(
        venue: Arc<dyn VenueAdapter>,
        catalog: SharedCatalog,
        capacity: CapacitySignal,
        poller: FillPoller,
        clock: Arc<dyn Clock>,
        open_timeout: Duration,
    ) -> Self {
        Self {
            venue,
            catalog,
            capacity,
            poller,
            clock,
            open_timeout,
        }
    }

    /// Run one probe round trip. On success the item's `last_probe` is
    /// updated in the shared catalog; on failure nothing is recorded.
    pub async fn probe(&self, profile: &TradeProfile, rng: &mut StdRng) -> Result<ProbeReport, ProbeFailure> {
        let item = profile.name.as_str();
        let qty = profile.probe_qty.max(1);
        let buy = profile.max_buy;
        let sell = profile.min_sell;

        self.open().await?;
        let before = self.holdings(item).await?;

        // Buy leg.
        match self.venue.place_buy(item, buy, qty).await {
            BuyOutcome::Placed => debug!(item, qty, price = buy, "Probe buy placed"),
            BuyOutcome::CapacityExhausted => {
                self.capacity.raise(item).await;
                return Err(ProbeFailure::CapacityExhausted);
            }
            BuyOutcome::Failed => return Err(ProbeFailure::BuyRejected),
        }
        if self.poller.await_settled(self.venue.as_ref(), item, rng).await.is_none() {
            return Err(ProbeFailure::BuyTimeout);
        }
        self.collect().await?;
        let after_buy = self.holdings(item).await?;
        let bought = after_buy.saturating_sub(before);
        if bought < qty {
            return Err(ProbeFailure::PartialFill {
                bought,
                residual: qty - bought,
            });
        }

        // Sell leg.
        if self.venue.place_sell(item, sell, bought).await != SellOutcome::Placed {
            return Err(ProbeFailure::SellRejected);
        }
        if self.poller.await_settled(self.venue.as_ref(), item, rng).await.is_none() {
            return Err(ProbeFailure::SellTimeout);
        }
        self.collect().await?;
        let residual = self.holdings(item).await?.saturating_sub(before);
        if residual > 0 {
            return Err(ProbeFailure::PartialFill { bought, residual });
        }

        // Evaluate.
        let margin = sell - buy;
        if margin < profile.min_margin {
            return Err(ProbeFailure::MarginTooThin {
                margin,
                min_margin: profile.min_margin,
            });
        }

        let at = self.clock.now();
        if !self.catalog.record_probe(item, buy, sell, at) {
            warn!(item, "Probed item left the catalog, observation dropped");
        }
        info!(item, buy, sell, margin, "Probe passed");
        Ok(ProbeReport { buy, sell, qty, at })
    }

    async fn open(&self) -> Result<(), ProbeFailure> {
        match tokio::time::timeout(self.open_timeout, self.venue.ensure_open()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ProbeFailure::VenueUnavailable(e.to_string())),
            Err(_) => Err(ProbeFailure::VenueUnavailable("timed out opening venue".into())),
        }
    }

    async fn holdings(&self, item: &str) -> Result<u32, ProbeFailure> {
        self.venue
            .holdings_count(item)
            .await
            .map_err(|e| ProbeFailure::VenueUnavailable(e.to_string()))
    }

    async fn collect(&self) -> Result<(), ProbeFailure> {
        self.venue
            .collect()
            .await
            .map_err(|e| ProbeFailure::VenueUnavailable(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::clock::ManualClock;
    use crate::coord::Coordinator;
    use crate::limits::LimitTracker;
    use crate::types::CatalogRow;
    use crate::venue::paper::{FillMode, PaperVenue};
    use rand::SeedableRng;

    const T0: i64 = 1_700_000_000;

    struct Fixture {
        clock: Arc<ManualClock>,
        venue: Arc<PaperVenue>,
        catalog: SharedCatalog,
        limits: Arc<LimitTracker>,
        probe: MarginProbe,
    }

    fn fixture(poll: PollSettings) -> Fixture {
        let clock = Arc::new(ManualClock::at_epoch(T0));
        let venue = Arc::new(PaperVenue::new(8));
        let row = CatalogRow {
            name: "Maple logs".into(),
            id: Some(1517),
            est_buy: 100,
            est_sell: 120,
            rise_probability: 0.6,
            liquidity: 5_000.0,
            horizon_minutes: 60,
            expected_net_profit: None,
        };
        let catalog = SharedCatalog::new(Catalog::load(&[row]));
        let limits = Arc::new(LimitTracker::new(clock.clone()));
        let capacity = CapacitySignal::new(limits.clone(), Coordinator::disabled("bot1", clock.clone()));
        let poller = FillPoller::for_agent(poll, &mut StdRng::seed_from_u64(5));
        let probe = MarginProbe::new(
            venue.clone(),
            catalog.clone(),
            capacity,
            poller,
            clock.clone(),
            Duration::from_secs(5),
        );
        Fixture {
            clock,
            venue,
            catalog,
            limits,
            probe,
        }
    }

    fn rng() -> StdRng {
        StdRng::seed_from_u64(17)
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_probe_records_observation() {
        let f = fixture(PollSettings::default());
        let profile = f.catalog.get("Maple logs").unwrap();
        let report = f.probe.probe(&profile, &mut rng()).await.unwrap();

        assert_eq!(report.buy, profile.max_buy);
        assert_eq!(report.sell, profile.min_sell);
        let stored = f.catalog.get("Maple logs").unwrap().last_probe.unwrap();
        assert_eq!(stored.buy, 101);
        assert_eq!(stored.sell, 118);
        assert_eq!(stored.at, f.clock.now());
        assert_eq!(f.venue.holdings_count("Maple logs").await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inverted_probe_fails_without_recording() {
        let f = fixture(PollSettings::default());
        let mut profile = f.catalog.get("Maple logs").unwrap();
        profile.max_buy = 105;
        profile.min_sell = 100;

        let err = f.probe.probe(&profile, &mut rng()).await.unwrap_err();
        assert_eq!(
            err,
            ProbeFailure::MarginTooThin {
                margin: -5,
                min_margin: profile.min_margin
            }
        );

        let stored = f.catalog.get("Maple logs").unwrap();
        assert!(stored.last_probe.is_none());
        assert!(is_stale(&stored, f.clock.now(), ChronoDuration::minutes(30)));
        assert!(!f.limits.is_blocked("Maple logs"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unfilled_buy_times_out() {
        let f = fixture(PollSettings {
            max_polls: 4,
            ..PollSettings::default()
        });
        f.venue.set_fill_mode(FillMode::Never);
        let profile = f.catalog.get("Maple logs").unwrap();
        let err = f.probe.probe(&profile, &mut rng()).await.unwrap_err();
        assert_eq!(err, ProbeFailure::BuyTimeout);
        assert!(f.catalog.get("Maple logs").unwrap().last_probe.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_during_probe_blocks_item() {
        let f = fixture(PollSettings::default());
        f.venue.set_capacity("Maple logs", 0);
        let profile = f.catalog.get("Maple logs").unwrap();
        let err = f.probe.probe(&profile, &mut rng()).await.unwrap_err();
        assert_eq!(err, ProbeFailure::CapacityExhausted);
        assert!(f.limits.is_blocked("Maple logs"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_venue_that_will_not_open() {
        let f = fixture(PollSettings::default());
        f.venue.set_fail_open(true);
        let profile = f.catalog.get("Maple logs").unwrap();
        assert!(matches!(
            f.probe.probe(&profile, &mut rng()).await,
            Err(ProbeFailure::VenueUnavailable(_))
        ));
    }

    #[test]
    fn test_staleness_window() {
        let now = chrono::Utc::now();
        let mut p = TradeProfile {
            name: "x".into(),
            id: None,
            est_buy: 1,
            est_sell: 2,
            rise_probability: 0.5,
            liquidity: 0.0,
            horizon_minutes: 60,
            max_buy: 2,
            min_sell: 1,
            max_qty_per_cycle: 100,
            probe_qty: 10,
            min_margin: 2,
            last_probe: None,
        };
        let window = ChronoDuration::minutes(30);
        assert!(is_stale(&p, now, window));
        p.last_probe = Some(crate::types::ProbeObservation {
            buy: 1,
            sell: 2,
            at: now - ChronoDuration::minutes(30),
        });
        assert!(!is_stale(&p, now, window));
        p.last_probe = Some(crate::types::ProbeObservation {
            buy: 1,
            sell: 2,
            at: now - ChronoDuration::minutes(31),
        });
        assert!(is_stale(&p, now, window));
    }

    #[test]
    fn test_per_agent_base_interval() {
        let settings = PollSettings::default();
        let a = FillPoller::for_agent(settings.clone(), &mut StdRng::seed_from_u64(1));
        let b = FillPoller::for_agent(settings.clone(), &mut StdRng::seed_from_u64(1));
        assert_eq!(a.base_interval(), b.base_interval());
        for seed in 0..50 {
            let p = FillPoller::for_agent(settings.clone(), &mut StdRng::seed_from_u64(seed));
            let ms = p.base_interval().as_millis();
            assert!((1_125..=1_875).contains(&ms), "seed {seed}: {ms}");
        }
    }

    #[test]
    fn test_interval_growth_is_capped() {
        let p = FillPoller::for_agent(PollSettings::default(), &mut StdRng::seed_from_u64(1));
        let mut d = Duration::from_millis(10_000);
        d = p.next_interval(d);
        assert_eq!(d, Duration::from_millis(15_000));
        assert_eq!(p.next_interval(d), Duration::from_millis(15_000));
    }
}
