//! Item rotation.
//!
//! Builds the prioritized queue the state machine picks from: items a
//! sibling agent has exhausted come first (takeovers), then items with a
//! comfortable margin, then everything else. Locally blocked items never
//! enter the queue.

use rand::rngs::StdRng;
use rand::Rng;
use serde::Deserialize;
use std::cmp::Reverse;
use std::collections::HashSet;
use std::fmt;
use tracing::debug;

use crate::limits::LimitTracker;
use crate::types::TradeProfile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Tier {
    Takeover,
    HighMargin,
    Regular,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Takeover => write!(f, "TAKEOVER"),
            Tier::HighMargin => write!(f, "HIGH_MARGIN"),
            Tier::Regular => write!(f, "REGULAR"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
    pub tier: Tier,
    pub profile: TradeProfile,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RotationSettings {
    /// How many takeover entries are preferred before falling back to a
    /// random pick.
    pub takeover_preference: usize,
    /// Random picks come from this many entries at the head of the queue.
    pub pick_window: usize,
    /// Margin multiple of the item minimum that counts as high margin.
    pub high_margin_factor: f64,
}

impl Default for RotationSettings {
    fn default() -> Self {
        Self {
            takeover_preference: 3,
            pick_window: 10,
            high_margin_factor: 1.5,
        }
    }
}

fn tier_of(profile: &TradeProfile, blocked_by_others: &HashSet<String>, factor: f64) -> Tier {
    if blocked_by_others.contains(&profile.key()) {
        Tier::Takeover
    } else if profile.margin() as f64 >= profile.min_margin as f64 * factor {
        Tier::HighMargin
    } else {
        Tier::Regular
    }
}

/// Partition `profiles` into tiers, each sorted by margin, best first.
///
/// `blocked_by_others` holds case-folded item keys.
pub fn build_queue(
    profiles: &[TradeProfile],
    limits: &LimitTracker,
    blocked_by_others: &HashSet<String>,
    settings: &RotationSettings,
) -> Vec<QueueEntry> {
    let mut queue: Vec<QueueEntry> = profiles
        .iter()
        .filter(|p| !limits.is_blocked(&p.name))
        .map(|p| QueueEntry {
            tier: tier_of(p, blocked_by_others, settings.high_margin_factor),
            profile: p.clone(),
        })
        .collect();

    // Stable: equal (tier, margin) keeps catalog order.
    queue.sort_by_key(|e| (e.tier, Reverse(e.profile.margin())));

    let takeovers = queue.iter().filter(|e| e.tier == Tier::Takeover).count();
    debug!(
        size = queue.len(),
        takeovers,
        locally_blocked = profiles.len() - queue.len(),
        "Rotation queue built"
    );
    queue
}

/// Pick the next item to trade.
///
/// Takeovers are preferred, re-checking the local block in case it changed
/// since the queue was built. Otherwise the pick is uniform over the head of
/// the queue.
pub fn select<'a>(
    queue: &'a [QueueEntry],
    limits: &LimitTracker,
    settings: &RotationSettings,
    rng: &mut StdRng,
) -> Option<&'a QueueEntry> {
    if let Some(entry) = queue
        .iter()
        .filter(|e| e.tier == Tier::Takeover)
        .take(settings.takeover_preference)
        .find(|e| !limits.is_blocked(&e.profile.name))
    {
        return Some(entry);
    }

    let window: Vec<&QueueEntry> = queue
        .iter()
        .filter(|e| !limits.is_blocked(&e.profile.name))
        .take(settings.pick_window.max(1))
        .collect();
    if window.is_empty() {
        return None;
    }
    Some(window[rng.random_range(0..window.len())])
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;
    use std::sync::Arc;

    fn profile(name: &str, buy: i64, sell: i64, min_margin: i64) -> TradeProfile {
        TradeProfile {
            name: name.into(),
            id: None,
            est_buy: buy,
            est_sell: sell,
            rise_probability: 0.6,
            liquidity: 1_000.0,
            horizon_minutes: 60,
            max_buy: buy + 1,
            min_sell: sell - 1,
            max_qty_per_cycle: 100,
            probe_qty: 5,
            min_margin,
            last_probe: None,
        }
    }

    fn limits() -> LimitTracker {
        LimitTracker::new(Arc::new(ManualClock::at_epoch(1_700_000_000)))
    }

    fn others(items: &[&str]) -> HashSet<String> {
        items.iter().map(|s| s.to_lowercase()).collect()
    }

    fn catalog() -> Vec<TradeProfile> {
        vec![
            profile("Regular A", 100, 103, 3),
            profile("High A", 100, 120, 10),
            profile("Taken low", 100, 101, 2),
            profile("High B", 100, 140, 10),
            profile("Regular B", 100, 105, 5),
            profile("Taken high", 100, 200, 10),
        ]
    }

    #[test]
    fn test_queue_is_a_stable_partition() {
        let limits = limits();
        let blocked = others(&["Taken low", "Taken high"]);
        let settings = RotationSettings::default();
        let mut rng = StdRng::seed_from_u64(9);

        for _ in 0..20 {
            let mut input = catalog();
            input.shuffle(&mut rng);
            let queue = build_queue(&input, &limits, &blocked, &settings);
            let tiers: Vec<Tier> = queue.iter().map(|e| e.tier).collect();
            let mut sorted = tiers.clone();
            sorted.sort();
            assert_eq!(tiers, sorted, "tiers out of order");

            let names: Vec<&str> = queue.iter().map(|e| e.profile.name.as_str()).collect();
            assert_eq!(
                names,
                vec!["Taken high", "Taken low", "High B", "High A", "Regular B", "Regular A"]
            );
        }
    }

    #[test]
    fn test_locally_blocked_items_are_excluded() {
        let limits = limits();
        limits.block("High B");
        limits.block("Taken high");
        let queue = build_queue(&catalog(), &limits, &others(&["taken high"]), &RotationSettings::default());
        assert_eq!(queue.len(), 4);
        assert!(queue.iter().all(|e| e.tier != Tier::Takeover));
        assert!(queue.iter().all(|e| e.profile.name != "High B"));
    }

    #[test]
    fn test_select_prefers_takeover() {
        let limits = limits();
        let queue = build_queue(&catalog(), &limits, &others(&["taken low"]), &RotationSettings::default());
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..10 {
            let pick = select(&queue, &limits, &RotationSettings::default(), &mut rng).unwrap();
            assert_eq!(pick.profile.name, "Taken low");
        }
    }

    #[test]
    fn test_select_rechecks_local_block() {
        let limits = limits();
        let queue = build_queue(&catalog(), &limits, &others(&["taken low"]), &RotationSettings::default());
        limits.block("Taken low");
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..50 {
            let pick = select(&queue, &limits, &RotationSettings::default(), &mut rng).unwrap();
            assert_ne!(pick.profile.name, "Taken low");
        }
    }

    #[test]
    fn test_random_pick_stays_in_window() {
        let limits = limits();
        let settings = RotationSettings {
            pick_window: 2,
            ..RotationSettings::default()
        };
        let queue = build_queue(&catalog(), &limits, &HashSet::new(), &settings);
        let mut rng = StdRng::seed_from_u64(4);
        let mut seen = HashSet::new();
        for _ in 0..200 {
            let pick = select(&queue, &limits, &settings, &mut rng).unwrap();
            seen.insert(pick.profile.name.clone());
        }
        let expected: HashSet<String> = ["Taken high", "High B"].iter().map(|s| s.to_string()).collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn test_empty_queue_selects_nothing() {
        let limits = limits();
        let mut rng = StdRng::seed_from_u64(4);
        assert!(select(&[], &limits, &RotationSettings::default(), &mut rng).is_none());
    }
}
