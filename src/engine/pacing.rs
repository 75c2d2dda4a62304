//! Humanized pacing between trading steps.
//!
//! Only computes the delays; the state machine does the sleeping.

use rand::rngs::StdRng;
use rand::Rng;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PacingSettings {
    /// Wait before retrying selection when nothing is eligible.
    pub idle_retry_secs: u64,
    pub dwell_min_secs: u64,
    pub dwell_max_secs: u64,
    /// Chance that a cooldown turns into a longer break.
    pub break_chance: f64,
    pub break_min_secs: u64,
    pub break_max_secs: u64,
    pub settle_min_ms: u64,
    pub settle_max_ms: u64,
    /// Gap between consecutive orders.
    pub order_gap_min_ms: u64,
    pub order_gap_max_ms: u64,
}

impl Default for PacingSettings {
    fn default() -> Self {
        Self {
            idle_retry_secs: 30,
            dwell_min_secs: 20,
            dwell_max_secs: 90,
            break_chance: 0.05,
            break_min_secs: 300,
            break_max_secs: 900,
            settle_min_ms: 1_000,
            settle_max_ms: 3_000,
            order_gap_min_ms: 1_500,
            order_gap_max_ms: 3_000,
        }
    }
}

impl PacingSettings {
    /// No delays at all, for tests and simulations.
    pub fn instant() -> Self {
        Self {
            idle_retry_secs: 0,
            dwell_min_secs: 0,
            dwell_max_secs: 0,
            break_chance: 0.0,
            break_min_secs: 0,
            break_max_secs: 0,
            settle_min_ms: 0,
            settle_max_ms: 0,
            order_gap_min_ms: 0,
            order_gap_max_ms: 0,
        }
    }
}

/// A cooldown, possibly stretched into a break.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cooldown {
    pub duration: Duration,
    pub is_break: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Pacer {
    settings: PacingSettings,
}

impl Pacer {
    pub fn new(settings: PacingSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &PacingSettings {
        &self.settings
    }

    pub fn idle_retry(&self) -> Duration {
        Duration::from_secs(self.settings.idle_retry_secs)
    }

    pub fn cooldown(&self, rng: &mut StdRng) -> Cooldown {
        let s = &self.settings;
        let take_break = s.break_chance > 0.0 && rng.random_bool(s.break_chance.clamp(0.0, 1.0));
        if take_break {
            Cooldown {
                duration: Duration::from_secs(between(rng, s.break_min_secs, s.break_max_secs)),
                is_break: true,
            }
        } else {
            Cooldown {
                duration: Duration::from_secs(between(rng, s.dwell_min_secs, s.dwell_max_secs)),
                is_break: false,
            }
        }
    }

    pub fn settle(&self, rng: &mut StdRng) -> Duration {
        Duration::from_millis(between(rng, self.settings.settle_min_ms, self.settings.settle_max_ms))
    }

    pub fn order_gap(&self, rng: &mut StdRng) -> Duration {
        Duration::from_millis(between(
            rng,
            self.settings.order_gap_min_ms,
            self.settings.order_gap_max_ms,
        ))
    }
}

/// Uniform in `[lo, hi]`, tolerating swapped bounds.
fn between(rng: &mut StdRng, lo: u64, hi: u64) -> u64 {
    let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
    if lo == hi {
        lo
    } else {
        rng.random_range(lo..=hi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_cooldown_within_bounds() {
        let pacer = Pacer::default();
        let mut rng = StdRng::seed_from_u64(3);
        let mut breaks = 0;
        for _ in 0..2_000 {
            let c = pacer.cooldown(&mut rng);
            let secs = c.duration.as_secs();
            if c.is_break {
                breaks += 1;
                assert!((300..=900).contains(&secs));
            } else {
                assert!((20..=90).contains(&secs));
            }
        }
        // Roughly 5% of cooldowns.
        assert!(breaks > 40 && breaks < 180, "breaks = {breaks}");
    }

    #[test]
    fn test_instant_pacing_is_zero() {
        let pacer = Pacer::new(PacingSettings::instant());
        let mut rng = StdRng::seed_from_u64(3);
        assert_eq!(pacer.cooldown(&mut rng).duration, Duration::ZERO);
        assert_eq!(pacer.settle(&mut rng), Duration::ZERO);
        assert_eq!(pacer.order_gap(&mut rng), Duration::ZERO);
    }

    #[test]
    fn test_between_swapped_bounds() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..100 {
            let v = between(&mut rng, 10, 5);
            assert!((5..=10).contains(&v));
        }
    }
}
