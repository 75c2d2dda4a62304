//! Order retry policy.
//!
//! A small finite policy shared by the buy and sell loops: a maximum number
//! of attempts, a linearly growing delay with jitter, and a price nudge
//! applied once a retry has already failed.

use rand::rngs::StdRng;
use rand::Rng;
use std::time::Duration;

/// Which way a nudge moves the price.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NudgeDirection {
    /// Bid higher.
    Up,
    /// Ask lower.
    Down,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts per batch, including the first.
    pub max_attempts: u32,
    /// Delay grows by this much per failed attempt.
    pub delay_step: Duration,
    /// Uniform random extra delay in `[0, jitter)`.
    pub jitter: Duration,
    /// Price move as a fraction of the current price.
    pub nudge_pct: f64,
    /// Chance of nudging once eligible.
    pub nudge_probability: f64,
    /// Nudging starts once more than this many attempts have failed.
    pub nudge_after: u32,
}

impl RetryPolicy {
    /// Buys: occasional 1% raise after the second failure.
    pub fn buys() -> Self {
        Self {
            max_attempts: 3,
            delay_step: Duration::from_secs(1),
            jitter: Duration::from_secs(2),
            nudge_pct: 0.01,
            nudge_probability: 0.3,
            nudge_after: 1,
        }
    }

    /// Sells: always undercut 1% after the second failure.
    pub fn sells() -> Self {
        Self {
            nudge_probability: 1.0,
            ..Self::buys()
        }
    }

    /// Whether another attempt is allowed after `failures` failed ones.
    pub fn should_retry(&self, failures: u32) -> bool {
        failures < self.max_attempts.max(1)
    }

    /// Sleep before the next attempt.
    pub fn delay(&self, failures: u32, rng: &mut StdRng) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        let extra = if jitter_ms > 0 { rng.random_range(0..jitter_ms) } else { 0 };
        self.delay_step * failures + Duration::from_millis(extra)
    }

    /// Possibly move `price` one step in `direction`, never past `bound`.
    ///
    /// A nudge always moves the price by at least one unit.
    pub fn nudge(
        &self,
        price: i64,
        failures: u32,
        direction: NudgeDirection,
        bound: i64,
        rng: &mut StdRng,
    ) -> i64 {
        if failures <= self.nudge_after || self.nudge_pct <= 0.0 {
            return price;
        }
        let p = self.nudge_probability.clamp(0.0, 1.0);
        if !rng.random_bool(p) {
            return price;
        }
        let step = ((price as f64 * self.nudge_pct).floor() as i64).max(1);
        match direction {
            NudgeDirection::Up => (price + step).min(bound.max(price)),
            NudgeDirection::Down => (price - step).max(bound.min(price)).max(1),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::buys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(99)
    }

    #[test]
    fn test_attempt_ceiling() {
        let p = RetryPolicy::buys();
        assert!(p.should_retry(0));
        assert!(p.should_retry(2));
        assert!(!p.should_retry(3));
    }

    #[test]
    fn test_delay_grows_linearly() {
        let p = RetryPolicy::buys();
        let mut r = rng();
        for failures in 1..=3 {
            let d = p.delay(failures, &mut r);
            assert!(d >= Duration::from_secs(failures as u64));
            assert!(d < Duration::from_secs(failures as u64 + 2));
        }
    }

    #[test]
    fn test_no_nudge_on_first_retry() {
        let p = RetryPolicy::sells();
        let mut r = rng();
        assert_eq!(p.nudge(1_000, 1, NudgeDirection::Down, 0, &mut r), 1_000);
    }

    #[test]
    fn test_sell_undercut_after_second_failure() {
        let p = RetryPolicy::sells();
        let mut r = rng();
        assert_eq!(p.nudge(1_000, 2, NudgeDirection::Down, 0, &mut r), 990);
        // Cheap items still move by one unit.
        assert_eq!(p.nudge(50, 2, NudgeDirection::Down, 0, &mut r), 49);
    }

    #[test]
    fn test_nudge_respects_bound() {
        let p = RetryPolicy {
            nudge_probability: 1.0,
            ..RetryPolicy::buys()
        };
        let mut r = rng();
        assert_eq!(p.nudge(1_000, 2, NudgeDirection::Up, 1_005, &mut r), 1_005);
        assert_eq!(p.nudge(1_000, 2, NudgeDirection::Up, 1_000, &mut r), 1_000);
        assert_eq!(p.nudge(1_000, 2, NudgeDirection::Down, 995, &mut r), 995);
    }

    #[test]
    fn test_buy_nudge_is_occasional() {
        let p = RetryPolicy::buys();
        let mut r = rng();
        let nudged = (0..1_000)
            .filter(|_| p.nudge(1_000, 2, NudgeDirection::Up, 2_000, &mut r) != 1_000)
            .count();
        assert!(nudged > 200 && nudged < 400, "nudged {nudged} times");
    }
}
