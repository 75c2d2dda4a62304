//! Doubling backoff with additive jitter.
//!
//! Used by the HTTP transport between report attempts. The generator is
//! handed in by the agent at startup so delays are reproducible in tests.

use rand::rngs::StdRng;
use rand::Rng;
use std::time::Duration;

/// Upper bound of the additive jitter, as a share of the current delay.
const JITTER_SHARE: f64 = 0.3;

#[derive(Debug)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
    rng: StdRng,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration, rng: StdRng) -> Self {
        Self {
            initial,
            max,
            current: initial,
            rng,
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    /// Double the delay, capped at the maximum.
    pub fn increase(&mut self) {
        self.current = (self.current * 2).min(self.max);
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }

    /// The current delay plus 0-30% jitter.
    pub fn next_delay(&mut self) -> Duration {
        let base_ms = self.current.as_millis() as f64;
        let jitter_ms = self.rng.random_range(0.0..=base_ms * JITTER_SHARE);
        Duration::from_millis((base_ms + jitter_ms) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn backoff() -> Backoff {
        Backoff::new(
            Duration::from_secs(1),
            Duration::from_secs(30),
            StdRng::seed_from_u64(7),
        )
    }

    #[test]
    fn test_doubles_up_to_cap() {
        let mut b = backoff();
        let mut seen = Vec::new();
        for _ in 0..7 {
            b.increase();
            seen.push(b.current().as_secs());
        }
        assert_eq!(seen, vec![2, 4, 8, 16, 30, 30, 30]);
        b.reset();
        assert_eq!(b.current(), Duration::from_secs(1));
    }

    #[test]
    fn test_jitter_is_bounded() {
        let mut b = backoff();
        b.increase();
        for _ in 0..200 {
            let d = b.next_delay();
            assert!(d >= Duration::from_secs(2));
            assert!(d <= Duration::from_millis(2_600));
        }
    }

    #[test]
    fn test_same_seed_same_delays() {
        let mut a = backoff();
        let mut b = backoff();
        for _ in 0..10 {
            assert_eq!(a.next_delay(), b.next_delay());
        }
    }
}
