//! Wall-clock abstraction.
//!
//! Limit blocks, coordination expiry and probe staleness are all judged
//! against wall-clock time. Components take an `Arc<dyn Clock>` so tests can
//! pin and advance time to the exact second.

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::{Mutex, PoisonError};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Current time as whole epoch seconds.
    fn epoch_seconds(&self) -> i64 {
        self.now().timestamp()
    }

    /// Current time as epoch milliseconds.
    fn epoch_millis(&self) -> i64 {
        self.now().timestamp_millis()
    }
}

/// The real system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A manually driven clock for tests and simulations.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Start at a given epoch second.
    pub fn at_epoch(seconds: i64) -> Self {
        let start = Utc
            .timestamp_opt(seconds, 0)
            .single()
            .unwrap_or_else(Utc::now);
        Self::new(start)
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = to;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }

    pub fn advance_secs(&self, secs: i64) {
        self.advance(Duration::seconds(secs));
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
