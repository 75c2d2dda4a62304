//! Local trade-limit ledger.
//!
//! Tracks items that hit the venue's rolling volume ceiling on this account.
//! Keys are case-folded item names, values are unblock times in epoch
//! seconds. Expiry is evaluated lazily on read; nothing is swept.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::info;

use crate::clock::Clock;
use crate::types::item_key;

/// Length of the venue's rolling limit window.
pub const LIMIT_WINDOW_SECS: i64 = 4 * 3600;

pub struct LimitTracker {
    clock: Arc<dyn Clock>,
    blocked_until: RwLock<HashMap<String, i64>>,
}

impl LimitTracker {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            blocked_until: RwLock::new(HashMap::new()),
        }
    }

    /// True iff a record exists and `now < unblock time`.
    pub fn is_blocked(&self, item: &str) -> bool {
        let now = self.clock.epoch_seconds();
        self.read()
            .get(&item_key(item))
            .is_some_and(|until| now < *until)
    }

    /// Block for a full window from now, overwriting any earlier record.
    /// Returns the unblock time in epoch seconds.
    pub fn block(&self, item: &str) -> i64 {
        let until = self.clock.epoch_seconds() + LIMIT_WINDOW_SECS;
        self.write().insert(item_key(item), until);
        info!(item, until, "Item blocked for limit window");
        until
    }

    pub fn remaining_seconds(&self, item: &str) -> i64 {
        let now = self.clock.epoch_seconds();
        self.read()
            .get(&item_key(item))
            .map(|until| (until - now).max(0))
            .unwrap_or(0)
    }

    /// Remaining block time as "3h 45m", "12m" or "Not blocked".
    pub fn remaining_formatted(&self, item: &str) -> String {
        let secs = self.remaining_seconds(item);
        if secs == 0 {
            return "Not blocked".to_string();
        }
        let hours = secs / 3600;
        let minutes = (secs % 3600) / 60;
        if hours > 0 {
            format!("{hours}h {minutes}m")
        } else {
            format!("{minutes}m")
        }
    }

    /// Number of records whose block is still active.
    pub fn active_count(&self) -> usize {
        let now = self.clock.epoch_seconds();
        self.read().values().filter(|until| now < **until).count()
    }

    pub fn unblock(&self, item: &str) {
        self.write().remove(&item_key(item));
    }

    /// Consistent copy of every record, expired or not.
    pub fn snapshot(&self) -> HashMap<String, i64> {
        self.read().clone()
    }

    /// Reinstate a persisted record.
    pub fn restore(&self, item: &str, until_epoch: i64) {
        self.write().insert(item_key(item), until_epoch);
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, i64>> {
        self.blocked_until.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, i64>> {
        self.blocked_until.write().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
