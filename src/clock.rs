//! Injectable time source.
//!
//! Every expiry/backoff/staleness policy in this crate consults a [`Clock`]
//! rather than calling `Utc::now()` directly, so tests can advance time
//! deterministically instead of sleeping for seconds at a time.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;

/// A source of the current time.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only advances when told to. Used by tests that exercise lease
/// expiry, retry backoff, or stale-agent detection without real sleeps.
#[derive(Debug, Clone)]
pub struct ManualClock {
    inner: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, delta: chrono::Duration) {
        let mut guard = self.inner.lock();
        *guard += delta;
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.inner.lock() = at;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.inner.lock()
    }
}

/// Shared handle to a clock, cheap to clone and pass into every store.
pub type SharedClock = Arc<dyn Clock>;

pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances_deterministically() {
        let start = Utc::now();
        let clock = ManualClock::new(start);
        assert_eq!(clock.now(), start);
        clock.advance(chrono::Duration::seconds(30));
        assert_eq!(clock.now(), start + chrono::Duration::seconds(30));
    }
}
