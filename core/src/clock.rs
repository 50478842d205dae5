//! Time source and restartable intervals.
//!
//! RULE: nothing in the save core reads the system time directly. All
//! timestamps flow through a `Clock` so tests can pin them.

use crate::types::Millis;
use chrono::{DateTime, Datelike, Utc};
use std::sync::atomic::{AtomicI64, Ordering};

pub trait Clock: Send + Sync {
    fn now_ms(&self) -> Millis;

    /// Calendar date (UTC) as `(year, month, day)`.
    fn date(&self) -> (i32, u32, u32) {
        let now = DateTime::<Utc>::from_timestamp_millis(self.now_ms()).unwrap_or_default();
        (now.year(), now.month(), now.day())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> Millis {
        Utc::now().timestamp_millis()
    }
}

/// A clock that only moves when told to (used in tests and replays).
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start: Millis) -> Self {
        Self { now: AtomicI64::new(start) }
    }

    pub fn set(&self, now: Millis) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Millis) -> Millis {
        self.now.fetch_add(by, Ordering::SeqCst) + by
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> Millis {
        self.now.load(Ordering::SeqCst)
    }
}

/// A periodic timer that callers poll. Restarting pushes the next firing a
/// full period out from the restart time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub period_ms: Millis,
    started_at:    Millis,
}

impl Interval {
    pub fn new(period_ms: Millis, now: Millis) -> Self {
        Self { period_ms, started_at: now }
    }

    pub fn restart(&mut self, now: Millis) {
        self.started_at = now;
    }

    pub fn is_due(&self, now: Millis) -> bool {
        now - self.started_at >= self.period_ms
    }

    pub fn remaining(&self, now: Millis) -> Millis {
        (self.started_at + self.period_ms - now).max(0)
    }

    pub fn started_at(&self) -> Millis {
        self.started_at
    }
}
