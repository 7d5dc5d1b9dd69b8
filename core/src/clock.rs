//! Wall clock and deadlines.
//!
//! RULE: Nothing outside this module calls `Utc::now()` or `Instant::now()`.
//! The engine reads time through a `Clock` so scans can be replayed
//! against a fixed instant in tests.

use crate::error::{SentinelError, SentinelResult};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use std::time::{Duration, Instant};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The real wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(at) }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock() = at;
    }

    pub fn advance(&self, by: ChronoDuration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// A caller-supplied time budget for one whole operation
/// (scan-and-reconcile, or one alert fan-out).
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    operation: &'static str,
    started: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn start(operation: &'static str, budget: Duration) -> Self {
        Self { operation, started: Instant::now(), budget }
    }

    /// `None` budget means "no deadline".
    pub fn maybe(operation: &'static str, budget: Option<Duration>) -> Option<Self> {
        budget.map(|b| Self::start(operation, b))
    }

    pub fn remaining(&self) -> Duration {
        self.budget.saturating_sub(self.started.elapsed())
    }

    pub fn expired(&self) -> bool {
        self.started.elapsed() >= self.budget
    }

    /// Fail with `Timeout` once the budget is spent.
    pub fn check(&self) -> SentinelResult<()> {
        if self.expired() {
            Err(self.timeout_error())
        } else {
            Ok(())
        }
    }

    pub fn timeout_error(&self) -> SentinelError {
        SentinelError::Timeout {
            operation: self.operation,
            elapsed_ms: self.started.elapsed().as_millis() as u64,
        }
    }
}
