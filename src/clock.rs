//! Injectable time source.
//!
//! Business logic never reads the wall clock directly; everything that
//! needs "now" takes a [`Clock`] so tests can pin arbitrary instants.

use chrono::{DateTime, Local, TimeZone};

/// Provides the current instant to the engine. All date arithmetic
/// (calendar day, weekday, week start) derives from what this returns.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;

    /// Current time as epoch seconds, the unit activity rows are keyed by.
    fn epoch(&self) -> i64 {
        self.now().timestamp()
    }
}

/// Wall-clock implementation used outside tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// A clock pinned to a fixed instant. Construct from an epoch timestamp or
/// a local datetime; advance it manually between steps of a scenario.
#[derive(Debug)]
pub struct FixedClock {
    now: std::sync::Mutex<DateTime<Local>>,
}

impl FixedClock {
    pub fn at(now: DateTime<Local>) -> Self {
        FixedClock {
            now: std::sync::Mutex::new(now),
        }
    }

    pub fn at_epoch(epoch: i64) -> Self {
        Self::at(Local.timestamp_opt(epoch, 0).unwrap())
    }

    pub fn set(&self, now: DateTime<Local>) {
        *self.now.lock().unwrap() = now;
    }

    pub fn advance(&self, seconds: i64) {
        let mut guard = self.now.lock().unwrap();
        *guard += chrono::Duration::seconds(seconds);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Local> {
        *self.now.lock().unwrap()
    }
}
