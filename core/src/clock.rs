//! Injectable time source.
//!
//! The aggregator stamps groups and matches with the current time. Taking a
//! [`Clock`] instead of calling `Utc::now()` directly keeps those timestamps
//! deterministic under test (see `FixedClock` in `flowsight-testing`).

use chrono::{DateTime, Utc};

/// Abstracts time for testability.
pub trait Clock: Send + Sync {
    /// Get the current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system time.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
