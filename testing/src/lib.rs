//! # Flowsight Testing
//!
//! Fast, deterministic in-memory stand-ins for every I/O seam in the
//! pipeline:
//!
//! - [`InMemoryUnitOfWork`]: staged projection transactions with atomic
//!   commit and real rollback
//! - [`RecordingReadCache`]: captures post-commit invalidations
//! - [`InMemoryEventBus`]: per-topic channels with a published-event log
//! - [`FailingGroupStore`]: simulates group-store unavailability
//! - [`FixedClock`]: frozen time for reproducible timestamps
//!
//! ## Example
//!
//! ```
//! use flowsight_testing::FixedClock;
//! use flowsight_core::clock::Clock;
//! use chrono::Utc;
//!
//! let clock = FixedClock::new(Utc::now());
//! assert_eq!(clock.now(), clock.now());
//! ```

use chrono::{DateTime, Utc};
use flowsight_core::clock::Clock;

mod correlation_mocks;
mod event_bus;
mod projection_mocks;

pub use correlation_mocks::FailingGroupStore;
pub use event_bus::InMemoryEventBus;
pub use projection_mocks::{InMemoryUnitOfWork, RecordingReadCache};

/// Fixed clock for deterministic tests: always returns the same time.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    time: DateTime<Utc>,
}

impl FixedClock {
    /// Create a fixed clock frozen at `time`.
    #[must_use]
    pub const fn new(time: DateTime<Utc>) -> Self {
        Self { time }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.time
    }
}

/// Install a compact `tracing` subscriber for a test binary.
///
/// Safe to call from multiple tests; only the first call installs.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_test_writer()
        .try_init();
}
