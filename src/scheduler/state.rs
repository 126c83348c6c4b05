//! Sweep results and cumulative statistics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result of one sweep tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Records listed from the store.
    pub examined: usize,

    /// Records found expired.
    pub expired: usize,

    /// Expired records whose access was revoked and record deleted.
    pub revoked: usize,

    /// Expired records left in place for the next tick.
    pub failed: usize,

    /// Expired records renewed by an approval while the tick ran.
    pub superseded: usize,

    /// Whether the store could not be listed at all.
    pub listing_failed: bool,
}

impl SweepReport {
    /// A tick that could not read the store.
    #[must_use]
    pub fn listing_failed() -> Self {
        Self {
            listing_failed: true,
            ..Self::default()
        }
    }

    /// Whether every expired record was handled.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        !self.listing_failed && self.failed == 0
    }
}

/// Cumulative sweeper statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweeperStats {
    /// Ticks run since startup.
    pub ticks: u64,

    /// Subscriptions revoked since startup.
    pub revoked: u64,

    /// Per-record or tick-level failures since startup.
    pub failures: u64,

    /// When the last tick ran.
    pub last_tick_at: Option<DateTime<Utc>>,

    /// Report of the last tick.
    pub last_report: Option<SweepReport>,
}

impl SweeperStats {
    /// Creates empty statistics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds a tick's report into the totals.
    pub fn record(&mut self, at: DateTime<Utc>, report: SweepReport) {
        self.ticks += 1;
        self.revoked += report.revoked as u64;
        self.failures += report.failed as u64 + u64::from(report.listing_failed);
        self.last_tick_at = Some(at);
        self.last_report = Some(report);
    }
}
