//! Expiry sweeper module.
//!
//! Periodically finds subscriptions past their expiry, removes the member
//! from the channel and deletes the record.

mod runner;
mod state;

pub use runner::{DECIDED_RETENTION_DAYS, ExpirySweeper, MIN_SWEEP_INTERVAL, SweeperMessage};
pub use state::{SweepReport, SweeperStats};
