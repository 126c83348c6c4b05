//! Subscription persistence.
//!
//! One record per subscriber plus the pending payment proofs awaiting a
//! reviewer decision, both kept in a single SQLite database.

mod record;
mod sqlite;

pub use record::{ApprovalState, PendingApproval, SubscriptionRecord, SubscriptionStatus};
pub use sqlite::{StoreError, SubscriptionStore};
