//! Access lifecycle: payment approval and granting.

mod approval;
mod granter;

pub use approval::{ApprovalError, ApprovalWorkflow, Declined, ProofSubmission};
pub use granter::{AccessGranter, Grant, GrantError};
