//! Manual payment approval.
//!
//! A submitted proof becomes a [`PendingApproval`] stored under a random
//! token. Only that token travels in the reviewer's decision buttons, so a
//! decision can only ever target a proof the bot itself recorded.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use rand::Rng;
use thiserror::Error;
use tracing::{error, info, warn};

use super::granter::{AccessGranter, Grant, GrantError};
use crate::store::{ApprovalState, PendingApproval, StoreError, SubscriptionStore};
use crate::telegram::{ChatGateway, GatewayError, ProofForward};
use crate::templates;

/// Errors from the approval workflow.
#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error("Only the administrator can decide")]
    NotReviewer,

    #[error("Unknown or expired approval request")]
    UnknownToken,

    #[error("This payment was already {0}")]
    AlreadyDecided(ApprovalState),

    #[error("Could not forward the proof to the reviewer: {0}")]
    Forward(GatewayError),

    #[error(transparent)]
    Grant(#[from] GrantError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

/// A payment proof as received from a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofSubmission {
    pub subscriber_id: i64,
    pub display_name: String,
    pub username: Option<String>,
    pub photo_file_id: String,
}

/// Outcome of a decline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declined {
    /// The declined approval.
    pub pending: PendingApproval,

    /// Whether the subscriber received the decline notice.
    pub notified: bool,
}

/// Routes proofs to the reviewer and applies their decisions.
pub struct ApprovalWorkflow {
    gateway: Arc<dyn ChatGateway>,
    store: SubscriptionStore,
    granter: AccessGranter,
    reviewer_id: i64,
    /// Tokens whose approval is being granted right now.
    in_flight: Mutex<HashSet<String>>,
}

/// Holds a token in the in-flight set until dropped.
struct InFlight<'a> {
    tokens: &'a Mutex<HashSet<String>>,
    token: String,
}

impl<'a> InFlight<'a> {
    fn enter(tokens: &'a Mutex<HashSet<String>>, token: &str) -> Option<Self> {
        let inserted = tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(token.to_owned());
        inserted.then(|| Self {
            tokens,
            token: token.to_owned(),
        })
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.token);
    }
}

impl ApprovalWorkflow {
    /// Creates a workflow sending proofs to `reviewer_id`.
    #[must_use]
    pub fn new(
        gateway: Arc<dyn ChatGateway>,
        store: SubscriptionStore,
        granter: AccessGranter,
        reviewer_id: i64,
    ) -> Self {
        Self {
            gateway,
            store,
            granter,
            reviewer_id,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// The reviewer allowed to decide.
    #[must_use]
    pub const fn reviewer_id(&self) -> i64 {
        self.reviewer_id
    }

    /// Records a proof and forwards it to the reviewer.
    pub async fn submit_proof(
        &self,
        submission: ProofSubmission,
        now: DateTime<Utc>,
    ) -> Result<PendingApproval, ApprovalError> {
        let pending = PendingApproval {
            token: new_token(),
            subscriber_id: submission.subscriber_id,
            display_name: submission.display_name,
            username: submission.username,
            photo_file_id: submission.photo_file_id,
            state: ApprovalState::ProofSubmitted,
            submitted_at: now,
            decided_at: None,
        };

        self.store.insert_pending(&pending).await?;

        let forward = ProofForward {
            photo_file_id: pending.photo_file_id.clone(),
            caption: templates::proof_caption(&pending),
            token: pending.token.clone(),
        };

        if let Err(e) = self.gateway.forward_proof(self.reviewer_id, &forward).await {
            error!("Failed to forward proof of {}: {}", pending.subscriber_id, e);
            if let Err(e) = self.store.delete_pending(&pending.token).await {
                warn!("Failed to drop unforwarded proof {}: {}", pending.token, e);
            }
            return Err(ApprovalError::Forward(e));
        }

        info!(
            "Proof from {} submitted for review (token {})",
            pending.subscriber_id, pending.token
        );
        Ok(pending)
    }

    /// Approves the proof behind `token` and grants access.
    ///
    /// If the grant fails the proof goes back to awaiting a decision, so the
    /// reviewer can simply press approve again. An approval left marked
    /// approved without a subscription (the process died mid-grant, or the
    /// reopen failed) is picked up again the same way.
    pub async fn approve(
        &self,
        caller_id: i64,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Grant, ApprovalError> {
        self.ensure_reviewer(caller_id, token)?;
        let Some(_in_flight) = InFlight::enter(&self.in_flight, token) else {
            return Err(ApprovalError::AlreadyDecided(ApprovalState::Approved));
        };
        let pending = self.claim(token, ApprovalState::Approved, now).await?;

        match self
            .granter
            .grant(pending.subscriber_id, &pending.display_name, now)
            .await
        {
            Ok(grant) => {
                info!("Payment of {} approved", pending.subscriber_id);
                Ok(grant)
            }
            Err(e) => {
                if let Err(reopen) = self.store.reopen_pending(token).await {
                    error!("Failed to reopen approval {}: {}", token, reopen);
                }
                Err(e.into())
            }
        }
    }

    /// Declines the proof behind `token` and notifies the subscriber.
    pub async fn decline(
        &self,
        caller_id: i64,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Declined, ApprovalError> {
        self.ensure_reviewer(caller_id, token)?;
        let mut pending = self.claim(token, ApprovalState::Declined, now).await?;
        pending.state = ApprovalState::Declined;
        pending.decided_at = Some(now);

        let notified = match self
            .gateway
            .send_message(pending.subscriber_id, templates::DECLINED)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to notify {} of decline: {}", pending.subscriber_id, e);
                false
            }
        };

        info!("Payment of {} declined", pending.subscriber_id);
        Ok(Declined { pending, notified })
    }

    /// Proofs still waiting for a decision.
    pub async fn pending(&self) -> Result<Vec<PendingApproval>, ApprovalError> {
        Ok(self.store.list_pending().await?)
    }

    fn ensure_reviewer(&self, caller_id: i64, token: &str) -> Result<(), ApprovalError> {
        if caller_id == self.reviewer_id {
            Ok(())
        } else {
            warn!("User {} tried to decide approval {}", caller_id, token);
            Err(ApprovalError::NotReviewer)
        }
    }

    /// Atomically moves the approval out of `proof_submitted`.
    async fn claim(
        &self,
        token: &str,
        next: ApprovalState,
        now: DateTime<Utc>,
    ) -> Result<PendingApproval, ApprovalError> {
        let mut pending = self
            .store
            .get_pending(token)
            .await?
            .ok_or(ApprovalError::UnknownToken)?;

        if next == ApprovalState::Approved && self.grant_interrupted(&pending, now).await? {
            warn!(
                "Approval {} has no subscription behind it, reopening",
                pending.token
            );
            self.store.reopen_pending(token).await?;
            pending.state = ApprovalState::ProofSubmitted;
            pending.decided_at = None;
        }

        if !pending.state.can_transition_to(next) {
            return Err(ApprovalError::AlreadyDecided(pending.state));
        }

        if !self.store.resolve_pending(token, next, now).await? {
            // Another decision won the race.
            let current = self
                .store
                .get_pending(token)
                .await?
                .map_or(next, |p| p.state);
            return Err(ApprovalError::AlreadyDecided(current));
        }

        Ok(pending)
    }

    /// An approval whose grant never completed: marked approved, still
    /// within the period it would have bought, yet no subscription started
    /// at or after the decision. Only called while the token is held in
    /// `in_flight`, so a grant still running is never mistaken for one.
    async fn grant_interrupted(
        &self,
        pending: &PendingApproval,
        now: DateTime<Utc>,
    ) -> Result<bool, ApprovalError> {
        let Some(decided_at) = pending.decided_at else {
            return Ok(false);
        };
        if pending.state != ApprovalState::Approved || now > decided_at + self.granter.duration() {
            return Ok(false);
        }

        let record = self.store.get(pending.subscriber_id).await?;
        Ok(record.is_none_or(|r| r.start_time < decided_at))
    }
}

impl std::fmt::Debug for ApprovalWorkflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApprovalWorkflow")
            .field("reviewer_id", &self.reviewer_id)
            .field("granter", &self.granter)
            .finish_non_exhaustive()
    }
}

/// Generates a fresh approval token: 12 random bytes, base64url.
fn new_token() -> String {
    let bytes: [u8; 12] = rand::thread_rng().r#gen();
    URL_SAFE_NO_PAD.encode(bytes)
}
