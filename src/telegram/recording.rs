//! In-memory gateway that records every call.
//!
//! Used by the test suites in place of the Telegram API.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::gateway::{ChatGateway, GatewayError, ProofForward};

/// A recorded gateway call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    SendMessage { chat_id: i64, text: String },
    ForwardProof { reviewer_id: i64, proof: ProofForward },
    CreateInvite { channel_id: i64, name: String },
    RevokeInvite { channel_id: i64, invite_link: String },
    Ban { channel_id: i64, user_id: i64 },
    Unban { channel_id: i64, user_id: i64 },
}

/// Operations that can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailOn {
    SendMessage,
    ForwardProof,
    CreateInvite,
    RevokeInvite,
    Ban,
    Unban,
}

#[derive(Debug, Default)]
struct Inner {
    calls: Vec<GatewayCall>,
    failing: HashMap<FailOn, GatewayError>,
    invites_issued: u32,
}

/// Gateway that records calls and succeeds unless told otherwise.
#[derive(Debug, Default)]
pub struct RecordingGateway {
    inner: Mutex<Inner>,
}

impl RecordingGateway {
    /// Creates a gateway where every operation succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `op` fail until [`RecordingGateway::heal`] is called.
    pub fn fail(&self, op: FailOn) {
        self.fail_with(op, GatewayError::Api(format!("{op:?} failed")));
    }

    /// Makes `op` fail with `error`, e.g. a flood wait.
    pub fn fail_with(&self, op: FailOn, error: GatewayError) {
        self.lock().failing.insert(op, error);
    }

    /// Makes `op` succeed again.
    pub fn heal(&self, op: FailOn) {
        self.lock().failing.remove(&op);
    }

    /// All calls so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<GatewayCall> {
        self.lock().calls.clone()
    }

    /// Messages sent to `chat_id`.
    #[must_use]
    pub fn messages_to(&self, chat_id: i64) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                GatewayCall::SendMessage { chat_id: to, text } if *to == chat_id => {
                    Some(text.clone())
                }
                _ => None,
            })
            .collect()
    }

    /// Number of ban calls issued for `user_id`.
    #[must_use]
    pub fn bans_of(&self, user_id: i64) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| matches!(call, GatewayCall::Ban { user_id: u, .. } if *u == user_id))
            .count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn record(&self, call: GatewayCall, op: FailOn) -> Result<(), GatewayError> {
        let mut inner = self.lock();
        inner.calls.push(call);
        match inner.failing.get(&op) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ChatGateway for RecordingGateway {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), GatewayError> {
        self.record(
            GatewayCall::SendMessage {
                chat_id,
                text: text.to_owned(),
            },
            FailOn::SendMessage,
        )
    }

    async fn forward_proof(&self, reviewer_id: i64, proof: &ProofForward) -> Result<(), GatewayError> {
        self.record(
            GatewayCall::ForwardProof {
                reviewer_id,
                proof: proof.clone(),
            },
            FailOn::ForwardProof,
        )
    }

    async fn create_invite(&self, channel_id: i64, name: &str) -> Result<String, GatewayError> {
        self.record(
            GatewayCall::CreateInvite {
                channel_id,
                name: name.to_owned(),
            },
            FailOn::CreateInvite,
        )?;

        let mut inner = self.lock();
        inner.invites_issued += 1;
        Ok(format!("https://t.me/+invite{}", inner.invites_issued))
    }

    async fn revoke_invite(&self, channel_id: i64, invite_link: &str) -> Result<(), GatewayError> {
        self.record(
            GatewayCall::RevokeInvite {
                channel_id,
                invite_link: invite_link.to_owned(),
            },
            FailOn::RevokeInvite,
        )
    }

    async fn ban_member(&self, channel_id: i64, user_id: i64) -> Result<(), GatewayError> {
        self.record(GatewayCall::Ban { channel_id, user_id }, FailOn::Ban)
    }

    async fn unban_member(&self, channel_id: i64, user_id: i64) -> Result<(), GatewayError> {
        self.record(GatewayCall::Unban { channel_id, user_id }, FailOn::Unban)
    }
}
