//! The chat platform as seen by the access lifecycle.

use async_trait::async_trait;
use thiserror::Error;

/// Errors returned by a [`ChatGateway`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Flood wait required: {0} seconds")]
    FloodWait(u32),

    #[error("Telegram API error: {0}")]
    Api(String),

    #[error("Network error: {0}")]
    Network(String),
}

/// A payment proof forwarded to the reviewer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofForward {
    /// Telegram file id of the proof photo.
    pub photo_file_id: String,

    /// Caption describing who paid.
    pub caption: String,

    /// Pending approval token for the decision buttons.
    pub token: String,
}

/// Outbound operations the bot performs on the chat platform.
///
/// Every call is independent: a failure affects only that operation.
#[async_trait]
pub trait ChatGateway: Send + Sync {
    /// Sends an HTML-formatted message to a chat.
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), GatewayError>;

    /// Sends a proof photo to the reviewer with approve/decline buttons.
    async fn forward_proof(&self, reviewer_id: i64, proof: &ProofForward) -> Result<(), GatewayError>;

    /// Creates an invite link usable by exactly one member.
    async fn create_invite(&self, channel_id: i64, name: &str) -> Result<String, GatewayError>;

    /// Revokes a previously created invite link.
    async fn revoke_invite(&self, channel_id: i64, invite_link: &str) -> Result<(), GatewayError>;

    /// Bans a member from the channel.
    async fn ban_member(&self, channel_id: i64, user_id: i64) -> Result<(), GatewayError>;

    /// Lifts a ban so the member can rejoin later.
    async fn unban_member(&self, channel_id: i64, user_id: i64) -> Result<(), GatewayError>;
}
