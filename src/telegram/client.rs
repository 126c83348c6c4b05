//! Telegram Bot API client wrapper.

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{InputFile, ParseMode};
use teloxide::RequestError;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::gateway::{ChatGateway, GatewayError, ProofForward};
use super::keyboards;
use crate::config::TelegramConfig;

/// Errors that can occur while starting the Telegram client.
#[derive(Debug, Error)]
pub enum TelegramError {
    #[error("Bot token rejected: {0}")]
    InvalidToken(String),

    #[error("Connection error: {0}")]
    Connection(String),
}

impl From<RequestError> for GatewayError {
    fn from(err: RequestError) -> Self {
        match err {
            RequestError::RetryAfter(seconds) => Self::FloodWait(seconds.seconds()),
            RequestError::Network(e) => Self::Network(e.to_string()),
            RequestError::Io(e) => Self::Network(e.to_string()),
            other => Self::Api(other.to_string()),
        }
    }
}

/// High-level Telegram bot wrapper.
#[derive(Clone)]
pub struct TelegramBot {
    /// The underlying teloxide bot.
    bot: Bot,

    /// Bot username, if Telegram reported one.
    username: Option<String>,
}

impl TelegramBot {
    /// Creates the bot and checks the token with `getMe`.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is rejected or Telegram is unreachable.
    pub async fn connect(config: &TelegramConfig) -> Result<Self, TelegramError> {
        info!("Connecting to Telegram...");

        let bot = Bot::new(&config.bot_token);
        let me = bot.get_me().await.map_err(|e| match e {
            RequestError::Api(api) => TelegramError::InvalidToken(api.to_string()),
            other => TelegramError::Connection(other.to_string()),
        })?;

        let username = me.user.username.clone();
        info!(
            "Connected to Telegram as @{}",
            username.as_deref().unwrap_or("<no username>")
        );

        Ok(Self { bot, username })
    }

    /// Returns the underlying bot for dispatching updates.
    #[must_use]
    pub fn inner(&self) -> &Bot {
        &self.bot
    }

    /// Bot username reported by Telegram.
    #[must_use]
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }
}

impl std::fmt::Debug for TelegramBot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramBot")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ChatGateway for TelegramBot {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), GatewayError> {
        debug!("Sending message to {}: \"{}\"", chat_id, truncate_for_log(text, 40));

        self.bot
            .send_message(ChatId(chat_id), text)
            .parse_mode(ParseMode::Html)
            .await?;
        Ok(())
    }

    async fn forward_proof(&self, reviewer_id: i64, proof: &ProofForward) -> Result<(), GatewayError> {
        debug!("Forwarding proof {} to reviewer", proof.token);

        self.bot
            .send_photo(
                ChatId(reviewer_id),
                InputFile::file_id(proof.photo_file_id.clone()),
            )
            .caption(&proof.caption)
            .parse_mode(ParseMode::Html)
            .reply_markup(keyboards::decision(&proof.token))
            .await?;
        Ok(())
    }

    async fn create_invite(&self, channel_id: i64, name: &str) -> Result<String, GatewayError> {
        let link = self
            .bot
            .create_chat_invite_link(ChatId(channel_id))
            .member_limit(1)
            .name(name)
            .await?;

        info!("Created single-use invite '{}'", name);
        Ok(link.invite_link)
    }

    async fn revoke_invite(&self, channel_id: i64, invite_link: &str) -> Result<(), GatewayError> {
        self.bot
            .revoke_chat_invite_link(ChatId(channel_id), invite_link)
            .await?;
        Ok(())
    }

    async fn ban_member(&self, channel_id: i64, user_id: i64) -> Result<(), GatewayError> {
        self.bot
            .ban_chat_member(ChatId(channel_id), to_user_id(user_id)?)
            .await?;
        Ok(())
    }

    async fn unban_member(&self, channel_id: i64, user_id: i64) -> Result<(), GatewayError> {
        let result = self
            .bot
            .unban_chat_member(ChatId(channel_id), to_user_id(user_id)?)
            .only_if_banned(true)
            .await;

        if let Err(e) = &result {
            warn!("Unban of {} failed: {}", user_id, e);
        }
        result?;
        Ok(())
    }
}

fn to_user_id(user_id: i64) -> Result<UserId, GatewayError> {
    u64::try_from(user_id)
        .map(UserId)
        .map_err(|_| GatewayError::Api(format!("invalid user id {user_id}")))
}

/// Truncates a string for logging purposes.
fn truncate_for_log(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_owned()
    } else {
        format!("{}...", s.chars().take(max_len).collect::<String>())
    }
}
