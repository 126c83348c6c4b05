//! Command and button payload types.

use std::fmt;

/// Slash commands understood by the bot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotCommand {
    /// Show the welcome menu.
    Start,

    /// Show the caller's subscription status.
    Status,

    /// Show help information.
    Help,

    /// List proofs waiting for a decision (reviewer only).
    Pending,

    /// List stored subscriptions (reviewer only).
    Subscribers,

    /// Run an expiry sweep now (reviewer only).
    Sweep,

    /// Show sweeper statistics (reviewer only).
    Stats,
}

impl BotCommand {
    /// Parses a command from a message text.
    ///
    /// Accepts the `/command@botname` form when `bot_username` matches.
    /// Returns `None` if the message is not a known command.
    #[must_use]
    pub fn parse(text: &str, bot_username: Option<&str>) -> Option<Self> {
        let text = text.trim();
        let after_slash = text.strip_prefix('/')?;

        let word = after_slash
            .split_whitespace()
            .next()
            .unwrap_or_default();

        let cmd = match word.split_once('@') {
            Some((cmd, target)) => {
                if !bot_username.is_some_and(|name| name.eq_ignore_ascii_case(target)) {
                    return None;
                }
                cmd
            }
            None => word,
        };

        match cmd.to_lowercase().as_str() {
            "start" | "menu" => Some(Self::Start),
            "status" | "my" => Some(Self::Status),
            "help" | "h" => Some(Self::Help),
            "pending" => Some(Self::Pending),
            "subscribers" | "subs" => Some(Self::Subscribers),
            "sweep" => Some(Self::Sweep),
            "stats" => Some(Self::Stats),
            _ => None,
        }
    }

    /// Returns the command name as it appears in help.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Status => "status",
            Self::Help => "help",
            Self::Pending => "pending",
            Self::Subscribers => "subscribers",
            Self::Sweep => "sweep",
            Self::Stats => "stats",
        }
    }

    /// Whether only the reviewer may run this command.
    #[must_use]
    pub const fn reviewer_only(&self) -> bool {
        matches!(
            self,
            Self::Pending | Self::Subscribers | Self::Sweep | Self::Stats
        )
    }

    /// Returns all commands with their descriptions.
    #[must_use]
    pub fn all_commands() -> Vec<(Self, &'static str)> {
        vec![
            (Self::Start, "Show the menu"),
            (Self::Status, "Show your subscription status"),
            (Self::Help, "Show this help message"),
            (Self::Pending, "List payments waiting for review"),
            (Self::Subscribers, "List active subscriptions"),
            (Self::Sweep, "Revoke expired subscriptions now"),
            (Self::Stats, "Show expiry sweep statistics"),
        ]
    }
}

impl fmt::Display for BotCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.name())
    }
}

/// Actions carried by inline button callbacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackAction {
    /// Show payment details.
    Buy,

    /// Self-check of the subscription.
    Check,

    /// Subscriber is about to send proof.
    SendProof,

    /// Back to the main menu.
    Cancel,

    /// Reviewer approves the pending approval with this token.
    Approve(String),

    /// Reviewer declines the pending approval with this token.
    Decline(String),
}

impl CallbackAction {
    /// Parses a callback payload. Unknown or malformed payloads yield `None`.
    #[must_use]
    pub fn parse(data: &str) -> Option<Self> {
        match data {
            "buy" => return Some(Self::Buy),
            "check" => return Some(Self::Check),
            "send_proof" => return Some(Self::SendProof),
            "cancel" => return Some(Self::Cancel),
            _ => {}
        }

        let (kind, token) = data.split_once(':')?;
        if !is_valid_token(token) {
            return None;
        }

        match kind {
            "approve" => Some(Self::Approve(token.to_owned())),
            "decline" => Some(Self::Decline(token.to_owned())),
            _ => None,
        }
    }

    /// Encodes the action as a callback payload.
    #[must_use]
    pub fn to_payload(&self) -> String {
        match self {
            Self::Buy => "buy".to_owned(),
            Self::Check => "check".to_owned(),
            Self::SendProof => "send_proof".to_owned(),
            Self::Cancel => "cancel".to_owned(),
            Self::Approve(token) => format!("approve:{token}"),
            Self::Decline(token) => format!("decline:{token}"),
        }
    }
}

/// Tokens are short base64url strings.
fn is_valid_token(token: &str) -> bool {
    !token.is_empty()
        && token.len() <= 32
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Result of command execution.
#[derive(Debug, Clone)]
pub struct CommandResult {
    /// Whether the command was successful.
    pub success: bool,

    /// Response message to show the user (HTML).
    pub message: String,

    /// Whether to attach the main menu keyboard.
    pub show_menu: bool,
}

impl CommandResult {
    /// Creates a successful result.
    #[must_use]
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            show_menu: false,
        }
    }

    /// Creates a successful result that shows the main menu.
    #[must_use]
    pub fn success_with_menu(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            show_menu: true,
        }
    }

    /// Creates an error result.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            show_menu: false,
        }
    }
}
