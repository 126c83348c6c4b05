//! Application settings and Telegram configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Telegram bot configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Bot token issued by `@BotFather`.
    pub bot_token: String,

    /// User id of the reviewer who approves payments.
    pub reviewer_id: i64,

    /// Id of the private channel access is sold to.
    pub channel_id: i64,
}

impl TelegramConfig {
    /// Creates configuration from environment variables.
    ///
    /// Expects `BOT_TOKEN`, `REVIEWER_ID` and `CHANNEL_ID` to be set.
    ///
    /// # Errors
    ///
    /// Returns an error if environment variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    fn from_vars(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bot_token = get("BOT_TOKEN")
            .filter(|t| !t.trim().is_empty())
            .ok_or(ConfigError::MissingEnvVar("BOT_TOKEN"))?;

        let reviewer_id = parse_id(&get, "REVIEWER_ID")?;
        let channel_id = parse_id(&get, "CHANNEL_ID")?;

        Ok(Self {
            bot_token,
            reviewer_id,
            channel_id,
        })
    }
}

impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("bot_token", &"<redacted>")
            .field("reviewer_id", &self.reviewer_id)
            .field("channel_id", &self.channel_id)
            .finish()
    }
}

fn parse_id(get: &impl Fn(&str) -> Option<String>, key: &'static str) -> Result<i64, ConfigError> {
    get(key)
        .ok_or(ConfigError::MissingEnvVar(key))?
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidId(key))
}

/// Bot-specific settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotSettings {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Seconds between two expiry sweeps.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Minimum milliseconds between two member kicks within a sweep.
    #[serde(default = "default_kick_interval")]
    pub kick_interval_ms: u64,

    /// Log level for the application.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("bot_database.db")
}

fn default_sweep_interval() -> u64 {
    3600 // hourly
}

fn default_kick_interval() -> u64 {
    200
}

fn default_log_level() -> String {
    "info".to_owned()
}

impl Default for BotSettings {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            sweep_interval_secs: default_sweep_interval(),
            kick_interval_ms: default_kick_interval(),
            log_level: default_log_level(),
        }
    }
}

impl BotSettings {
    /// Creates bot settings from environment variables with defaults.
    #[must_use]
    pub fn from_env_with_defaults() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    fn from_vars(get: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            database_path: get("DATABASE_PATH").map_or_else(default_database_path, PathBuf::from),
            sweep_interval_secs: get("SWEEP_INTERVAL_SECS")
                .and_then(|s| s.parse().ok())
                .filter(|&secs| secs > 0)
                .unwrap_or_else(default_sweep_interval),
            kick_interval_ms: get("KICK_INTERVAL_MS")
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(default_kick_interval),
            log_level: get("RUST_LOG").unwrap_or_else(default_log_level),
        }
    }

    /// Interval between expiry sweeps.
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Minimum spacing between member kicks.
    #[must_use]
    pub const fn kick_interval(&self) -> Duration {
        Duration::from_millis(self.kick_interval_ms)
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("Invalid value for {0} (must be an integer id)")]
    InvalidId(&'static str),
}
