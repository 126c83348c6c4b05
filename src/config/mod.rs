//! Configuration module for the access bot.
//!
//! Handles loading and validation of the subscription offer, runtime
//! settings, and Telegram credentials.

mod offer;
mod settings;

pub use offer::{OfferConfig, OfferError, PaymentDetails};
pub use settings::{BotSettings, ConfigError, TelegramConfig};

/// Longest subscription period an offer may define.
pub const MAX_DURATION_DAYS: u32 = 3650;
