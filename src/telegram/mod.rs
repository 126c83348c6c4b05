//! Telegram integration.
//!
//! The access lifecycle talks to Telegram only through [`ChatGateway`];
//! [`TelegramBot`] implements it over the Bot API and the handlers turn
//! incoming updates into workflow calls.

mod client;
mod gateway;
pub mod handlers;
mod keyboards;
mod rate_limiter;
#[cfg(any(test, feature = "test-util"))]
pub mod recording;

pub use client::{TelegramBot, TelegramError};
pub use gateway::{ChatGateway, GatewayError, ProofForward};
pub use rate_limiter::RateLimiter;
