//! Command handling module.
//!
//! Parses slash commands and inline button payloads, and executes
//! commands on behalf of subscribers and the reviewer.

mod handler;
mod types;

pub use handler::CommandHandler;
pub use types::{BotCommand, CallbackAction, CommandResult};
