//! Channel Access Bot Library
//!
//! A Telegram bot selling time-limited access to a private channel.
//!
//! This crate provides the core functionality for:
//! - Loading and validating the offer and environment configuration
//! - Persisting subscriptions and pending payment approvals in SQLite
//! - Routing payment proofs to a reviewer and granting access on approval
//! - Revoking expired subscriptions on a schedule
//! - Handling user commands and inline buttons via the Bot API

pub mod access;
pub mod commands;
pub mod config;
pub mod scheduler;
pub mod store;
pub mod telegram;
pub mod templates;
