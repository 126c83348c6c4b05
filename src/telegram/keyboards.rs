//! Inline keyboards.

use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};

use crate::commands::CallbackAction;
use crate::config::OfferConfig;

fn button(text: impl Into<String>, action: &CallbackAction) -> InlineKeyboardButton {
    InlineKeyboardButton::callback(text, action.to_payload())
}

/// Main menu: buy access or check the subscription.
pub fn start(offer: &OfferConfig) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![button(
            format!("Buy access ({})", offer.price_label()),
            &CallbackAction::Buy,
        )],
        vec![button("My subscription", &CallbackAction::Check)],
    ])
}

/// Shown under the payment details.
pub fn payment() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![button("I have paid (send receipt)", &CallbackAction::SendProof)],
        vec![button("Cancel", &CallbackAction::Cancel)],
    ])
}

/// Reviewer decision buttons for one pending approval.
pub fn decision(token: &str) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![
        button("✅ Approve", &CallbackAction::Approve(token.to_owned())),
        button("❌ Decline", &CallbackAction::Decline(token.to_owned())),
    ]])
}
