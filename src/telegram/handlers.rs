//! Update handlers: turn incoming messages and button presses into
//! command and workflow calls.

use std::sync::Arc;

use chrono::Utc;
use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use teloxide::types::{MaybeInaccessibleMessage, ParseMode, PhotoSize, User};
use tracing::{debug, info, warn};

use super::keyboards;
use crate::access::{ApprovalError, ApprovalWorkflow, ProofSubmission};
use crate::commands::{CallbackAction, CommandHandler};
use crate::config::OfferConfig;
use crate::store::{SubscriptionStatus, SubscriptionStore};
use crate::templates;

type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;
type HandlerResult = Result<(), HandlerError>;

/// Callback alerts are cut off by Telegram past this many characters.
const MAX_ALERT_LEN: usize = 200;

/// Shared state injected into every handler.
#[derive(Clone)]
pub struct BotState {
    pub commands: Arc<CommandHandler>,
    pub workflow: Arc<ApprovalWorkflow>,
    pub store: SubscriptionStore,
    pub offer: Arc<OfferConfig>,
    pub bot_username: Option<String>,
}

impl std::fmt::Debug for BotState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BotState")
            .field("bot_username", &self.bot_username)
            .finish_non_exhaustive()
    }
}

/// Builds the update dispatch tree.
pub fn schema() -> UpdateHandler<HandlerError> {
    dptree::entry()
        .branch(Update::filter_message().endpoint(handle_message))
        .branch(Update::filter_callback_query().endpoint(handle_callback))
}

async fn handle_message(bot: Bot, msg: Message, state: BotState) -> HandlerResult {
    if !msg.chat.is_private() {
        return Ok(());
    }
    let Some(user) = msg.from.as_ref() else {
        return Ok(());
    };
    let caller_id = ChatId::from(user.id).0;

    if let Some(text) = msg.text() {
        let Some(result) = state
            .commands
            .try_handle(caller_id, text, state.bot_username.as_deref())
            .await
        else {
            return Ok(());
        };

        let reply = bot
            .send_message(msg.chat.id, result.message)
            .parse_mode(ParseMode::Html);
        if result.show_menu {
            reply.reply_markup(keyboards::start(&state.offer)).await?;
        } else {
            reply.await?;
        }
        return Ok(());
    }

    if let Some(photo) = msg.photo().and_then(largest_photo) {
        let submission = proof_submission(user, photo);
        let reply = match state.workflow.submit_proof(submission, Utc::now()).await {
            Ok(_) => templates::PROOF_RECEIVED,
            Err(ApprovalError::Forward(_)) => templates::PROOF_FAILED,
            Err(e) => {
                warn!("Proof from {} not recorded: {}", caller_id, e);
                templates::GENERIC_FAILURE
            }
        };
        bot.send_message(msg.chat.id, reply).await?;
    }

    Ok(())
}

async fn handle_callback(bot: Bot, q: CallbackQuery, state: BotState) -> HandlerResult {
    let Some(action) = q.data.as_deref().and_then(CallbackAction::parse) else {
        debug!("Ignoring unknown callback payload {:?}", q.data);
        bot.answer_callback_query(q.id.clone()).await?;
        return Ok(());
    };
    let caller_id = ChatId::from(q.from.id).0;

    match action {
        CallbackAction::Buy => {
            if let Some(message) = &q.message {
                bot.edit_message_text(
                    message.chat().id,
                    message.id(),
                    templates::payment_details(&state.offer),
                )
                .parse_mode(ParseMode::Html)
                .reply_markup(keyboards::payment())
                .await?;
            }
            bot.answer_callback_query(q.id.clone()).await?;
        }
        CallbackAction::Check => {
            let text = match state.store.get(caller_id).await {
                Ok(record) => {
                    templates::status_alert(&SubscriptionStatus::of(record.as_ref(), Utc::now()))
                }
                Err(e) => {
                    warn!("Status lookup for {} failed: {}", caller_id, e);
                    templates::GENERIC_FAILURE.to_owned()
                }
            };
            bot.answer_callback_query(q.id.clone())
                .text(text)
                .show_alert(true)
                .await?;
        }
        CallbackAction::SendProof => {
            bot.answer_callback_query(q.id.clone()).await?;
            if let Some(message) = &q.message {
                bot.send_message(message.chat().id, templates::AWAITING_PROOF)
                    .await?;
            }
        }
        CallbackAction::Cancel => {
            if let Some(message) = &q.message {
                bot.edit_message_text(
                    message.chat().id,
                    message.id(),
                    templates::welcome(&state.offer),
                )
                .parse_mode(ParseMode::Html)
                .reply_markup(keyboards::start(&state.offer))
                .await?;
            }
            bot.answer_callback_query(q.id.clone()).await?;
        }
        CallbackAction::Approve(token) => {
            match state.workflow.approve(caller_id, &token, Utc::now()).await {
                Ok(grant) => {
                    mark_decided(&bot, q.message.as_ref(), "✅ APPROVED").await;
                    bot.answer_callback_query(q.id.clone())
                        .text(format!(
                            "Access granted until {}",
                            templates::format_date(grant.record.expiry_time)
                        ))
                        .await?;
                }
                Err(e) => answer_error(&bot, &q, &e).await?,
            }
        }
        CallbackAction::Decline(token) => {
            match state.workflow.decline(caller_id, &token, Utc::now()).await {
                Ok(declined) => {
                    mark_decided(&bot, q.message.as_ref(), "❌ DECLINED").await;
                    let text = if declined.notified {
                        "Declined"
                    } else {
                        "Declined (the user could not be notified)"
                    };
                    bot.answer_callback_query(q.id.clone()).text(text).await?;
                }
                Err(e) => answer_error(&bot, &q, &e).await?,
            }
        }
    }

    Ok(())
}

/// Appends the decision to the proof caption and drops the buttons.
async fn mark_decided(bot: &Bot, message: Option<&MaybeInaccessibleMessage>, outcome: &str) {
    let Some(message) = message else {
        return;
    };
    let original = message.regular_message().and_then(Message::caption);

    let result = bot
        .edit_message_caption(message.chat().id, message.id())
        .caption(decided_caption(original, outcome))
        .await;

    if let Err(e) = result {
        warn!("Failed to update reviewer message: {}", e);
    }
}

async fn answer_error(bot: &Bot, q: &CallbackQuery, err: &ApprovalError) -> HandlerResult {
    info!("Decision not applied: {}", err);
    bot.answer_callback_query(q.id.clone())
        .text(alert_text(&err.to_string()))
        .show_alert(true)
        .await?;
    Ok(())
}

fn proof_submission(user: &User, photo: &PhotoSize) -> ProofSubmission {
    ProofSubmission {
        subscriber_id: ChatId::from(user.id).0,
        display_name: user.full_name(),
        username: user.username.clone(),
        photo_file_id: photo.file.id.clone(),
    }
}

/// Telegram lists photo sizes smallest first.
fn largest_photo(sizes: &[PhotoSize]) -> Option<&PhotoSize> {
    sizes.iter().max_by_key(|p| u64::from(p.width) * u64::from(p.height))
}

fn decided_caption(original: Option<&str>, outcome: &str) -> String {
    match original {
        Some(caption) if !caption.is_empty() => format!("{caption}\n\n{outcome}"),
        _ => outcome.to_owned(),
    }
}

fn alert_text(text: &str) -> String {
    if text.chars().count() <= MAX_ALERT_LEN {
        text.to_owned()
    } else {
        let cut: String = text.chars().take(MAX_ALERT_LEN - 3).collect();
        format!("{cut}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decided_caption() {
        assert_eq!(
            decided_caption(Some("New payment!"), "✅ APPROVED"),
            "New payment!\n\n✅ APPROVED"
        );
        assert_eq!(decided_caption(None, "❌ DECLINED"), "❌ DECLINED");
        assert_eq!(decided_caption(Some(""), "❌ DECLINED"), "❌ DECLINED");
    }

    #[test]
    fn test_alert_text_is_bounded() {
        assert_eq!(alert_text("short"), "short");

        let long = "x".repeat(500);
        let cut = alert_text(&long);
        assert_eq!(cut.chars().count(), MAX_ALERT_LEN);
        assert!(cut.ends_with("..."));
    }

    #[test]
    fn test_proof_submission_uses_largest_photo() {
        let user: User = serde_json::from_value(serde_json::json!({
            "id": 42,
            "is_bot": false,
            "first_name": "Ann",
            "last_name": "Lee",
            "username": "ann"
        }))
        .unwrap();
        let sizes: Vec<PhotoSize> = serde_json::from_value(serde_json::json!([
            { "file_id": "small", "file_unique_id": "s", "file_size": 100, "width": 90, "height": 60 },
            { "file_id": "large", "file_unique_id": "l", "file_size": 9000, "width": 1280, "height": 853 }
        ]))
        .unwrap();

        let photo = largest_photo(&sizes).unwrap();
        let submission = proof_submission(&user, photo);

        assert_eq!(submission.subscriber_id, 42);
        assert_eq!(submission.display_name, "Ann Lee");
        assert_eq!(submission.username.as_deref(), Some("ann"));
        assert_eq!(submission.photo_file_id, "large");
    }
}
