//! Command handler implementation.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use teloxide::utils::html::escape;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, warn};

use super::types::{BotCommand, CommandResult};
use crate::access::ApprovalWorkflow;
use crate::config::OfferConfig;
use crate::scheduler::{SweeperMessage, SweeperStats};
use crate::store::{SubscriptionStatus, SubscriptionStore};
use crate::templates;

/// Handles slash commands from subscribers and the reviewer.
pub struct CommandHandler {
    /// Subscription persistence.
    store: SubscriptionStore,

    /// Approval workflow (source of the reviewer id and pending list).
    workflow: Arc<ApprovalWorkflow>,

    /// Statistics shared with the expiry sweeper.
    stats: Arc<RwLock<SweeperStats>>,

    /// Channel to the expiry sweeper.
    sweeper_tx: mpsc::Sender<SweeperMessage>,

    /// The offer being sold.
    offer: OfferConfig,

    /// Interval between scheduled sweeps.
    sweep_interval: Duration,
}

impl CommandHandler {
    /// Creates a new command handler.
    #[must_use]
    pub fn new(
        store: SubscriptionStore,
        workflow: Arc<ApprovalWorkflow>,
        stats: Arc<RwLock<SweeperStats>>,
        sweeper_tx: mpsc::Sender<SweeperMessage>,
        offer: OfferConfig,
        sweep_interval: Duration,
    ) -> Self {
        Self {
            store,
            workflow,
            stats,
            sweeper_tx,
            offer,
            sweep_interval,
        }
    }

    /// Tries to parse and execute a command sent by `caller_id`.
    ///
    /// Returns `None` if the message is not a command.
    pub async fn try_handle(
        &self,
        caller_id: i64,
        message_text: &str,
        bot_username: Option<&str>,
    ) -> Option<CommandResult> {
        let command = BotCommand::parse(message_text, bot_username)?;

        debug!("Handling command {} from {}", command, caller_id);
        let result = self.execute(caller_id, command, Utc::now()).await;
        info!(
            "Command {} from {}: success={}",
            command, caller_id, result.success
        );

        Some(result)
    }

    /// Executes a parsed command as of `now`.
    pub async fn execute(
        &self,
        caller_id: i64,
        command: BotCommand,
        now: DateTime<Utc>,
    ) -> CommandResult {
        if command.reviewer_only() && !self.is_reviewer(caller_id) {
            warn!("User {} tried reviewer command {}", caller_id, command);
            return CommandResult::error("⛔ This command is only available to the administrator.");
        }

        match command {
            BotCommand::Start => self.handle_start(),
            BotCommand::Status => self.handle_status(caller_id, now).await,
            BotCommand::Help => self.handle_help(caller_id),
            BotCommand::Pending => self.handle_pending().await,
            BotCommand::Subscribers => self.handle_subscribers(now).await,
            BotCommand::Sweep => self.handle_sweep(),
            BotCommand::Stats => self.handle_stats().await,
        }
    }

    /// Whether `user_id` is the configured reviewer.
    #[must_use]
    pub fn is_reviewer(&self, user_id: i64) -> bool {
        user_id == self.workflow.reviewer_id()
    }

    fn handle_start(&self) -> CommandResult {
        CommandResult::success_with_menu(templates::welcome(&self.offer))
    }

    async fn handle_status(&self, caller_id: i64, now: DateTime<Utc>) -> CommandResult {
        match self.store.get(caller_id).await {
            Ok(record) => {
                let status = SubscriptionStatus::of(record.as_ref(), now);
                CommandResult::success(templates::status_message(&status))
            }
            Err(e) => {
                warn!("Status lookup for {} failed: {}", caller_id, e);
                CommandResult::error(templates::GENERIC_FAILURE)
            }
        }
    }

    fn handle_help(&self, caller_id: i64) -> CommandResult {
        let reviewer = self.is_reviewer(caller_id);
        let mut lines = vec!["<b>Available commands:</b>".to_owned()];

        for (cmd, desc) in BotCommand::all_commands() {
            if cmd.reviewer_only() && !reviewer {
                continue;
            }
            lines.push(format!("  {cmd} - {desc}"));
        }

        CommandResult::success(lines.join("\n"))
    }

    async fn handle_pending(&self) -> CommandResult {
        let pending = match self.workflow.pending().await {
            Ok(pending) => pending,
            Err(e) => {
                warn!("Listing pending approvals failed: {}", e);
                return CommandResult::error(templates::GENERIC_FAILURE);
            }
        };

        if pending.is_empty() {
            return CommandResult::success("No payments waiting for review.");
        }

        let mut lines = vec![format!("<b>Waiting for review ({}):</b>", pending.len())];
        for p in &pending {
            lines.push(format!(
                "• {} (<code>{}</code>) since {}",
                escape(&truncate(&p.display_name, 30)),
                p.subscriber_id,
                templates::format_date(p.submitted_at),
            ));
        }

        CommandResult::success(lines.join("\n"))
    }

    async fn handle_subscribers(&self, now: DateTime<Utc>) -> CommandResult {
        let records = match self.store.list_all().await {
            Ok(records) => records,
            Err(e) => {
                warn!("Listing subscriptions failed: {}", e);
                return CommandResult::error(templates::GENERIC_FAILURE);
            }
        };

        if records.is_empty() {
            return CommandResult::success("No subscriptions stored.");
        }

        let active = records.iter().filter(|r| !r.is_expired(now)).count();
        let mut lines = vec![format!(
            "<b>Subscriptions:</b> {} total, {} active",
            records.len(),
            active
        )];

        for record in &records {
            let marker = if record.is_expired(now) { "⌛" } else { "✅" };
            lines.push(format!(
                "{marker} {} (<code>{}</code>) until {}",
                escape(&truncate(&record.display_name, 30)),
                record.subscriber_id,
                templates::format_date(record.expiry_time),
            ));
        }

        CommandResult::success(lines.join("\n"))
    }

    fn handle_sweep(&self) -> CommandResult {
        match self.sweeper_tx.try_send(SweeperMessage::SweepNow) {
            Ok(()) => CommandResult::success("🧹 Expiry sweep started."),
            Err(mpsc::error::TrySendError::Full(_)) => {
                CommandResult::error("A sweep is already queued.")
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                CommandResult::error("The expiry sweeper is not running.")
            }
        }
    }

    async fn handle_stats(&self) -> CommandResult {
        let stats = self.stats.read().await.clone();
        let subscriptions = match self.store.count().await {
            Ok(n) => n.to_string(),
            Err(e) => {
                warn!("Counting subscriptions failed: {}", e);
                "?".to_owned()
            }
        };

        let last_tick = stats.last_tick_at.map_or_else(
            || "never".to_owned(),
            |at| at.format("%d.%m.%Y %H:%M UTC").to_string(),
        );

        let last_report = stats.last_report.map_or_else(
            || "N/A".to_owned(),
            |r| {
                if r.listing_failed {
                    "store unavailable".to_owned()
                } else {
                    format!(
                        "{} examined, {} expired, {} revoked, {} failed, {} renewed",
                        r.examined, r.expired, r.revoked, r.failed, r.superseded
                    )
                }
            },
        );

        let message = format!(
            "<b>Expiry sweeper</b>\n\
             Interval: {}\n\
             Ticks: {}\n\
             Revoked: {}\n\
             Failures: {}\n\
             Last tick: {last_tick}\n\
             Last result: {last_report}\n\
             Stored subscriptions: {subscriptions}",
            format_duration(self.sweep_interval.as_secs()),
            stats.ticks,
            stats.revoked,
            stats.failures,
        );

        CommandResult::success(message)
    }
}

impl std::fmt::Debug for CommandHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandHandler")
            .field("offer", &self.offer)
            .field("sweep_interval", &self.sweep_interval)
            .finish_non_exhaustive()
    }
}

/// Truncates a string to a maximum length, adding "..." if truncated.
fn truncate(s: &str, max_len: usize) -> String {
    let chars: Vec<char> = s.chars().collect();
    if chars.len() <= max_len {
        s.to_owned()
    } else {
        format!("{}...", chars[..max_len].iter().collect::<String>())
    }
}

/// Formats a duration in seconds to a human-readable string.
fn format_duration(secs: u64) -> String {
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else {
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        if mins == 0 {
            format!("{hours}h")
        } else {
            format!("{hours}h {mins}m")
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration as ChronoDuration, TimeZone};

    use super::*;
    use crate::access::AccessGranter;
    use crate::store::SubscriptionRecord;
    use crate::telegram::recording::RecordingGateway;

    const REVIEWER: i64 = 42;
    const USER: i64 = 1001;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 15, 9, 0, 0).unwrap()
    }

    async fn setup(capacity: usize) -> (CommandHandler, SubscriptionStore, mpsc::Receiver<SweeperMessage>) {
        let gateway = Arc::new(RecordingGateway::new());
        let store = SubscriptionStore::open_in_memory().await.unwrap();
        let offer = OfferConfig::example();
        let granter = AccessGranter::new(gateway.clone(), store.clone(), -1_001, offer.duration());
        let workflow = Arc::new(ApprovalWorkflow::new(gateway, store.clone(), granter, REVIEWER));
        let (tx, rx) = mpsc::channel(capacity);

        let handler = CommandHandler::new(
            store.clone(),
            workflow,
            Arc::new(RwLock::new(SweeperStats::new())),
            tx,
            offer,
            Duration::from_secs(3600),
        );
        (handler, store, rx)
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("Hello", 10), "Hello");
        assert_eq!(truncate("Hello, World!", 5), "Hello...");
        assert_eq!(truncate("Привет", 3), "При...");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(30), "30s");
        assert_eq!(format_duration(90), "1m");
        assert_eq!(format_duration(3600), "1h");
        assert_eq!(format_duration(3660), "1h 1m");
    }

    #[tokio::test]
    async fn test_start_shows_menu() {
        let (handler, _store, _rx) = setup(1).await;
        let result = handler.execute(USER, BotCommand::Start, now()).await;
        assert!(result.success);
        assert!(result.show_menu);
        assert!(result.message.contains("30 days"));
    }

    #[tokio::test]
    async fn test_status_without_subscription() {
        let (handler, _store, _rx) = setup(1).await;
        let result = handler.execute(USER, BotCommand::Status, now()).await;
        assert!(result.success);
        assert_eq!(
            result.message,
            templates::status_message(&SubscriptionStatus::None)
        );
    }

    #[tokio::test]
    async fn test_status_with_active_subscription() {
        let (handler, store, _rx) = setup(1).await;
        let record = SubscriptionRecord::starting_at(
            USER,
            "Ann",
            now() - ChronoDuration::days(5),
            ChronoDuration::days(30),
        );
        store.upsert(&record).await.unwrap();

        let result = handler.execute(USER, BotCommand::Status, now()).await;
        assert_eq!(
            result.message,
            templates::status_message(&record.status(now()))
        );
    }

    #[tokio::test]
    async fn test_reviewer_commands_are_refused_to_others() {
        let (handler, _store, mut rx) = setup(1).await;

        for cmd in [
            BotCommand::Pending,
            BotCommand::Subscribers,
            BotCommand::Sweep,
            BotCommand::Stats,
        ] {
            assert!(!handler.execute(USER, cmd, now()).await.success);
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_help_hides_reviewer_commands() {
        let (handler, _store, _rx) = setup(1).await;

        let user_help = handler.execute(USER, BotCommand::Help, now()).await;
        assert!(user_help.message.contains("/status"));
        assert!(!user_help.message.contains("/sweep"));

        let reviewer_help = handler.execute(REVIEWER, BotCommand::Help, now()).await;
        assert!(reviewer_help.message.contains("/sweep"));
    }

    #[tokio::test]
    async fn test_sweep_queues_request() {
        let (handler, _store, mut rx) = setup(1).await;

        assert!(handler.execute(REVIEWER, BotCommand::Sweep, now()).await.success);
        assert!(!handler.execute(REVIEWER, BotCommand::Sweep, now()).await.success);
        assert_eq!(rx.try_recv().unwrap(), SweeperMessage::SweepNow);
    }

    #[tokio::test]
    async fn test_sweep_without_sweeper() {
        let (handler, _store, rx) = setup(1).await;
        drop(rx);

        let result = handler.execute(REVIEWER, BotCommand::Sweep, now()).await;
        assert!(!result.success);
    }

    #[tokio::test]
    async fn test_subscribers_lists_records() {
        let (handler, store, _rx) = setup(1).await;
        let active = SubscriptionRecord::starting_at(1, "Ann", now(), ChronoDuration::days(30));
        let expired = SubscriptionRecord::starting_at(
            2,
            "<Bob>",
            now() - ChronoDuration::days(60),
            ChronoDuration::days(30),
        );
        store.upsert(&active).await.unwrap();
        store.upsert(&expired).await.unwrap();

        let result = handler.execute(REVIEWER, BotCommand::Subscribers, now()).await;
        assert!(result.message.contains("2 total, 1 active"));
        assert!(result.message.contains("&lt;Bob&gt;"));
    }

    #[tokio::test]
    async fn test_pending_empty() {
        let (handler, _store, _rx) = setup(1).await;
        let result = handler.execute(REVIEWER, BotCommand::Pending, now()).await;
        assert!(result.success);
        assert!(result.message.contains("No payments"));
    }

    #[tokio::test]
    async fn test_stats_before_first_tick() {
        let (handler, _store, _rx) = setup(1).await;
        let result = handler.execute(REVIEWER, BotCommand::Stats, now()).await;
        assert!(result.message.contains("Interval: 1h"));
        assert!(result.message.contains("Last tick: never"));
    }

    #[tokio::test]
    async fn test_try_handle_ignores_plain_text() {
        let (handler, _store, _rx) = setup(1).await;
        assert!(handler.try_handle(USER, "hello", None).await.is_none());
        assert!(handler.try_handle(USER, "/help", None).await.is_some());
    }
}
