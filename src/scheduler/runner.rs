//! Expiry sweeper runner.
//!
//! Each tick:
//! 1. List every subscription
//! 2. For each record past its expiry:
//!    - Re-read it, skipping subscribers re-approved since the listing
//!    - Ban then unban the member (kick without a permanent block)
//!    - Delete the record, unless it was renewed meanwhile
//!    - Tell the subscriber
//! 3. Drop approval decisions older than [`DECIDED_RETENTION_DAYS`]
//! 4. Fold the tick's report into the shared stats
//!
//! A record whose kick or delete fails stays in the store and is retried
//! on the next tick. Nothing inside a tick stops the loop; only
//! `SweeperMessage::Shutdown` (or dropping the sender) does.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use thiserror::Error;
use tokio::sync::{RwLock, mpsc};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};

use super::{SweepReport, SweeperStats};
use crate::store::{StoreError, SubscriptionRecord, SubscriptionStore};
use crate::telegram::{ChatGateway, GatewayError, RateLimiter};
use crate::templates;

/// Shortest accepted sweep interval.
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Days a decided approval is kept before being pruned.
pub const DECIDED_RETENTION_DAYS: i64 = 30;

/// Messages that can be sent to the sweeper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweeperMessage {
    /// Run a sweep immediately.
    SweepNow,
    /// Stop the sweeper.
    Shutdown,
}

/// Periodically revokes expired subscriptions.
pub struct ExpirySweeper {
    gateway: Arc<dyn ChatGateway>,
    store: SubscriptionStore,
    channel_id: i64,
    stats: Arc<RwLock<SweeperStats>>,
    limiter: RateLimiter,
    sweep_interval: Duration,
}

impl ExpirySweeper {
    /// Creates a sweeper for `channel_id` running every `sweep_interval`,
    /// raised to at least [`MIN_SWEEP_INTERVAL`].
    #[must_use]
    pub fn new(
        gateway: Arc<dyn ChatGateway>,
        store: SubscriptionStore,
        channel_id: i64,
        sweep_interval: Duration,
    ) -> Self {
        Self {
            gateway,
            store,
            channel_id,
            stats: Arc::new(RwLock::new(SweeperStats::new())),
            limiter: RateLimiter::new(Duration::ZERO),
            sweep_interval: sweep_interval.max(MIN_SWEEP_INTERVAL),
        }
    }

    /// Sets the minimum spacing between two kicks.
    #[must_use]
    pub fn with_kick_interval(mut self, kick_interval: Duration) -> Self {
        self.limiter = RateLimiter::new(kick_interval);
        self
    }

    /// Shares statistics with another component.
    #[must_use]
    pub fn with_stats(mut self, stats: Arc<RwLock<SweeperStats>>) -> Self {
        self.stats = stats;
        self
    }

    /// Gets a reference to the shared statistics.
    #[must_use]
    pub fn stats(&self) -> &Arc<RwLock<SweeperStats>> {
        &self.stats
    }

    /// Runs the sweeper loop until shut down.
    ///
    /// The first sweep runs immediately, catching up on anything that
    /// expired while the bot was offline.
    pub async fn run(&self, mut rx: mpsc::Receiver<SweeperMessage>) {
        info!(
            "Expiry sweeper started (interval: {}s)",
            self.sweep_interval.as_secs()
        );

        let mut timer = interval(self.sweep_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    self.tick().await;
                }
                msg = rx.recv() => {
                    match msg {
                        Some(SweeperMessage::SweepNow) => {
                            debug!("Received sweep request");
                            self.tick().await;
                        }
                        Some(SweeperMessage::Shutdown) | None => {
                            info!("Expiry sweeper shutting down");
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Runs one sweep at the current time.
    pub async fn tick(&self) -> SweepReport {
        self.sweep_at(Utc::now()).await
    }

    /// Runs one sweep as if the current time were `now`.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> SweepReport {
        debug!("Checking subscriptions...");

        let report = match self.store.list_all().await {
            Ok(records) => self.sweep_records(&records, now).await,
            Err(e) => {
                error!("Sweep could not list subscriptions: {}", e);
                SweepReport::listing_failed()
            }
        };

        if report.expired > 0 || !report.is_clean() {
            info!(
                "Sweep finished: {} examined, {} expired, {} revoked, {} failed, {} renewed",
                report.examined, report.expired, report.revoked, report.failed, report.superseded
            );
        }

        let cutoff = now - ChronoDuration::days(DECIDED_RETENTION_DAYS);
        if let Err(e) = self.store.prune_decided(cutoff).await {
            warn!("Failed to prune decided approvals: {}", e);
        }

        self.stats.write().await.record(now, report);
        report
    }

    async fn sweep_records(&self, records: &[SubscriptionRecord], now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport {
            examined: records.len(),
            ..SweepReport::default()
        };

        for record in records.iter().filter(|r| r.is_expired(now)) {
            report.expired += 1;

            match self.revoke(record, now).await {
                Ok(Revocation::Revoked) => report.revoked += 1,
                Ok(Revocation::Superseded) => report.superseded += 1,
                Err(e) => {
                    error!("Err kicking {}: {}", record.subscriber_id, e);
                    report.failed += 1;

                    if let Some(seconds) = e.flood_wait() {
                        self.limiter.handle_flood_wait(seconds).await;
                    }
                }
            }
        }

        report
    }

    /// Kicks the member, deletes the record, then notifies them.
    ///
    /// The record is read again after waiting for the limiter, and only
    /// deleted if its expiry is unchanged after the kick.
    async fn revoke(&self, record: &SubscriptionRecord, now: DateTime<Utc>) -> Result<Revocation, RevokeError> {
        let user_id = record.subscriber_id;
        self.limiter.acquire().await;

        let Some(current) = self.store.get(user_id).await?.filter(|r| r.is_expired(now)) else {
            info!("Subscription of {} was renewed, not revoking", user_id);
            return Ok(Revocation::Superseded);
        };

        self.gateway
            .ban_member(self.channel_id, user_id)
            .await
            .map_err(|source| RevokeError::Gateway { step: "ban", source })?;

        self.gateway
            .unban_member(self.channel_id, user_id)
            .await
            .map_err(|source| RevokeError::Gateway { step: "unban", source })?;

        if !self.store.delete_expired(user_id, current.expiry_time).await? {
            warn!(
                "Subscription of {} was renewed during the kick, keeping it",
                user_id
            );
            return Ok(Revocation::Superseded);
        }

        info!("Revoked access of {} (expired {})", user_id, current.expiry_time);

        if let Err(e) = self.gateway.send_message(user_id, templates::EXPIRED).await {
            warn!("Failed to notify {} of expiry: {}", user_id, e);
        }

        Ok(Revocation::Revoked)
    }
}

/// What happened to an expired record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Revocation {
    Revoked,
    Superseded,
}

/// Why a single record could not be revoked.
#[derive(Debug, Error)]
enum RevokeError {
    #[error("{step} failed: {source}")]
    Gateway {
        step: &'static str,
        source: GatewayError,
    },

    #[error("store failed: {0}")]
    Store(#[from] StoreError),
}

impl RevokeError {
    const fn flood_wait(&self) -> Option<u32> {
        match self {
            Self::Gateway {
                source: GatewayError::FloodWait(seconds),
                ..
            } => Some(*seconds),
            _ => None,
        }
    }
}

impl std::fmt::Debug for ExpirySweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpirySweeper")
            .field("channel_id", &self.channel_id)
            .field("sweep_interval", &self.sweep_interval)
            .finish_non_exhaustive()
    }
}
