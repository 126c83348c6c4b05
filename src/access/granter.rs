//! Grants channel access after an approved payment.
//!
//! The grant is ordered so that a stored record always corresponds to a
//! delivered invite:
//! 1. Create a single-use invite (nothing written yet)
//! 2. Upsert the subscription, remembering the record it replaces
//! 3. Deliver the invite to the subscriber
//!
//! A failure in step 2 or 3 revokes the invite and, for step 3, restores
//! the previous record.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::store::{StoreError, SubscriptionRecord, SubscriptionStore};
use crate::telegram::{ChatGateway, GatewayError};
use crate::templates;

/// Errors that abort a grant.
#[derive(Debug, Error)]
pub enum GrantError {
    #[error("Could not create invite link (is the bot an admin of the channel?): {0}")]
    Invite(GatewayError),

    #[error("Could not save the subscription: {0}")]
    Store(#[from] StoreError),

    #[error("Could not deliver the invite to the subscriber: {0}")]
    Delivery(GatewayError),
}

/// A completed grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grant {
    /// The stored subscription.
    pub record: SubscriptionRecord,

    /// The invite link delivered to the subscriber.
    pub invite_link: String,
}

/// Issues invites and records subscriptions.
pub struct AccessGranter {
    gateway: Arc<dyn ChatGateway>,
    store: SubscriptionStore,
    channel_id: i64,
    duration: Duration,
}

impl AccessGranter {
    /// Creates a granter for `channel_id` selling periods of `duration`.
    #[must_use]
    pub fn new(
        gateway: Arc<dyn ChatGateway>,
        store: SubscriptionStore,
        channel_id: i64,
        duration: Duration,
    ) -> Self {
        Self {
            gateway,
            store,
            channel_id,
            duration,
        }
    }

    /// Length of one subscription period.
    #[must_use]
    pub const fn duration(&self) -> Duration {
        self.duration
    }

    /// Grants access to `subscriber_id` starting at `now`.
    pub async fn grant(
        &self,
        subscriber_id: i64,
        display_name: &str,
        now: DateTime<Utc>,
    ) -> Result<Grant, GrantError> {
        let invite_link = self
            .gateway
            .create_invite(self.channel_id, &invite_name(subscriber_id))
            .await
            .map_err(GrantError::Invite)?;

        let record = SubscriptionRecord::starting_at(subscriber_id, display_name, now, self.duration);

        let previous = match self.store.get(subscriber_id).await {
            Ok(previous) => previous,
            Err(e) => {
                self.revoke_quietly(&invite_link).await;
                return Err(e.into());
            }
        };

        if let Err(e) = self.store.upsert(&record).await {
            self.revoke_quietly(&invite_link).await;
            return Err(e.into());
        }

        let text = templates::access_granted(&invite_link, record.expiry_time);
        if let Err(e) = self.gateway.send_message(subscriber_id, &text).await {
            error!("Failed to deliver invite to {}: {}", subscriber_id, e);
            self.restore(subscriber_id, previous.as_ref()).await;
            self.revoke_quietly(&invite_link).await;
            return Err(GrantError::Delivery(e));
        }

        info!(
            "Granted access to {} until {}",
            subscriber_id, record.expiry_time
        );

        Ok(Grant {
            record,
            invite_link,
        })
    }

    /// Puts the store back the way it was before a failed grant.
    async fn restore(&self, subscriber_id: i64, previous: Option<&SubscriptionRecord>) {
        let result = match previous {
            Some(previous) => self.store.upsert(previous).await,
            None => self.store.delete(subscriber_id).await.map(|_| ()),
        };

        if let Err(e) = result {
            error!(
                "Failed to roll back subscription of {}: {}",
                subscriber_id, e
            );
        }
    }

    async fn revoke_quietly(&self, invite_link: &str) {
        if let Err(e) = self.gateway.revoke_invite(self.channel_id, invite_link).await {
            warn!("Failed to revoke unused invite: {}", e);
        }
    }
}

impl std::fmt::Debug for AccessGranter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessGranter")
            .field("channel_id", &self.channel_id)
            .field("duration", &self.duration)
            .finish_non_exhaustive()
    }
}

/// Name attached to the invite link, visible to channel admins.
fn invite_name(subscriber_id: i64) -> String {
    format!("Sub_{subscriber_id}")
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::telegram::recording::{FailOn, GatewayCall, RecordingGateway};

    const CHANNEL: i64 = -100_500;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap()
    }

    async fn setup() -> (Arc<RecordingGateway>, SubscriptionStore, AccessGranter) {
        let gateway = Arc::new(RecordingGateway::new());
        let store = SubscriptionStore::open_in_memory().await.unwrap();
        let granter = AccessGranter::new(gateway.clone(), store.clone(), CHANNEL, Duration::days(30));
        (gateway, store, granter)
    }

    #[tokio::test]
    async fn test_grant_stores_record_and_delivers_invite() {
        let (gateway, store, granter) = setup().await;

        let grant = granter.grant(11, "Ann", now()).await.unwrap();

        assert_eq!(grant.record.expiry_time, now() + Duration::days(30));
        assert_eq!(store.get(11).await.unwrap(), Some(grant.record.clone()));
        assert_eq!(
            gateway.calls()[0],
            GatewayCall::CreateInvite {
                channel_id: CHANNEL,
                name: "Sub_11".to_owned()
            }
        );

        let delivered = gateway.messages_to(11);
        assert_eq!(delivered.len(), 1);
        assert!(delivered[0].contains(&grant.invite_link));
        assert!(delivered[0].contains("01.07.2025"));
    }

    #[tokio::test]
    async fn test_invite_failure_writes_nothing() {
        let (gateway, store, granter) = setup().await;
        gateway.fail(FailOn::CreateInvite);

        let err = granter.grant(11, "Ann", now()).await.unwrap_err();

        assert!(matches!(err, GrantError::Invite(_)));
        assert_eq!(store.get(11).await.unwrap(), None);
        assert!(gateway.messages_to(11).is_empty());
    }

    #[tokio::test]
    async fn test_delivery_failure_removes_new_record_and_revokes_invite() {
        let (gateway, store, granter) = setup().await;
        gateway.fail(FailOn::SendMessage);

        let err = granter.grant(11, "Ann", now()).await.unwrap_err();

        assert!(matches!(err, GrantError::Delivery(_)));
        assert_eq!(store.get(11).await.unwrap(), None);
        assert!(gateway.calls().iter().any(|c| matches!(
            c,
            GatewayCall::RevokeInvite { invite_link, .. } if invite_link == "https://t.me/+invite1"
        )));
    }

    #[tokio::test]
    async fn test_delivery_failure_restores_previous_record() {
        let (gateway, store, granter) = setup().await;
        let first = granter.grant(11, "Ann", now()).await.unwrap();

        gateway.fail(FailOn::SendMessage);
        let later = now() + Duration::days(10);
        assert!(granter.grant(11, "Ann", later).await.is_err());

        assert_eq!(store.get(11).await.unwrap(), Some(first.record));
    }

    #[tokio::test]
    async fn test_regrant_overwrites() {
        let (_gateway, store, granter) = setup().await;

        granter.grant(11, "Ann", now()).await.unwrap();
        let second = granter
            .grant(11, "Ann", now() + Duration::days(5))
            .await
            .unwrap();

        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(store.get(11).await.unwrap(), Some(second.record));
    }
}
