//! End-to-end subscription lifecycle against a recording gateway.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, TimeZone, Utc};

use channel_access_bot::access::{AccessGranter, ApprovalError, ApprovalWorkflow, ProofSubmission};
use channel_access_bot::commands::CallbackAction;
use channel_access_bot::config::OfferConfig;
use channel_access_bot::scheduler::ExpirySweeper;
use channel_access_bot::store::{ApprovalState, SubscriptionRecord, SubscriptionStatus, SubscriptionStore};
use channel_access_bot::telegram::recording::{FailOn, GatewayCall, RecordingGateway};
use channel_access_bot::templates;

const CHANNEL: i64 = -100_123_456;
const REVIEWER: i64 = 10;
const SUBSCRIBER: i64 = 555;

struct Harness {
    gateway: Arc<RecordingGateway>,
    store: SubscriptionStore,
    workflow: ApprovalWorkflow,
    sweeper: ExpirySweeper,
}

impl Harness {
    async fn new() -> Self {
        Self::with_store(SubscriptionStore::open_in_memory().await.unwrap())
    }

    fn with_store(store: SubscriptionStore) -> Self {
        let gateway = Arc::new(RecordingGateway::new());
        let offer = OfferConfig::example();

        let granter = AccessGranter::new(gateway.clone(), store.clone(), CHANNEL, offer.duration());
        let workflow = ApprovalWorkflow::new(gateway.clone(), store.clone(), granter, REVIEWER);
        let sweeper = ExpirySweeper::new(
            gateway.clone(),
            store.clone(),
            CHANNEL,
            StdDuration::from_secs(3600),
        );

        Self {
            gateway,
            store,
            workflow,
            sweeper,
        }
    }

    async fn submit(&self, at: DateTime<Utc>) -> String {
        let proof = ProofSubmission {
            subscriber_id: SUBSCRIBER,
            display_name: "Maria K".to_owned(),
            username: None,
            photo_file_id: "AgACAgIAAxkBAAIB".to_owned(),
        };
        self.workflow.submit_proof(proof, at).await.unwrap().token
    }

    /// Token carried by the reviewer's approve button in the last forwarded proof.
    fn last_forwarded_token(&self) -> String {
        self.gateway
            .calls()
            .into_iter()
            .rev()
            .find_map(|call| match call {
                GatewayCall::ForwardProof { proof, .. } => Some(proof.token),
                _ => None,
            })
            .unwrap()
    }
}

fn t(month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, month, day, 10, 30, 0).unwrap()
}

#[tokio::test]
async fn approve_then_expire() {
    let h = Harness::new().await;

    h.submit(t(3, 1)).await;

    // The reviewer presses the button that was sent with the proof.
    let payload = CallbackAction::Approve(h.last_forwarded_token()).to_payload();
    let Some(CallbackAction::Approve(token)) = CallbackAction::parse(&payload) else {
        panic!("approve payload did not round-trip");
    };

    let approved_at = t(3, 2);
    let grant = h.workflow.approve(REVIEWER, &token, approved_at).await.unwrap();

    let record = h.store.get(SUBSCRIBER).await.unwrap().unwrap();
    assert_eq!(record.expiry_time, approved_at + Duration::days(30));
    assert_eq!(record, grant.record);
    assert_eq!(
        h.gateway.messages_to(SUBSCRIBER),
        vec![templates::access_granted(&grant.invite_link, record.expiry_time)]
    );
    assert!(h.gateway.calls().contains(&GatewayCall::CreateInvite {
        channel_id: CHANNEL,
        name: format!("Sub_{SUBSCRIBER}"),
    }));

    // Self-check in the middle of the period.
    let status = record.status(t(3, 12));
    assert!(matches!(
        status,
        SubscriptionStatus::Active {
            days_remaining: 20,
            ..
        }
    ));

    // A tick before expiry changes nothing.
    let report = h.sweeper.sweep_at(t(3, 20)).await;
    assert_eq!(report.expired, 0);
    assert!(h.store.get(SUBSCRIBER).await.unwrap().is_some());
    assert_eq!(h.gateway.bans_of(SUBSCRIBER), 0);

    // A tick after expiry kicks and deletes.
    let report = h.sweeper.sweep_at(record.expiry_time + Duration::seconds(1)).await;
    assert_eq!(report.revoked, 1);
    assert_eq!(h.store.get(SUBSCRIBER).await.unwrap(), None);

    let calls = h.gateway.calls();
    let ban = calls
        .iter()
        .position(|c| *c == GatewayCall::Ban { channel_id: CHANNEL, user_id: SUBSCRIBER })
        .unwrap();
    let unban = calls
        .iter()
        .position(|c| *c == GatewayCall::Unban { channel_id: CHANNEL, user_id: SUBSCRIBER })
        .unwrap();
    assert!(ban < unban);
    assert_eq!(
        h.gateway.messages_to(SUBSCRIBER).last().map(String::as_str),
        Some(templates::EXPIRED)
    );
}

#[tokio::test]
async fn decline_never_grants() {
    let h = Harness::new().await;
    let token = h.submit(t(5, 1)).await;

    let declined = h.workflow.decline(REVIEWER, &token, t(5, 1)).await.unwrap();

    assert_eq!(declined.pending.state, ApprovalState::Declined);
    assert_eq!(h.store.get(SUBSCRIBER).await.unwrap(), None);
    assert_eq!(
        h.gateway.messages_to(SUBSCRIBER),
        vec![templates::DECLINED.to_owned()]
    );

    h.sweeper.sweep_at(t(12, 31)).await;
    assert_eq!(h.gateway.bans_of(SUBSCRIBER), 0);
    assert!(
        !h.gateway
            .calls()
            .iter()
            .any(|c| matches!(c, GatewayCall::CreateInvite { .. }))
    );
}

#[tokio::test]
async fn reapproval_replaces_record() {
    let h = Harness::new().await;

    let first = h.submit(t(1, 1)).await;
    h.workflow.approve(REVIEWER, &first, t(1, 1)).await.unwrap();

    let second = h.submit(t(1, 25)).await;
    h.workflow.approve(REVIEWER, &second, t(1, 25)).await.unwrap();

    let all = h.store.list_all().await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].expiry_time, t(1, 25) + Duration::days(30));
}

#[tokio::test]
async fn second_decision_is_rejected() {
    let h = Harness::new().await;
    let token = h.submit(t(2, 1)).await;

    h.workflow.approve(REVIEWER, &token, t(2, 1)).await.unwrap();

    let err = h.workflow.decline(REVIEWER, &token, t(2, 1)).await.unwrap_err();
    assert!(matches!(
        err,
        ApprovalError::AlreadyDecided(ApprovalState::Approved)
    ));
    assert!(h.store.get(SUBSCRIBER).await.unwrap().is_some());

    let unknown = h.workflow.approve(REVIEWER, "doesNotExist", t(2, 1)).await.unwrap_err();
    assert!(matches!(unknown, ApprovalError::UnknownToken));
}

#[tokio::test]
async fn only_reviewer_can_decide() {
    let h = Harness::new().await;
    let token = h.submit(t(2, 3)).await;

    let err = h.workflow.approve(SUBSCRIBER, &token, t(2, 3)).await.unwrap_err();
    assert!(matches!(err, ApprovalError::NotReviewer));
    assert_eq!(h.store.get(SUBSCRIBER).await.unwrap(), None);

    // The proof is untouched, so the reviewer can still decide it.
    h.workflow.approve(REVIEWER, &token, t(2, 3)).await.unwrap();
    assert!(h.store.get(SUBSCRIBER).await.unwrap().is_some());
}

#[tokio::test]
async fn failed_invite_leaves_no_record_and_can_be_retried() {
    let h = Harness::new().await;
    let token = h.submit(t(4, 1)).await;
    h.gateway.fail(FailOn::CreateInvite);

    assert!(h.workflow.approve(REVIEWER, &token, t(4, 1)).await.is_err());
    assert_eq!(h.store.get(SUBSCRIBER).await.unwrap(), None);

    h.gateway.heal(FailOn::CreateInvite);
    h.workflow.approve(REVIEWER, &token, t(4, 2)).await.unwrap();
    assert!(h.store.get(SUBSCRIBER).await.unwrap().is_some());
}

#[tokio::test]
async fn failed_delivery_restores_previous_subscription() {
    let h = Harness::new().await;
    let previous = SubscriptionRecord::starting_at(SUBSCRIBER, "Maria K", t(1, 1), Duration::days(30));
    h.store.upsert(&previous).await.unwrap();

    let token = h.submit(t(1, 20)).await;
    h.gateway.fail(FailOn::SendMessage);

    assert!(h.workflow.approve(REVIEWER, &token, t(1, 20)).await.is_err());

    assert_eq!(h.store.get(SUBSCRIBER).await.unwrap(), Some(previous));
    assert!(
        h.gateway
            .calls()
            .iter()
            .any(|c| matches!(c, GatewayCall::RevokeInvite { channel_id: CHANNEL, .. }))
    );
    assert_eq!(
        h.store.get_pending(&token).await.unwrap().map(|p| p.state),
        Some(ApprovalState::ProofSubmitted)
    );
}

#[tokio::test]
async fn failed_kick_is_retried_on_next_tick() {
    let h = Harness::new().await;
    let token = h.submit(t(6, 1)).await;
    let grant = h.workflow.approve(REVIEWER, &token, t(6, 1)).await.unwrap();
    let after_expiry = grant.record.expiry_time + Duration::hours(1);

    h.gateway.fail(FailOn::Ban);
    let first = h.sweeper.sweep_at(after_expiry).await;
    assert_eq!(first.failed, 1);
    assert!(h.store.get(SUBSCRIBER).await.unwrap().is_some());

    h.gateway.heal(FailOn::Ban);
    let second = h.sweeper.sweep_at(after_expiry + Duration::hours(1)).await;
    assert_eq!(second.revoked, 1);
    assert_eq!(h.store.get(SUBSCRIBER).await.unwrap(), None);
}

#[tokio::test]
async fn subscriptions_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bot_database.db");

    let expiry = {
        let h = Harness::with_store(SubscriptionStore::open(&path).await.unwrap());
        let token = h.submit(t(7, 1)).await;
        let grant = h.workflow.approve(REVIEWER, &token, t(7, 1)).await.unwrap();
        h.store.close().await;
        grant.record.expiry_time
    };

    let reopened = SubscriptionStore::open(&path).await.unwrap();
    let record = reopened.get(SUBSCRIBER).await.unwrap().unwrap();
    assert_eq!(record.expiry_time, expiry);
    assert!(reopened.list_pending().await.unwrap().is_empty());
}
