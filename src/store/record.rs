//! Records persisted by the store.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// One subscriber's access period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct SubscriptionRecord {
    /// Telegram user id of the subscriber.
    pub subscriber_id: i64,

    /// Informational name, not used for any decision.
    pub display_name: String,

    /// When the reviewer approved the payment.
    pub start_time: DateTime<Utc>,

    /// After this instant access must be revoked.
    pub expiry_time: DateTime<Utc>,
}

impl SubscriptionRecord {
    /// Creates a record starting at `start` and lasting `duration`.
    #[must_use]
    pub fn starting_at(
        subscriber_id: i64,
        display_name: impl Into<String>,
        start: DateTime<Utc>,
        duration: Duration,
    ) -> Self {
        Self {
            subscriber_id,
            display_name: display_name.into(),
            start_time: start,
            expiry_time: start + duration,
        }
    }

    /// A record is expired strictly after its expiry time.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expiry_time
    }

    /// Self-check view of this record at `now`.
    #[must_use]
    pub fn status(&self, now: DateTime<Utc>) -> SubscriptionStatus {
        if self.is_expired(now) {
            SubscriptionStatus::Expired {
                expired_at: self.expiry_time,
            }
        } else {
            SubscriptionStatus::Active {
                expires_at: self.expiry_time,
                days_remaining: (self.expiry_time - now).num_days(),
            }
        }
    }
}

/// What a subscriber sees when checking their subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionStatus {
    /// Access is valid; `days_remaining` counts whole days left.
    Active {
        expires_at: DateTime<Utc>,
        days_remaining: i64,
    },
    /// The record exists but has not been swept yet.
    Expired { expired_at: DateTime<Utc> },
    /// No record for this subscriber.
    None,
}

impl SubscriptionStatus {
    /// Resolves the status for an optional record.
    #[must_use]
    pub fn of(record: Option<&SubscriptionRecord>, now: DateTime<Utc>) -> Self {
        record.map_or(Self::None, |r| r.status(now))
    }

    /// Whether access is currently valid.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Active { .. })
    }
}

/// Lifecycle of a payment proof.
///
/// `AwaitingPayment → ProofSubmitted → {Approved, Declined}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalState {
    AwaitingPayment,
    ProofSubmitted,
    Approved,
    Declined,
}

impl ApprovalState {
    /// Whether moving from `self` to `next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::AwaitingPayment, Self::ProofSubmitted)
                | (Self::ProofSubmitted, Self::Approved | Self::Declined)
        )
    }

    /// Approved and declined proofs accept no further decisions.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Approved | Self::Declined)
    }

    /// Column value used in the database.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AwaitingPayment => "awaiting_payment",
            Self::ProofSubmitted => "proof_submitted",
            Self::Approved => "approved",
            Self::Declined => "declined",
        }
    }
}

impl fmt::Display for ApprovalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApprovalState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "awaiting_payment" => Ok(Self::AwaitingPayment),
            "proof_submitted" => Ok(Self::ProofSubmitted),
            "approved" => Ok(Self::Approved),
            "declined" => Ok(Self::Declined),
            other => Err(format!("unknown approval state '{other}'")),
        }
    }
}

/// A payment proof waiting for (or having received) a reviewer decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingApproval {
    /// Random token carried in the decision buttons.
    pub token: String,

    /// Subscriber who submitted the proof.
    pub subscriber_id: i64,

    /// Subscriber's display name at submission time.
    pub display_name: String,

    /// Subscriber's `@username`, if they have one.
    pub username: Option<String>,

    /// Telegram file id of the proof photo.
    pub photo_file_id: String,

    /// Current lifecycle state.
    pub state: ApprovalState,

    /// When the proof was submitted.
    pub submitted_at: DateTime<Utc>,

    /// When the reviewer decided.
    pub decided_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, day, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_starting_at_adds_duration() {
        let record = SubscriptionRecord::starting_at(7, "Ann", at(1, 12), Duration::days(30));
        assert_eq!(record.expiry_time, at(31, 12));
    }

    #[test]
    fn test_status_counts_whole_days() {
        let record = SubscriptionRecord::starting_at(7, "Ann", at(1, 0), Duration::days(5));
        assert_eq!(
            record.status(at(1, 0)),
            SubscriptionStatus::Active {
                expires_at: at(6, 0),
                days_remaining: 5
            }
        );
        assert_eq!(
            record.status(at(3, 12)),
            SubscriptionStatus::Active {
                expires_at: at(6, 0),
                days_remaining: 2
            }
        );
    }

    #[test]
    fn test_status_boundary_is_still_active() {
        let record = SubscriptionRecord::starting_at(7, "Ann", at(1, 0), Duration::days(5));
        let boundary = record.expiry_time;

        assert!(!record.is_expired(boundary));
        assert_eq!(
            record.status(boundary),
            SubscriptionStatus::Active {
                expires_at: boundary,
                days_remaining: 0
            }
        );

        let just_after = boundary + Duration::seconds(1);
        assert!(record.is_expired(just_after));
        assert_eq!(
            record.status(just_after),
            SubscriptionStatus::Expired {
                expired_at: boundary
            }
        );
    }

    #[test]
    fn test_status_without_record() {
        assert_eq!(SubscriptionStatus::of(None, at(1, 0)), SubscriptionStatus::None);
        assert!(!SubscriptionStatus::None.is_active());
    }

    #[test]
    fn test_approval_transitions() {
        use ApprovalState::*;

        assert!(AwaitingPayment.can_transition_to(ProofSubmitted));
        assert!(ProofSubmitted.can_transition_to(Approved));
        assert!(ProofSubmitted.can_transition_to(Declined));

        assert!(!AwaitingPayment.can_transition_to(Approved));
        assert!(!Approved.can_transition_to(Declined));
        assert!(!Declined.can_transition_to(Approved));
        assert!(Approved.is_terminal() && Declined.is_terminal());
    }

    #[test]
    fn test_approval_state_round_trips_through_column_value() {
        for state in [
            ApprovalState::AwaitingPayment,
            ApprovalState::ProofSubmitted,
            ApprovalState::Approved,
            ApprovalState::Declined,
        ] {
            assert_eq!(state.as_str().parse::<ApprovalState>(), Ok(state));
        }
        assert!("pending".parse::<ApprovalState>().is_err());
    }
}
