//! User-facing message texts (HTML parse mode).

use chrono::{DateTime, Utc};
use teloxide::utils::html::escape;

use crate::config::OfferConfig;
use crate::store::{PendingApproval, SubscriptionStatus};

/// Date format used in messages, e.g. `31.12.2025`.
const DATE_FORMAT: &str = "%d.%m.%Y";

/// Formats a timestamp as a calendar date.
pub fn format_date(at: DateTime<Utc>) -> String {
    at.format(DATE_FORMAT).to_string()
}

/// Greeting shown on `/start`.
pub fn welcome(offer: &OfferConfig) -> String {
    format!(
        "👋 Hi! This bot sells access to a private channel.\n\n\
         📅 Subscription period: <b>{} days</b>\n\
         💰 Price: <b>{}</b>",
        offer.duration_days,
        escape(&offer.price_label()),
    )
}

/// Payment instructions shown after "Buy".
pub fn payment_details(offer: &OfferConfig) -> String {
    format!(
        "💳 <b>Payment details:</b>\n\n\
         📱 <b>Phone:</b> <code>{}</code>\n\
         🏦 <b>Bank:</b> {}\n\
         💰 <b>Amount:</b> <code>{}</code>\n\n\
         ⚠️ After the transfer press «I have paid» and send a screenshot of the receipt.",
        escape(&offer.payment.phone),
        escape(&offer.payment.bank),
        escape(&offer.price_label()),
    )
}

/// Prompt after "I have paid".
pub const AWAITING_PROOF: &str = "📸 Send the payment screenshot now...";

/// Confirmation after a proof reached the reviewer.
pub const PROOF_RECEIVED: &str = "✅ Receipt sent for review. Please wait for confirmation.";

/// Shown when the proof could not be forwarded.
pub const PROOF_FAILED: &str = "Could not send the receipt to the reviewer. Please try again later.";

/// Generic failure for persistence errors.
pub const GENERIC_FAILURE: &str = "Something went wrong. Please try again later.";

/// Sent to a subscriber whose proof was declined.
pub const DECLINED: &str = "❌ Payment was not confirmed. Please contact the administrator.";

/// Sent to a subscriber whose access was revoked.
pub const EXPIRED: &str = "Your subscription has expired.";

/// Sent to a subscriber together with their invite.
pub fn access_granted(invite_link: &str, expiry: DateTime<Utc>) -> String {
    format!(
        "✅ <b>Payment accepted!</b>\n\n\
         Your invite link: {}\n\
         Valid until: {}",
        escape(invite_link),
        format_date(expiry),
    )
}

/// Caption of the proof photo sent to the reviewer.
pub fn proof_caption(pending: &PendingApproval) -> String {
    let username = pending
        .username
        .as_deref()
        .map(|u| format!(" (@{})", escape(u)))
        .unwrap_or_default();

    format!(
        "💰 <b>New payment!</b>\n\
         👤 User: {}{}\n\
         🆔 ID: <code>{}</code>",
        escape(&pending.display_name),
        username,
        pending.subscriber_id,
    )
}

/// Short self-check answer, suitable for a callback alert.
pub fn status_alert(status: &SubscriptionStatus) -> String {
    match status {
        SubscriptionStatus::Active { days_remaining, .. } => {
            format!("Subscription active! Days left: {days_remaining}")
        }
        SubscriptionStatus::Expired { .. } => "Subscription expired.".to_owned(),
        SubscriptionStatus::None => "No active subscription.".to_owned(),
    }
}

/// Longer self-check answer for `/status`.
pub fn status_message(status: &SubscriptionStatus) -> String {
    match status {
        SubscriptionStatus::Active {
            expires_at,
            days_remaining,
        } => format!(
            "✅ Subscription active until {} ({} days left).",
            format_date(*expires_at),
            days_remaining
        ),
        SubscriptionStatus::Expired { expired_at } => format!(
            "⌛ Subscription expired on {}.",
            format_date(*expired_at)
        ),
        SubscriptionStatus::None => "You have no active subscription.".to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::store::ApprovalState;

    #[test]
    fn test_format_date() {
        let at = Utc.with_ymd_and_hms(2025, 1, 9, 23, 59, 0).unwrap();
        assert_eq!(format_date(at), "09.01.2025");
    }

    #[test]
    fn test_proof_caption_escapes_names() {
        let pending = PendingApproval {
            token: "t".to_owned(),
            subscriber_id: 77,
            display_name: "<script>".to_owned(),
            username: Some("bob".to_owned()),
            photo_file_id: "f".to_owned(),
            state: ApprovalState::ProofSubmitted,
            submitted_at: Utc::now(),
            decided_at: None,
        };
        let caption = proof_caption(&pending);
        assert!(caption.contains("&lt;script&gt;"));
        assert!(caption.contains("(@bob)"));
        assert!(caption.contains("<code>77</code>"));
    }

    #[test]
    fn test_status_texts() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let active = SubscriptionStatus::Active {
            expires_at: now + Duration::days(3),
            days_remaining: 3,
        };
        assert_eq!(status_alert(&active), "Subscription active! Days left: 3");
        assert!(status_message(&active).contains("04.01.2025"));
        assert_eq!(status_alert(&SubscriptionStatus::None), "No active subscription.");
    }
}
