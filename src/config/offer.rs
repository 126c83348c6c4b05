//! Offer configuration: what is sold, for how long, and how to pay.

use std::path::Path;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::MAX_DURATION_DAYS;

/// Errors that can occur while loading or validating an offer.
#[derive(Debug, Error)]
pub enum OfferError {
    #[error("Price must be greater than zero")]
    ZeroPrice,

    #[error("Subscription duration must be between 1 and {max} days, got {days}")]
    InvalidDuration { days: u32, max: u32 },

    #[error("Payment field '{field}' is empty")]
    EmptyPaymentField { field: &'static str },

    #[error("Currency must not be empty")]
    EmptyCurrency,

    #[error("Failed to read offer file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse offer file: {0}")]
    ParseError(#[from] serde_json::Error),
}

/// Payment details shown to a subscriber before they send proof.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaymentDetails {
    /// Phone number for instant transfers.
    pub phone: String,

    /// Bank name shown next to the phone number.
    pub bank: String,
}

/// The subscription offer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OfferConfig {
    /// Price of one subscription period.
    pub price: u32,

    /// Currency label displayed with the price.
    #[serde(default = "default_currency")]
    pub currency: String,

    /// Length of one subscription period in days.
    pub duration_days: u32,

    /// Where to send the money.
    pub payment: PaymentDetails,
}

fn default_currency() -> String {
    "RUB".to_owned()
}

impl OfferConfig {
    /// Loads an offer from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, OfferError> {
        let content = std::fs::read_to_string(path)?;
        let offer: Self = serde_json::from_str(&content)?;
        Ok(offer)
    }

    /// Saves the offer to a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), OfferError> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validates the offer.
    ///
    /// # Errors
    ///
    /// Returns the first validation error encountered.
    pub fn validate(&self) -> Result<(), OfferError> {
        self.validate_all().into_iter().next().map_or(Ok(()), Err)
    }

    /// Returns every validation problem found in the offer.
    #[must_use]
    pub fn validate_all(&self) -> Vec<OfferError> {
        let mut errors = Vec::new();

        if self.price == 0 {
            errors.push(OfferError::ZeroPrice);
        }

        if self.duration_days == 0 || self.duration_days > MAX_DURATION_DAYS {
            errors.push(OfferError::InvalidDuration {
                days: self.duration_days,
                max: MAX_DURATION_DAYS,
            });
        }

        if self.currency.trim().is_empty() {
            errors.push(OfferError::EmptyCurrency);
        }

        if self.payment.phone.trim().is_empty() {
            errors.push(OfferError::EmptyPaymentField { field: "phone" });
        }

        if self.payment.bank.trim().is_empty() {
            errors.push(OfferError::EmptyPaymentField { field: "bank" });
        }

        errors
    }

    /// Returns the subscription period as a duration.
    #[must_use]
    pub fn duration(&self) -> Duration {
        Duration::days(i64::from(self.duration_days))
    }

    /// Formats the price with its currency, e.g. `"500 RUB"`.
    #[must_use]
    pub fn price_label(&self) -> String {
        format!("{} {}", self.price, self.currency)
    }

    /// Creates an example offer for users to reference.
    #[must_use]
    pub fn example() -> Self {
        Self {
            price: 500,
            currency: default_currency(),
            duration_days: 30,
            payment: PaymentDetails {
                phone: "+7 900 000-00-00".to_owned(),
                bank: "Example Bank".to_owned(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_example_is_valid() {
        assert!(OfferConfig::example().validate().is_ok());
    }

    #[test]
    fn test_zero_price_rejected() {
        let offer = OfferConfig {
            price: 0,
            ..OfferConfig::example()
        };
        assert!(matches!(offer.validate(), Err(OfferError::ZeroPrice)));
    }

    #[test]
    fn test_duration_bounds() {
        let zero = OfferConfig {
            duration_days: 0,
            ..OfferConfig::example()
        };
        assert!(matches!(
            zero.validate(),
            Err(OfferError::InvalidDuration { days: 0, .. })
        ));

        let huge = OfferConfig {
            duration_days: MAX_DURATION_DAYS + 1,
            ..OfferConfig::example()
        };
        assert!(huge.validate().is_err());
    }

    #[test]
    fn test_validate_all_collects_every_problem() {
        let offer = OfferConfig {
            price: 0,
            currency: " ".to_owned(),
            duration_days: 30,
            payment: PaymentDetails {
                phone: String::new(),
                bank: String::new(),
            },
        };
        assert_eq!(offer.validate_all().len(), 4);
    }

    #[test]
    fn test_currency_defaults_when_missing() {
        let json = r#"{
            "price": 300,
            "duration_days": 7,
            "payment": { "phone": "+100", "bank": "Bank" }
        }"#;
        let offer: OfferConfig = serde_json::from_str(json).unwrap();
        assert_eq!(offer.currency, "RUB");
        assert_eq!(offer.price_label(), "300 RUB");
        assert_eq!(offer.duration(), Duration::days(7));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("offer.json");
        let offer = OfferConfig::example();
        offer.save_to_file(&path).unwrap();
        assert_eq!(OfferConfig::load_from_file(&path).unwrap(), offer);
    }
}
