//! Common types for Recoup

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for workspaces
pub type WorkspaceId = Uuid;

/// Unique identifier for dunning configurations
pub type ConfigurationId = Uuid;

/// Unique identifier for dunning campaigns
pub type CampaignId = Uuid;

/// Unique identifier for dunning attempts
pub type AttemptId = Uuid;

/// Unique identifier for subscriptions
pub type SubscriptionId = Uuid;

/// Unique identifier for payments
pub type PaymentId = Uuid;

/// Unique identifier for customers
pub type CustomerId = Uuid;

/// Unique identifier for prices
pub type PriceId = Uuid;

/// Unique identifier for email templates
pub type EmailTemplateId = Uuid;

/// Timestamp wrapper
pub type Timestamp = DateTime<Utc>;

/// Implements `Display` and `FromStr` over the snake_case wire names.
macro_rules! string_enum {
    ($ty:ident, $what:literal, { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl $ty {
            /// Wire name of the variant
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $name),+
                }
            }
        }

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $ty {
            type Err = crate::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name => Ok($ty::$variant),)+
                    other => Err(crate::Error::Validation(format!(
                        concat!("Invalid ", $what, ": {}"),
                        other
                    ))),
                }
            }
        }
    };
}

/// Action executed as part of a dunning attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    RetryPayment,
    Email,
}

string_enum!(ActionKind, "action", {
    RetryPayment => "retry_payment",
    Email => "email",
});

/// Terminal side effect when a campaign exhausts its retries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalAction {
    Cancel,
    Pause,
    Downgrade,
}

string_enum!(FinalAction, "final action", {
    Cancel => "cancel",
    Pause => "pause",
    Downgrade => "downgrade",
});

/// Campaign status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Active,
    Paused,
    Recovered,
    Failed,
}

string_enum!(CampaignStatus, "campaign status", {
    Active => "active",
    Paused => "paused",
    Recovered => "recovered",
    Failed => "failed",
});

impl CampaignStatus {
    /// Open campaigns block the creation of another campaign for the same subscription
    pub fn is_open(&self) -> bool {
        matches!(self, CampaignStatus::Active | CampaignStatus::Paused)
    }

    /// Terminal statuses never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(self, CampaignStatus::Recovered | CampaignStatus::Failed)
    }
}

/// Attempt status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Pending,
    Success,
    Failed,
}

string_enum!(AttemptStatus, "attempt status", {
    Pending => "pending",
    Success => "success",
    Failed => "failed",
});

/// What kind of work an attempt performed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptType {
    /// The attempt retried the payment (possibly alongside notifications)
    Payment,
    /// The attempt only sent notifications
    Notification,
}

string_enum!(AttemptType, "attempt type", {
    Payment => "payment",
    Notification => "notification",
});

/// Informational classification of a customer's payment history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    NewCustomer,
    Premium,
    Standard,
    Cautious,
    HighRisk,
}

string_enum!(Strategy, "strategy", {
    NewCustomer => "new_customer",
    Premium => "premium",
    Standard => "standard",
    Cautious => "cautious",
    HighRisk => "high_risk",
});

/// Outcome recorded on a billing event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Success,
    Failed,
}

string_enum!(EventStatus, "event status", {
    Success => "success",
    Failed => "failed",
});

/// Email template types used by dunning notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailTemplateType {
    PaymentFailed,
    PaymentRetry,
    FinalNotice,
}

string_enum!(EmailTemplateType, "email template type", {
    PaymentFailed => "payment_failed",
    PaymentRetry => "payment_retry",
    FinalNotice => "final_notice",
});

impl EmailTemplateType {
    /// Template type for a given attempt of a campaign
    pub fn for_attempt(attempt_number: i32, max_attempts: i32) -> Self {
        if attempt_number <= 1 {
            EmailTemplateType::PaymentFailed
        } else if attempt_number >= max_attempts {
            EmailTemplateType::FinalNotice
        } else {
            EmailTemplateType::PaymentRetry
        }
    }
}

/// Email address
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmailAddress {
    pub local: String,
    pub domain: String,
}

impl EmailAddress {
    /// Create a new email address
    pub fn new(local: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            local: local.into(),
            domain: domain.into(),
        }
    }

    /// Parse an email address from a string
    pub fn parse(s: &str) -> Option<Self> {
        let (local, domain) = s.trim().split_once('@')?;
        if local.is_empty() || domain.is_empty() || domain.contains('@') {
            return None;
        }
        Some(Self::new(local, domain))
    }
}

impl std::fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.local, self.domain)
    }
}

impl std::str::FromStr for EmailAddress {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| crate::Error::Validation("Invalid email address".to_string()))
    }
}

/// Format an amount in minor units for humans, e.g. `1999` `usd` -> `19.99 USD`
pub fn format_amount(amount_cents: i64, currency: &str) -> String {
    let sign = if amount_cents < 0 { "-" } else { "" };
    let abs = amount_cents.unsigned_abs();
    format!(
        "{}{}.{:02} {}",
        sign,
        abs / 100,
        abs % 100,
        currency.to_uppercase()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_email_address_parse() {
        let email = EmailAddress::parse("user@example.com").unwrap();
        assert_eq!(email.local, "user");
        assert_eq!(email.domain, "example.com");
        assert_eq!(email.to_string(), "user@example.com");
    }

    #[test]
    fn test_email_address_invalid() {
        assert!(EmailAddress::parse("invalid").is_none());
        assert!(EmailAddress::parse("@example.com").is_none());
        assert!(EmailAddress::parse("user@").is_none());
        assert!(EmailAddress::parse("a@b@c").is_none());
    }

    #[test]
    fn test_action_kind_round_trip() {
        assert_eq!(ActionKind::RetryPayment.to_string(), "retry_payment");
        assert_eq!("email".parse::<ActionKind>().unwrap(), ActionKind::Email);
        assert!("sms".parse::<ActionKind>().is_err());

        let json = serde_json::to_string(&ActionKind::RetryPayment).unwrap();
        assert_eq!(json, "\"retry_payment\"");
    }

    #[test]
    fn test_final_action_rejects_unknown() {
        assert_eq!("cancel".parse::<FinalAction>().unwrap(), FinalAction::Cancel);
        assert!("delete".parse::<FinalAction>().is_err());
        assert!(serde_json::from_str::<FinalAction>("\"delete\"").is_err());
    }

    #[test]
    fn test_campaign_status_open() {
        assert!(CampaignStatus::Active.is_open());
        assert!(CampaignStatus::Paused.is_open());
        assert!(!CampaignStatus::Recovered.is_open());
        assert!(CampaignStatus::Failed.is_terminal());
    }

    #[test]
    fn test_template_type_for_attempt() {
        assert_eq!(EmailTemplateType::for_attempt(1, 4), EmailTemplateType::PaymentFailed);
        assert_eq!(EmailTemplateType::for_attempt(2, 4), EmailTemplateType::PaymentRetry);
        assert_eq!(EmailTemplateType::for_attempt(4, 4), EmailTemplateType::FinalNotice);
    }

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(1999, "usd"), "19.99 USD");
        assert_eq!(format_amount(5, "EUR"), "0.05 EUR");
        assert_eq!(format_amount(-250, "gbp"), "-2.50 GBP");
    }
}
