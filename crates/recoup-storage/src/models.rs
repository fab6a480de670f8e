//! Database models

use chrono::{DateTime, Utc};
use recoup_common::types::{
    ActionKind, AttemptId, AttemptStatus, AttemptType, CampaignId, CampaignStatus,
    ConfigurationId, CustomerId, EmailTemplateId, EmailTemplateType, EventStatus, FinalAction,
    PaymentId, PriceId, Strategy, SubscriptionId, WorkspaceId,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current version of the configuration document schema
pub const CONFIGURATION_SCHEMA_VERSION: i32 = 1;

// ============================================================================
// Dunning configuration
// ============================================================================

/// Actions configured for one attempt number
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptActions {
    /// One-based attempt number the entry applies to
    pub attempt: i32,
    pub actions: Vec<ActionKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_template_id: Option<EmailTemplateId>,
}

/// Per-workspace retry policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DunningConfiguration {
    pub id: ConfigurationId,
    pub workspace_id: WorkspaceId,
    pub name: String,
    pub max_retry_attempts: i32,
    /// Days to wait after attempt `n` (one-based) is at index `n - 1`
    pub retry_interval_days: Vec<i32>,
    pub attempt_actions: Vec<AttemptActions>,
    pub final_action: FinalAction,
    pub final_action_config: serde_json::Value,
    pub grace_period_hours: i32,
    pub is_default: bool,
    pub is_active: bool,
    pub schema_version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Create configuration input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateConfiguration {
    pub workspace_id: WorkspaceId,
    pub name: String,
    pub max_retry_attempts: i32,
    pub retry_interval_days: Vec<i32>,
    #[serde(default)]
    pub attempt_actions: Vec<AttemptActions>,
    pub final_action: FinalAction,
    #[serde(default = "empty_object")]
    pub final_action_config: serde_json::Value,
    pub grace_period_hours: i32,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn empty_object() -> serde_json::Value {
    serde_json::json!({})
}

fn default_true() -> bool {
    true
}

// ============================================================================
// Dunning campaign
// ============================================================================

/// What a campaign is trying to recover
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum CampaignTarget {
    Subscription(SubscriptionId),
    Payment(PaymentId),
}

impl CampaignTarget {
    pub fn subscription_id(&self) -> Option<SubscriptionId> {
        match self {
            CampaignTarget::Subscription(id) => Some(*id),
            CampaignTarget::Payment(_) => None,
        }
    }

    pub fn payment_id(&self) -> Option<PaymentId> {
        match self {
            CampaignTarget::Payment(id) => Some(*id),
            CampaignTarget::Subscription(_) => None,
        }
    }

    /// Rebuild a target from its two storage columns; exactly one must be set
    pub fn from_columns(
        subscription_id: Option<SubscriptionId>,
        payment_id: Option<PaymentId>,
    ) -> Option<Self> {
        match (subscription_id, payment_id) {
            (Some(id), None) => Some(CampaignTarget::Subscription(id)),
            (None, Some(id)) => Some(CampaignTarget::Payment(id)),
            _ => None,
        }
    }
}

impl std::fmt::Display for CampaignTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CampaignTarget::Subscription(id) => write!(f, "subscription {}", id),
            CampaignTarget::Payment(id) => write!(f, "payment {}", id),
        }
    }
}

/// Dunning campaign model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DunningCampaign {
    pub id: CampaignId,
    pub workspace_id: WorkspaceId,
    pub configuration_id: ConfigurationId,
    pub target: CampaignTarget,
    pub customer_id: CustomerId,
    pub status: CampaignStatus,
    pub current_attempt: i32,
    pub max_retry_attempts: i32,
    pub original_amount_cents: i64,
    pub recovered_amount_cents: i64,
    pub currency: String,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub last_retry_at: Option<DateTime<Utc>>,
    pub final_action_taken: Option<FinalAction>,
    pub strategy: Option<Strategy>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl DunningCampaign {
    /// Amount still owed
    pub fn outstanding_amount_cents(&self) -> i64 {
        (self.original_amount_cents - self.recovered_amount_cents).max(0)
    }

    /// Number of the attempt the engine runs next
    pub fn next_attempt_number(&self) -> i32 {
        self.current_attempt + 1
    }

    /// Whether the campaign should be picked up at `now`
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == CampaignStatus::Active
            && self.next_retry_at.map(|at| at <= now).unwrap_or(false)
    }
}

/// Campaign joined with the customer's contact details
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignDetail {
    #[serde(flatten)]
    pub campaign: DunningCampaign,
    pub customer_name: Option<String>,
    pub customer_email: String,
}

/// Insert input for a campaign
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCampaign {
    pub workspace_id: WorkspaceId,
    pub configuration_id: ConfigurationId,
    pub target: CampaignTarget,
    pub customer_id: CustomerId,
    pub max_retry_attempts: i32,
    pub original_amount_cents: i64,
    pub currency: String,
    pub next_retry_at: DateTime<Utc>,
    pub strategy: Option<Strategy>,
    pub created_at: DateTime<Utc>,
}

/// Progress recorded after a failed attempt with retries remaining
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignProgress {
    pub current_attempt: i32,
    pub last_retry_at: DateTime<Utc>,
    pub next_retry_at: DateTime<Utc>,
}

/// Campaign counts by status for a workspace
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignCounts {
    pub active: i64,
    pub paused: i64,
    pub recovered: i64,
    pub failed: i64,
    pub recovered_amount_cents: i64,
}

impl CampaignCounts {
    pub fn total(&self) -> i64 {
        self.active + self.paused + self.recovered + self.failed
    }

    /// Share of finished campaigns that were recovered
    pub fn recovery_rate(&self) -> f64 {
        let finished = self.recovered + self.failed;
        if finished == 0 {
            0.0
        } else {
            self.recovered as f64 / finished as f64
        }
    }
}

// ============================================================================
// Dunning attempt
// ============================================================================

/// Dunning attempt model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DunningAttempt {
    pub id: AttemptId,
    pub campaign_id: CampaignId,
    pub attempt_number: i32,
    pub attempt_type: AttemptType,
    pub status: AttemptStatus,
    pub payment_error: Option<String>,
    pub transaction_reference: Option<String>,
    pub email_template_id: Option<EmailTemplateId>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Insert input for an attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAttempt {
    pub campaign_id: CampaignId,
    pub attempt_number: i32,
    pub attempt_type: AttemptType,
    pub email_template_id: Option<EmailTemplateId>,
    pub created_at: DateTime<Utc>,
}

/// Terminal state written to an attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptCompletion {
    pub status: AttemptStatus,
    pub payment_error: Option<String>,
    pub transaction_reference: Option<String>,
    pub completed_at: DateTime<Utc>,
}

// ============================================================================
// Billing read models
// ============================================================================

/// Subscription status value set when the final action cancels it
pub const SUBSCRIPTION_CANCELLED: &str = "cancelled";

/// Subscription model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub workspace_id: WorkspaceId,
    pub customer_id: CustomerId,
    pub price_id: PriceId,
    pub status: String,
    pub current_period_end: DateTime<Utc>,
    pub cancel_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Customer model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub id: CustomerId,
    pub workspace_id: WorkspaceId,
    pub name: Option<String>,
    pub email: String,
}

/// Price model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Price {
    pub id: PriceId,
    pub workspace_id: WorkspaceId,
    pub amount_cents: i64,
    pub currency: String,
}

/// One-off payment model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub workspace_id: WorkspaceId,
    pub customer_id: CustomerId,
    pub subscription_id: Option<SubscriptionId>,
    pub amount_cents: i64,
    pub currency: String,
    pub status: EventStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Billing event recorded against a subscription
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionEvent {
    pub id: Uuid,
    pub workspace_id: WorkspaceId,
    pub subscription_id: SubscriptionId,
    pub payment_id: Option<PaymentId>,
    pub status: EventStatus,
    pub amount_cents: i64,
    pub currency: String,
    pub error_message: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Insert input for a subscription event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSubscriptionEvent {
    pub workspace_id: WorkspaceId,
    pub subscription_id: SubscriptionId,
    pub payment_id: Option<PaymentId>,
    pub status: EventStatus,
    pub amount_cents: i64,
    pub currency: String,
    pub error_message: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Success and failure counts for a subscription's history
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventCounts {
    pub successes: i64,
    pub failures: i64,
}

impl EventCounts {
    pub fn total(&self) -> i64 {
        self.successes + self.failures
    }
}

/// Audit entry for a subscription state change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateChange {
    pub id: Uuid,
    pub subscription_id: SubscriptionId,
    pub from_status: String,
    pub to_status: String,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

/// Insert input for an audit entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewStateChange {
    pub subscription_id: SubscriptionId,
    pub from_status: String,
    pub to_status: String,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

/// Email template model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailTemplate {
    pub id: EmailTemplateId,
    pub workspace_id: WorkspaceId,
    pub template_type: EmailTemplateType,
    pub subject: String,
    pub html_body: Option<String>,
    pub text_body: Option<String>,
    pub created_at: DateTime<Utc>,
}
