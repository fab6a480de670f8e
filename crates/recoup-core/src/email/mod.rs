//! Dunning email notifications

mod smtp;
mod template;

pub use smtp::SmtpEmailSender;
pub use template::TemplateRenderer;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use recoup_common::types::CampaignId;
use recoup_common::Result;
use recoup_storage::models::EmailTemplate;
use serde::{Deserialize, Serialize};

/// Values a dunning template can reference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailContext {
    pub campaign_id: CampaignId,
    pub customer_name: Option<String>,
    pub customer_email: String,
    pub amount_cents: i64,
    pub currency: String,
    pub attempt_number: i32,
    pub max_attempts: i32,
    /// When the next attempt runs, if one remains
    pub next_retry_at: Option<DateTime<Utc>>,
}

impl EmailContext {
    pub fn attempts_remaining(&self) -> i32 {
        (self.max_attempts - self.attempt_number).max(0)
    }
}

/// Sends rendered dunning emails
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send_dunning_email(
        &self,
        template: &EmailTemplate,
        context: &EmailContext,
        recipient: &str,
    ) -> Result<()>;
}
