//! Action table - executes the actions configured for an attempt

use super::policy::AttemptPlan;
use crate::email::{EmailContext, EmailSender};
use crate::metrics::DunningMetrics;
use crate::payment::{PaymentClient, PaymentError, PaymentRequest};
use crate::rates::{RateQuote, RateSource};
use chrono::{DateTime, Utc};
use recoup_common::types::{ActionKind, EmailTemplateType};
use recoup_storage::models::{CampaignDetail, DunningAttempt, EmailTemplate};
use recoup_storage::repository::EmailTemplateRepository;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Everything an action needs to know about the attempt it runs in
#[derive(Debug, Clone, Copy)]
pub struct ActionContext<'a> {
    pub detail: &'a CampaignDetail,
    pub attempt: &'a DunningAttempt,
    pub plan: &'a AttemptPlan,
    /// When the campaign will be retried if this attempt fails
    pub next_retry_at: Option<DateTime<Utc>>,
}

/// Result of a payment retry
#[derive(Debug, Clone, PartialEq)]
pub enum PaymentOutcome {
    Collected {
        transaction_reference: String,
        amount_cents: i64,
    },
    Declined {
        error: String,
        transaction_reference: Option<String>,
    },
}

/// Result of a notification. Never affects the attempt status.
#[derive(Debug, Clone, PartialEq)]
pub enum EmailOutcome {
    Sent,
    Skipped(String),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    Payment(PaymentOutcome),
    Email(EmailOutcome),
}

/// Dispatches each [`ActionKind`] to its executor
pub struct ActionTable {
    payments: Arc<dyn PaymentClient>,
    emails: Arc<dyn EmailSender>,
    templates: Arc<dyn EmailTemplateRepository>,
    rates: Arc<dyn RateSource>,
    settlement_currency: String,
    metrics: Option<Arc<DunningMetrics>>,
}

impl ActionTable {
    pub fn new(
        payments: Arc<dyn PaymentClient>,
        emails: Arc<dyn EmailSender>,
        templates: Arc<dyn EmailTemplateRepository>,
        rates: Arc<dyn RateSource>,
        settlement_currency: impl Into<String>,
    ) -> Self {
        Self {
            payments,
            emails,
            templates,
            rates,
            settlement_currency: settlement_currency.into(),
            metrics: None,
        }
    }

    /// Record email results
    pub fn with_metrics(mut self, metrics: Arc<DunningMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Run one action. Failures are reported in the outcome, never as errors.
    pub async fn execute(&self, kind: ActionKind, ctx: ActionContext<'_>) -> ActionOutcome {
        match kind {
            ActionKind::RetryPayment => ActionOutcome::Payment(self.retry_payment(ctx).await),
            ActionKind::Email => ActionOutcome::Email(self.send_email(ctx).await),
        }
    }

    async fn retry_payment(&self, ctx: ActionContext<'_>) -> PaymentOutcome {
        let campaign = &ctx.detail.campaign;
        let amount_cents = campaign.outstanding_amount_cents();

        let quote = if campaign
            .currency
            .eq_ignore_ascii_case(&self.settlement_currency)
        {
            None
        } else {
            match self
                .rates
                .rate(&campaign.currency, &self.settlement_currency)
                .await
            {
                Ok(rate) => Some(RateQuote::new(
                    amount_cents,
                    &campaign.currency,
                    &self.settlement_currency,
                    rate,
                )),
                Err(e) => {
                    return PaymentOutcome::Declined {
                        error: PaymentError::RateUnavailable(e.to_string()).to_string(),
                        transaction_reference: None,
                    };
                }
            }
        };

        let request = PaymentRequest {
            idempotency_key: PaymentRequest::idempotency_key_for(
                campaign.id,
                ctx.attempt.attempt_number,
            ),
            campaign_id: campaign.id,
            attempt_number: ctx.attempt.attempt_number,
            workspace_id: campaign.workspace_id,
            customer_id: campaign.customer_id,
            target: campaign.target,
            amount_cents,
            currency: campaign.currency.clone(),
            quote,
        };

        match self.payments.process_payment(&request).await {
            Ok(receipt) if receipt.is_success() => {
                info!(
                    campaign_id = %campaign.id,
                    attempt = ctx.attempt.attempt_number,
                    transaction_reference = %receipt.transaction_reference,
                    "Payment retry collected"
                );
                PaymentOutcome::Collected {
                    transaction_reference: receipt.transaction_reference,
                    amount_cents,
                }
            }
            Ok(receipt) => {
                let error = receipt
                    .error_message
                    .clone()
                    .unwrap_or_else(|| format!("Payment ended with status {}", receipt.status));
                info!(
                    campaign_id = %campaign.id,
                    attempt = ctx.attempt.attempt_number,
                    status = %receipt.status,
                    "Payment retry declined"
                );
                PaymentOutcome::Declined {
                    error,
                    transaction_reference: Some(receipt.transaction_reference),
                }
            }
            Err(e) => {
                warn!(
                    campaign_id = %campaign.id,
                    attempt = ctx.attempt.attempt_number,
                    error = %e,
                    "Payment retry failed"
                );
                PaymentOutcome::Declined {
                    error: e.to_string(),
                    transaction_reference: None,
                }
            }
        }
    }

    async fn send_email(&self, ctx: ActionContext<'_>) -> EmailOutcome {
        let outcome = self.try_send_email(ctx).await;
        let label = match &outcome {
            EmailOutcome::Sent => "sent",
            EmailOutcome::Skipped(_) => "skipped",
            EmailOutcome::Failed(_) => "failed",
        };
        if let Some(metrics) = &self.metrics {
            metrics.email(label);
        }
        outcome
    }

    async fn try_send_email(&self, ctx: ActionContext<'_>) -> EmailOutcome {
        let campaign = &ctx.detail.campaign;

        let template = match self.resolve_template(ctx).await {
            Ok(Some(template)) => template,
            Ok(None) => {
                debug!(campaign_id = %campaign.id, "No email template for attempt");
                return EmailOutcome::Skipped("no email template configured".to_string());
            }
            Err(e) => {
                warn!(campaign_id = %campaign.id, error = %e, "Email template lookup failed");
                return EmailOutcome::Failed(e.to_string());
            }
        };

        let context = EmailContext {
            campaign_id: campaign.id,
            customer_name: ctx.detail.customer_name.clone(),
            customer_email: ctx.detail.customer_email.clone(),
            amount_cents: campaign.outstanding_amount_cents(),
            currency: campaign.currency.clone(),
            attempt_number: ctx.attempt.attempt_number,
            max_attempts: campaign.max_retry_attempts,
            next_retry_at: ctx.next_retry_at,
        };

        match self
            .emails
            .send_dunning_email(&template, &context, &ctx.detail.customer_email)
            .await
        {
            Ok(()) => {
                info!(
                    campaign_id = %campaign.id,
                    attempt = ctx.attempt.attempt_number,
                    template_type = %template.template_type,
                    "Dunning email sent"
                );
                EmailOutcome::Sent
            }
            Err(e) => {
                warn!(
                    campaign_id = %campaign.id,
                    attempt = ctx.attempt.attempt_number,
                    error = %e,
                    "Dunning email failed"
                );
                EmailOutcome::Failed(e.to_string())
            }
        }
    }

    /// Explicit template id first, then the workspace template for the attempt's stage
    async fn resolve_template(
        &self,
        ctx: ActionContext<'_>,
    ) -> recoup_common::Result<Option<EmailTemplate>> {
        let campaign = &ctx.detail.campaign;

        if let Some(id) = ctx.plan.email_template_id {
            match self.templates.get(id).await? {
                Some(template) if template.workspace_id == campaign.workspace_id => {
                    return Ok(Some(template))
                }
                _ => warn!(
                    campaign_id = %campaign.id,
                    template_id = %id,
                    "Configured email template missing, falling back to template type"
                ),
            }
        }

        let template_type =
            EmailTemplateType::for_attempt(ctx.attempt.attempt_number, campaign.max_retry_attempts);
        self.templates
            .get_by_type(campaign.workspace_id, template_type)
            .await
    }
}
