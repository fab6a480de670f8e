//! Failure Detector - Opens campaigns for failed subscription payments and
//! failed one-off payments

use super::service::{CampaignService, CreateCampaign};
use super::strategy;
use crate::error::{DunningError, Result};
use crate::metrics::DunningMetrics;
use chrono::{DateTime, Duration, Utc};
use recoup_common::types::{
    CampaignId, EventStatus, FinalAction, PaymentId, Strategy, SubscriptionId, WorkspaceId,
};
use recoup_storage::models::{
    CampaignTarget, CreateConfiguration, DunningConfiguration, NewSubscriptionEvent, Payment,
    SubscriptionEvent,
};
use recoup_storage::repository::BillingRepository;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of processing one failed event or payment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DetectionOutcome {
    Created {
        campaign_id: CampaignId,
        strategy: Option<Strategy>,
    },
    Skipped {
        reason: String,
    },
    Error {
        message: String,
    },
}

/// One processed failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionEntry {
    pub target: CampaignTarget,
    pub outcome: DetectionOutcome,
}

/// Per-failure outcomes of a detection run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionReport {
    pub entries: Vec<DetectionEntry>,
}

impl DetectionReport {
    pub fn created(&self) -> usize {
        self.count(|o| matches!(o, DetectionOutcome::Created { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, DetectionOutcome::Skipped { .. }))
    }

    pub fn errors(&self) -> usize {
        self.count(|o| matches!(o, DetectionOutcome::Error { .. }))
    }

    fn count(&self, f: impl Fn(&DetectionOutcome) -> bool) -> usize {
        self.entries.iter().filter(|e| f(&e.outcome)).count()
    }

    fn push(&mut self, target: CampaignTarget, outcome: DetectionOutcome) {
        self.entries.push(DetectionEntry { target, outcome });
    }
}

/// Failed payment notification received from the payment provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedPaymentWebhook {
    pub workspace_id: WorkspaceId,
    pub subscription_id: SubscriptionId,
    #[serde(default)]
    pub payment_id: Option<PaymentId>,
    pub amount_cents: i64,
    pub currency: String,
    #[serde(default)]
    pub error_message: Option<String>,
    /// Defaults to the time the webhook is processed
    #[serde(default)]
    pub occurred_at: Option<DateTime<Utc>>,
}

/// Failure Detector - turns billing failures into dunning campaigns
pub struct FailureDetector {
    service: Arc<CampaignService>,
    billing: Arc<dyn BillingRepository>,
    metrics: Option<Arc<DunningMetrics>>,
}

impl FailureDetector {
    pub fn new(service: Arc<CampaignService>, billing: Arc<dyn BillingRepository>) -> Self {
        Self {
            service,
            billing,
            metrics: None,
        }
    }

    /// Count opened campaigns
    pub fn with_metrics(mut self, metrics: Arc<DunningMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Open campaigns for failed subscription events in the lookback window.
    /// Each event is processed on its own; one failure never stops the run.
    pub async fn detect_and_create_campaigns(&self, lookback: Duration) -> Result<DetectionReport> {
        let since = self.service.now() - lookback;
        let events = self.billing.list_failed_events(since).await?;

        let mut report = DetectionReport::default();
        for event in &events {
            let outcome = self.process_failed_event(event).await;
            report.push(CampaignTarget::Subscription(event.subscription_id), outcome);
        }

        if !events.is_empty() {
            info!(
                events = events.len(),
                created = report.created(),
                skipped = report.skipped(),
                errors = report.errors(),
                "Processed failed subscription events"
            );
        }

        Ok(report)
    }

    /// Open a campaign for one failed subscription event unless one is
    /// already open, or a campaign opened at or after the event covered it
    pub async fn process_failed_event(&self, event: &SubscriptionEvent) -> DetectionOutcome {
        let target = CampaignTarget::Subscription(event.subscription_id);
        match self.open_subscription_campaign(event).await {
            Ok(outcome) => outcome,
            Err(e) => Self::error_outcome(&target, e),
        }
    }

    async fn open_subscription_campaign(
        &self,
        event: &SubscriptionEvent,
    ) -> Result<DetectionOutcome> {
        let subscription_id = event.subscription_id;
        let target = CampaignTarget::Subscription(subscription_id);

        let subscription = self
            .billing
            .get_subscription(subscription_id)
            .await?
            .ok_or_else(|| {
                DunningError::NotFound(format!("Subscription {} not found", subscription_id))
            })?;
        self.billing
            .get_customer(subscription.customer_id)
            .await?
            .ok_or_else(|| {
                DunningError::NotFound(format!("Customer {} not found", subscription.customer_id))
            })?;
        let price = self
            .billing
            .get_price(subscription.price_id)
            .await?
            .ok_or_else(|| {
                DunningError::NotFound(format!("Price {} not found", subscription.price_id))
            })?;

        if let Some(latest) = self.service.find_latest_campaign(&target).await? {
            if latest.status.is_open() {
                debug!(
                    subscription_id = %subscription_id,
                    campaign_id = %latest.id,
                    "Campaign already open for subscription"
                );
                return Ok(DetectionOutcome::Skipped {
                    reason: format!("campaign {} already open", latest.id),
                });
            }
            // A finished campaign settles every failure up to its creation;
            // only a later failure starts dunning again
            if latest.created_at >= event.occurred_at {
                debug!(
                    subscription_id = %subscription_id,
                    campaign_id = %latest.id,
                    status = %latest.status,
                    "Failure already handled by a finished campaign"
                );
                return Ok(DetectionOutcome::Skipped {
                    reason: format!("failure already handled by campaign {}", latest.id),
                });
            }
        }

        let configuration = self
            .get_or_create_default_configuration(subscription.workspace_id)
            .await?;

        let counts = self.billing.count_events(subscription_id).await?;
        let strategy = strategy::classify(counts, price.amount_cents);
        debug!(
            subscription_id = %subscription_id,
            successes = counts.successes,
            failures = counts.failures,
            strategy = %strategy,
            "Classified subscription"
        );

        self.create(
            CreateCampaign {
                configuration_id: configuration.id,
                target,
                amount_cents: None,
                currency: None,
                strategy: Some(strategy),
            },
            "subscription",
        )
        .await
    }

    /// Open campaigns for failed one-off payments in the lookback window
    pub async fn detect_failed_payments(&self, lookback: Duration) -> Result<DetectionReport> {
        let since = self.service.now() - lookback;
        let payments = self.billing.list_failed_payments(since).await?;

        let mut report = DetectionReport::default();
        for payment in &payments {
            let target = CampaignTarget::Payment(payment.id);
            let outcome = match self.open_payment_campaign(payment).await {
                Ok(outcome) => outcome,
                Err(e) => Self::error_outcome(&target, e),
            };
            report.push(target, outcome);
        }

        if !payments.is_empty() {
            info!(
                payments = payments.len(),
                created = report.created(),
                skipped = report.skipped(),
                errors = report.errors(),
                "Processed failed payments"
            );
        }

        Ok(report)
    }

    async fn open_payment_campaign(&self, payment: &Payment) -> Result<DetectionOutcome> {
        let target = CampaignTarget::Payment(payment.id);

        // A payment is dunned once; recovered or failed, it is never reopened
        if let Some(existing) = self.service.find_latest_campaign(&target).await? {
            return Ok(DetectionOutcome::Skipped {
                reason: format!(
                    "payment already dunned by campaign {} ({})",
                    existing.id, existing.status
                ),
            });
        }

        let configuration = self
            .get_or_create_default_configuration(payment.workspace_id)
            .await?;

        self.create(
            CreateCampaign {
                configuration_id: configuration.id,
                target,
                amount_cents: None,
                currency: None,
                strategy: None,
            },
            "payment",
        )
        .await
    }

    async fn create(&self, params: CreateCampaign, kind: &str) -> Result<DetectionOutcome> {
        let strategy = params.strategy;
        match self.service.create_campaign(params).await {
            Ok(campaign) => {
                if let Some(metrics) = &self.metrics {
                    metrics.campaign_opened(kind);
                }
                Ok(DetectionOutcome::Created {
                    campaign_id: campaign.id,
                    strategy,
                })
            }
            // Another detector opened the campaign between the lookup and the insert
            Err(DunningError::Duplicate(reason)) => Ok(DetectionOutcome::Skipped { reason }),
            Err(e) => Err(e),
        }
    }

    fn error_outcome(target: &CampaignTarget, e: DunningError) -> DetectionOutcome {
        warn!(target = %target, error = %e, "Failed to process payment failure");
        DetectionOutcome::Error {
            message: e.to_string(),
        }
    }

    /// The workspace's default active configuration, else its first active
    /// one, else a newly created default
    pub async fn get_or_create_default_configuration(
        &self,
        workspace_id: WorkspaceId,
    ) -> Result<DunningConfiguration> {
        let configurations = self.service.list_configurations(workspace_id).await?;

        if let Some(configuration) = configurations
            .iter()
            .find(|c| c.is_default && c.is_active)
            .or_else(|| configurations.iter().find(|c| c.is_active))
        {
            return Ok(configuration.clone());
        }

        info!(workspace_id = %workspace_id, "Creating default dunning configuration");
        self.service
            .create_configuration(CreateConfiguration {
                workspace_id,
                name: "Default".to_string(),
                max_retry_attempts: 4,
                retry_interval_days: vec![3, 7, 7, 7],
                attempt_actions: Vec::new(),
                final_action: FinalAction::Cancel,
                final_action_config: serde_json::json!({}),
                grace_period_hours: 24,
                is_default: true,
                is_active: true,
            })
            .await
    }

    /// Record a failed payment reported by webhook, then process it like a
    /// detected failure
    pub async fn process_failed_payment_webhook(
        &self,
        webhook: FailedPaymentWebhook,
    ) -> Result<DetectionOutcome> {
        let subscription = self
            .billing
            .get_subscription(webhook.subscription_id)
            .await?
            .ok_or_else(|| {
                DunningError::NotFound(format!(
                    "Subscription {} not found",
                    webhook.subscription_id
                ))
            })?;
        if subscription.workspace_id != webhook.workspace_id {
            return Err(DunningError::Validation(format!(
                "Subscription {} is not in workspace {}",
                webhook.subscription_id, webhook.workspace_id
            )));
        }

        let event = self
            .billing
            .record_event(NewSubscriptionEvent {
                workspace_id: webhook.workspace_id,
                subscription_id: webhook.subscription_id,
                payment_id: webhook.payment_id,
                status: EventStatus::Failed,
                amount_cents: webhook.amount_cents,
                currency: webhook.currency,
                error_message: webhook.error_message,
                occurred_at: webhook.occurred_at.unwrap_or_else(|| self.service.now()),
            })
            .await?;

        Ok(self.process_failed_event(&event).await)
    }
}
