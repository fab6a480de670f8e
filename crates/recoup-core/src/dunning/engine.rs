//! Retry Engine - Runs due dunning campaigns through their next attempt
//!
//! A campaign moves `active -> recovered` when a payment retry collects,
//! `active -> active` when it fails with attempts remaining and
//! `active -> failed` (plus the final action) when the last attempt fails.

use super::actions::{ActionContext, ActionOutcome, ActionTable, PaymentOutcome};
use super::detector::{DetectionReport, FailureDetector};
use super::policy::RetryPolicy;
use super::service::CampaignService;
use crate::error::Result;
use crate::metrics::DunningMetrics;
use chrono::{DateTime, Duration, Utc};
use recoup_common::types::{AttemptStatus, CampaignId, FinalAction};
use recoup_storage::models::{DunningCampaign, NewAttempt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Failure reason recorded when an attempt had no payment retry to run
pub const NO_PAYMENT_RETRY: &str = "no payment retry configured";

/// State change applied to a campaign by one attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "transition", rename_all = "snake_case")]
pub enum Transition {
    Recovered {
        attempt: i32,
        amount_cents: i64,
    },
    Rescheduled {
        attempt: i32,
        next_retry_at: DateTime<Utc>,
    },
    Exhausted {
        attempt: i32,
        final_action: FinalAction,
    },
}

/// Result of processing one claimed campaign
#[derive(Debug, Clone, PartialEq)]
pub struct CampaignOutcome {
    pub campaign_id: CampaignId,
    pub result: std::result::Result<Transition, String>,
}

/// What one batch did. Per-campaign errors land here instead of aborting
/// the batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    pub outcomes: Vec<CampaignOutcome>,
    /// Set when cancellation stopped the batch before every claim ran
    pub cancelled: bool,
}

impl BatchReport {
    pub fn processed(&self) -> usize {
        self.outcomes.len()
    }

    pub fn recovered(&self) -> usize {
        self.count(|t| matches!(t, Transition::Recovered { .. }))
    }

    pub fn rescheduled(&self) -> usize {
        self.count(|t| matches!(t, Transition::Rescheduled { .. }))
    }

    pub fn exhausted(&self) -> usize {
        self.count(|t| matches!(t, Transition::Exhausted { .. }))
    }

    pub fn errors(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_err()).count()
    }

    fn count(&self, f: impl Fn(&Transition) -> bool) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.result.as_ref().map(&f).unwrap_or(false))
            .count()
    }
}

/// Retry Engine
pub struct RetryEngine {
    service: Arc<CampaignService>,
    actions: Arc<ActionTable>,
    detector: Arc<FailureDetector>,
    /// How long a claimed campaign stays invisible to other claims
    claim_lease: Duration,
    metrics: Option<Arc<DunningMetrics>>,
}

impl RetryEngine {
    /// Create a new retry engine
    pub fn new(
        service: Arc<CampaignService>,
        actions: Arc<ActionTable>,
        detector: Arc<FailureDetector>,
    ) -> Self {
        Self {
            service,
            actions,
            detector,
            claim_lease: Duration::minutes(5),
            metrics: None,
        }
    }

    /// Set the claim lease
    pub fn with_claim_lease(mut self, lease: Duration) -> Self {
        self.claim_lease = lease;
        self
    }

    /// Count attempts and transitions
    pub fn with_metrics(mut self, metrics: Arc<DunningMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Claim up to `limit` due campaigns and run each through its next
    /// attempt, oldest due first.
    ///
    /// Only a failed claim returns `Err`. Once `cancel` fires no further
    /// campaign is started; unstarted claims become due again when their
    /// lease runs out.
    pub async fn process_due_campaigns(
        &self,
        limit: i64,
        cancel: &CancellationToken,
    ) -> Result<BatchReport> {
        let lease_until = self.service.now() + self.claim_lease;
        let campaigns = self
            .service
            .claim_due_campaigns(limit, lease_until)
            .await?;

        let mut report = BatchReport::default();
        if campaigns.is_empty() {
            return Ok(report);
        }

        debug!("Processing {} due dunning campaigns", campaigns.len());

        for campaign in &campaigns {
            if cancel.is_cancelled() {
                info!(
                    remaining = campaigns.len() - report.processed(),
                    "Dunning batch cancelled"
                );
                report.cancelled = true;
                break;
            }

            let result = self.process_campaign(campaign).await.map_err(|e| {
                error!(campaign_id = %campaign.id, error = %e, "Dunning campaign failed");
                if let Some(metrics) = &self.metrics {
                    metrics.campaign_error();
                }
                e.to_string()
            });

            report.outcomes.push(CampaignOutcome {
                campaign_id: campaign.id,
                result,
            });
        }

        info!(
            processed = report.processed(),
            recovered = report.recovered(),
            rescheduled = report.rescheduled(),
            exhausted = report.exhausted(),
            errors = report.errors(),
            cancelled = report.cancelled,
            "Dunning batch finished"
        );

        Ok(report)
    }

    /// Run a campaign's next attempt and apply the resulting transition.
    ///
    /// An attempt that completed without its transition landing (a lost race
    /// with pause, a storage error) is not run again; its stored status
    /// drives the transition instead.
    pub async fn process_campaign(&self, campaign: &DunningCampaign) -> Result<Transition> {
        let detail = self.service.get_campaign_detail(campaign.id).await?;
        let configuration = self
            .service
            .get_configuration(campaign.configuration_id)
            .await?;
        let policy = RetryPolicy::from_configuration(&configuration)?;

        let attempt_number = campaign.next_attempt_number();
        // None when this is the last attempt
        let next_retry_at = if attempt_number >= campaign.max_retry_attempts {
            None
        } else {
            Some(policy.next_retry_at(self.service.now(), attempt_number)?)
        };

        if let Some(done) = self
            .service
            .find_attempt(campaign.id, attempt_number)
            .await?
            .filter(|a| a.status != AttemptStatus::Pending)
        {
            info!(
                campaign_id = %campaign.id,
                attempt = attempt_number,
                status = %done.status,
                "Resuming transition of completed dunning attempt"
            );
            let collected = (done.status == AttemptStatus::Success)
                .then(|| campaign.original_amount_cents - campaign.recovered_amount_cents);
            return self
                .apply_transition(campaign, &policy, attempt_number, collected, next_retry_at)
                .await;
        }

        let plan = policy.plan_for(attempt_number);
        let attempt = self
            .service
            .create_attempt(NewAttempt {
                campaign_id: campaign.id,
                attempt_number,
                attempt_type: plan.attempt_type(),
                email_template_id: plan.email_template_id,
                created_at: self.service.now(),
            })
            .await?;

        let ctx = ActionContext {
            detail: &detail,
            attempt: &attempt,
            plan: &plan,
            next_retry_at,
        };

        let mut payment = None;
        for kind in &plan.actions {
            if let ActionOutcome::Payment(outcome) = self.actions.execute(*kind, ctx).await {
                payment = Some(outcome);
            }
        }

        let collected = match payment {
            Some(PaymentOutcome::Collected {
                transaction_reference,
                amount_cents,
            }) => {
                self.service
                    .update_attempt_status(
                        attempt.id,
                        AttemptStatus::Success,
                        None,
                        Some(transaction_reference),
                    )
                    .await?;
                Some(amount_cents)
            }
            Some(PaymentOutcome::Declined {
                error,
                transaction_reference,
            }) => {
                self.service
                    .update_attempt_status(
                        attempt.id,
                        AttemptStatus::Failed,
                        Some(error),
                        transaction_reference,
                    )
                    .await?;
                None
            }
            None => {
                self.service
                    .update_attempt_status(
                        attempt.id,
                        AttemptStatus::Failed,
                        Some(NO_PAYMENT_RETRY.to_string()),
                        None,
                    )
                    .await?;
                None
            }
        };

        if let Some(metrics) = &self.metrics {
            metrics.attempt_completed(collected.is_some());
        }

        self.apply_transition(campaign, &policy, attempt_number, collected, next_retry_at)
            .await
    }

    /// Move the campaign on after attempt `attempt_number` completed.
    /// `collected` is the amount a successful payment retry brought in.
    async fn apply_transition(
        &self,
        campaign: &DunningCampaign,
        policy: &RetryPolicy,
        attempt_number: i32,
        collected: Option<i64>,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> Result<Transition> {
        if let Some(amount_cents) = collected {
            let recovered = campaign.recovered_amount_cents + amount_cents;
            self.service.recover_campaign(campaign.id, recovered).await?;
            if let Some(metrics) = &self.metrics {
                metrics.campaign_recovered(amount_cents);
            }
            return Ok(Transition::Recovered {
                attempt: attempt_number,
                amount_cents: recovered,
            });
        }

        let Some(next_retry_at) = next_retry_at else {
            let final_action = policy.final_action();
            self.service.fail_campaign(campaign.id, final_action).await?;
            if let Some(metrics) = &self.metrics {
                metrics.campaign_exhausted();
            }
            return Ok(Transition::Exhausted {
                attempt: attempt_number,
                final_action,
            });
        };

        self.service
            .record_progress(campaign.id, attempt_number, next_retry_at)
            .await?;
        debug!(
            campaign_id = %campaign.id,
            attempt = attempt_number,
            next_retry_at = %next_retry_at,
            "Dunning campaign rescheduled"
        );

        Ok(Transition::Rescheduled {
            attempt: attempt_number,
            next_retry_at,
        })
    }

    /// Open campaigns for failed subscription payments in the lookback window
    pub async fn monitor_failed_subscriptions(&self, lookback: Duration) -> Result<DetectionReport> {
        self.detector.detect_and_create_campaigns(lookback).await
    }

    /// Open campaigns for failed one-off payments in the lookback window
    pub async fn monitor_failed_payments(&self, lookback: Duration) -> Result<DetectionReport> {
        self.detector.detect_failed_payments(lookback).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dunning::service::CreateCampaign;
    use crate::error::DunningError;
    use crate::testing::Harness;
    use pretty_assertions::assert_eq;
    use recoup_common::types::{ActionKind, AttemptType, CampaignStatus, EmailTemplateType};
    use recoup_common::Clock;
    use recoup_storage::models::{AttemptActions, CampaignTarget};
    use recoup_storage::repository::ConfigurationRepository;

    async fn run(h: &Harness) -> BatchReport {
        h.engine
            .process_due_campaigns(10, &CancellationToken::new())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_failed_second_attempt_reschedules() {
        let h = Harness::new().await;
        let campaign = h.campaign(3, vec![1, 3, 7], 1).await;

        let report = run(&h).await;

        assert_eq!(
            report.outcomes,
            vec![CampaignOutcome {
                campaign_id: campaign.id,
                result: Ok(Transition::Rescheduled {
                    attempt: 2,
                    next_retry_at: h.clock.now() + Duration::days(3),
                }),
            }]
        );

        let campaign = h.service.get_campaign(campaign.id).await.unwrap();
        assert_eq!(campaign.status, CampaignStatus::Active);
        assert_eq!(campaign.current_attempt, 2);
        assert_eq!(campaign.last_retry_at, Some(h.clock.now()));
        assert_eq!(campaign.next_retry_at, Some(h.clock.now() + Duration::days(3)));

        let attempts = h.service.list_attempts(campaign.id).await.unwrap();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].attempt_number, 2);
        assert_eq!(attempts[0].status, AttemptStatus::Failed);
        assert!(attempts[0].payment_error.is_some());
    }

    #[tokio::test]
    async fn test_last_attempt_exhausts_and_cancels_once() {
        let h = Harness::new().await;
        let campaign = h.campaign(3, vec![1, 3, 7], 2).await;

        let report = run(&h).await;
        assert_eq!(report.exhausted(), 1);
        assert_eq!(
            report.outcomes[0].result,
            Ok(Transition::Exhausted {
                attempt: 3,
                final_action: FinalAction::Cancel,
            })
        );

        let campaign = h.service.get_campaign(campaign.id).await.unwrap();
        assert_eq!(campaign.status, CampaignStatus::Failed);
        assert_eq!(campaign.final_action_taken, Some(FinalAction::Cancel));
        assert_eq!(campaign.next_retry_at, None);
        assert_eq!(h.subscription().await.status, "cancelled");

        h.clock.advance(Duration::days(30));
        assert_eq!(run(&h).await.processed(), 0);
        assert_eq!(h.state_changes().await.len(), 1);
    }

    #[tokio::test]
    async fn test_collected_payment_recovers() {
        let h = Harness::new().await;
        let campaign = h.campaign(3, vec![1, 3, 7], 0).await;
        h.payments.push_status("confirmed");

        let report = run(&h).await;
        assert_eq!(
            report.outcomes[0].result,
            Ok(Transition::Recovered {
                attempt: 1,
                amount_cents: h.price_cents,
            })
        );

        let recovered = h.service.get_campaign(campaign.id).await.unwrap();
        assert_eq!(recovered.status, CampaignStatus::Recovered);
        assert_eq!(recovered.recovered_amount_cents, h.price_cents);
        assert_eq!(recovered.next_retry_at, None);
        assert_eq!(recovered.completed_at, Some(h.clock.now()));

        let attempts = h.service.list_attempts(campaign.id).await.unwrap();
        assert_eq!(attempts[0].status, AttemptStatus::Success);
        assert!(attempts[0].transaction_reference.is_some());

        // Terminal: never selected again
        h.clock.advance(Duration::days(30));
        assert_eq!(run(&h).await.processed(), 0);
        assert_eq!(h.payments.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_attempt_numbers_are_consecutive() {
        let h = Harness::new().await;
        let campaign = h.campaign(3, vec![1, 3, 7], 0).await;

        for _ in 0..5 {
            run(&h).await;
            h.clock.advance(Duration::days(8));
        }

        let numbers: Vec<i32> = h
            .service
            .list_attempts(campaign.id)
            .await
            .unwrap()
            .iter()
            .map(|a| a.attempt_number)
            .collect();
        assert_eq!(numbers, vec![1, 2, 3]);

        let requests: Vec<String> = h
            .payments
            .requests()
            .into_iter()
            .map(|r| r.idempotency_key)
            .collect();
        assert_eq!(
            requests,
            (1..=3)
                .map(|n| format!("dunning-{}-{}", campaign.id, n))
                .collect::<Vec<_>>()
        );

        let campaign = h.service.get_campaign(campaign.id).await.unwrap();
        assert_eq!(campaign.status, CampaignStatus::Failed);
    }

    #[tokio::test]
    async fn test_batch_continues_past_broken_campaign() {
        let h = Harness::new().await;
        let configuration = h.configuration(3, vec![1, 3, 7]).await;
        let broken = h.configuration(3, vec![1, 3, 7]).await;

        let mut ids = Vec::new();
        for config in [&configuration, &broken, &configuration] {
            let payment_id = h.failed_payment(1_000).await;
            let campaign = h
                .service
                .create_campaign(CreateCampaign {
                    configuration_id: config.id,
                    target: CampaignTarget::Payment(payment_id),
                    amount_cents: None,
                    currency: None,
                    strategy: None,
                })
                .await
                .unwrap();
            ids.push(campaign.id);
            h.clock.advance(Duration::minutes(1));
        }
        h.store.remove_configuration(broken.id).await;
        h.clock.advance(Duration::hours(2));

        let report = run(&h).await;

        let order: Vec<CampaignId> = report.outcomes.iter().map(|o| o.campaign_id).collect();
        assert_eq!(order, ids);
        assert!(report.outcomes[0].result.is_ok());
        assert!(report.outcomes[1].result.is_err());
        assert!(report.outcomes[2].result.is_ok());
        assert_eq!(report.rescheduled(), 2);
        assert_eq!(report.errors(), 1);

        for id in [ids[0], ids[2]] {
            let campaign = h.service.get_campaign(id).await.unwrap();
            assert_eq!(campaign.current_attempt, 1);
        }
    }

    #[tokio::test]
    async fn test_cancelled_batch_starts_nothing() {
        let h = Harness::new().await;
        let campaign = h.campaign(3, vec![1, 3, 7], 0).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = h.engine.process_due_campaigns(10, &cancel).await.unwrap();
        assert!(report.cancelled);
        assert!(report.outcomes.is_empty());
        assert!(h.payments.requests().is_empty());

        // The claim holds until the lease runs out
        assert_eq!(run(&h).await.processed(), 0);
        h.clock.advance(Duration::minutes(6));
        let report = run(&h).await;
        assert_eq!(report.outcomes[0].campaign_id, campaign.id);
    }

    #[tokio::test]
    async fn test_claimed_campaign_is_not_processed_twice() {
        let h = Harness::new().await;
        h.campaign(3, vec![1, 3, 7], 0).await;

        let claimed = h
            .service
            .claim_due_campaigns(10, h.clock.now() + Duration::minutes(5))
            .await
            .unwrap();
        assert_eq!(claimed.len(), 1);

        assert_eq!(run(&h).await.processed(), 0);
    }

    #[tokio::test]
    async fn test_paused_campaign_is_skipped() {
        let h = Harness::new().await;
        let campaign = h.campaign(3, vec![1, 3, 7], 0).await;
        h.service.pause_campaign(campaign.id).await.unwrap();

        assert_eq!(run(&h).await.processed(), 0);

        h.service.resume_campaign(campaign.id).await.unwrap();
        assert_eq!(run(&h).await.rescheduled(), 1);
    }

    #[tokio::test]
    async fn test_email_runs_with_payment_retry() {
        let h = Harness::new().await;
        h.template(EmailTemplateType::PaymentFailed).await;
        let mut input = h.configuration_input(3, vec![1, 3, 7]);
        input.attempt_actions = vec![AttemptActions {
            attempt: 1,
            actions: vec![ActionKind::RetryPayment, ActionKind::Email],
            email_template_id: None,
        }];
        let configuration = h.service.create_configuration(input).await.unwrap();
        let campaign = h.campaign_with(&configuration, 0).await;

        assert_eq!(run(&h).await.rescheduled(), 1);
        assert_eq!(h.emails.sent().len(), 1);
        assert_eq!(h.payments.requests().len(), 1);

        let attempts = h.service.list_attempts(campaign.id).await.unwrap();
        assert_eq!(attempts[0].attempt_type, AttemptType::Payment);
    }

    #[tokio::test]
    async fn test_email_only_attempt_is_failed() {
        let h = Harness::new().await;
        h.template(EmailTemplateType::PaymentFailed).await;
        let mut input = h.configuration_input(2, vec![2]);
        input.attempt_actions = vec![AttemptActions {
            attempt: 1,
            actions: vec![ActionKind::Email],
            email_template_id: None,
        }];
        let configuration = h.service.create_configuration(input).await.unwrap();
        let campaign = h.campaign_with(&configuration, 0).await;

        let report = run(&h).await;
        assert_eq!(
            report.outcomes[0].result,
            Ok(Transition::Rescheduled {
                attempt: 1,
                next_retry_at: h.clock.now() + Duration::days(2),
            })
        );
        assert!(h.payments.requests().is_empty());
        assert_eq!(h.emails.sent().len(), 1);

        let attempts = h.service.list_attempts(campaign.id).await.unwrap();
        assert_eq!(attempts[0].attempt_type, AttemptType::Notification);
        assert_eq!(attempts[0].payment_error.as_deref(), Some(NO_PAYMENT_RETRY));
    }

    #[tokio::test]
    async fn test_missing_configuration_is_not_found() {
        let h = Harness::new().await;
        let campaign = h.campaign(3, vec![1, 3, 7], 0).await;
        h.store.remove_configuration(campaign.configuration_id).await;

        let result = h.engine.process_campaign(&campaign).await;
        assert!(matches!(result, Err(DunningError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_monitors_open_campaigns() {
        let h = Harness::new().await;
        h.failed_payment(4_200).await;

        let report = h
            .engine
            .monitor_failed_payments(Duration::hours(24))
            .await
            .unwrap();
        assert_eq!(report.created(), 1);

        let report = h
            .engine
            .monitor_failed_subscriptions(Duration::hours(24))
            .await
            .unwrap();
        assert!(report.entries.is_empty());
    }

    /// An attempt whose campaign transition never landed
    async fn completed_attempt(h: &Harness, campaign: &DunningCampaign, status: AttemptStatus) {
        let attempt = h
            .service
            .create_attempt(NewAttempt {
                campaign_id: campaign.id,
                attempt_number: campaign.next_attempt_number(),
                attempt_type: AttemptType::Payment,
                email_template_id: None,
                created_at: h.clock.now(),
            })
            .await
            .unwrap();
        h.service
            .update_attempt_status(attempt.id, status, Some("card declined".to_string()), None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_completed_failed_attempt_moves_campaign_on() {
        let h = Harness::new().await;
        let campaign = h.campaign(3, vec![1, 3, 7], 0).await;
        completed_attempt(&h, &campaign, AttemptStatus::Failed).await;

        let report = run(&h).await;
        assert_eq!(
            report.outcomes[0].result,
            Ok(Transition::Rescheduled {
                attempt: 1,
                next_retry_at: h.clock.now() + Duration::days(1),
            })
        );
        assert!(h.payments.requests().is_empty());

        let stored = h.service.get_campaign(campaign.id).await.unwrap();
        assert_eq!(stored.current_attempt, 1);

        // The next run makes attempt 2 as usual
        h.clock.advance(Duration::days(2));
        assert_eq!(run(&h).await.rescheduled(), 1);
        let numbers: Vec<i32> = h
            .service
            .list_attempts(campaign.id)
            .await
            .unwrap()
            .iter()
            .map(|a| a.attempt_number)
            .collect();
        assert_eq!(numbers, vec![1, 2]);
        assert_eq!(h.payments.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_completed_last_attempt_exhausts() {
        let h = Harness::new().await;
        let campaign = h.campaign(3, vec![1, 3, 7], 2).await;
        completed_attempt(&h, &campaign, AttemptStatus::Failed).await;

        let report = run(&h).await;
        assert_eq!(
            report.outcomes[0].result,
            Ok(Transition::Exhausted {
                attempt: 3,
                final_action: FinalAction::Cancel,
            })
        );
        assert!(h.payments.requests().is_empty());
        assert_eq!(h.subscription().await.status, "cancelled");
    }

    #[tokio::test]
    async fn test_completed_successful_attempt_recovers() {
        let h = Harness::new().await;
        let campaign = h.campaign(3, vec![1, 3, 7], 0).await;
        completed_attempt(&h, &campaign, AttemptStatus::Success).await;

        let report = run(&h).await;
        assert_eq!(
            report.outcomes[0].result,
            Ok(Transition::Recovered {
                attempt: 1,
                amount_cents: h.price_cents,
            })
        );
        assert!(h.payments.requests().is_empty());

        let stored = h.service.get_campaign(campaign.id).await.unwrap();
        assert_eq!(stored.status, CampaignStatus::Recovered);
        assert_eq!(stored.recovered_amount_cents, h.price_cents);
    }

    #[tokio::test]
    async fn test_out_of_range_interval_is_a_campaign_error() {
        let h = Harness::new().await;
        let unbounded = ConfigurationRepository::create(
            &h.store,
            h.configuration_input(2, vec![i32::MAX]),
        )
        .await
        .unwrap();

        let mut broken = h.campaign(2, vec![1], 0).await;
        broken.configuration_id = unbounded.id;
        h.store.put_campaign(broken.clone()).await;

        let configuration = h.configuration(2, vec![1]).await;
        let payment_id = h.failed_payment(1_000).await;
        let healthy = h
            .service
            .create_campaign(CreateCampaign {
                configuration_id: configuration.id,
                target: CampaignTarget::Payment(payment_id),
                amount_cents: None,
                currency: None,
                strategy: None,
            })
            .await
            .unwrap();
        h.clock.advance(Duration::hours(2));

        let report = run(&h).await;
        let order: Vec<CampaignId> = report.outcomes.iter().map(|o| o.campaign_id).collect();
        assert_eq!(order, vec![broken.id, healthy.id]);
        assert!(matches!(
            &report.outcomes[0].result,
            Err(message) if message.contains("retry_interval_days")
        ));
        assert_eq!(report.rescheduled(), 1);

        let stored = h.service.get_campaign(broken.id).await.unwrap();
        assert_eq!(stored.status, CampaignStatus::Active);
        assert_eq!(stored.current_attempt, 0);
        assert!(h.service.list_attempts(broken.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_attempt_is_stamped_with_engine_clock() {
        let h = Harness::new().await;
        let campaign = h.campaign(3, vec![1, 3, 7], 0).await;

        run(&h).await;

        let attempts = h.service.list_attempts(campaign.id).await.unwrap();
        assert_eq!(attempts[0].created_at, h.clock.now());
        assert_eq!(attempts[0].completed_at, Some(h.clock.now()));
    }
}
