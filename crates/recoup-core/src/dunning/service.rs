//! Campaign Service - Configuration, campaign and attempt lifecycle

use super::policy::RetryPolicy;
use crate::error::{DunningError, Result};
use chrono::{DateTime, Utc};
use recoup_common::types::{
    AttemptId, AttemptStatus, CampaignId, CampaignStatus, ConfigurationId, FinalAction, Strategy,
    WorkspaceId,
};
use recoup_common::Clock;
use recoup_storage::models::{
    AttemptCompletion, CampaignCounts, CampaignDetail, CampaignProgress, CampaignTarget,
    CreateConfiguration, DunningAttempt, DunningCampaign, DunningConfiguration, NewAttempt,
    NewCampaign,
};
use recoup_storage::repository::{
    AttemptRepository, BillingRepository, CampaignRepository, ConfigurationRepository,
    DbAttemptRepository, DbBillingRepository, DbCampaignRepository, DbConfigurationRepository,
    DbEmailTemplateRepository, EmailTemplateRepository,
};
use recoup_storage::{DatabasePool, MemoryStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Repository handles shared by the service, detector and action table
#[derive(Clone)]
pub struct Repositories {
    pub configurations: Arc<dyn ConfigurationRepository>,
    pub campaigns: Arc<dyn CampaignRepository>,
    pub attempts: Arc<dyn AttemptRepository>,
    pub billing: Arc<dyn BillingRepository>,
    pub templates: Arc<dyn EmailTemplateRepository>,
}

impl Repositories {
    /// PostgreSQL-backed repositories sharing one pool
    pub fn postgres(pool: &DatabasePool) -> Self {
        Self {
            configurations: Arc::new(DbConfigurationRepository::new(pool.clone())),
            campaigns: Arc::new(DbCampaignRepository::new(pool.clone())),
            attempts: Arc::new(DbAttemptRepository::new(pool.clone())),
            billing: Arc::new(DbBillingRepository::new(pool.clone())),
            templates: Arc::new(DbEmailTemplateRepository::new(pool.clone())),
        }
    }

    /// Every repository served by one in-memory store
    pub fn in_memory(store: &MemoryStore) -> Self {
        Self {
            configurations: Arc::new(store.clone()),
            campaigns: Arc::new(store.clone()),
            attempts: Arc::new(store.clone()),
            billing: Arc::new(store.clone()),
            templates: Arc::new(store.clone()),
        }
    }
}

/// Campaign creation input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCampaign {
    pub configuration_id: ConfigurationId,
    pub target: CampaignTarget,
    /// Overrides the amount taken from the subscription price or payment
    #[serde(default)]
    pub amount_cents: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub strategy: Option<Strategy>,
}

/// Campaign statistics for a workspace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignStats {
    pub counts: CampaignCounts,
    pub total: i64,
    pub recovery_rate: f64,
}

/// Campaign Service - owns every state change of configurations, campaigns
/// and attempts
pub struct CampaignService {
    repos: Repositories,
    clock: Arc<dyn Clock>,
}

impl CampaignService {
    /// Create a new campaign service
    pub fn new(repos: Repositories, clock: Arc<dyn Clock>) -> Self {
        Self { repos, clock }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // ------------------------------------------------------------------
    // Configurations
    // ------------------------------------------------------------------

    /// Validate and store a configuration. When it is the default, any
    /// previous default of the workspace is unset in the same step.
    pub async fn create_configuration(
        &self,
        input: CreateConfiguration,
    ) -> Result<DunningConfiguration> {
        RetryPolicy::validate(&input)?;

        let configuration = self.repos.configurations.create(input).await?;
        info!(
            configuration_id = %configuration.id,
            workspace_id = %configuration.workspace_id,
            is_default = configuration.is_default,
            "Dunning configuration created"
        );

        Ok(configuration)
    }

    pub async fn get_configuration(&self, id: ConfigurationId) -> Result<DunningConfiguration> {
        self.repos
            .configurations
            .get(id)
            .await?
            .ok_or_else(|| DunningError::NotFound(format!("Configuration {} not found", id)))
    }

    pub async fn list_configurations(
        &self,
        workspace_id: WorkspaceId,
    ) -> Result<Vec<DunningConfiguration>> {
        Ok(self.repos.configurations.list_by_workspace(workspace_id).await?)
    }

    // ------------------------------------------------------------------
    // Campaigns
    // ------------------------------------------------------------------

    /// Open a campaign for a failed subscription or payment.
    ///
    /// Fails with `Duplicate` and writes nothing when the subscription already
    /// has an active or paused campaign, or the payment was dunned before.
    pub async fn create_campaign(&self, params: CreateCampaign) -> Result<DunningCampaign> {
        let configuration = self.get_configuration(params.configuration_id).await?;
        let policy = RetryPolicy::from_configuration(&configuration)?;

        let (workspace_id, customer_id, amount_cents, currency) = match params.target {
            CampaignTarget::Subscription(id) => {
                let subscription = self.repos.billing.get_subscription(id).await?.ok_or_else(
                    || DunningError::NotFound(format!("Subscription {} not found", id)),
                )?;
                let price = self
                    .repos
                    .billing
                    .get_price(subscription.price_id)
                    .await?
                    .ok_or_else(|| {
                        DunningError::NotFound(format!("Price {} not found", subscription.price_id))
                    })?;
                (
                    subscription.workspace_id,
                    subscription.customer_id,
                    price.amount_cents,
                    price.currency,
                )
            }
            CampaignTarget::Payment(id) => {
                let payment = self
                    .repos
                    .billing
                    .get_payment(id)
                    .await?
                    .ok_or_else(|| DunningError::NotFound(format!("Payment {} not found", id)))?;
                (
                    payment.workspace_id,
                    payment.customer_id,
                    payment.amount_cents,
                    payment.currency,
                )
            }
        };

        if configuration.workspace_id != workspace_id {
            return Err(DunningError::Validation(format!(
                "Configuration {} is not in the workspace of {}",
                configuration.id, params.target
            )));
        }

        let amount_cents = params.amount_cents.unwrap_or(amount_cents);
        if amount_cents <= 0 {
            return Err(DunningError::Validation(format!(
                "Campaign amount must be positive, got {}",
                amount_cents
            )));
        }

        let now = self.clock.now();
        let input = NewCampaign {
            workspace_id,
            configuration_id: configuration.id,
            target: params.target,
            customer_id,
            max_retry_attempts: policy.max_retry_attempts(),
            original_amount_cents: amount_cents,
            currency: params.currency.unwrap_or(currency),
            next_retry_at: policy.first_retry_at(now)?,
            strategy: params.strategy,
            created_at: now,
        };

        let campaign = self
            .repos
            .campaigns
            .create_if_absent(input)
            .await?
            .ok_or_else(|| {
                DunningError::Duplicate(match params.target {
                    CampaignTarget::Subscription(_) => format!(
                        "An open dunning campaign already exists for {}",
                        params.target
                    ),
                    CampaignTarget::Payment(_) => {
                        format!("A dunning campaign was already opened for {}", params.target)
                    }
                })
            })?;

        info!(
            campaign_id = %campaign.id,
            target = %campaign.target,
            amount_cents = campaign.original_amount_cents,
            currency = %campaign.currency,
            next_retry_at = ?campaign.next_retry_at,
            "Dunning campaign created"
        );

        Ok(campaign)
    }

    pub async fn get_campaign(&self, id: CampaignId) -> Result<DunningCampaign> {
        self.repos
            .campaigns
            .get(id)
            .await?
            .ok_or_else(|| DunningError::NotFound(format!("Campaign {} not found", id)))
    }

    pub async fn get_campaign_detail(&self, id: CampaignId) -> Result<CampaignDetail> {
        self.repos
            .campaigns
            .get_detail(id)
            .await?
            .ok_or_else(|| DunningError::NotFound(format!("Campaign {} not found", id)))
    }

    /// The active or paused campaign for a target, if any
    pub async fn find_open_campaign(
        &self,
        target: &CampaignTarget,
    ) -> Result<Option<DunningCampaign>> {
        let campaign = match target {
            CampaignTarget::Subscription(id) => {
                self.repos.campaigns.find_open_for_subscription(*id).await?
            }
            CampaignTarget::Payment(id) => self.repos.campaigns.find_open_for_payment(*id).await?,
        };
        Ok(campaign)
    }

    /// The most recently created campaign for a target, in any status
    pub async fn find_latest_campaign(
        &self,
        target: &CampaignTarget,
    ) -> Result<Option<DunningCampaign>> {
        Ok(self.repos.campaigns.find_latest_for_target(*target).await?)
    }

    pub async fn list_campaigns(
        &self,
        workspace_id: WorkspaceId,
        status: Option<CampaignStatus>,
    ) -> Result<Vec<DunningCampaign>> {
        Ok(self
            .repos
            .campaigns
            .list_by_workspace(workspace_id, status)
            .await?)
    }

    pub async fn campaign_stats(&self, workspace_id: WorkspaceId) -> Result<CampaignStats> {
        let counts = self.repos.campaigns.count_by_status(workspace_id).await?;
        Ok(CampaignStats {
            total: counts.total(),
            recovery_rate: counts.recovery_rate(),
            counts,
        })
    }

    /// Claim due campaigns for this engine instance until `lease_until`
    pub async fn claim_due_campaigns(
        &self,
        limit: i64,
        lease_until: DateTime<Utc>,
    ) -> Result<Vec<DunningCampaign>> {
        let now = self.clock.now();
        Ok(self
            .repos
            .campaigns
            .claim_due(now, limit, lease_until)
            .await?)
    }

    /// Record a failed attempt that leaves retries remaining
    pub async fn record_progress(
        &self,
        id: CampaignId,
        attempt_number: i32,
        next_retry_at: DateTime<Utc>,
    ) -> Result<DunningCampaign> {
        let progress = CampaignProgress {
            current_attempt: attempt_number,
            last_retry_at: self.clock.now(),
            next_retry_at,
        };

        match self.repos.campaigns.record_progress(id, progress).await? {
            Some(campaign) => Ok(campaign),
            None => Err(self.not_writable(id, "advanced").await),
        }
    }

    /// Mark a campaign recovered. Terminal.
    pub async fn recover_campaign(
        &self,
        id: CampaignId,
        recovered_amount_cents: i64,
    ) -> Result<DunningCampaign> {
        let now = self.clock.now();
        match self
            .repos
            .campaigns
            .mark_recovered(id, recovered_amount_cents, now)
            .await?
        {
            Some(campaign) => {
                info!(
                    campaign_id = %id,
                    recovered_amount_cents,
                    "Dunning campaign recovered"
                );
                Ok(campaign)
            }
            None => Err(self.not_writable(id, "recovered").await),
        }
    }

    /// Mark a campaign failed and run its final action. Final action errors
    /// are logged; the campaign stays failed either way.
    pub async fn fail_campaign(
        &self,
        id: CampaignId,
        final_action: FinalAction,
    ) -> Result<DunningCampaign> {
        let now = self.clock.now();
        let campaign = match self
            .repos
            .campaigns
            .mark_failed(id, final_action, now)
            .await?
        {
            Some(campaign) => campaign,
            None => return Err(self.not_writable(id, "failed").await),
        };

        info!(
            campaign_id = %id,
            final_action = %final_action,
            "Dunning campaign exhausted its retries"
        );

        if let Err(e) = self.execute_final_action(&campaign, final_action).await {
            warn!(
                campaign_id = %id,
                final_action = %final_action,
                error = %e,
                "Final action failed"
            );
        }

        Ok(campaign)
    }

    /// Apply the configured terminal side effect.
    ///
    /// `cancel` takes effect immediately; a customer whose retries are
    /// exhausted has not paid for the current period.
    pub async fn execute_final_action(
        &self,
        campaign: &DunningCampaign,
        action: FinalAction,
    ) -> Result<()> {
        match action {
            FinalAction::Cancel => match campaign.target {
                CampaignTarget::Subscription(subscription_id) => {
                    let reason = format!(
                        "Dunning campaign {} exhausted {} retry attempts",
                        campaign.id, campaign.max_retry_attempts
                    );
                    let change = self
                        .repos
                        .billing
                        .cancel_subscription(subscription_id, &reason, self.clock.now())
                        .await?;

                    match change {
                        Some(change) => info!(
                            subscription_id = %subscription_id,
                            from_status = %change.from_status,
                            "Subscription cancelled by dunning"
                        ),
                        None => debug!(
                            subscription_id = %subscription_id,
                            "Subscription already cancelled"
                        ),
                    }
                }
                CampaignTarget::Payment(payment_id) => {
                    info!(
                        campaign_id = %campaign.id,
                        payment_id = %payment_id,
                        "No subscription to cancel for payment campaign"
                    );
                }
            },
            FinalAction::Pause => {
                info!(campaign_id = %campaign.id, "Final action pause recorded");
            }
            FinalAction::Downgrade => {
                info!(campaign_id = %campaign.id, "Final action downgrade recorded");
            }
        }

        Ok(())
    }

    /// Stop retrying an active campaign until it is resumed
    pub async fn pause_campaign(&self, id: CampaignId) -> Result<DunningCampaign> {
        match self.repos.campaigns.pause(id, self.clock.now()).await? {
            Some(campaign) => {
                info!(campaign_id = %id, "Dunning campaign paused");
                Ok(campaign)
            }
            None => Err(self.not_writable(id, "paused").await),
        }
    }

    /// Reactivate a paused campaign; it becomes due immediately
    pub async fn resume_campaign(&self, id: CampaignId) -> Result<DunningCampaign> {
        match self.repos.campaigns.resume(id, self.clock.now()).await? {
            Some(campaign) => {
                info!(campaign_id = %id, "Dunning campaign resumed");
                Ok(campaign)
            }
            None => Err(self.not_writable(id, "resumed").await),
        }
    }

    /// Error for a conditional write that matched no row
    async fn not_writable(&self, id: CampaignId, verb: &str) -> DunningError {
        match self.repos.campaigns.get(id).await {
            Ok(Some(campaign)) => DunningError::Validation(format!(
                "Campaign {} is {} and cannot be {}",
                id, campaign.status, verb
            )),
            Ok(None) => DunningError::NotFound(format!("Campaign {} not found", id)),
            Err(e) => e.into(),
        }
    }

    // ------------------------------------------------------------------
    // Attempts
    // ------------------------------------------------------------------

    /// Open a pending attempt, or return the pending one an interrupted run left behind
    pub async fn create_attempt(&self, input: NewAttempt) -> Result<DunningAttempt> {
        if input.attempt_number < 1 {
            return Err(DunningError::Validation(format!(
                "Attempt number must be at least 1, got {}",
                input.attempt_number
            )));
        }

        let attempt = self.repos.attempts.create(input).await?;
        debug!(
            campaign_id = %attempt.campaign_id,
            attempt_id = %attempt.id,
            attempt = attempt.attempt_number,
            attempt_type = %attempt.attempt_type,
            "Dunning attempt opened"
        );

        Ok(attempt)
    }

    /// Write an attempt's terminal status. The error text is kept only for
    /// failed attempts.
    pub async fn update_attempt_status(
        &self,
        attempt_id: AttemptId,
        status: AttemptStatus,
        error: Option<String>,
        transaction_reference: Option<String>,
    ) -> Result<DunningAttempt> {
        if status == AttemptStatus::Pending {
            return Err(DunningError::Validation(
                "Attempt status can only move to success or failed".to_string(),
            ));
        }

        let existing = self
            .repos
            .attempts
            .get(attempt_id)
            .await?
            .ok_or_else(|| DunningError::NotFound(format!("Attempt {} not found", attempt_id)))?;
        if existing.completed_at.is_some() {
            return Err(DunningError::Validation(format!(
                "Attempt {} is already completed",
                attempt_id
            )));
        }

        let completion = AttemptCompletion {
            status,
            payment_error: if status == AttemptStatus::Failed {
                error
            } else {
                None
            },
            transaction_reference,
            completed_at: self.clock.now(),
        };

        self.repos
            .attempts
            .complete(attempt_id, completion)
            .await?
            .ok_or_else(|| {
                DunningError::Validation(format!("Attempt {} is already completed", attempt_id))
            })
    }

    pub async fn list_attempts(&self, campaign_id: CampaignId) -> Result<Vec<DunningAttempt>> {
        Ok(self.repos.attempts.list_by_campaign(campaign_id).await?)
    }

    /// The attempt with the given number, if it was ever opened
    pub async fn find_attempt(
        &self,
        campaign_id: CampaignId,
        attempt_number: i32,
    ) -> Result<Option<DunningAttempt>> {
        Ok(self
            .list_attempts(campaign_id)
            .await?
            .into_iter()
            .find(|a| a.attempt_number == attempt_number))
    }
}
