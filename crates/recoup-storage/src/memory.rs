//! In-memory implementation of every repository trait
//!
//! All tables live behind one `RwLock`, so each trait method is a single
//! serialised step. That gives the conditional writes (`create_if_absent`,
//! the default-configuration switch, `claim_due`) the same atomicity the
//! PostgreSQL implementation gets from indexes and row locks.

use crate::models::{
    AttemptCompletion, CampaignCounts, CampaignDetail, CampaignProgress, CampaignTarget,
    CreateConfiguration, Customer, DunningAttempt, DunningCampaign, DunningConfiguration,
    EmailTemplate, EventCounts, NewAttempt, NewCampaign, NewSubscriptionEvent, Payment, Price,
    StateChange, Subscription, SubscriptionEvent, CONFIGURATION_SCHEMA_VERSION,
    SUBSCRIPTION_CANCELLED,
};
use crate::repository::{
    AttemptRepository, BillingRepository, CampaignRepository, ConfigurationRepository,
    EmailTemplateRepository,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use recoup_common::types::{
    AttemptId, AttemptStatus, CampaignId, CampaignStatus, ConfigurationId, CustomerId,
    EmailTemplateId, EmailTemplateType, EventStatus, FinalAction, PaymentId, PriceId,
    SubscriptionId, WorkspaceId,
};
use recoup_common::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Default)]
struct Tables {
    // Vecs keep insertion order, which stands in for `created_at` ordering
    configurations: Vec<DunningConfiguration>,
    campaigns: Vec<DunningCampaign>,
    attempts: Vec<DunningAttempt>,
    subscriptions: HashMap<SubscriptionId, Subscription>,
    customers: HashMap<CustomerId, Customer>,
    prices: HashMap<PriceId, Price>,
    payments: Vec<Payment>,
    events: Vec<SubscriptionEvent>,
    state_changes: Vec<StateChange>,
    templates: Vec<EmailTemplate>,
}

impl Tables {
    fn campaign_mut(&mut self, id: CampaignId) -> Option<&mut DunningCampaign> {
        self.campaigns.iter_mut().find(|c| c.id == id)
    }

    fn open_campaign_for(&self, target: &CampaignTarget) -> Option<&DunningCampaign> {
        self.campaigns
            .iter()
            .find(|c| c.target == *target && c.status.is_open())
    }

    /// Mirrors the unique indexes: one open campaign per subscription, one
    /// campaign ever per payment
    fn target_taken(&self, target: &CampaignTarget) -> bool {
        match target {
            CampaignTarget::Subscription(_) => self.open_campaign_for(target).is_some(),
            CampaignTarget::Payment(_) => self.campaigns.iter().any(|c| c.target == *target),
        }
    }
}

/// Thread-safe in-memory store for tests and local runs.
///
/// Cloning shares the underlying tables.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryStore {
    /// Creates a new, empty store.
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_customer(&self, customer: Customer) {
        self.tables
            .write()
            .await
            .customers
            .insert(customer.id, customer);
    }

    pub async fn insert_price(&self, price: Price) {
        self.tables.write().await.prices.insert(price.id, price);
    }

    pub async fn insert_subscription(&self, subscription: Subscription) {
        self.tables
            .write()
            .await
            .subscriptions
            .insert(subscription.id, subscription);
    }

    pub async fn insert_payment(&self, payment: Payment) {
        self.tables.write().await.payments.push(payment);
    }

    pub async fn insert_template(&self, template: EmailTemplate) {
        self.tables.write().await.templates.push(template);
    }

    /// Insert or replace a campaign as is, bypassing the open-campaign check
    pub async fn put_campaign(&self, campaign: DunningCampaign) {
        let mut tables = self.tables.write().await;
        match tables.campaign_mut(campaign.id) {
            Some(existing) => *existing = campaign,
            None => tables.campaigns.push(campaign),
        }
    }

    /// Delete a configuration, leaving campaigns that reference it dangling
    pub async fn remove_configuration(&self, id: ConfigurationId) {
        self.tables
            .write()
            .await
            .configurations
            .retain(|c| c.id != id);
    }
}

#[async_trait]
impl ConfigurationRepository for MemoryStore {
    async fn create(&self, input: CreateConfiguration) -> Result<DunningConfiguration> {
        let now = Utc::now();
        let mut tables = self.tables.write().await;

        if input.is_default {
            for existing in tables
                .configurations
                .iter_mut()
                .filter(|c| c.workspace_id == input.workspace_id && c.is_default)
            {
                existing.is_default = false;
                existing.updated_at = now;
            }
        }

        let configuration = DunningConfiguration {
            id: Uuid::now_v7(),
            workspace_id: input.workspace_id,
            name: input.name,
            max_retry_attempts: input.max_retry_attempts,
            retry_interval_days: input.retry_interval_days,
            attempt_actions: input.attempt_actions,
            final_action: input.final_action,
            final_action_config: input.final_action_config,
            grace_period_hours: input.grace_period_hours,
            is_default: input.is_default,
            is_active: input.is_active,
            schema_version: CONFIGURATION_SCHEMA_VERSION,
            created_at: now,
            updated_at: now,
        };
        tables.configurations.push(configuration.clone());

        Ok(configuration)
    }

    async fn get(&self, id: ConfigurationId) -> Result<Option<DunningConfiguration>> {
        let tables = self.tables.read().await;
        Ok(tables.configurations.iter().find(|c| c.id == id).cloned())
    }

    async fn list_by_workspace(
        &self,
        workspace_id: WorkspaceId,
    ) -> Result<Vec<DunningConfiguration>> {
        let tables = self.tables.read().await;
        Ok(tables
            .configurations
            .iter()
            .filter(|c| c.workspace_id == workspace_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CampaignRepository for MemoryStore {
    async fn create_if_absent(&self, input: NewCampaign) -> Result<Option<DunningCampaign>> {
        let mut tables = self.tables.write().await;

        if tables.target_taken(&input.target) {
            return Ok(None);
        }

        let campaign = DunningCampaign {
            id: Uuid::now_v7(),
            workspace_id: input.workspace_id,
            configuration_id: input.configuration_id,
            target: input.target,
            customer_id: input.customer_id,
            status: CampaignStatus::Active,
            current_attempt: 0,
            max_retry_attempts: input.max_retry_attempts,
            original_amount_cents: input.original_amount_cents,
            recovered_amount_cents: 0,
            currency: input.currency,
            next_retry_at: Some(input.next_retry_at),
            last_retry_at: None,
            final_action_taken: None,
            strategy: input.strategy,
            created_at: input.created_at,
            updated_at: input.created_at,
            completed_at: None,
        };
        tables.campaigns.push(campaign.clone());

        Ok(Some(campaign))
    }

    async fn get(&self, id: CampaignId) -> Result<Option<DunningCampaign>> {
        let tables = self.tables.read().await;
        Ok(tables.campaigns.iter().find(|c| c.id == id).cloned())
    }

    async fn get_detail(&self, id: CampaignId) -> Result<Option<CampaignDetail>> {
        let tables = self.tables.read().await;
        let Some(campaign) = tables.campaigns.iter().find(|c| c.id == id) else {
            return Ok(None);
        };
        // Inner join semantics: a campaign without its customer has no detail
        Ok(tables
            .customers
            .get(&campaign.customer_id)
            .map(|customer| CampaignDetail {
                campaign: campaign.clone(),
                customer_name: customer.name.clone(),
                customer_email: customer.email.clone(),
            }))
    }

    async fn find_open_for_subscription(
        &self,
        subscription_id: SubscriptionId,
    ) -> Result<Option<DunningCampaign>> {
        let tables = self.tables.read().await;
        Ok(tables
            .open_campaign_for(&CampaignTarget::Subscription(subscription_id))
            .cloned())
    }

    async fn find_open_for_payment(
        &self,
        payment_id: PaymentId,
    ) -> Result<Option<DunningCampaign>> {
        let tables = self.tables.read().await;
        Ok(tables
            .open_campaign_for(&CampaignTarget::Payment(payment_id))
            .cloned())
    }

    async fn find_latest_for_target(
        &self,
        target: CampaignTarget,
    ) -> Result<Option<DunningCampaign>> {
        let tables = self.tables.read().await;
        Ok(tables
            .campaigns
            .iter()
            .filter(|c| c.target == target)
            .max_by_key(|c| c.created_at)
            .cloned())
    }

    async fn list_by_workspace(
        &self,
        workspace_id: WorkspaceId,
        status: Option<CampaignStatus>,
    ) -> Result<Vec<DunningCampaign>> {
        let tables = self.tables.read().await;
        Ok(tables
            .campaigns
            .iter()
            .rev()
            .filter(|c| c.workspace_id == workspace_id)
            .filter(|c| status.map(|s| c.status == s).unwrap_or(true))
            .cloned()
            .collect())
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: i64,
        lease_until: DateTime<Utc>,
    ) -> Result<Vec<DunningCampaign>> {
        let mut tables = self.tables.write().await;

        let mut due: Vec<(DateTime<Utc>, CampaignId)> = tables
            .campaigns
            .iter()
            .filter(|c| c.is_due(now))
            .filter_map(|c| c.next_retry_at.map(|at| (at, c.id)))
            .collect();
        due.sort_by_key(|(at, _)| *at);
        due.truncate(usize::try_from(limit.max(0)).unwrap_or(0));

        let mut claimed = Vec::with_capacity(due.len());
        for (_, id) in due {
            if let Some(campaign) = tables.campaign_mut(id) {
                campaign.next_retry_at = Some(lease_until);
                campaign.updated_at = now;
                claimed.push(campaign.clone());
            }
        }

        Ok(claimed)
    }

    async fn record_progress(
        &self,
        id: CampaignId,
        progress: CampaignProgress,
    ) -> Result<Option<DunningCampaign>> {
        let mut tables = self.tables.write().await;
        Ok(tables
            .campaign_mut(id)
            .filter(|c| {
                c.status == CampaignStatus::Active && c.current_attempt < progress.current_attempt
            })
            .map(|c| {
                c.current_attempt = progress.current_attempt;
                c.last_retry_at = Some(progress.last_retry_at);
                c.next_retry_at = Some(progress.next_retry_at);
                c.updated_at = progress.last_retry_at;
                c.clone()
            }))
    }

    async fn mark_recovered(
        &self,
        id: CampaignId,
        recovered_amount_cents: i64,
        at: DateTime<Utc>,
    ) -> Result<Option<DunningCampaign>> {
        let mut tables = self.tables.write().await;
        Ok(tables
            .campaign_mut(id)
            .filter(|c| c.status.is_open())
            .map(|c| {
                c.status = CampaignStatus::Recovered;
                c.recovered_amount_cents = recovered_amount_cents;
                c.next_retry_at = None;
                c.last_retry_at = Some(at);
                c.completed_at = Some(at);
                c.updated_at = at;
                c.clone()
            }))
    }

    async fn mark_failed(
        &self,
        id: CampaignId,
        final_action: FinalAction,
        at: DateTime<Utc>,
    ) -> Result<Option<DunningCampaign>> {
        let mut tables = self.tables.write().await;
        Ok(tables
            .campaign_mut(id)
            .filter(|c| c.status.is_open())
            .map(|c| {
                c.status = CampaignStatus::Failed;
                c.final_action_taken = Some(final_action);
                c.next_retry_at = None;
                c.last_retry_at = Some(at);
                c.completed_at = Some(at);
                c.updated_at = at;
                c.clone()
            }))
    }

    async fn pause(&self, id: CampaignId, at: DateTime<Utc>) -> Result<Option<DunningCampaign>> {
        let mut tables = self.tables.write().await;
        Ok(tables
            .campaign_mut(id)
            .filter(|c| c.status == CampaignStatus::Active)
            .map(|c| {
                c.status = CampaignStatus::Paused;
                c.next_retry_at = None;
                c.updated_at = at;
                c.clone()
            }))
    }

    async fn resume(
        &self,
        id: CampaignId,
        next_retry_at: DateTime<Utc>,
    ) -> Result<Option<DunningCampaign>> {
        let mut tables = self.tables.write().await;
        Ok(tables
            .campaign_mut(id)
            .filter(|c| c.status == CampaignStatus::Paused)
            .map(|c| {
                c.status = CampaignStatus::Active;
                c.next_retry_at = Some(next_retry_at);
                c.updated_at = next_retry_at;
                c.clone()
            }))
    }

    async fn count_by_status(&self, workspace_id: WorkspaceId) -> Result<CampaignCounts> {
        let tables = self.tables.read().await;
        let mut counts = CampaignCounts::default();
        for campaign in tables
            .campaigns
            .iter()
            .filter(|c| c.workspace_id == workspace_id)
        {
            match campaign.status {
                CampaignStatus::Active => counts.active += 1,
                CampaignStatus::Paused => counts.paused += 1,
                CampaignStatus::Recovered => {
                    counts.recovered += 1;
                    counts.recovered_amount_cents += campaign.recovered_amount_cents;
                }
                CampaignStatus::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }
}

#[async_trait]
impl AttemptRepository for MemoryStore {
    async fn create(&self, input: NewAttempt) -> Result<DunningAttempt> {
        let mut tables = self.tables.write().await;

        if let Some(existing) = tables
            .attempts
            .iter()
            .find(|a| a.campaign_id == input.campaign_id && a.attempt_number == input.attempt_number)
        {
            if existing.status == AttemptStatus::Pending {
                return Ok(existing.clone());
            }
            return Err(Error::Duplicate(format!(
                "Attempt {} of campaign {} already completed",
                input.attempt_number, input.campaign_id
            )));
        }

        let attempt = DunningAttempt {
            id: Uuid::now_v7(),
            campaign_id: input.campaign_id,
            attempt_number: input.attempt_number,
            attempt_type: input.attempt_type,
            status: AttemptStatus::Pending,
            payment_error: None,
            transaction_reference: None,
            email_template_id: input.email_template_id,
            created_at: input.created_at,
            completed_at: None,
        };
        tables.attempts.push(attempt.clone());

        Ok(attempt)
    }

    async fn get(&self, id: AttemptId) -> Result<Option<DunningAttempt>> {
        let tables = self.tables.read().await;
        Ok(tables.attempts.iter().find(|a| a.id == id).cloned())
    }

    async fn complete(
        &self,
        id: AttemptId,
        completion: AttemptCompletion,
    ) -> Result<Option<DunningAttempt>> {
        if completion.status == AttemptStatus::Pending {
            return Err(Error::Validation(
                "An attempt cannot be completed as pending".to_string(),
            ));
        }

        let mut tables = self.tables.write().await;
        Ok(tables
            .attempts
            .iter_mut()
            .find(|a| a.id == id && a.completed_at.is_none())
            .map(|a| {
                a.status = completion.status;
                a.payment_error = completion.payment_error;
                a.transaction_reference = completion.transaction_reference;
                a.completed_at = Some(completion.completed_at);
                a.clone()
            }))
    }

    async fn list_by_campaign(&self, campaign_id: CampaignId) -> Result<Vec<DunningAttempt>> {
        let tables = self.tables.read().await;
        let mut attempts: Vec<DunningAttempt> = tables
            .attempts
            .iter()
            .filter(|a| a.campaign_id == campaign_id)
            .cloned()
            .collect();
        attempts.sort_by_key(|a| a.attempt_number);
        Ok(attempts)
    }
}

#[async_trait]
impl BillingRepository for MemoryStore {
    async fn get_subscription(&self, id: SubscriptionId) -> Result<Option<Subscription>> {
        Ok(self.tables.read().await.subscriptions.get(&id).cloned())
    }

    async fn get_customer(&self, id: CustomerId) -> Result<Option<Customer>> {
        Ok(self.tables.read().await.customers.get(&id).cloned())
    }

    async fn get_price(&self, id: PriceId) -> Result<Option<Price>> {
        Ok(self.tables.read().await.prices.get(&id).cloned())
    }

    async fn get_payment(&self, id: PaymentId) -> Result<Option<Payment>> {
        let tables = self.tables.read().await;
        Ok(tables.payments.iter().find(|p| p.id == id).cloned())
    }

    async fn list_failed_events(&self, since: DateTime<Utc>) -> Result<Vec<SubscriptionEvent>> {
        let tables = self.tables.read().await;
        let mut events: Vec<SubscriptionEvent> = tables
            .events
            .iter()
            .filter(|e| e.status == EventStatus::Failed && e.occurred_at >= since)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.occurred_at);
        Ok(events)
    }

    async fn count_events(&self, subscription_id: SubscriptionId) -> Result<EventCounts> {
        let tables = self.tables.read().await;
        let mut counts = EventCounts::default();
        for event in tables
            .events
            .iter()
            .filter(|e| e.subscription_id == subscription_id)
        {
            match event.status {
                EventStatus::Success => counts.successes += 1,
                EventStatus::Failed => counts.failures += 1,
            }
        }
        Ok(counts)
    }

    async fn record_event(&self, input: NewSubscriptionEvent) -> Result<SubscriptionEvent> {
        let event = SubscriptionEvent {
            id: Uuid::now_v7(),
            workspace_id: input.workspace_id,
            subscription_id: input.subscription_id,
            payment_id: input.payment_id,
            status: input.status,
            amount_cents: input.amount_cents,
            currency: input.currency,
            error_message: input.error_message,
            occurred_at: input.occurred_at,
        };
        self.tables.write().await.events.push(event.clone());
        Ok(event)
    }

    async fn list_failed_payments(&self, since: DateTime<Utc>) -> Result<Vec<Payment>> {
        let tables = self.tables.read().await;
        let mut payments: Vec<Payment> = tables
            .payments
            .iter()
            .filter(|p| {
                p.status == EventStatus::Failed
                    && p.subscription_id.is_none()
                    && p.created_at >= since
            })
            .cloned()
            .collect();
        payments.sort_by_key(|p| p.created_at);
        Ok(payments)
    }

    async fn cancel_subscription(
        &self,
        id: SubscriptionId,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<StateChange>> {
        let mut tables = self.tables.write().await;

        let subscription = tables
            .subscriptions
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("Subscription {} not found", id)))?;
        if subscription.status == SUBSCRIPTION_CANCELLED {
            return Ok(None);
        }

        let from_status =
            std::mem::replace(&mut subscription.status, SUBSCRIPTION_CANCELLED.to_string());
        subscription.cancel_at = Some(at);

        let change = StateChange {
            id: Uuid::now_v7(),
            subscription_id: id,
            from_status,
            to_status: SUBSCRIPTION_CANCELLED.to_string(),
            reason: reason.to_string(),
            created_at: at,
        };
        tables.state_changes.push(change.clone());

        Ok(Some(change))
    }

    async fn list_state_changes(
        &self,
        subscription_id: SubscriptionId,
    ) -> Result<Vec<StateChange>> {
        let tables = self.tables.read().await;
        Ok(tables
            .state_changes
            .iter()
            .filter(|c| c.subscription_id == subscription_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl EmailTemplateRepository for MemoryStore {
    async fn get(&self, id: EmailTemplateId) -> Result<Option<EmailTemplate>> {
        let tables = self.tables.read().await;
        Ok(tables.templates.iter().find(|t| t.id == id).cloned())
    }

    async fn get_by_type(
        &self,
        workspace_id: WorkspaceId,
        template_type: EmailTemplateType,
    ) -> Result<Option<EmailTemplate>> {
        let tables = self.tables.read().await;
        Ok(tables
            .templates
            .iter()
            .rev()
            .find(|t| t.workspace_id == workspace_id && t.template_type == template_type)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use pretty_assertions::assert_eq;
    use recoup_common::types::AttemptType;

    fn new_campaign(target: CampaignTarget, due: DateTime<Utc>) -> NewCampaign {
        NewCampaign {
            workspace_id: Uuid::new_v4(),
            configuration_id: Uuid::new_v4(),
            target,
            customer_id: Uuid::new_v4(),
            max_retry_attempts: 3,
            original_amount_cents: 1999,
            currency: "USD".to_string(),
            next_retry_at: due,
            strategy: None,
            created_at: Utc::now(),
        }
    }

    fn configuration(workspace_id: WorkspaceId, name: &str, is_default: bool) -> CreateConfiguration {
        CreateConfiguration {
            workspace_id,
            name: name.to_string(),
            max_retry_attempts: 3,
            retry_interval_days: vec![1, 3, 7],
            attempt_actions: vec![],
            final_action: FinalAction::Cancel,
            final_action_config: serde_json::json!({}),
            grace_period_hours: 0,
            is_default,
            is_active: true,
        }
    }

    #[tokio::test]
    async fn test_create_if_absent_rejects_second_open_campaign() {
        let store = MemoryStore::new();
        let target = CampaignTarget::Subscription(Uuid::new_v4());

        let first = store
            .create_if_absent(new_campaign(target, Utc::now()))
            .await
            .unwrap();
        assert!(first.is_some());

        let second = store
            .create_if_absent(new_campaign(target, Utc::now()))
            .await
            .unwrap();
        assert!(second.is_none());

        // A finished campaign no longer blocks a new one
        let first = first.unwrap();
        store
            .mark_recovered(first.id, 1999, Utc::now())
            .await
            .unwrap();
        let third = store
            .create_if_absent(new_campaign(target, Utc::now()))
            .await
            .unwrap();
        assert!(third.is_some());
    }

    #[tokio::test]
    async fn test_payment_is_dunned_once_whatever_the_outcome() {
        let store = MemoryStore::new();
        let target = CampaignTarget::Payment(Uuid::new_v4());
        let created_at = Utc::now() - Duration::hours(3);

        let mut input = new_campaign(target, Utc::now());
        input.created_at = created_at;
        let first = store.create_if_absent(input).await.unwrap().unwrap();
        assert_eq!(first.created_at, created_at);
        assert_eq!(first.updated_at, created_at);

        store
            .mark_recovered(first.id, 1999, Utc::now())
            .await
            .unwrap();
        assert!(store
            .create_if_absent(new_campaign(target, Utc::now()))
            .await
            .unwrap()
            .is_none());

        let latest = store.find_latest_for_target(target).await.unwrap().unwrap();
        assert_eq!(latest.id, first.id);
        assert_eq!(latest.status, CampaignStatus::Recovered);
    }

    #[tokio::test]
    async fn test_find_latest_for_target_picks_newest() {
        let store = MemoryStore::new();
        let target = CampaignTarget::Subscription(Uuid::new_v4());
        let now = Utc::now();

        let mut older = new_campaign(target, now);
        older.created_at = now - Duration::days(2);
        let older = store.create_if_absent(older).await.unwrap().unwrap();
        store.mark_failed(older.id, FinalAction::Cancel, now).await.unwrap();

        let newer = store
            .create_if_absent(new_campaign(target, now))
            .await
            .unwrap()
            .unwrap();

        let latest = store.find_latest_for_target(target).await.unwrap().unwrap();
        assert_eq!(latest.id, newer.id);
        assert!(store
            .find_latest_for_target(CampaignTarget::Subscription(Uuid::new_v4()))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_concurrent_create_if_absent_inserts_once() {
        let store = MemoryStore::new();
        let target = CampaignTarget::Payment(Uuid::new_v4());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .create_if_absent(new_campaign(target, Utc::now()))
                    .await
                    .unwrap()
            }));
        }

        let mut created = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                created += 1;
            }
        }
        assert_eq!(created, 1);
    }

    #[tokio::test]
    async fn test_default_configuration_switch() {
        let store = MemoryStore::new();
        let workspace = Uuid::new_v4();

        let first = ConfigurationRepository::create(&store, configuration(workspace, "a", true))
            .await
            .unwrap();
        let second = ConfigurationRepository::create(&store, configuration(workspace, "b", true))
            .await
            .unwrap();

        let all = ConfigurationRepository::list_by_workspace(&store, workspace)
            .await
            .unwrap();
        let defaults: Vec<_> = all.iter().filter(|c| c.is_default).map(|c| c.id).collect();
        assert_eq!(defaults, vec![second.id]);
        assert_eq!(all[0].id, first.id);
    }

    #[tokio::test]
    async fn test_claim_due_orders_and_leases() {
        let store = MemoryStore::new();
        let now = Utc::now();

        let late = store
            .create_if_absent(new_campaign(
                CampaignTarget::Subscription(Uuid::new_v4()),
                now - Duration::hours(1),
            ))
            .await
            .unwrap()
            .unwrap();
        let early = store
            .create_if_absent(new_campaign(
                CampaignTarget::Subscription(Uuid::new_v4()),
                now - Duration::hours(5),
            ))
            .await
            .unwrap()
            .unwrap();
        store
            .create_if_absent(new_campaign(
                CampaignTarget::Subscription(Uuid::new_v4()),
                now + Duration::hours(1),
            ))
            .await
            .unwrap();

        let lease = now + Duration::minutes(10);
        let claimed = store.claim_due(now, 10, lease).await.unwrap();
        let ids: Vec<_> = claimed.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![early.id, late.id]);
        assert!(claimed.iter().all(|c| c.next_retry_at == Some(lease)));

        // Leased campaigns are hidden from an overlapping claim
        assert!(store.claim_due(now, 10, lease).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_record_progress_never_moves_backwards() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let campaign = store
            .create_if_absent(new_campaign(CampaignTarget::Subscription(Uuid::new_v4()), now))
            .await
            .unwrap()
            .unwrap();

        let progress = |attempt| CampaignProgress {
            current_attempt: attempt,
            last_retry_at: now,
            next_retry_at: now + Duration::days(1),
        };

        assert!(store
            .record_progress(campaign.id, progress(2))
            .await
            .unwrap()
            .is_some());
        assert!(store
            .record_progress(campaign.id, progress(1))
            .await
            .unwrap()
            .is_none());
        let stored = CampaignRepository::get(&store, campaign.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.current_attempt, 2);
    }

    #[tokio::test]
    async fn test_attempt_create_resumes_pending_and_rejects_completed() {
        let store = MemoryStore::new();
        let campaign_id = Uuid::new_v4();
        let input = NewAttempt {
            campaign_id,
            attempt_number: 1,
            attempt_type: AttemptType::Payment,
            email_template_id: None,
            created_at: Utc::now(),
        };

        let first = AttemptRepository::create(&store, input.clone()).await.unwrap();
        let again = AttemptRepository::create(&store, input.clone()).await.unwrap();
        assert_eq!(first.id, again.id);

        store
            .complete(
                first.id,
                AttemptCompletion {
                    status: AttemptStatus::Failed,
                    payment_error: Some("card declined".to_string()),
                    transaction_reference: None,
                    completed_at: Utc::now(),
                },
            )
            .await
            .unwrap();

        assert!(matches!(
            AttemptRepository::create(&store, input).await,
            Err(Error::Duplicate(_))
        ));
    }

    #[tokio::test]
    async fn test_cancel_subscription_writes_audit_once() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();
        store
            .insert_subscription(Subscription {
                id,
                workspace_id: Uuid::new_v4(),
                customer_id: Uuid::new_v4(),
                price_id: Uuid::new_v4(),
                status: "past_due".to_string(),
                current_period_end: Utc::now(),
                cancel_at: None,
                created_at: Utc::now(),
            })
            .await;

        let at = Utc::now();
        let change = store
            .cancel_subscription(id, "dunning exhausted", at)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(change.from_status, "past_due");
        assert_eq!(change.to_status, SUBSCRIPTION_CANCELLED);

        assert!(store
            .cancel_subscription(id, "dunning exhausted", at)
            .await
            .unwrap()
            .is_none());
        assert_eq!(store.list_state_changes(id).await.unwrap().len(), 1);

        let subscription = store.get_subscription(id).await.unwrap().unwrap();
        assert_eq!(subscription.cancel_at, Some(at));
    }
}
