//! Shared fixtures for engine tests: an in-memory store seeded with one
//! customer and subscription, a manual clock and scripted collaborators

use crate::dunning::{
    ActionTable, CampaignService, CreateCampaign, FailureDetector, Repositories, RetryEngine,
};
use crate::email::{EmailContext, EmailSender};
use crate::payment::{
    PaymentClient, PaymentError, PaymentReceipt, PaymentRequest, SUCCESS_STATUSES,
};
use crate::rates::RateSource;
use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use recoup_common::types::{
    CustomerId, EmailTemplateType, EventStatus, FinalAction, PaymentId, SubscriptionId,
    WorkspaceId,
};
use recoup_common::{Clock, ManualClock};
use recoup_storage::models::{
    CampaignTarget, CreateConfiguration, Customer, DunningCampaign, DunningConfiguration,
    EmailTemplate, NewSubscriptionEvent, Payment, Price, StateChange, Subscription,
};
use recoup_storage::repository::BillingRepository;
use recoup_storage::MemoryStore;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Payment client answering from a script; declines once the script runs dry
#[derive(Debug, Default)]
pub struct ScriptedPayments {
    script: Mutex<VecDeque<std::result::Result<String, PaymentError>>>,
    requests: Mutex<Vec<PaymentRequest>>,
}

impl ScriptedPayments {
    pub fn push_status(&self, status: &str) {
        self.script.lock().unwrap().push_back(Ok(status.to_string()));
    }

    pub fn push_error(&self, error: PaymentError) {
        self.script.lock().unwrap().push_back(Err(error));
    }

    pub fn requests(&self) -> Vec<PaymentRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentClient for ScriptedPayments {
    async fn process_payment(
        &self,
        request: &PaymentRequest,
    ) -> std::result::Result<PaymentReceipt, PaymentError> {
        self.requests.lock().unwrap().push(request.clone());
        let next = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok("failed".to_string()));

        let status = next?;
        let declined = !SUCCESS_STATUSES.contains(&status.as_str());
        Ok(PaymentReceipt {
            transaction_reference: format!("tx-{}", request.idempotency_key),
            status,
            resource_usage: None,
            block_reference: None,
            error_message: declined.then(|| "card_declined".to_string()),
        })
    }
}

/// Email sender recording what it was asked to send
#[derive(Debug, Default)]
pub struct RecordingEmails {
    sent: Mutex<Vec<(EmailTemplateType, String)>>,
    fail: Mutex<bool>,
}

impl RecordingEmails {
    pub fn sent(&self) -> Vec<(EmailTemplateType, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn fail_sends(&self) {
        *self.fail.lock().unwrap() = true;
    }
}

#[async_trait]
impl EmailSender for RecordingEmails {
    async fn send_dunning_email(
        &self,
        template: &EmailTemplate,
        _context: &EmailContext,
        recipient: &str,
    ) -> recoup_common::Result<()> {
        if *self.fail.lock().unwrap() {
            return Err(recoup_common::Error::Email("relay refused".to_string()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((template.template_type, recipient.to_string()));
        Ok(())
    }
}

/// Rate source with one fixed rate for every pair
#[derive(Debug)]
pub struct FixedRate(pub f64);

#[async_trait]
impl RateSource for FixedRate {
    async fn rate(&self, _from: &str, _to: &str) -> recoup_common::Result<f64> {
        Ok(self.0)
    }
}

pub struct Harness {
    pub store: MemoryStore,
    pub clock: ManualClock,
    pub service: Arc<CampaignService>,
    pub actions: Arc<ActionTable>,
    pub detector: Arc<FailureDetector>,
    pub engine: Arc<RetryEngine>,
    pub payments: Arc<ScriptedPayments>,
    pub emails: Arc<RecordingEmails>,
    pub workspace_id: WorkspaceId,
    pub customer_id: CustomerId,
    pub customer_email: String,
    pub subscription_id: SubscriptionId,
    pub price_cents: i64,
    pub currency: String,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_currency("USD").await
    }

    /// Harness whose subscription is priced in `currency`; payments settle in USD
    pub async fn with_currency(currency: &str) -> Self {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        let store = MemoryStore::new();

        let workspace_id = Uuid::new_v4();
        let customer_id = Uuid::new_v4();
        let price_id = Uuid::new_v4();
        let subscription_id = Uuid::new_v4();
        let customer_email = "ada@example.com".to_string();
        let price_cents = 2_900;

        store
            .insert_customer(Customer {
                id: customer_id,
                workspace_id,
                name: Some("Ada Lovelace".to_string()),
                email: customer_email.clone(),
            })
            .await;
        store
            .insert_price(Price {
                id: price_id,
                workspace_id,
                amount_cents: price_cents,
                currency: currency.to_string(),
            })
            .await;
        store
            .insert_subscription(Subscription {
                id: subscription_id,
                workspace_id,
                customer_id,
                price_id,
                status: "past_due".to_string(),
                current_period_end: start + Duration::days(20),
                cancel_at: None,
                created_at: start - Duration::days(300),
            })
            .await;

        let repos = Repositories::in_memory(&store);
        let shared_clock: Arc<dyn Clock> = Arc::new(clock.clone());
        let service = Arc::new(CampaignService::new(repos.clone(), shared_clock));

        let payments = Arc::new(ScriptedPayments::default());
        let emails = Arc::new(RecordingEmails::default());
        let actions = Arc::new(ActionTable::new(
            payments.clone(),
            emails.clone(),
            repos.templates.clone(),
            Arc::new(FixedRate(1.1)),
            "USD",
        ));
        let detector = Arc::new(FailureDetector::new(service.clone(), repos.billing.clone()));
        let engine = Arc::new(
            RetryEngine::new(service.clone(), actions.clone(), detector.clone())
                .with_claim_lease(Duration::minutes(5)),
        );

        Self {
            store,
            clock,
            service,
            actions,
            detector,
            engine,
            payments,
            emails,
            workspace_id,
            customer_id,
            customer_email,
            subscription_id,
            price_cents,
            currency: currency.to_string(),
        }
    }

    /// Configuration input for the harness workspace with a one hour grace period
    pub fn configuration_input(&self, max: i32, intervals: Vec<i32>) -> CreateConfiguration {
        CreateConfiguration {
            workspace_id: self.workspace_id,
            name: format!("{} attempts", max),
            max_retry_attempts: max,
            retry_interval_days: intervals,
            attempt_actions: Vec::new(),
            final_action: FinalAction::Cancel,
            final_action_config: serde_json::json!({}),
            grace_period_hours: 1,
            is_default: false,
            is_active: true,
        }
    }

    pub async fn configuration(&self, max: i32, intervals: Vec<i32>) -> DunningConfiguration {
        self.service
            .create_configuration(self.configuration_input(max, intervals))
            .await
            .unwrap()
    }

    /// A due campaign for the harness subscription that has already run
    /// `current_attempt` attempts
    pub async fn campaign(
        &self,
        max: i32,
        intervals: Vec<i32>,
        current_attempt: i32,
    ) -> DunningCampaign {
        let configuration = self.configuration(max, intervals).await;
        self.campaign_with(&configuration, current_attempt).await
    }

    pub async fn campaign_with(
        &self,
        configuration: &DunningConfiguration,
        current_attempt: i32,
    ) -> DunningCampaign {
        let mut campaign = self
            .service
            .create_campaign(CreateCampaign {
                configuration_id: configuration.id,
                target: CampaignTarget::Subscription(self.subscription_id),
                amount_cents: None,
                currency: None,
                strategy: None,
            })
            .await
            .unwrap();

        campaign.current_attempt = current_attempt;
        campaign.next_retry_at = Some(self.clock.now());
        self.store.put_campaign(campaign.clone()).await;
        campaign
    }

    /// A failed one-off payment of the harness customer
    pub async fn failed_payment(&self, amount_cents: i64) -> PaymentId {
        let id = Uuid::new_v4();
        self.store
            .insert_payment(Payment {
                id,
                workspace_id: self.workspace_id,
                customer_id: self.customer_id,
                subscription_id: None,
                amount_cents,
                currency: self.currency.clone(),
                status: EventStatus::Failed,
                error_message: Some("insufficient_funds".to_string()),
                created_at: self.clock.now(),
            })
            .await;
        id
    }

    /// A billing event for the harness subscription that happened `ago` before now
    pub async fn event(&self, status: EventStatus, ago: Duration) {
        self.record_event(self.subscription_id, status, ago).await;
    }

    /// A failed event for a subscription that does not exist
    pub async fn orphan_event(&self) {
        self.record_event(Uuid::new_v4(), EventStatus::Failed, Duration::minutes(5))
            .await;
    }

    async fn record_event(&self, subscription_id: SubscriptionId, status: EventStatus, ago: Duration) {
        BillingRepository::record_event(
            &self.store,
            NewSubscriptionEvent {
                workspace_id: self.workspace_id,
                subscription_id,
                payment_id: None,
                status,
                amount_cents: self.price_cents,
                currency: self.currency.clone(),
                error_message: None,
                occurred_at: self.clock.now() - ago,
            },
        )
        .await
        .unwrap();
    }

    pub async fn template(&self, template_type: EmailTemplateType) -> EmailTemplate {
        let template = EmailTemplate {
            id: Uuid::new_v4(),
            workspace_id: self.workspace_id,
            template_type,
            subject: "Payment of {{amount}} {{currency}} failed".to_string(),
            html_body: Some("<p>Hi {{first_name}}, update your card at {{billing_url}}</p>".to_string()),
            text_body: Some("Hi {{first_name}}, update your card at {{billing_url}}".to_string()),
            created_at: self.clock.now(),
        };
        self.store.insert_template(template.clone()).await;
        template
    }

    pub async fn subscription(&self) -> Subscription {
        BillingRepository::get_subscription(&self.store, self.subscription_id)
            .await
            .unwrap()
            .unwrap()
    }

    pub async fn state_changes(&self) -> Vec<StateChange> {
        BillingRepository::list_state_changes(&self.store, self.subscription_id)
            .await
            .unwrap()
    }
}
