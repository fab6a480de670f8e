//! Dunning - Failed payment recovery campaigns
//!
//! The [`FailureDetector`] opens campaigns, the [`RetryEngine`] runs their
//! attempts through the [`ActionTable`], and the [`DunningWorker`] drives
//! both on a timer. Every state change goes through the [`CampaignService`].

pub mod actions;
pub mod detector;
pub mod engine;
pub mod policy;
pub mod service;
pub mod strategy;
pub mod worker;

pub use actions::{ActionContext, ActionOutcome, ActionTable, EmailOutcome, PaymentOutcome};
pub use detector::{
    DetectionEntry, DetectionOutcome, DetectionReport, FailedPaymentWebhook, FailureDetector,
};
pub use engine::{BatchReport, CampaignOutcome, RetryEngine, Transition, NO_PAYMENT_RETRY};
pub use policy::{AttemptPlan, RetryPolicy};
pub use service::{CampaignService, CampaignStats, CreateCampaign, Repositories};
pub use worker::DunningWorker;
