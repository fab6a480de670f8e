//! Recoup Core - Failed-payment recovery engine
//!
//! This crate provides failure detection, the dunning campaign state
//! machine, the periodic retry engine, and the payment, email and
//! exchange-rate collaborators the engine drives.

pub mod dunning;
pub mod email;
pub mod error;
pub mod metrics;
pub mod payment;
pub mod rates;

#[cfg(test)]
pub(crate) mod testing;

pub use dunning::{
    ActionTable, BatchReport, CampaignOutcome, CampaignService, DetectionOutcome,
    DetectionReport, DunningWorker, FailedPaymentWebhook, FailureDetector, Repositories,
    RetryEngine, RetryPolicy, Transition,
};
pub use email::{EmailContext, EmailSender, SmtpEmailSender, TemplateRenderer};
pub use error::{DunningError, Result};
pub use metrics::DunningMetrics;
pub use payment::{HttpPaymentClient, PaymentClient, PaymentError, PaymentReceipt, PaymentRequest};
pub use rates::{CachedRateSource, HttpRateSource, RateQuote, RateSource, TtlCache};
