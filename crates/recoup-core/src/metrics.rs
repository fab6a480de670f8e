//! Prometheus metrics for the dunning engine

use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

/// Counters describing campaign activity, kept on a private registry
#[derive(Clone)]
pub struct DunningMetrics {
    registry: Registry,
    campaigns_opened: IntCounterVec,
    attempts: IntCounterVec,
    campaigns_finished: IntCounterVec,
    recovered_amount_cents: IntCounter,
    campaign_errors: IntCounter,
    emails: IntCounterVec,
}

impl DunningMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("recoup".to_string()), None)?;

        let campaigns_opened = IntCounterVec::new(
            Opts::new("campaigns_opened_total", "Dunning campaigns opened"),
            &["target"],
        )?;
        let attempts = IntCounterVec::new(
            Opts::new("attempts_total", "Dunning attempts by result"),
            &["result"],
        )?;
        let campaigns_finished = IntCounterVec::new(
            Opts::new("campaigns_finished_total", "Campaigns that reached a terminal state"),
            &["outcome"],
        )?;
        let recovered_amount_cents = IntCounter::new(
            "recovered_amount_cents_total",
            "Amount recovered by dunning, in minor units of the campaign currency",
        )?;
        let campaign_errors = IntCounter::new(
            "campaign_errors_total",
            "Campaigns whose processing returned an error",
        )?;
        let emails = IntCounterVec::new(
            Opts::new("emails_total", "Dunning emails by result"),
            &["result"],
        )?;

        registry.register(Box::new(campaigns_opened.clone()))?;
        registry.register(Box::new(attempts.clone()))?;
        registry.register(Box::new(campaigns_finished.clone()))?;
        registry.register(Box::new(recovered_amount_cents.clone()))?;
        registry.register(Box::new(campaign_errors.clone()))?;
        registry.register(Box::new(emails.clone()))?;

        Ok(Self {
            registry,
            campaigns_opened,
            attempts,
            campaigns_finished,
            recovered_amount_cents,
            campaign_errors,
            emails,
        })
    }

    pub fn campaign_opened(&self, target: &str) {
        self.campaigns_opened.with_label_values(&[target]).inc();
    }

    pub fn attempt_completed(&self, success: bool) {
        let result = if success { "success" } else { "failed" };
        self.attempts.with_label_values(&[result]).inc();
    }

    pub fn campaign_recovered(&self, amount_cents: i64) {
        self.campaigns_finished.with_label_values(&["recovered"]).inc();
        self.recovered_amount_cents
            .inc_by(u64::try_from(amount_cents).unwrap_or(0));
    }

    pub fn campaign_exhausted(&self) {
        self.campaigns_finished.with_label_values(&["failed"]).inc();
    }

    pub fn campaign_error(&self) {
        self.campaign_errors.inc();
    }

    pub fn email(&self, result: &str) {
        self.emails.with_label_values(&[result]).inc();
    }

    /// Text exposition format of every registered metric
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!(error = %e, "Failed to encode metrics");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl std::fmt::Debug for DunningMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DunningMetrics").finish_non_exhaustive()
    }
}
