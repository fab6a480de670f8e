//! Recoup - Dunning engine entry point

use anyhow::Result;
use recoup_common::config::{Config, LoggingConfig};
use recoup_common::{Clock, SystemClock};
use recoup_core::{
    ActionTable, CachedRateSource, CampaignService, DunningMetrics, DunningWorker,
    FailureDetector, HttpPaymentClient, HttpRateSource, Repositories, RetryEngine,
    SmtpEmailSender, TtlCache,
};
use recoup_storage::db::DatabasePool;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    init_logging(&config.logging);

    info!("Starting Recoup dunning engine...");

    // Initialize database
    let db_pool = DatabasePool::new(&config.database).await?;

    if config.database.run_migrations {
        db_pool.migrate().await?;
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let repos = Repositories::postgres(&db_pool);
    let metrics = Arc::new(DunningMetrics::new()?);

    // Collaborators
    let payments = Arc::new(HttpPaymentClient::new(config.payment.clone())?);
    let emails = Arc::new(SmtpEmailSender::new(config.email.clone())?);
    let rates = Arc::new(CachedRateSource::new(
        Arc::new(HttpRateSource::new(&config.rates)?),
        TtlCache::new(chrono::Duration::seconds(config.rates.ttl_secs), clock.clone()),
    ));

    let service = Arc::new(CampaignService::new(repos.clone(), clock));
    let actions = Arc::new(
        ActionTable::new(
            payments,
            emails,
            repos.templates.clone(),
            rates,
            config.payment.settlement_currency.clone(),
        )
        .with_metrics(metrics.clone()),
    );
    let detector = Arc::new(
        FailureDetector::new(service.clone(), repos.billing.clone()).with_metrics(metrics.clone()),
    );
    let engine = Arc::new(
        RetryEngine::new(service, actions, detector)
            .with_claim_lease(chrono::Duration::seconds(config.engine.claim_lease_secs))
            .with_metrics(metrics.clone()),
    );

    // Start the worker
    let cancel = CancellationToken::new();
    let worker_handle = {
        let worker = DunningWorker::new(engine, config.engine.clone());
        let cancel = cancel.clone();
        tokio::spawn(async move {
            worker.run(cancel).await;
        })
    };

    info!("Recoup started successfully");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    // Let the campaign in progress finish
    cancel.cancel();
    worker_handle.await?;

    debug!("Final metrics:\n{}", metrics.render());
    info!("Recoup shutdown complete");

    Ok(())
}

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},recoup=debug", config.level)));

    let registry = tracing_subscriber::registry().with(filter);
    if config.format == "json" {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    }
}
