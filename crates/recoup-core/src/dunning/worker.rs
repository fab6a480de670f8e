//! Dunning Worker - Drives the failure monitors and the retry engine on a timer

use super::engine::{BatchReport, RetryEngine};
use crate::error::Result;
use chrono::Duration;
use recoup_common::config::EngineConfig;
use std::sync::Arc;
use tokio::time::{interval, Duration as TokioDuration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Dunning Worker
pub struct DunningWorker {
    engine: Arc<RetryEngine>,
    config: EngineConfig,
}

impl DunningWorker {
    /// Create a new dunning worker
    pub fn new(engine: Arc<RetryEngine>, config: EngineConfig) -> Self {
        Self { engine, config }
    }

    /// Run until `cancel` fires. A tick in progress finishes its current
    /// campaign before the worker exits.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = interval(TokioDuration::from_secs(self.config.poll_interval_secs.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Dunning worker started (batch: {}, interval: {}s, monitors: {})",
            self.config.batch_size, self.config.poll_interval_secs, self.config.monitors_enabled
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.tick(&cancel).await {
                        error!("Error processing due dunning campaigns: {}", e);
                    }
                }
            }
        }

        info!("Dunning worker stopped");
    }

    /// One pass: detect new failures, then process due campaigns. Each
    /// monitor pass is skipped once `cancel` has fired.
    pub async fn tick(&self, cancel: &CancellationToken) -> Result<BatchReport> {
        if self.config.monitors_enabled {
            let lookback = Duration::hours(self.config.lookback_hours);

            if !cancel.is_cancelled() {
                if let Err(e) = self.engine.monitor_failed_subscriptions(lookback).await {
                    error!("Error monitoring failed subscriptions: {}", e);
                }
            }
            if !cancel.is_cancelled() {
                if let Err(e) = self.engine.monitor_failed_payments(lookback).await {
                    error!("Error monitoring failed payments: {}", e);
                }
            }
        }

        self.engine
            .process_due_campaigns(self.config.batch_size, cancel)
            .await
    }
}
