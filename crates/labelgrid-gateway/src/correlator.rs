//! Result correlator — drains the result queue into the wait registry.
//!
//! Each message is handed to the registry before it is acked, so a crash
//! between the two only causes a redelivery, which the registry absorbs.

use std::sync::Arc;
use std::time::Duration;

use labelgrid_core::config::CorrelatorConfig;
use labelgrid_core::{BackendResult, ClassifyResult, MessageQueue, ReceivedMessage};
use labelgrid_metrics::{DeliveryOutcome, PipelineMetrics};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::registry::{Resolution, WaitRegistry};

pub struct ResultCorrelator {
    results: Arc<dyn MessageQueue>,
    registry: Arc<WaitRegistry>,
    config: CorrelatorConfig,
    metrics: Arc<PipelineMetrics>,
}

impl ResultCorrelator {
    pub fn new(
        results: Arc<dyn MessageQueue>,
        registry: Arc<WaitRegistry>,
        config: CorrelatorConfig,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            results,
            registry,
            config,
            metrics,
        }
    }

    /// Receive one batch and route every message. Returns the batch size.
    pub async fn poll_once(&self) -> BackendResult<usize> {
        let batch = self
            .results
            .receive(self.config.batch_size, self.config.visibility_timeout())
            .await?;

        for message in &batch {
            self.route(message);
            // A failed ack means redelivery, which resolves to an orphan.
            if let Err(e) = self.results.ack(&message.receipt).await {
                warn!(receipt = %message.receipt, error = %e, "failed to ack result");
            }
        }
        Ok(batch.len())
    }

    fn route(&self, message: &ReceivedMessage) {
        let result = match ClassifyResult::parse(&message.body) {
            Ok(result) => result,
            Err(e) => {
                warn!(body = %message.body, error = %e, "dropping malformed result");
                self.metrics.record_delivery(DeliveryOutcome::Malformed);
                return;
            }
        };

        let task_id = result.task_id.clone();
        match self.registry.resolve(result) {
            Resolution::Delivered => {
                debug!(%task_id, "result delivered");
                self.metrics.record_delivery(DeliveryOutcome::Delivered);
            }
            Resolution::Orphaned => {
                debug!(%task_id, "no caller waiting; result orphaned");
                self.metrics.record_delivery(DeliveryOutcome::Orphaned);
            }
        }
    }

    fn sweep(&self) {
        let swept = self.registry.sweep_orphans();
        if swept > 0 {
            info!(swept, "discarded expired orphaned results");
            self.metrics.record_swept(swept);
        }
    }

    /// Run until `shutdown` flips. Queue errors back off and retry.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            queue = %self.results.name(),
            batch_size = self.config.batch_size,
            "result correlator started"
        );

        let mut sweep = tokio::time::interval(self.config.sweep_interval());
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let pause = match self.poll_once().await {
                Ok(0) => self.config.idle_interval(),
                Ok(_) => Duration::ZERO,
                Err(e) => {
                    warn!(error = %e, "result queue poll failed; backing off");
                    self.config.retry_backoff()
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = sweep.tick() => self.sweep(),
                _ = shutdown.changed() => {
                    info!("result correlator shutting down");
                    break;
                }
            }
        }
    }
}
