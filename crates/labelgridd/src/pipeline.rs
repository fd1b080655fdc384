//! Pipeline assembly — one process hosting every component.
//!
//! ```text
//! client ─► API ─► RequestGateway ─► input bucket + task queue
//!                                          │
//!            LocalFleet ◄── Autoscaler ◄───┤ depth
//!               │                          ▼
//!               └─ Worker per instance ─► output bucket + result queue
//!                                          │
//! client ◄─ API ◄─ WaitRegistry ◄── ResultCorrelator
//! ```
//!
//! Components only share the queues, the buckets and the fleet; none of
//! them calls another directly.

use std::future::Future;
use std::sync::Arc;

use axum::Router;
use labelgrid_api::ApiState;
use labelgrid_autoscale::{Autoscaler, InstanceId, InstanceTemplate, LocalFleet, SpawnFn};
use labelgrid_core::{BlobStore, BoxFuture, MessageQueue, PipelineConfig};
use labelgrid_gateway::{RequestGateway, ResultCorrelator, WaitRegistry};
use labelgrid_metrics::PipelineMetrics;
use labelgrid_state::StateStore;
use labelgrid_worker::{Classifier, Worker};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

/// Every long-lived component of a running pipeline.
pub struct Pipeline {
    config: PipelineConfig,
    metrics: Arc<PipelineMetrics>,
    registry: Arc<WaitRegistry>,
    gateway: Arc<RequestGateway>,
    correlator: Arc<ResultCorrelator>,
    autoscaler: Arc<Autoscaler>,
    fleet: Arc<LocalFleet>,
    tasks: Arc<dyn MessageQueue>,
    results: Arc<dyn MessageQueue>,
}

impl Pipeline {
    /// Wire every component onto the buckets and queues named in `config`.
    pub fn new(config: PipelineConfig, store: &StateStore, classifier: Arc<dyn Classifier>) -> Self {
        let storage = &config.storage;
        let inputs: Arc<dyn BlobStore> = Arc::new(store.bucket(&storage.input_bucket));
        let outputs: Arc<dyn BlobStore> = Arc::new(store.bucket(&storage.output_bucket));
        let tasks: Arc<dyn MessageQueue> = Arc::new(store.queue(&storage.task_queue));
        let results: Arc<dyn MessageQueue> = Arc::new(store.queue(&storage.result_queue));

        let metrics = Arc::new(PipelineMetrics::new());
        let registry = Arc::new(WaitRegistry::new(config.correlator.orphan_ttl()));

        let gateway = Arc::new(RequestGateway::new(
            Arc::clone(&inputs),
            Arc::clone(&tasks),
            Arc::clone(&registry),
            config.server.request_timeout(),
            Arc::clone(&metrics),
        ));
        let correlator = Arc::new(ResultCorrelator::new(
            Arc::clone(&results),
            Arc::clone(&registry),
            config.correlator.clone(),
            Arc::clone(&metrics),
        ));

        let spawn_fn: SpawnFn = {
            let tasks = Arc::clone(&tasks);
            let results = Arc::clone(&results);
            let metrics = Arc::clone(&metrics);
            let worker_config = config.worker.clone();
            Arc::new(
                move |id: InstanceId, shutdown: watch::Receiver<bool>| -> BoxFuture<'static, ()> {
                    let worker = Worker::new(
                        id.0,
                        Arc::clone(&tasks),
                        Arc::clone(&results),
                        Arc::clone(&inputs),
                        Arc::clone(&outputs),
                        Arc::clone(&classifier),
                        worker_config.clone(),
                        Arc::clone(&metrics),
                    );
                    Box::pin(async move { worker.run(shutdown).await })
                },
            )
        };
        let fleet = Arc::new(LocalFleet::new(
            InstanceTemplate {
                image: config.autoscale.image.clone(),
                tag: config.autoscale.tag.clone(),
                boot_delay: config.autoscale.boot_delay(),
            },
            spawn_fn,
        ));

        let autoscaler = Arc::new(Autoscaler::new(
            Arc::clone(&tasks),
            Arc::clone(&fleet) as Arc<dyn labelgrid_autoscale::Fleet>,
            config.autoscale.max_instances,
            Arc::clone(&metrics),
        ));

        Self {
            config,
            metrics,
            registry,
            gateway,
            correlator,
            autoscaler,
            fleet,
            tasks,
            results,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<WaitRegistry> {
        &self.registry
    }

    pub fn fleet(&self) -> &Arc<LocalFleet> {
        &self.fleet
    }

    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.metrics
    }

    /// HTTP router over this pipeline's gateway.
    pub fn router(&self) -> Router {
        labelgrid_api::build_router(ApiState {
            gateway: Arc::clone(&self.gateway),
            task_queue: Arc::clone(&self.tasks),
            result_queue: Arc::clone(&self.results),
            metrics: Arc::clone(&self.metrics),
        })
    }

    /// Spawn the correlator and autoscaler loops.
    pub fn start(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let correlator = Arc::clone(&self.correlator);
        let correlator_shutdown = shutdown.clone();
        let correlator_handle = tokio::spawn(async move {
            correlator.run(correlator_shutdown).await;
        });

        let autoscaler = Arc::clone(&self.autoscaler);
        let interval = self.config.autoscale.interval();
        let autoscale_handle = tokio::spawn(async move {
            autoscaler.run(interval, shutdown).await;
        });

        info!(
            max_instances = self.config.autoscale.max_instances,
            request_timeout_secs = self.config.server.request_timeout_secs,
            "pipeline started"
        );
        vec![correlator_handle, autoscale_handle]
    }

    /// Serve the API on `listener` until `signal` resolves, then stop the
    /// background loops and the fleet.
    ///
    /// The correlator keeps running until the server has drained its
    /// in-flight requests, so a caller already waiting still gets its label.
    pub async fn serve<F>(&self, listener: TcpListener, signal: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handles = self.start(shutdown_rx);

        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "API server starting");
        }
        let served = axum::serve(listener, self.router())
            .with_graceful_shutdown(signal)
            .await;

        info!("API server drained; stopping pipeline");
        let _ = shutdown_tx.send(true);
        for handle in handles {
            let _ = handle.await;
        }
        self.stop_fleet().await;
        served?;
        Ok(())
    }

    /// Stop every worker instance, letting in-flight tasks finish.
    pub async fn stop_fleet(&self) {
        self.fleet.shutdown().await;
    }
}

/// What [`purge`] removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub inputs: u64,
    pub outputs: u64,
    pub tasks: u64,
    pub results: u64,
}

/// Empty both buckets and both queues.
pub async fn purge(config: &PipelineConfig, store: &StateStore) -> anyhow::Result<PurgeReport> {
    let storage = &config.storage;
    let report = PurgeReport {
        inputs: store.bucket(&storage.input_bucket).purge().await?,
        outputs: store.bucket(&storage.output_bucket).purge().await?,
        tasks: store.queue(&storage.task_queue).purge().await?,
        results: store.queue(&storage.result_queue).purge().await?,
    };
    info!(
        inputs = report.inputs,
        outputs = report.outputs,
        tasks = report.tasks,
        results = report.results,
        "purge complete"
    );
    Ok(report)
}
