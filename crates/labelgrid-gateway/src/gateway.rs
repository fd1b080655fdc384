//! Request gateway — turns a queued, asynchronous classification into a
//! single awaitable call.

use std::sync::Arc;
use std::time::{Duration, Instant};

use labelgrid_core::{BlobStore, ClassifyResult, MessageQueue, Task, validate_task_id};
use labelgrid_metrics::{PipelineMetrics, RequestOutcome};
use tracing::{debug, info, warn};

use crate::error::{GatewayError, GatewayResult};
use crate::registry::WaitRegistry;

/// Accepts payloads and waits for their classification.
pub struct RequestGateway {
    inputs: Arc<dyn BlobStore>,
    tasks: Arc<dyn MessageQueue>,
    registry: Arc<WaitRegistry>,
    timeout: Duration,
    metrics: Arc<PipelineMetrics>,
}

impl RequestGateway {
    pub fn new(
        inputs: Arc<dyn BlobStore>,
        tasks: Arc<dyn MessageQueue>,
        registry: Arc<WaitRegistry>,
        timeout: Duration,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            inputs,
            tasks,
            registry,
            timeout,
            metrics,
        }
    }

    pub fn registry(&self) -> &Arc<WaitRegistry> {
        &self.registry
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Store `payload` under `filename`, enqueue it, and wait for its label.
    ///
    /// The wait handle is registered before anything is published and is
    /// released on every exit path, including the caller dropping this
    /// future. A timeout does not cancel the queued task.
    pub async fn submit(&self, filename: &str, payload: Vec<u8>) -> GatewayResult<ClassifyResult> {
        let started = Instant::now();
        let result = self.submit_inner(filename, payload).await;

        let outcome = match &result {
            Ok(r) if r.is_error() => RequestOutcome::Failed,
            Ok(_) => RequestOutcome::Completed,
            Err(GatewayError::Timeout { .. }) => RequestOutcome::TimedOut,
            Err(_) => RequestOutcome::Rejected,
        };
        self.metrics.record_request(outcome, started.elapsed());
        result
    }

    async fn submit_inner(&self, filename: &str, payload: Vec<u8>) -> GatewayResult<ClassifyResult> {
        validate_task_id(filename)?;
        let task = Task::new(filename);

        let mut handle = self
            .registry
            .register(&task.id)
            .ok_or_else(|| GatewayError::DuplicateSubmission(task.id.clone()))?;
        self.metrics.record_submission();

        let size = payload.len();
        self.inputs.put(&task.payload_ref, payload).await?;
        self.tasks.send(&task.to_message()).await?;
        debug!(task_id = %task.id, size, "task enqueued");

        match tokio::time::timeout(self.timeout, handle.wait()).await {
            Ok(Some(result)) => {
                info!(task_id = %task.id, label = %result.label, "task resolved");
                Ok(result)
            }
            Ok(None) => Err(GatewayError::Abandoned(task.id)),
            Err(_) => {
                warn!(
                    task_id = %task.id,
                    timeout_secs = self.timeout.as_secs(),
                    "timed out waiting for result"
                );
                Err(GatewayError::Timeout {
                    task_id: task.id,
                    timeout_secs: self.timeout.as_secs(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use labelgrid_state::StateStore;

    struct Harness {
        store: StateStore,
        gateway: Arc<RequestGateway>,
        registry: Arc<WaitRegistry>,
        metrics: Arc<PipelineMetrics>,
    }

    fn harness(timeout: Duration) -> Harness {
        let store = StateStore::open_in_memory().unwrap();
        let registry = Arc::new(WaitRegistry::new(Duration::from_secs(300)));
        let metrics = Arc::new(PipelineMetrics::new());
        let gateway = Arc::new(RequestGateway::new(
            Arc::new(store.bucket("in")),
            Arc::new(store.queue("req")),
            Arc::clone(&registry),
            timeout,
            Arc::clone(&metrics),
        ));
        Harness {
            store,
            gateway,
            registry,
            metrics,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_leaves_no_handle_and_keeps_task() {
        let h = harness(Duration::from_secs(30));

        let err = h.gateway.submit("a.jpg", b"img".to_vec()).await.unwrap_err();
        assert!(matches!(err, GatewayError::Timeout { ref task_id, timeout_secs: 30 } if task_id == "a.jpg"));

        assert_eq!(h.registry.pending_waits(), 0);
        assert_eq!(h.registry.orphaned_results(), 0);
        // The task is still queued for a worker.
        assert_eq!(h.store.queue("req").depth().await.unwrap(), 1);
        assert_eq!(h.store.bucket("in").get("a.jpg").await.unwrap(), b"img");
        assert_eq!(h.metrics.snapshot().requests_timed_out, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_timeouts_do_not_grow_registry() {
        let h = harness(Duration::from_millis(50));
        for i in 0..20 {
            let name = format!("img_{i}.jpg");
            assert!(h.gateway.submit(&name, vec![1]).await.is_err());
        }
        assert_eq!(h.registry.pending_waits(), 0);
    }

    #[tokio::test]
    async fn invalid_name_is_rejected_before_publishing() {
        let h = harness(Duration::from_secs(30));

        let err = h.gateway.submit("a:b.jpg", vec![1]).await.unwrap_err();
        assert!(matches!(err, GatewayError::InvalidName(_)));
        assert_eq!(h.store.queue("req").depth().await.unwrap(), 0);
        assert_eq!(h.metrics.snapshot().requests_submitted, 0);
    }

    #[tokio::test]
    async fn live_duplicate_is_rejected() {
        let h = harness(Duration::from_secs(30));
        let _held = h.registry.register("a.jpg").unwrap();

        let err = h.gateway.submit("a.jpg", vec![1]).await.unwrap_err();
        assert!(matches!(err, GatewayError::DuplicateSubmission(ref id) if id == "a.jpg"));
        assert_eq!(h.store.queue("req").depth().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn resolved_result_is_returned() {
        let h = harness(Duration::from_secs(30));
        let gateway = Arc::clone(&h.gateway);
        let pending = tokio::spawn(async move { gateway.submit("a.jpg", b"img".to_vec()).await });

        // Wait until the request is parked on its handle.
        while h.registry.pending_waits() == 0 {
            tokio::task::yield_now().await;
        }
        h.registry.resolve(ClassifyResult::new("a.jpg", "cat"));

        let result = pending.await.unwrap().unwrap();
        assert_eq!(result.to_string(), "a.jpg:cat");
        assert_eq!(h.registry.pending_waits(), 0);
        assert_eq!(h.metrics.snapshot().requests_completed, 1);
    }

    #[tokio::test]
    async fn cancelled_caller_releases_handle() {
        let h = harness(Duration::from_secs(30));
        let gateway = Arc::clone(&h.gateway);
        let pending = tokio::spawn(async move { gateway.submit("a.jpg", b"img".to_vec()).await });

        while h.registry.pending_waits() == 0 {
            tokio::task::yield_now().await;
        }
        pending.abort();
        let _ = pending.await;

        assert_eq!(h.registry.pending_waits(), 0);
    }
}
