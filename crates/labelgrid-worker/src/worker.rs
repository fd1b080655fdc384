//! Worker loop — lease, classify, persist, publish, ack.
//!
//! The task is acknowledged only after its result has been stored and
//! published, so any failure before that point leaves the lease to expire
//! and the queue redelivers the task. Classification failure is not such a
//! failure: it is answered with the error label like any other result.

use std::sync::Arc;

use labelgrid_core::config::WorkerConfig;
use labelgrid_core::{BlobStore, ClassifyResult, MessageQueue, ReceivedMessage, Task};
use labelgrid_metrics::{PipelineMetrics, TaskOutcome};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::classifier::Classifier;
use crate::error::{WorkerError, WorkerResult};

/// What one call to [`Worker::process_next`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Poll {
    /// No task was available.
    Idle,
    /// A result was published and the task acked.
    Completed {
        result: ClassifyResult,
        /// Answered with the error label after too many deliveries.
        given_up: bool,
    },
    /// The task body was not a usable id; acked without a result.
    Discarded,
}

pub struct Worker {
    id: String,
    tasks: Arc<dyn MessageQueue>,
    results: Arc<dyn MessageQueue>,
    inputs: Arc<dyn BlobStore>,
    outputs: Arc<dyn BlobStore>,
    classifier: Arc<dyn Classifier>,
    config: WorkerConfig,
    metrics: Arc<PipelineMetrics>,
}

impl Worker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: impl Into<String>,
        tasks: Arc<dyn MessageQueue>,
        results: Arc<dyn MessageQueue>,
        inputs: Arc<dyn BlobStore>,
        outputs: Arc<dyn BlobStore>,
        classifier: Arc<dyn Classifier>,
        config: WorkerConfig,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            id: id.into(),
            tasks,
            results,
            inputs,
            outputs,
            classifier,
            config,
            metrics,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Lease and fully process at most one task.
    pub async fn process_next(&self) -> WorkerResult<Poll> {
        let leased = self
            .tasks
            .receive(1, self.config.visibility_timeout())
            .await
            .map_err(WorkerError::Receive)?;
        let Some(message) = leased.into_iter().next() else {
            return Ok(Poll::Idle);
        };

        let task = match Task::from_message(&message.body) {
            Ok(task) => task,
            Err(e) => {
                warn!(worker = %self.id, body = %message.body, error = %e, "discarding malformed task");
                self.ack(&message, &message.body).await?;
                return Ok(Poll::Discarded);
            }
        };

        let given_up = message.receive_count > self.config.max_receive_count;
        let result = if given_up {
            warn!(
                worker = %self.id,
                task_id = %task.id,
                receive_count = message.receive_count,
                "task redelivered too often; answering with error label"
            );
            ClassifyResult::error(task.id.as_str())
        } else {
            self.classify(&task).await?
        };

        self.outputs
            .put(&task.id, result.to_message().into_bytes())
            .await
            .map_err(|source| WorkerError::Upload {
                task_id: task.id.clone(),
                source,
            })?;
        self.results
            .send(&result.to_message())
            .await
            .map_err(|source| WorkerError::Publish {
                task_id: task.id.clone(),
                source,
            })?;
        self.ack(&message, &task.id).await?;

        let outcome = if given_up {
            TaskOutcome::GivenUp
        } else if result.is_error() {
            TaskOutcome::ClassificationFailed
        } else {
            TaskOutcome::Processed
        };
        self.metrics.record_task(outcome);
        info!(worker = %self.id, task_id = %task.id, label = %result.label, "task processed");

        Ok(Poll::Completed { result, given_up })
    }

    /// Download and classify. The payload is dropped before returning.
    async fn classify(&self, task: &Task) -> WorkerResult<ClassifyResult> {
        let payload = self
            .inputs
            .get(&task.payload_ref)
            .await
            .map_err(|source| WorkerError::Download {
                task_id: task.id.clone(),
                source,
            })?;
        debug!(worker = %self.id, task_id = %task.id, size = payload.len(), "payload fetched");

        match self.classifier.classify(payload).await {
            Ok(label) => Ok(ClassifyResult::new(task.id.as_str(), label)),
            Err(e) => {
                warn!(worker = %self.id, task_id = %task.id, error = %e, "classification failed");
                Ok(ClassifyResult::error(task.id.as_str()))
            }
        }
    }

    async fn ack(&self, message: &ReceivedMessage, task_id: &str) -> WorkerResult<()> {
        let acked = self
            .tasks
            .ack(&message.receipt)
            .await
            .map_err(|source| WorkerError::Ack {
                task_id: task_id.to_string(),
                source,
            })?;
        if !acked {
            debug!(worker = %self.id, %task_id, "task was already acked");
        }
        Ok(())
    }

    /// Process tasks until `shutdown` flips.
    ///
    /// Shutdown is observed only between tasks, so a task in flight always
    /// runs to completion.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(worker = %self.id, queue = %self.tasks.name(), "worker started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let pause = match self.process_next().await {
                Ok(Poll::Idle) => self.config.idle_interval(),
                Ok(_) => continue,
                Err(e) => {
                    error!(worker = %self.id, error = %e, "task failed; retrying after backoff");
                    self.metrics.record_task(TaskOutcome::Retried);
                    self.config.retry_backoff()
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = shutdown.changed() => break,
            }
        }

        info!(worker = %self.id, "worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClassifyError;
    use labelgrid_core::BoxFuture;
    use labelgrid_state::StateStore;
    use std::time::Duration;

    /// Labels everything `"cat"`, rejects empty payloads.
    struct CatClassifier;

    impl Classifier for CatClassifier {
        fn classify(&self, payload: Vec<u8>) -> BoxFuture<'_, Result<String, ClassifyError>> {
            Box::pin(async move {
                if payload.is_empty() {
                    Err(ClassifyError::EmptyPayload)
                } else {
                    Ok("cat".to_string())
                }
            })
        }
    }

    fn worker(store: &StateStore, config: WorkerConfig) -> Worker {
        Worker::new(
            "worker-test",
            Arc::new(store.queue("req")),
            Arc::new(store.queue("resp")),
            Arc::new(store.bucket("in")),
            Arc::new(store.bucket("out")),
            Arc::new(CatClassifier),
            config,
            Arc::new(PipelineMetrics::new()),
        )
    }

    #[tokio::test]
    async fn idle_when_queue_empty() {
        let store = StateStore::open_in_memory().unwrap();
        let w = worker(&store, WorkerConfig::default());
        assert_eq!(w.process_next().await.unwrap(), Poll::Idle);
    }

    #[tokio::test]
    async fn processes_task_end_to_end() {
        let store = StateStore::open_in_memory().unwrap();
        store.bucket("in").put("a.jpg", b"pixels".to_vec()).await.unwrap();
        store.queue("req").send("a.jpg").await.unwrap();

        let w = worker(&store, WorkerConfig::default());
        let poll = w.process_next().await.unwrap();
        assert_eq!(
            poll,
            Poll::Completed {
                result: ClassifyResult::new("a.jpg", "cat"),
                given_up: false,
            }
        );

        assert_eq!(store.bucket("out").get("a.jpg").await.unwrap(), b"a.jpg:cat");
        let published = store.queue("resp").receive(10, Duration::from_secs(5)).await.unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].body, "a.jpg:cat");

        let stats = store.queue("req").stats().unwrap();
        assert_eq!(stats.visible + stats.in_flight, 0);
        assert_eq!(w.metrics.snapshot().tasks_processed, 1);
    }

    #[tokio::test]
    async fn padded_name_is_fetched_under_its_exact_key() {
        let store = StateStore::open_in_memory().unwrap();
        store.bucket("in").put(" a.jpg", b"pixels".to_vec()).await.unwrap();
        store.queue("req").send(" a.jpg").await.unwrap();

        let w = worker(&store, WorkerConfig::default());
        let Poll::Completed { result, given_up } = w.process_next().await.unwrap() else {
            panic!("expected a completed task");
        };
        assert!(!given_up);
        assert_eq!(result.to_message(), " a.jpg:cat");
        assert_eq!(store.bucket("out").get(" a.jpg").await.unwrap(), b" a.jpg:cat");
    }

    #[tokio::test]
    async fn classification_failure_publishes_error_label() {
        let store = StateStore::open_in_memory().unwrap();
        store.bucket("in").put("b.jpg", Vec::new()).await.unwrap();
        store.queue("req").send("b.jpg").await.unwrap();

        let w = worker(&store, WorkerConfig::default());
        let Poll::Completed { result, given_up } = w.process_next().await.unwrap() else {
            panic!("expected a completed task");
        };
        assert_eq!(result.to_message(), "b.jpg:error");
        assert!(!given_up);
        assert_eq!(store.queue("req").stats().unwrap().in_flight, 0);
        assert_eq!(w.metrics.snapshot().tasks_classification_failed, 1);
    }

    #[tokio::test]
    async fn missing_payload_leaves_task_for_redelivery() {
        let store = StateStore::open_in_memory().unwrap();
        store.queue("req").send("gone.jpg").await.unwrap();

        let w = worker(&store, WorkerConfig::default());
        let err = w.process_next().await.unwrap_err();
        assert!(matches!(err, WorkerError::Download { ref task_id, .. } if task_id == "gone.jpg"));

        // Still leased, not acked, nothing published.
        assert_eq!(store.queue("req").stats().unwrap().in_flight, 1);
        assert_eq!(store.queue("resp").depth().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn poison_task_is_answered_with_error() {
        let store = StateStore::open_in_memory().unwrap();
        store.queue("req").send("gone.jpg").await.unwrap();

        let config = WorkerConfig {
            visibility_timeout_secs: 0,
            max_receive_count: 2,
            ..WorkerConfig::default()
        };
        let w = worker(&store, config);

        // Two failed deliveries, each lease expiring immediately.
        assert!(w.process_next().await.is_err());
        assert!(w.process_next().await.is_err());

        let Poll::Completed { result, given_up } = w.process_next().await.unwrap() else {
            panic!("expected the task to be given up");
        };
        assert!(given_up);
        assert_eq!(result.to_message(), "gone.jpg:error");
        let stats = store.queue("req").stats().unwrap();
        assert_eq!(stats.visible + stats.in_flight, 0);
        assert_eq!(w.metrics.snapshot().tasks_given_up, 1);
    }

    #[tokio::test]
    async fn malformed_task_is_discarded() {
        let store = StateStore::open_in_memory().unwrap();
        store.queue("req").send("bad:name.jpg").await.unwrap();

        let w = worker(&store, WorkerConfig::default());
        assert_eq!(w.process_next().await.unwrap(), Poll::Discarded);
        assert_eq!(store.queue("req").stats().unwrap().in_flight, 0);
        assert_eq!(store.queue("resp").depth().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let store = StateStore::open_in_memory().unwrap();
        let w = Arc::new(worker(&store, WorkerConfig::default()));
        let (tx, rx) = watch::channel(false);

        let running = {
            let w = Arc::clone(&w);
            tokio::spawn(async move { w.run(rx).await })
        };
        store.bucket("in").put("a.jpg", b"x".to_vec()).await.unwrap();
        store.queue("req").send("a.jpg").await.unwrap();

        // Wait for the task to be processed, then stop.
        while store.queue("resp").depth().await.unwrap() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tx.send(true).unwrap();
        running.await.unwrap();
    }
}
