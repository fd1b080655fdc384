//! Pipeline metrics — per-stage counters and request latency.
//!
//! Counters and gauges are plain atomics. Latency samples live in a
//! bounded ring behind a mutex that is only held for a push or a copy.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tracing::debug;

/// Latency samples kept for percentile computation.
const MAX_LATENCY_SAMPLES: usize = 1024;

/// How a gateway submission ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// A real label came back.
    Completed,
    /// The error label came back.
    Failed,
    /// The deadline elapsed first.
    TimedOut,
    /// Rejected or aborted before a result could arrive.
    Rejected,
}

/// What the correlator did with a result message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Handed to a waiting request.
    Delivered,
    /// No one was waiting; kept for the sweep.
    Orphaned,
    /// Could not be parsed; dropped.
    Malformed,
}

/// How a worker's attempt at a task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Result published and task acked.
    Processed,
    /// Classification failed; error label published.
    ClassificationFailed,
    /// Redelivered too often; answered with the error label.
    GivenUp,
    /// Infrastructure failure; left for redelivery.
    Retried,
}

/// Point-in-time view of every counter and gauge.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub requests_submitted: u64,
    pub requests_completed: u64,
    pub requests_failed: u64,
    pub requests_timed_out: u64,
    pub requests_rejected: u64,
    pub results_delivered: u64,
    pub results_orphaned: u64,
    pub results_malformed: u64,
    pub orphans_swept: u64,
    pub tasks_processed: u64,
    pub tasks_classification_failed: u64,
    pub tasks_given_up: u64,
    pub tasks_retried: u64,
    pub instances_launched: u64,
    pub instances_terminated: u64,
    pub task_queue_depth: u64,
    pub fleet_target: u64,
    pub fleet_active: u64,
    /// Request latency P50 in milliseconds.
    pub latency_p50_ms: f64,
    /// Request latency P99 in milliseconds.
    pub latency_p99_ms: f64,
}

/// Shared pipeline counters.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    requests_submitted: AtomicU64,
    requests_completed: AtomicU64,
    requests_failed: AtomicU64,
    requests_timed_out: AtomicU64,
    requests_rejected: AtomicU64,
    results_delivered: AtomicU64,
    results_orphaned: AtomicU64,
    results_malformed: AtomicU64,
    orphans_swept: AtomicU64,
    tasks_processed: AtomicU64,
    tasks_classification_failed: AtomicU64,
    tasks_given_up: AtomicU64,
    tasks_retried: AtomicU64,
    instances_launched: AtomicU64,
    instances_terminated: AtomicU64,
    task_queue_depth: AtomicU64,
    fleet_target: AtomicU64,
    fleet_active: AtomicU64,
    /// Request latencies in microseconds, newest last.
    latencies: Mutex<VecDeque<u64>>,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count an accepted submission.
    pub fn record_submission(&self) {
        self.requests_submitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Count how a submission ended and how long it took.
    pub fn record_request(&self, outcome: RequestOutcome, latency: Duration) {
        let counter = match outcome {
            RequestOutcome::Completed => &self.requests_completed,
            RequestOutcome::Failed => &self.requests_failed,
            RequestOutcome::TimedOut => &self.requests_timed_out,
            RequestOutcome::Rejected => &self.requests_rejected,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        if matches!(outcome, RequestOutcome::Completed | RequestOutcome::Failed) {
            let mut samples = match self.latencies.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if samples.len() == MAX_LATENCY_SAMPLES {
                samples.pop_front();
            }
            samples.push_back(latency.as_micros() as u64);
        }
    }

    pub fn record_delivery(&self, outcome: DeliveryOutcome) {
        let counter = match outcome {
            DeliveryOutcome::Delivered => &self.results_delivered,
            DeliveryOutcome::Orphaned => &self.results_orphaned,
            DeliveryOutcome::Malformed => &self.results_malformed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_swept(&self, count: usize) {
        self.orphans_swept.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_task(&self, outcome: TaskOutcome) {
        let counter = match outcome {
            TaskOutcome::Processed => &self.tasks_processed,
            TaskOutcome::ClassificationFailed => &self.tasks_classification_failed,
            TaskOutcome::GivenUp => &self.tasks_given_up,
            TaskOutcome::Retried => &self.tasks_retried,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one autoscaler cycle.
    pub fn record_scaling(&self, depth: u64, target: u32, active: u32) {
        self.task_queue_depth.store(depth, Ordering::Relaxed);
        self.fleet_target.store(target as u64, Ordering::Relaxed);
        self.fleet_active.store(active as u64, Ordering::Relaxed);
    }

    pub fn record_launched(&self, count: u32) {
        self.instances_launched
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_terminated(&self, count: u32) {
        self.instances_terminated
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Read every counter without resetting.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let samples: Vec<u64> = match self.latencies.lock() {
            Ok(guard) => guard.iter().copied().collect(),
            Err(poisoned) => poisoned.into_inner().iter().copied().collect(),
        };
        let (p50, p99) = compute_percentiles(&samples);

        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        let snapshot = MetricsSnapshot {
            requests_submitted: load(&self.requests_submitted),
            requests_completed: load(&self.requests_completed),
            requests_failed: load(&self.requests_failed),
            requests_timed_out: load(&self.requests_timed_out),
            requests_rejected: load(&self.requests_rejected),
            results_delivered: load(&self.results_delivered),
            results_orphaned: load(&self.results_orphaned),
            results_malformed: load(&self.results_malformed),
            orphans_swept: load(&self.orphans_swept),
            tasks_processed: load(&self.tasks_processed),
            tasks_classification_failed: load(&self.tasks_classification_failed),
            tasks_given_up: load(&self.tasks_given_up),
            tasks_retried: load(&self.tasks_retried),
            instances_launched: load(&self.instances_launched),
            instances_terminated: load(&self.instances_terminated),
            task_queue_depth: load(&self.task_queue_depth),
            fleet_target: load(&self.fleet_target),
            fleet_active: load(&self.fleet_active),
            latency_p50_ms: p50,
            latency_p99_ms: p99,
        };
        debug!(samples = samples.len(), "metrics snapshot taken");
        snapshot
    }
}

/// Compute P50 and P99 latency from a list of samples.
///
/// Returns (p50_ms, p99_ms). If empty, returns (0.0, 0.0).
fn compute_percentiles(latencies: &[u64]) -> (f64, f64) {
    if latencies.is_empty() {
        return (0.0, 0.0);
    }

    let mut sorted = latencies.to_vec();
    sorted.sort_unstable();

    let p50_idx = (sorted.len() as f64 * 0.50) as usize;
    let p99_idx = (sorted.len() as f64 * 0.99) as usize;

    let p50 = sorted[p50_idx.min(sorted.len() - 1)] as f64 / 1000.0;
    let p99 = sorted[p99_idx.min(sorted.len() - 1)] as f64 / 1000.0;

    (p50, p99)
}
