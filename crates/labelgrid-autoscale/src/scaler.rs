//! Autoscaler — queue-depth driven fleet convergence.
//!
//! Each cycle reads the task queue depth, computes a target fleet size,
//! compares it with the active instances and issues launch or terminate
//! commands to close the gap. Nothing is carried between cycles.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use labelgrid_core::MessageQueue;
use labelgrid_metrics::PipelineMetrics;
use tracing::{debug, info, warn};

use crate::error::FleetResult;
use crate::fleet::{Fleet, FleetInstance, InstanceId};

/// A convergence step for one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScaleDecision {
    /// Start this many instances.
    Launch(u32),
    /// Stop these instances.
    Terminate(Vec<InstanceId>),
    /// Fleet already matches the target.
    NoChange,
}

/// What one cycle observed and decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub depth: u64,
    pub target: u32,
    pub active: u32,
    pub decision: ScaleDecision,
}

/// Desired fleet size for a queue depth: zero when idle, otherwise one
/// instance per pending task up to `max_instances`.
pub fn scaling_target(depth: u64, max_instances: u32) -> u32 {
    if depth == 0 {
        0
    } else {
        depth.min(max_instances as u64) as u32
    }
}

/// Decide how to move `listing` to `target` instances.
///
/// Only active instances count. When shrinking, the first `target` active
/// instances in listing order are kept and the rest are terminated.
pub fn plan(target: u32, listing: &[FleetInstance]) -> ScaleDecision {
    let active: Vec<&FleetInstance> = listing.iter().filter(|i| i.status.is_active()).collect();
    let target = target as usize;

    match active.len().cmp(&target) {
        Ordering::Less => ScaleDecision::Launch((target - active.len()) as u32),
        Ordering::Greater => {
            ScaleDecision::Terminate(active[target..].iter().map(|i| i.id.clone()).collect())
        }
        Ordering::Equal => ScaleDecision::NoChange,
    }
}

/// Drives a [`Fleet`] toward the size implied by a queue's depth.
pub struct Autoscaler {
    queue: Arc<dyn MessageQueue>,
    fleet: Arc<dyn Fleet>,
    max_instances: u32,
    metrics: Arc<PipelineMetrics>,
}

impl Autoscaler {
    pub fn new(
        queue: Arc<dyn MessageQueue>,
        fleet: Arc<dyn Fleet>,
        max_instances: u32,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            queue,
            fleet,
            max_instances,
            metrics,
        }
    }

    /// Run one observe-decide-act cycle.
    ///
    /// A depth read failure counts as an empty queue. A fleet listing
    /// failure aborts the cycle before any command is issued. Launch and
    /// terminate failures are logged and left for the next cycle.
    pub async fn cycle(&self) -> FleetResult<CycleReport> {
        let depth = match self.queue.depth().await {
            Ok(depth) => depth,
            Err(e) => {
                warn!(queue = %self.queue.name(), error = %e, "queue depth unavailable; assuming 0");
                0
            }
        };
        let target = scaling_target(depth, self.max_instances);

        let listing = self.fleet.list_active().await?;
        let active = listing.iter().filter(|i| i.status.is_active()).count() as u32;
        let decision = plan(target, &listing);
        self.metrics.record_scaling(depth, target, active);

        match &decision {
            ScaleDecision::Launch(count) => {
                info!(depth, target, active, count, "scaling up");
                match self.fleet.launch(*count).await {
                    Ok(ids) => self.metrics.record_launched(ids.len() as u32),
                    Err(e) => warn!(count, error = %e, "launch failed"),
                }
            }
            ScaleDecision::Terminate(ids) => {
                info!(depth, target, active, count = ids.len(), "scaling down");
                match self.fleet.terminate(ids).await {
                    Ok(()) => self.metrics.record_terminated(ids.len() as u32),
                    Err(e) => warn!(count = ids.len(), error = %e, "terminate failed"),
                }
            }
            ScaleDecision::NoChange => {
                debug!(depth, target, active, "fleet converged");
            }
        }

        Ok(CycleReport {
            depth,
            target,
            active,
            decision,
        })
    }

    /// Run the autoscaler loop.
    pub async fn run(&self, interval: Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        info!(
            interval_ms = interval.as_millis() as u64,
            max_instances = self.max_instances,
            "autoscaler started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.cycle().await {
                        warn!(error = %e, "autoscaler cycle skipped");
                    }
                }
                _ = shutdown.changed() => {
                    info!("autoscaler shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FleetError;
    use crate::fleet::InstanceStatus;
    use labelgrid_core::{BackendError, BackendResult, BoxFuture, Receipt, ReceivedMessage};
    use std::sync::Mutex;

    /// Queue that only reports a fixed depth, or fails to.
    struct DepthQueue(Option<u64>);

    impl MessageQueue for DepthQueue {
        fn name(&self) -> &str {
            "req"
        }
        fn send<'a>(&'a self, _body: &'a str) -> BoxFuture<'a, BackendResult<()>> {
            Box::pin(async { Ok(()) })
        }
        fn receive(
            &self,
            _max: usize,
            _visibility: Duration,
        ) -> BoxFuture<'_, BackendResult<Vec<ReceivedMessage>>> {
            Box::pin(async { Ok(Vec::new()) })
        }
        fn ack<'a>(&'a self, _receipt: &'a Receipt) -> BoxFuture<'a, BackendResult<bool>> {
            Box::pin(async { Ok(false) })
        }
        fn depth(&self) -> BoxFuture<'_, BackendResult<u64>> {
            let depth = self.0;
            Box::pin(async move {
                depth.ok_or_else(|| BackendError::Unavailable("queue offline".to_string()))
            })
        }
        fn purge(&self) -> BoxFuture<'_, BackendResult<u64>> {
            Box::pin(async { Ok(0) })
        }
    }

    /// Fleet that records commands instead of acting on them.
    #[derive(Default)]
    struct RecordingFleet {
        listing: Mutex<Vec<FleetInstance>>,
        launched: Mutex<Vec<u32>>,
        terminated: Mutex<Vec<InstanceId>>,
        fail_listing: bool,
        fail_commands: bool,
    }

    impl RecordingFleet {
        fn with_instances(statuses: &[InstanceStatus]) -> Self {
            let listing = statuses
                .iter()
                .enumerate()
                .map(|(n, status)| FleetInstance {
                    id: InstanceId(format!("i-{n}")),
                    name: format!("app-tier-instance-{n}"),
                    tag: "app-tier".to_string(),
                    status: *status,
                    launched_at: 1000 + n as u64,
                })
                .collect();
            Self {
                listing: Mutex::new(listing),
                ..Self::default()
            }
        }

        fn launched(&self) -> u32 {
            self.launched.lock().unwrap().iter().sum()
        }

        fn terminated(&self) -> Vec<InstanceId> {
            self.terminated.lock().unwrap().clone()
        }
    }

    impl Fleet for RecordingFleet {
        fn list_active(&self) -> BoxFuture<'_, FleetResult<Vec<FleetInstance>>> {
            Box::pin(async move {
                if self.fail_listing {
                    return Err(FleetError::List("describe failed".to_string()));
                }
                Ok(self.listing.lock().unwrap().clone())
            })
        }

        fn launch(&self, count: u32) -> BoxFuture<'_, FleetResult<Vec<InstanceId>>> {
            Box::pin(async move {
                if self.fail_commands {
                    return Err(FleetError::Launch("capacity unavailable".to_string()));
                }
                self.launched.lock().unwrap().push(count);
                Ok((0..count).map(|n| InstanceId(format!("new-{n}"))).collect())
            })
        }

        fn terminate<'a>(&'a self, ids: &'a [InstanceId]) -> BoxFuture<'a, FleetResult<()>> {
            Box::pin(async move {
                if self.fail_commands {
                    return Err(FleetError::Terminate("instance busy".to_string()));
                }
                self.terminated.lock().unwrap().extend_from_slice(ids);
                Ok(())
            })
        }
    }

    fn scaler(depth: Option<u64>, fleet: &Arc<RecordingFleet>) -> Autoscaler {
        Autoscaler::new(
            Arc::new(DepthQueue(depth)),
            Arc::clone(fleet) as Arc<dyn Fleet>,
            15,
            Arc::new(PipelineMetrics::new()),
        )
    }

    #[test]
    fn target_is_zero_for_empty_queue() {
        assert_eq!(scaling_target(0, 15), 0);
    }

    #[test]
    fn target_tracks_depth() {
        assert_eq!(scaling_target(5, 15), 5);
        assert_eq!(scaling_target(1, 15), 1);
    }

    #[test]
    fn target_is_capped() {
        assert_eq!(scaling_target(20, 15), 15);
        assert_eq!(scaling_target(u64::MAX, 15), 15);
    }

    #[test]
    fn plan_keeps_first_target_instances() {
        let fleet = RecordingFleet::with_instances(&[InstanceStatus::Running; 4]);
        let listing = fleet.listing.lock().unwrap().clone();

        assert_eq!(
            plan(1, &listing),
            ScaleDecision::Terminate(vec![
                InstanceId("i-1".to_string()),
                InstanceId("i-2".to_string()),
                InstanceId("i-3".to_string()),
            ])
        );
        assert_eq!(plan(4, &listing), ScaleDecision::NoChange);
        assert_eq!(plan(6, &listing), ScaleDecision::Launch(2));
    }

    #[tokio::test]
    async fn scale_up_from_zero() {
        let fleet = Arc::new(RecordingFleet::default());
        let report = scaler(Some(5), &fleet).cycle().await.unwrap();

        assert_eq!(report.target, 5);
        assert_eq!(report.decision, ScaleDecision::Launch(5));
        assert_eq!(fleet.launched(), 5);
        assert!(fleet.terminated().is_empty());
    }

    #[tokio::test]
    async fn scale_down_terminates_active_tail() {
        use InstanceStatus::*;
        // Eight active instances plus two already on their way out.
        let fleet = Arc::new(RecordingFleet::with_instances(&[
            Running, Running, Terminating, Running, Pending, Running, Running, Terminated,
            Running, Running,
        ]));
        let report = scaler(Some(3), &fleet).cycle().await.unwrap();

        assert_eq!(report.active, 8);
        assert_eq!(fleet.launched(), 0);
        let terminated = fleet.terminated();
        assert_eq!(terminated.len(), 5);
        let expected: Vec<InstanceId> = [4, 5, 6, 8, 9]
            .iter()
            .map(|n| InstanceId(format!("i-{n}")))
            .collect();
        assert_eq!(terminated, expected);
    }

    #[tokio::test]
    async fn converged_cycle_issues_nothing() {
        let fleet = Arc::new(RecordingFleet::with_instances(&[InstanceStatus::Running; 4]));
        let report = scaler(Some(4), &fleet).cycle().await.unwrap();

        assert_eq!(report.decision, ScaleDecision::NoChange);
        assert_eq!(fleet.launched(), 0);
        assert!(fleet.terminated().is_empty());
    }

    #[tokio::test]
    async fn empty_queue_scales_to_zero() {
        let fleet = Arc::new(RecordingFleet::with_instances(&[InstanceStatus::Running; 3]));
        let report = scaler(Some(0), &fleet).cycle().await.unwrap();

        assert_eq!(report.target, 0);
        assert_eq!(fleet.terminated().len(), 3);
    }

    #[tokio::test]
    async fn depth_error_counts_as_empty() {
        let fleet = Arc::new(RecordingFleet::with_instances(&[InstanceStatus::Running; 2]));
        let report = scaler(None, &fleet).cycle().await.unwrap();

        assert_eq!(report.depth, 0);
        assert_eq!(report.target, 0);
        assert_eq!(fleet.terminated().len(), 2);
    }

    #[tokio::test]
    async fn listing_failure_issues_no_commands() {
        let fleet = Arc::new(RecordingFleet {
            fail_listing: true,
            ..RecordingFleet::default()
        });
        assert!(scaler(Some(10), &fleet).cycle().await.is_err());
        assert_eq!(fleet.launched(), 0);
        assert!(fleet.terminated().is_empty());
    }

    #[tokio::test]
    async fn failed_commands_are_retried_next_cycle() {
        let metrics = Arc::new(PipelineMetrics::new());
        let fleet = Arc::new(RecordingFleet {
            fail_commands: true,
            ..RecordingFleet::default()
        });
        let scaler = Autoscaler::new(
            Arc::new(DepthQueue(Some(3))),
            Arc::clone(&fleet) as Arc<dyn Fleet>,
            15,
            Arc::clone(&metrics),
        );

        for _ in 0..2 {
            let report = scaler.cycle().await.unwrap();
            assert_eq!(report.decision, ScaleDecision::Launch(3));
        }
        assert_eq!(metrics.snapshot().instances_launched, 0);

        let fleet = Arc::new(RecordingFleet {
            fail_commands: true,
            ..RecordingFleet::with_instances(&[InstanceStatus::Running; 2])
        });
        let scaler = Autoscaler::new(
            Arc::new(DepthQueue(Some(0))),
            Arc::clone(&fleet) as Arc<dyn Fleet>,
            15,
            Arc::clone(&metrics),
        );
        let report = scaler.cycle().await.unwrap();
        assert!(matches!(report.decision, ScaleDecision::Terminate(ref ids) if ids.len() == 2));
        assert_eq!(metrics.snapshot().instances_terminated, 0);
        assert!(fleet.terminated().is_empty());
    }

    #[tokio::test]
    async fn cycle_exports_gauges() {
        let fleet = Arc::new(RecordingFleet::default());
        let metrics = Arc::new(PipelineMetrics::new());
        let scaler = Autoscaler::new(
            Arc::new(DepthQueue(Some(20))),
            Arc::clone(&fleet) as Arc<dyn Fleet>,
            15,
            Arc::clone(&metrics),
        );
        scaler.cycle().await.unwrap();

        let snap = metrics.snapshot();
        assert_eq!(snap.task_queue_depth, 20);
        assert_eq!(snap.fleet_target, 15);
        assert_eq!(snap.fleet_active, 0);
        assert_eq!(snap.instances_launched, 15);
    }
}
