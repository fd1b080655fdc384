//! LocalFleet — in-process instances backed by tokio tasks.
//!
//! Each launched instance sits in `pending` for the template's boot delay,
//! then runs the spawn callback until its shutdown signal flips. A
//! terminated instance is told to stop and is marked `terminating` until
//! the callback returns.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use labelgrid_core::{BoxFuture, epoch_millis};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::FleetResult;
use crate::fleet::{Fleet, FleetInstance, InstanceId, InstanceStatus};

/// Body of a running instance. Receives the instance id and a shutdown
/// signal it should observe between units of work.
pub type SpawnFn =
    Arc<dyn Fn(InstanceId, watch::Receiver<bool>) -> BoxFuture<'static, ()> + Send + Sync>;

/// What every launched instance is built from.
#[derive(Debug, Clone)]
pub struct InstanceTemplate {
    pub image: String,
    pub tag: String,
    pub boot_delay: Duration,
}

struct LocalInstance {
    info: FleetInstance,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

type Instances = Arc<Mutex<Vec<LocalInstance>>>;

pub struct LocalFleet {
    template: InstanceTemplate,
    spawn_fn: SpawnFn,
    instances: Instances,
    launched: AtomicU64,
}

fn lock(instances: &Instances) -> MutexGuard<'_, Vec<LocalInstance>> {
    match instances.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Move `id` to `to`, but only from one of the `from` states.
fn transition(instances: &Instances, id: &InstanceId, from: &[InstanceStatus], to: InstanceStatus) -> bool {
    let mut guard = lock(instances);
    match guard.iter_mut().find(|i| &i.info.id == id) {
        Some(instance) if from.contains(&instance.info.status) => {
            instance.info.status = to;
            true
        }
        _ => false,
    }
}

impl LocalFleet {
    pub fn new(template: InstanceTemplate, spawn_fn: SpawnFn) -> Self {
        Self {
            template,
            spawn_fn,
            instances: Arc::new(Mutex::new(Vec::new())),
            launched: AtomicU64::new(0),
        }
    }

    /// Every tracked instance, including ones still shutting down.
    pub fn instances(&self) -> Vec<FleetInstance> {
        lock(&self.instances).iter().map(|i| i.info.clone()).collect()
    }

    fn start_instance(&self) -> InstanceId {
        let n = self.launched.fetch_add(1, Ordering::Relaxed) + 1;
        let id = InstanceId(format!("i-{n:08x}"));
        let info = FleetInstance {
            id: id.clone(),
            name: format!("{}-instance-{n}", self.template.tag),
            tag: self.template.tag.clone(),
            status: InstanceStatus::Pending,
            launched_at: epoch_millis(),
        };
        let (shutdown, mut rx) = watch::channel(false);

        // Registered before the task starts so a fast terminate finds it.
        lock(&self.instances).push(LocalInstance {
            info,
            shutdown,
            task: None,
        });

        let instances = Arc::clone(&self.instances);
        let spawn_fn = Arc::clone(&self.spawn_fn);
        let boot_delay = self.template.boot_delay;
        let image = self.template.image.clone();
        let task_id = id.clone();
        let task = tokio::spawn(async move {
            let id = task_id;
            tokio::select! {
                _ = tokio::time::sleep(boot_delay) => {}
                _ = rx.changed() => {
                    debug!(instance = %id, "terminated before boot completed");
                    transition(&instances, &id, &[InstanceStatus::Terminating], InstanceStatus::Terminated);
                    return;
                }
            }

            if transition(&instances, &id, &[InstanceStatus::Pending], InstanceStatus::Running) {
                info!(instance = %id, %image, "instance running");
                spawn_fn(id.clone(), rx).await;
            }

            transition(
                &instances,
                &id,
                &[InstanceStatus::Running, InstanceStatus::Terminating],
                InstanceStatus::Terminated,
            );
            info!(instance = %id, "instance terminated");
        });

        if let Some(instance) = lock(&self.instances).iter_mut().find(|i| i.info.id == id) {
            instance.task = Some(task);
        }
        id
    }

    /// Terminate every instance and wait for all of them to stop.
    pub async fn shutdown(&self) {
        let tasks: Vec<JoinHandle<()>> = {
            let mut guard = lock(&self.instances);
            guard
                .iter_mut()
                .filter_map(|instance| {
                    if instance.info.status.is_active() {
                        instance.info.status = InstanceStatus::Terminating;
                    }
                    let _ = instance.shutdown.send(true);
                    instance.task.take()
                })
                .collect()
        };
        info!(instances = tasks.len(), "stopping local fleet");
        for task in tasks {
            let _ = task.await;
        }
    }
}

impl Fleet for LocalFleet {
    fn list_active(&self) -> BoxFuture<'_, FleetResult<Vec<FleetInstance>>> {
        Box::pin(async move {
            let mut guard = lock(&self.instances);
            guard.retain(|i| i.info.status != InstanceStatus::Terminated);
            Ok(guard
                .iter()
                .filter(|i| i.info.status.is_active())
                .map(|i| i.info.clone())
                .collect())
        })
    }

    fn launch(&self, count: u32) -> BoxFuture<'_, FleetResult<Vec<InstanceId>>> {
        Box::pin(async move {
            let ids: Vec<InstanceId> = (0..count).map(|_| self.start_instance()).collect();
            info!(count, image = %self.template.image, "launched instances");
            Ok(ids)
        })
    }

    fn terminate<'a>(&'a self, ids: &'a [InstanceId]) -> BoxFuture<'a, FleetResult<()>> {
        Box::pin(async move {
            let mut guard = lock(&self.instances);
            for instance in guard.iter_mut().filter(|i| ids.contains(&i.info.id)) {
                if !instance.info.status.is_active() {
                    continue;
                }
                instance.info.status = InstanceStatus::Terminating;
                let _ = instance.shutdown.send(true);
                debug!(instance = %instance.info.id, "termination requested");
            }
            Ok(())
        })
    }
}
