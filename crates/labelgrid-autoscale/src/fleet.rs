//! Fleet provisioning seam.

use std::fmt;

use labelgrid_core::BoxFuture;
use serde::Serialize;

use crate::error::FleetResult;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct InstanceId(pub String);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Pending,
    Running,
    Terminating,
    Terminated,
}

impl InstanceStatus {
    /// Pending and running instances count as capacity.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FleetInstance {
    pub id: InstanceId,
    pub name: String,
    /// Tag marking the instance as a worker.
    pub tag: String,
    pub status: InstanceStatus,
    /// Unix millis.
    pub launched_at: u64,
}

/// Launches and terminates worker instances.
pub trait Fleet: Send + Sync {
    /// Pending and running worker instances, oldest first.
    fn list_active(&self) -> BoxFuture<'_, FleetResult<Vec<FleetInstance>>>;

    /// Start `count` new instances. Returns their ids.
    fn launch(&self, count: u32) -> BoxFuture<'_, FleetResult<Vec<InstanceId>>>;

    /// Stop the given instances. Unknown or already stopped ids are ignored.
    fn terminate<'a>(&'a self, ids: &'a [InstanceId]) -> BoxFuture<'a, FleetResult<()>>;
}
