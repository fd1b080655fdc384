//! labelgrid-autoscale — queue-depth driven worker fleet sizing.
//!
//! Samples the task queue depth once per interval and converges the
//! worker fleet to a target size. Stateless between cycles: a missed or
//! failed command is simply re-issued on the next cycle.
//!
//! # Scaling Algorithm
//!
//! ```text
//! depth  = task queue depth (read error counts as 0)
//! target = 0                         if depth == 0
//!        = min(max_instances, depth) otherwise
//!
//! active = pending + running instances, oldest first
//! if active < target: launch(target - active)
//! if active > target: terminate(active[target..])
//! ```
//!
//! Termination does not consider whether an instance is busy. The
//! shipped [`LocalFleet`] lets an instance finish its current task before
//! it stops.

pub mod error;
pub mod fleet;
pub mod local_fleet;
pub mod scaler;

pub use error::{FleetError, FleetResult};
pub use fleet::{Fleet, FleetInstance, InstanceId, InstanceStatus};
pub use local_fleet::{InstanceTemplate, LocalFleet, SpawnFn};
pub use scaler::{Autoscaler, CycleReport, ScaleDecision, plan, scaling_target};
