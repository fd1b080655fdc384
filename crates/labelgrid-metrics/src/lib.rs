//! labelgrid-metrics — observability for the LabelGrid pipeline.
//!
//! Counts what happens at each stage (gateway, correlator, worker,
//! autoscaler) and renders it in the Prometheus text format.
//!
//! # Architecture
//!
//! ```text
//! PipelineMetrics (shared as Arc)
//!   ├── record_*()  ← called by gateway / correlator / worker / autoscaler
//!   └── snapshot()  → MetricsSnapshot
//!
//! Prometheus exposition
//!   └── render_prometheus() → text/plain for /metrics endpoint
//! ```

pub mod collector;
pub mod prometheus;

pub use collector::{
    DeliveryOutcome, MetricsSnapshot, PipelineMetrics, RequestOutcome, TaskOutcome,
};
pub use prometheus::render_prometheus;
