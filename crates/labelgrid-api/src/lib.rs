//! labelgrid-api — HTTP front of the LabelGrid pipeline.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/` | Multipart upload; blocks until classified, returns `<name>:<label>` |
//! | GET | `/healthz` | Liveness probe |
//! | GET | `/api/v1/status` | Registry and queue counters |
//! | GET | `/metrics` | Prometheus exposition |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use labelgrid_core::MessageQueue;
use labelgrid_gateway::RequestGateway;
use labelgrid_metrics::PipelineMetrics;

/// Largest accepted upload body.
pub const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub gateway: Arc<RequestGateway>,
    pub task_queue: Arc<dyn MessageQueue>,
    pub result_queue: Arc<dyn MessageQueue>,
    pub metrics: Arc<PipelineMetrics>,
}

/// Build the complete API router.
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/status", get(handlers::status))
        .with_state(state.clone());

    Router::new()
        .route(
            "/",
            post(handlers::classify_upload).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/healthz", get(handlers::healthz))
        .route("/metrics", get(handlers::prometheus_metrics))
        .with_state(state)
        .nest("/api/v1", api_routes)
}
