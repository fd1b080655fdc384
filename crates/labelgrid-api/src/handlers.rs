//! HTTP handlers.
//!
//! The upload endpoint answers in plain text; the status endpoint uses the
//! JSON `{success, data, error}` envelope.

use axum::Json;
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use labelgrid_gateway::GatewayError;
use serde::Serialize;
use tracing::{error, warn};

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

// ── Submission ─────────────────────────────────────────────────

/// Status code for a failed submission.
fn gateway_status(err: &GatewayError) -> StatusCode {
    match err {
        GatewayError::InvalidName(_) => StatusCode::BAD_REQUEST,
        GatewayError::DuplicateSubmission(_) => StatusCode::CONFLICT,
        GatewayError::Timeout { .. } => StatusCode::REQUEST_TIMEOUT,
        GatewayError::Backend(_) | GatewayError::Abandoned(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// POST /
///
/// Takes the first multipart field that carries a filename. The filename
/// becomes the task id. Responds `200 "<name>:<label>"`, including when the
/// label is the error label.
pub async fn classify_upload(State(state): State<ApiState>, mut multipart: Multipart) -> Response {
    let mut upload: Option<(String, Vec<u8>)> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
        };
        let Some(filename) = field.file_name().map(str::to_string) else {
            continue;
        };
        match field.bytes().await {
            Ok(data) => {
                upload = Some((filename, data.to_vec()));
                break;
            }
            Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
        }
    }

    let Some((filename, payload)) = upload else {
        return (StatusCode::BAD_REQUEST, "no file in upload".to_string()).into_response();
    };

    match state.gateway.submit(&filename, payload).await {
        Ok(result) => (StatusCode::OK, result.to_string()).into_response(),
        Err(e) => {
            let status = gateway_status(&e);
            if status.is_server_error() {
                error!(%filename, error = %e, "submission failed");
            } else {
                warn!(%filename, error = %e, status = status.as_u16(), "submission rejected");
            }
            (status, e.to_string()).into_response()
        }
    }
}

// ── Status ─────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub pending_waits: usize,
    pub orphaned_results: usize,
    pub task_queue_depth: u64,
    pub result_queue_depth: u64,
}

/// GET /api/v1/status
pub async fn status(State(state): State<ApiState>) -> impl IntoResponse {
    let registry = state.gateway.registry();
    let depths = async {
        let tasks = state.task_queue.depth().await?;
        let results = state.result_queue.depth().await?;
        Ok::<_, labelgrid_core::BackendError>((tasks, results))
    };

    match depths.await {
        Ok((task_queue_depth, result_queue_depth)) => ApiResponse::ok(StatusReport {
            pending_waits: registry.pending_waits(),
            orphaned_results: registry.orphaned_results(),
            task_queue_depth,
            result_queue_depth,
        })
        .into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

// ── Health / Prometheus ────────────────────────────────────────

/// GET /healthz
pub async fn healthz() -> &'static str {
    "ok"
}

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    let body = labelgrid_metrics::render_prometheus(&state.metrics.snapshot());
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build_router;
    use axum::body::Body;
    use axum::http::Request;
    use labelgrid_core::{ClassifyResult, MessageQueue};
    use labelgrid_gateway::{RequestGateway, WaitRegistry};
    use labelgrid_metrics::PipelineMetrics;
    use labelgrid_state::StateStore;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    const BOUNDARY: &str = "labelgrid-test-boundary";

    fn test_state(timeout: Duration) -> (ApiState, StateStore) {
        let store = StateStore::open_in_memory().unwrap();
        let metrics = Arc::new(PipelineMetrics::new());
        let task_queue: Arc<dyn MessageQueue> = Arc::new(store.queue("req"));
        let gateway = Arc::new(RequestGateway::new(
            Arc::new(store.bucket("in")),
            Arc::clone(&task_queue),
            Arc::new(WaitRegistry::new(Duration::from_secs(300))),
            timeout,
            Arc::clone(&metrics),
        ));
        let state = ApiState {
            gateway,
            task_queue,
            result_queue: Arc::new(store.queue("resp")),
            metrics,
        };
        (state, store)
    }

    fn upload(filename: &str, data: &[u8]) -> Request<Body> {
        let mut body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"inputFile\"; filename=\"{filename}\"\r\nContent-Type: image/jpeg\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri("/")
            .header("content-type", format!("multipart/form-data; boundary={BOUNDARY}"))
            .body(Body::from(body))
            .unwrap()
    }

    async fn body_text(resp: Response) -> String {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    /// Answers the next registered wait with `label`.
    fn resolve_when_waiting(state: &ApiState, task_id: &'static str, label: &'static str) {
        let registry = Arc::clone(state.gateway.registry());
        tokio::spawn(async move {
            while registry.pending_waits() == 0 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            registry.resolve(ClassifyResult::new(task_id, label));
        });
    }

    #[tokio::test]
    async fn upload_returns_name_and_label() {
        let (state, _store) = test_state(Duration::from_secs(30));
        resolve_when_waiting(&state, "a.jpg", "cat");

        let resp = build_router(state).oneshot(upload("a.jpg", b"pixels")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_text(resp).await, "a.jpg:cat");
    }

    #[tokio::test]
    async fn error_label_is_still_ok() {
        let (state, _store) = test_state(Duration::from_secs(30));
        resolve_when_waiting(&state, "b.jpg", "error");

        let resp = build_router(state).oneshot(upload("b.jpg", b"")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_text(resp).await, "b.jpg:error");
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_maps_to_408() {
        let (state, store) = test_state(Duration::from_secs(30));
        let registry = Arc::clone(state.gateway.registry());

        let resp = build_router(state).oneshot(upload("slow.jpg", b"x")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::REQUEST_TIMEOUT);
        assert_eq!(registry.pending_waits(), 0);
        assert_eq!(store.queue("req").depth().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn invalid_name_maps_to_400() {
        let (state, _store) = test_state(Duration::from_secs(30));
        let resp = build_router(state).oneshot(upload("a:b.jpg", b"x")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn missing_file_maps_to_400() {
        let (state, _store) = test_state(Duration::from_secs(30));
        let body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"note\"\r\n\r\nhello\r\n--{BOUNDARY}--\r\n"
        );
        let req = Request::builder()
            .method("POST")
            .uri("/")
            .header("content-type", format!("multipart/form-data; boundary={BOUNDARY}"))
            .body(Body::from(body))
            .unwrap();

        let resp = build_router(state).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn live_duplicate_maps_to_409() {
        let (state, _store) = test_state(Duration::from_secs(30));
        let _held = state.gateway.registry().register("a.jpg").unwrap();

        let resp = build_router(state).oneshot(upload("a.jpg", b"x")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn healthz_ok() {
        assert_eq!(healthz().await, "ok");
    }

    #[tokio::test]
    async fn status_reports_counters() {
        let (state, store) = test_state(Duration::from_secs(30));
        store.queue("req").send("x.jpg").await.unwrap();
        state.gateway.registry().resolve(ClassifyResult::new("late.jpg", "dog"));

        let resp = status(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body_text(resp).await).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["data"]["task_queue_depth"], 1);
        assert_eq!(json["data"]["result_queue_depth"], 0);
        assert_eq!(json["data"]["orphaned_results"], 1);
        assert_eq!(json["data"]["pending_waits"], 0);
    }

    #[tokio::test]
    async fn prometheus_endpoint_returns_text() {
        let (state, _store) = test_state(Duration::from_secs(30));
        state.metrics.record_submission();

        let resp = prometheus_metrics(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let text = body_text(resp).await;
        assert!(text.contains("labelgrid_requests_submitted_total 1"));
    }
}
