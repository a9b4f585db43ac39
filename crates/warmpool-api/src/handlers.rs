//! HTTP handlers.

use axum::Json;
use axum::body::Body;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use tracing::{info, warn};

use warmpool_metrics::render_prometheus;
use warmpool_state::{PodDescriptor, PoolQueue, pool_counts};

use crate::ApiState;
use crate::error::error_response;
use crate::models::*;

// ── Calls ─────────────────────────────────────────────────────────

/// POST /driver/voice/connect
pub async fn connect_call(
    State(state): State<ApiState>,
    Json(req): Json<CallRequest>,
) -> Response {
    match state.dispatcher.dispatch(&req).await {
        Ok(handoff) => {
            let mut resp = Response::new(Body::from(handoff.body));
            *resp.status_mut() = handoff.status;
            if let Some(ct) = handoff.content_type {
                resp.headers_mut().insert(header::CONTENT_TYPE, ct);
            }
            resp
        }
        Err(e) => e.into_response(),
    }
}

// ── Pod callbacks ─────────────────────────────────────────────────

/// POST /register
///
/// A store failure still answers 200 with a warning so the pod does not
/// retry in a loop; it simply never joins the pool.
pub async fn register_pod(
    State(state): State<ApiState>,
    Json(req): Json<RegisterRequest>,
) -> Response {
    if req.pod_name.is_empty() || req.endpoint.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "pod_name and endpoint are required");
    }

    let pod = PodDescriptor::new(req.pod_name, req.endpoint);
    match state.lifecycle.store().enqueue(PoolQueue::Warm, &pod).await {
        Ok(()) => {
            info!(pod = %pod.name, endpoint = %pod.endpoint, "pod registered");
            Json(StatusResponse::new("registered")).into_response()
        }
        Err(e) => {
            warn!(pod = %pod.name, error = %e, "registration not recorded");
            Json(StatusResponse::new("registered").with_warning(e.to_string())).into_response()
        }
    }
}

/// POST /session-ended
pub async fn session_ended(
    State(state): State<ApiState>,
    Json(req): Json<SessionEndedRequest>,
) -> Response {
    if req.pod_name.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "pod_name is required");
    }

    let pod = PodDescriptor::new(req.pod_name, req.endpoint.unwrap_or_default());
    info!(pod = %pod.name, "session ended, deleting pod");
    state.lifecycle.spawn_delete(pod);
    Json(StatusResponse::new("deleted")).into_response()
}

// ── Status ────────────────────────────────────────────────────────

/// GET /health
pub async fn health() -> impl IntoResponse {
    Json(StatusResponse::new("healthy"))
}

/// GET /pool
pub async fn pool_status(State(state): State<ApiState>) -> Response {
    match pool_counts(state.lifecycle.store().as_ref()).await {
        Ok(counts) => Json(PoolStatus {
            idle: counts.idle,
            active: counts.active,
            min_idle: state.limits.min_idle,
            max_pods: state.limits.max_pods,
        })
        .into_response(),
        Err(e) => error_response(StatusCode::SERVICE_UNAVAILABLE, &e.to_string()),
    }
}

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    let counts = pool_counts(state.lifecycle.store().as_ref()).await.ok();
    let body = render_prometheus(counts, &state.metrics);
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}
