use crate::capture::supervisor::CaptureSupervisor;
use crate::metrics;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use common::error::PipelineError;
use common::streams::ControlOutcome;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Deserialize)]
pub struct StreamQuery {
    pub url: String,
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub url: String,
    pub state: String,
}

pub fn router(supervisor: Arc<CaptureSupervisor>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/streams", get(list_streams))
        .route("/start", post(start_stream))
        .route("/stop", delete(stop_stream))
        .route("/status", get(stream_status))
        .route("/metrics", get(|| async { metrics::render() }))
        .with_state(supervisor)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn readyz() -> &'static str {
    "ok"
}

async fn list_streams(State(supervisor): State<Arc<CaptureSupervisor>>) -> impl axum::response::IntoResponse {
    Json(supervisor.list().await)
}

async fn start_stream(
    State(supervisor): State<Arc<CaptureSupervisor>>,
    Query(q): Query<StreamQuery>,
) -> (StatusCode, Json<ControlOutcome>) {
    match supervisor.start(&q.url).await {
        Ok(()) => (StatusCode::OK, Json(ControlOutcome::ok(format!("capture started for {}", q.url)))),
        Err(e) => (error_status(&e), Json(ControlOutcome::err(e))),
    }
}

async fn stop_stream(
    State(supervisor): State<Arc<CaptureSupervisor>>,
    Query(q): Query<StreamQuery>,
) -> (StatusCode, Json<ControlOutcome>) {
    match supervisor.stop(&q.url).await {
        Ok(()) => (StatusCode::OK, Json(ControlOutcome::ok(format!("capture stopped for {}", q.url)))),
        Err(e) => (error_status(&e), Json(ControlOutcome::err(e))),
    }
}

async fn stream_status(
    State(supervisor): State<Arc<CaptureSupervisor>>,
    Query(q): Query<StreamQuery>,
) -> Json<StatusResponse> {
    let state = supervisor.status(&q.url).await;
    Json(StatusResponse { url: q.url, state: state.to_string() })
}

fn error_status(error: &PipelineError) -> StatusCode {
    match error {
        PipelineError::AlreadyRunning(_) | PipelineError::NotRunning(_) => StatusCode::CONFLICT,
        PipelineError::ConfigNotFound(_) => StatusCode::NOT_FOUND,
        PipelineError::CaptureInitFailed(_, _) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
