use crate::metrics;
use crate::render::worker::RenderSupervisor;
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
    pub running: bool,
}

pub fn router(supervisor: Arc<RenderSupervisor>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/renders", get(list_renders))
        .route("/start", post(start_render))
        .route("/stop", delete(stop_render))
        .route("/status", get(render_status))
        .route("/metrics", get(|| async { metrics::render() }))
        .with_state(supervisor)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn readyz() -> &'static str {
    "ok"
}

async fn list_renders(
    State(supervisor): State<Arc<RenderSupervisor>>,
) -> impl axum::response::IntoResponse {
    Json(supervisor.list().await)
}

async fn start_render(
    State(supervisor): State<Arc<RenderSupervisor>>,
    Query(q): Query<StreamQuery>,
) -> (StatusCode, Json<ControlOutcome>) {
    match supervisor.start(&q.url).await {
        Ok(()) => (StatusCode::OK, Json(ControlOutcome::ok(format!("render started for {}", q.url)))),
        Err(e) => (error_status(&e), Json(ControlOutcome::err(e))),
    }
}

async fn stop_render(
    State(supervisor): State<Arc<RenderSupervisor>>,
    Query(q): Query<StreamQuery>,
) -> (StatusCode, Json<ControlOutcome>) {
    match supervisor.stop(&q.url).await {
        Ok(()) => (StatusCode::OK, Json(ControlOutcome::ok(format!("render stopped for {}", q.url)))),
        Err(e) => (error_status(&e), Json(ControlOutcome::err(e))),
    }
}

async fn render_status(
    State(supervisor): State<Arc<RenderSupervisor>>,
    Query(q): Query<StreamQuery>,
) -> Json<StatusResponse> {
    let running = supervisor.is_running(&q.url).await;
    Json(StatusResponse { url: q.url, running })
}

fn error_status(error: &PipelineError) -> StatusCode {
    match error {
        PipelineError::AlreadyRunning(_) | PipelineError::NotRunning(_) => StatusCode::CONFLICT,
        PipelineError::ConfigNotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
