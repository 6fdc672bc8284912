use crate::engine::ViolationEngine;
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
    pub running: bool,
}

pub fn router(engine: Arc<ViolationEngine>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/samplers", get(list_samplers))
        .route("/start", post(start_sampler))
        .route("/stop", delete(stop_sampler))
        .route("/status", get(sampler_status))
        .route("/rules/reload", post(reload_rules))
        .route("/metrics", get(|| async { metrics::render() }))
        .with_state(engine)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn readyz() -> &'static str {
    "ok"
}

async fn list_samplers(
    State(engine): State<Arc<ViolationEngine>>,
) -> impl axum::response::IntoResponse {
    Json(engine.list().await)
}

async fn start_sampler(
    State(engine): State<Arc<ViolationEngine>>,
    Query(q): Query<StreamQuery>,
) -> (StatusCode, Json<ControlOutcome>) {
    match engine.start(&q.url).await {
        Ok(()) => (StatusCode::OK, Json(ControlOutcome::ok(format!("sampler started for {}", q.url)))),
        Err(e) => (error_status(&e), Json(ControlOutcome::err(e))),
    }
}

async fn stop_sampler(
    State(engine): State<Arc<ViolationEngine>>,
    Query(q): Query<StreamQuery>,
) -> (StatusCode, Json<ControlOutcome>) {
    match engine.stop(&q.url).await {
        Ok(()) => (StatusCode::OK, Json(ControlOutcome::ok(format!("sampler stopped for {}", q.url)))),
        Err(e) => (error_status(&e), Json(ControlOutcome::err(e))),
    }
}

async fn sampler_status(
    State(engine): State<Arc<ViolationEngine>>,
    Query(q): Query<StreamQuery>,
) -> Json<StatusResponse> {
    let running = engine.is_running(&q.url).await;
    Json(StatusResponse { url: q.url, running })
}

async fn reload_rules(
    State(engine): State<Arc<ViolationEngine>>,
) -> (StatusCode, Json<ControlOutcome>) {
    match engine.update_rules().await {
        Ok(count) => (
            StatusCode::OK,
            Json(ControlOutcome::ok(format!("{} rules loaded", count))),
        ),
        Err(e) => (error_status(&e), Json(ControlOutcome::err(e))),
    }
}

fn error_status(error: &PipelineError) -> StatusCode {
    match error {
        PipelineError::AlreadyRunning(_) | PipelineError::NotRunning(_) => StatusCode::CONFLICT,
        PipelineError::RuleLoadError(_) => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
