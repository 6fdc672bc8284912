//! Single-process deployment: capture, render, and violation workers
//! share one store and frame cache, with each node's control API
//! nested under one listener.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use capture_node::api::StreamQuery;
use capture_node::FfmpegSourceFactory;
use common::detector::{MockDetector, MockSceneClassifier};
use common::error::PipelineError;
use common::streams::ControlOutcome;
use render_node::render::decoder::FfmpegClipDecoder;
use render_node::render::encoder::EncoderSinkFactory;
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;
use vigil_vms::{AppContext, AppOptions, Collaborators};
use violation_node::MqttPublisher;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let log_config =
        telemetry::LogConfig::new("vigil-vms").with_version(env!("CARGO_PKG_VERSION"));
    telemetry::init_structured_logging(log_config);

    let capture = capture_node::Config::from_env()?;
    let render = render_node::Config::from_env()?;
    let violation = violation_node::Config::from_env()?;
    let bind_addr = env::var("VMS_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

    let options = AppOptions {
        capture: capture.settings,
        render: render.settings,
        engine: violation.settings,
        rules_path: violation.rules_path,
    };
    let collaborators = Collaborators {
        sources: Arc::new(FfmpegSourceFactory::default()),
        decoder: Arc::new(FfmpegClipDecoder::new(render.decoder_program)),
        detector: Arc::new(MockDetector::default()),
        classifier: Arc::new(MockSceneClassifier::default()),
        sinks: Arc::new(EncoderSinkFactory {
            program: render.encoder_program,
            grace: Duration::from_secs(5),
        }),
        publisher: Arc::new(MqttPublisher::connect(
            "vigil-vms",
            &violation.mqtt_host,
            violation.mqtt_port,
        )),
    };
    let ctx = Arc::new(AppContext::new(options, collaborators));

    let loaded = ctx.violations.load_rules().await?;
    if loaded > 0 {
        info!(rules = loaded, "rules loaded");
    }
    let resumed = ctx.capture.resume_active().await;
    if resumed > 0 {
        info!(resumed, "active streams resumed");
    }

    let app = Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/streams/start", post(start_stream))
        .route("/streams/stop", delete(stop_stream))
        .with_state(ctx.clone())
        .nest("/capture", capture_node::api::router(ctx.capture.clone()))
        .nest("/render", render_node::api::router(ctx.render.clone()))
        .nest("/violations", violation_node::api::router(ctx.violations.clone()));

    let listener = TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "vigil-vms started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    ctx.shutdown_all().await;
    Ok(())
}

/// Start the full pipeline (capture, render, sampling) for one stream.
async fn start_stream(
    State(ctx): State<Arc<AppContext>>,
    Query(q): Query<StreamQuery>,
) -> (StatusCode, Json<ControlOutcome>) {
    match ctx.start_stream(&q.url).await {
        Ok(()) => (
            StatusCode::OK,
            Json(ControlOutcome::ok(format!("pipeline started for {}", q.url))),
        ),
        Err(e) => (error_status(&e), Json(ControlOutcome::err(e))),
    }
}

async fn stop_stream(
    State(ctx): State<Arc<AppContext>>,
    Query(q): Query<StreamQuery>,
) -> (StatusCode, Json<ControlOutcome>) {
    match ctx.stop_stream(&q.url).await {
        Ok(()) => (
            StatusCode::OK,
            Json(ControlOutcome::ok(format!("pipeline stopped for {}", q.url))),
        ),
        Err(e) => (error_status(&e), Json(ControlOutcome::err(e))),
    }
}

fn error_status(error: &PipelineError) -> StatusCode {
    match error {
        PipelineError::AlreadyRunning(_) | PipelineError::NotRunning(_) => StatusCode::CONFLICT,
        PipelineError::ConfigNotFound(_) => StatusCode::NOT_FOUND,
        PipelineError::CaptureInitFailed(_, _) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
