use capture_node::capture::source::FfmpegSourceFactory;
use capture_node::capture::supervisor::CaptureSupervisor;
use capture_node::config::Config;
use common::frames::FrameCache;
use common::store::MemoryStore;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let log_config =
        telemetry::LogConfig::new("capture-node").with_version(env!("CARGO_PKG_VERSION"));
    telemetry::init_structured_logging(log_config);

    let config = Config::from_env()?;

    let store = Arc::new(MemoryStore::new());
    let frames = FrameCache::new();
    let sources = Arc::new(FfmpegSourceFactory::default());
    let supervisor = Arc::new(CaptureSupervisor::new(
        store,
        frames,
        sources,
        config.settings.clone(),
    ));

    let resumed = supervisor.resume_active().await;
    if resumed > 0 {
        info!(resumed, "active streams resumed");
    }

    let app = capture_node::api::router(supervisor.clone());
    let listener = TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %config.bind_addr, "capture-node started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    supervisor.shutdown_all().await;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
