use common::detector::MockDetector;
use common::store::MemoryStore;
use render_node::config::Config;
use render_node::render::decoder::FfmpegClipDecoder;
use render_node::render::encoder::EncoderSinkFactory;
use render_node::render::worker::RenderSupervisor;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let log_config =
        telemetry::LogConfig::new("render-node").with_version(env!("CARGO_PKG_VERSION"));
    telemetry::init_structured_logging(log_config);

    let config = Config::from_env()?;

    let store = Arc::new(MemoryStore::new());
    let supervisor = Arc::new(RenderSupervisor::new(
        store,
        Arc::new(FfmpegClipDecoder::new(config.decoder_program.clone())),
        Arc::new(MockDetector::default()),
        Arc::new(EncoderSinkFactory {
            program: config.encoder_program.clone(),
            grace: Duration::from_secs(5),
        }),
        config.settings.clone(),
    ));

    let app = render_node::api::router(supervisor.clone());
    let listener = TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %config.bind_addr, "render-node started");

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
