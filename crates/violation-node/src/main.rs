use common::detector::{MockDetector, MockSceneClassifier};
use common::frames::FrameCache;
use common::store::MemoryStore;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use violation_node::config::Config;
use violation_node::engine::ViolationEngine;
use violation_node::publisher::MqttPublisher;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let log_config =
        telemetry::LogConfig::new("violation-node").with_version(env!("CARGO_PKG_VERSION"));
    telemetry::init_structured_logging(log_config);

    let config = Config::from_env()?;

    let publisher = MqttPublisher::connect("vigil-violation-node", &config.mqtt_host, config.mqtt_port);
    let engine = Arc::new(ViolationEngine::new(
        Arc::new(MemoryStore::new()),
        FrameCache::new(),
        Arc::new(MockDetector::default()),
        Arc::new(MockSceneClassifier::default()),
        Arc::new(publisher),
        config.rules_path.clone(),
        config.settings.clone(),
    ));

    match engine.load_rules().await {
        Ok(count) => info!(count, "initial rule set loaded"),
        Err(e) => warn!(error = %e, "failed to load initial rules"),
    }

    let app = violation_node::api::router(engine.clone());
    let listener = TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %config.bind_addr, "violation-node started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    engine.shutdown_all().await;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
