//! Event publishing to the message queue.

use async_trait::async_trait;
use common::error::PipelineError;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info};

/// Best-effort publish: failures are reported but the caller never
/// retries inline.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), PipelineError>;
}

pub struct MqttPublisher {
    client: AsyncClient,
}

impl MqttPublisher {
    /// Connect to the broker and keep the event loop alive in a
    /// background task.
    pub fn connect(client_id: &str, host: &str, port: u16) -> Self {
        let mut options = MqttOptions::new(client_id, host, port);
        options.set_keep_alive(Duration::from_secs(30));
        let (client, mut eventloop) = AsyncClient::new(options, 10);
        tokio::spawn(async move {
            loop {
                if let Err(e) = eventloop.poll().await {
                    error!(error = %e, "mqtt event loop error");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        });
        info!(host, port, "mqtt publisher connected");
        Self { client }
    }
}

#[async_trait]
impl EventPublisher for MqttPublisher {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), PipelineError> {
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| PipelineError::PublishFailed(e.to_string()))
    }
}

/// Test publisher that records every event it is handed.
#[derive(Clone, Default)]
pub struct RecordingPublisher {
    events: Arc<Mutex<Vec<(String, String)>>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<(String, String)> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), PipelineError> {
        self.events.lock().await.push((topic.to_string(), payload));
        Ok(())
    }
}

/// Test publisher that always fails, for exercising the fire-and-forget
/// path.
#[derive(Clone, Default)]
pub struct FailingPublisher;

#[async_trait]
impl EventPublisher for FailingPublisher {
    async fn publish(&self, _topic: &str, _payload: String) -> Result<(), PipelineError> {
        Err(PipelineError::PublishFailed("broker unreachable".into()))
    }
}
