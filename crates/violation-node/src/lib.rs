//! Violation node: samples the latest frame per stream on a fixed
//! cadence, evaluates data-driven rules against detections and scene,
//! and publishes qualifying events to the message queue.

pub mod api;
pub mod condition;
pub mod config;
pub mod engine;
pub mod metrics;
pub mod publisher;
pub mod rules;

pub use config::Config;
pub use engine::{EngineSettings, ViolationEngine};
pub use publisher::{EventPublisher, MqttPublisher, RecordingPublisher};
