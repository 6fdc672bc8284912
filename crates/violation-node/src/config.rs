use crate::engine::EngineSettings;
use common::rules::SeverityGate;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub rules_path: Option<PathBuf>,
    pub settings: EngineSettings,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let bind_addr =
            env::var("VIOLATION_NODE_ADDR").unwrap_or_else(|_| "0.0.0.0:8083".to_string());
        let mqtt_host = env::var("MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let mqtt_port = env::var("MQTT_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(1883);
        let rules_path = env::var("RULES_FILE").ok().filter(|v| !v.is_empty()).map(PathBuf::from);

        let mut settings = EngineSettings {
            gate: SeverityGate::from_env(),
            ..EngineSettings::default()
        };
        settings.frame_interval = Duration::from_millis(env_u64("FRAME_INTERVAL_MS", 1000));
        if let Ok(topic) = env::var("EVENT_TOPIC") {
            if !topic.is_empty() {
                settings.topic = topic;
            }
        }

        Ok(Config { bind_addr, mqtt_host, mqtt_port, rules_path, settings })
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
