use crate::render::worker::RenderSettings;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub decoder_program: String,
    pub encoder_program: String,
    pub settings: RenderSettings,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let bind_addr =
            env::var("RENDER_NODE_ADDR").unwrap_or_else(|_| "0.0.0.0:8082".to_string());
        let decoder_program = env::var("DECODER_PROGRAM").unwrap_or_else(|_| "ffmpeg".into());
        let encoder_program = env::var("ENCODER_PROGRAM").unwrap_or_else(|_| "ffmpeg".into());

        let mut settings = RenderSettings::default();
        if let Ok(base) = env::var("OUTPUT_BASE_URL") {
            if !base.is_empty() {
                settings.output_base = base;
            }
        }
        settings.poll_interval = Duration::from_millis(env_u64("RENDER_POLL_INTERVAL_MS", 200));
        settings.max_encoder_retries = env_u64("MAX_ENCODER_RETRIES", 5) as u32;
        settings.encoder_retry_delay =
            Duration::from_millis(env_u64("ENCODER_RETRY_DELAY_MS", 1000));

        Ok(Config { bind_addr, decoder_program, encoder_program, settings })
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
