use common::streams::StreamDefaults;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::capture::supervisor::CaptureSettings;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub settings: CaptureSettings,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let bind_addr =
            env::var("CAPTURE_NODE_ADDR").unwrap_or_else(|_| "0.0.0.0:8081".to_string());

        let mut defaults = StreamDefaults::default();
        if let Some(root) = env_string("CLIP_ROOT") {
            defaults.clip_root = PathBuf::from(root);
        }
        defaults.target_fps = env_u32("TARGET_FPS", defaults.target_fps);
        defaults.frame_width = env_u32("FRAME_WIDTH", defaults.frame_width);
        defaults.frame_height = env_u32("FRAME_HEIGHT", defaults.frame_height);
        defaults.max_reconnect_attempts =
            env_u32("MAX_RECONNECT_ATTEMPTS", defaults.max_reconnect_attempts);
        defaults.reconnect_timeout_secs =
            env_u64("RECONNECT_TIMEOUT_SECS", defaults.reconnect_timeout_secs);
        defaults.check_interval_ms = env_u64("CHECK_INTERVAL_MS", defaults.check_interval_ms);
        defaults.clip_duration_secs = env_u64("CLIP_DURATION_SECS", defaults.clip_duration_secs);

        let settings = CaptureSettings {
            defaults,
            read_timeout: Duration::from_millis(env_u64("READ_TIMEOUT_MS", 500)),
            stall_threshold: Duration::from_millis(env_u64("STALL_THRESHOLD_MS", 1000)),
            reconnect_delay: Duration::from_millis(env_u64("RECONNECT_DELAY_MS", 1000)),
            gop_length: env_u32("GOP_LENGTH", 30),
            join_grace: Duration::from_secs(env_u64("JOIN_GRACE_SECS", 5)),
            process_grace: Duration::from_secs(env_u64("PROCESS_GRACE_SECS", 5)),
            segmenter_program: Some(env_string("SEGMENTER_PROGRAM").unwrap_or_else(|| "ffmpeg".into())),
        };

        Ok(Config { bind_addr, settings })
    }
}

fn env_string(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_u32(name: &str, default: u32) -> u32 {
    env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_env_unset() {
        let config = Config::from_env().unwrap();
        assert_eq!(config.settings.defaults.target_fps, 15);
        assert_eq!(config.settings.gop_length, 30);
        assert_eq!(config.settings.segmenter_program.as_deref(), Some("ffmpeg"));
    }
}
