use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Per-stream configuration record.
///
/// Created on first `start` for a source URL (unique by URL) and never
/// deleted afterwards, only deactivated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamConfig {
    pub id: u64,
    pub source_url: String,
    pub name: String,
    pub active: bool,
    pub target_fps: u32,
    pub frame_width: u32,
    pub frame_height: u32,
    pub max_reconnect_attempts: u32,
    pub reconnect_timeout_secs: u64,
    pub check_interval_ms: u64,
    pub clip_duration_secs: u64,
    pub output_dir: PathBuf,
}

/// Node-level defaults applied when a stream config is first created.
#[derive(Debug, Clone)]
pub struct StreamDefaults {
    pub target_fps: u32,
    pub frame_width: u32,
    pub frame_height: u32,
    pub max_reconnect_attempts: u32,
    pub reconnect_timeout_secs: u64,
    pub check_interval_ms: u64,
    pub clip_duration_secs: u64,
    pub clip_root: PathBuf,
}

impl Default for StreamDefaults {
    fn default() -> Self {
        Self {
            target_fps: 15,
            frame_width: 1280,
            frame_height: 720,
            max_reconnect_attempts: 5,
            reconnect_timeout_secs: 5,
            check_interval_ms: 100,
            clip_duration_secs: 1,
            clip_root: PathBuf::from("./data/clips"),
        }
    }
}

/// Last path component of a source URL, used to name per-stream
/// artifacts (segment directories, annotated output streams).
pub fn stream_slug(source_url: &str) -> &str {
    source_url
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(source_url)
}

/// Capture state machine per stream.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CaptureState {
    Idle,
    Connecting,
    Capturing,
    Reconnecting,
    Failed,
}

impl CaptureState {
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            CaptureState::Connecting | CaptureState::Capturing | CaptureState::Reconnecting
        )
    }
}

impl std::fmt::Display for CaptureState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CaptureState::Idle => "idle",
            CaptureState::Connecting => "connecting",
            CaptureState::Capturing => "capturing",
            CaptureState::Reconnecting => "reconnecting",
            CaptureState::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Control-surface result shared by all three nodes: `(success, message)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlOutcome {
    pub success: bool,
    pub message: String,
}

impl ControlOutcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self { success: true, message: message.into() }
    }

    pub fn err(message: impl std::fmt::Display) -> Self {
        Self { success: false, message: message.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_takes_last_path_component() {
        assert_eq!(stream_slug("rtmp://host/live/cam1"), "cam1");
        assert_eq!(stream_slug("rtmp://host/live/cam1/"), "cam1");
        assert_eq!(stream_slug("cam1"), "cam1");
    }

    #[test]
    fn running_states() {
        assert!(CaptureState::Capturing.is_running());
        assert!(CaptureState::Reconnecting.is_running());
        assert!(!CaptureState::Idle.is_running());
        assert!(!CaptureState::Failed.is_running());
    }
}
