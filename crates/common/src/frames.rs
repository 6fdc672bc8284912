use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A raw decoded video frame, packed BGR24.
#[derive(Clone, PartialEq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl Frame {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self { width, height, data }
    }

    /// Uniform-color frame, handy for synthetic sources and tests.
    pub fn solid(width: u32, height: u32, bgr: [u8; 3]) -> Self {
        let mut data = Vec::with_capacity((width * height * 3) as usize);
        for _ in 0..width * height {
            data.extend_from_slice(&bgr);
        }
        Self { width, height, data }
    }

    pub fn byte_len(&self) -> usize {
        (self.width * self.height * 3) as usize
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Latest frame read from a live stream, with capture metadata.
#[derive(Debug, Clone)]
pub struct FrameSnapshot {
    pub frame: Frame,
    pub captured_at: DateTime<Utc>,
    pub sequence: u64,
}

/// Shared latest-frame buffer: the capture loop writes the most recent
/// frame per stream, the violation engine samples it on its own
/// cadence. Single writer per stream, many readers.
#[derive(Clone, Default)]
pub struct FrameCache {
    inner: Arc<RwLock<HashMap<String, FrameSnapshot>>>,
}

impl FrameCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put(&self, stream_url: &str, frame: Frame, sequence: u64) {
        let snapshot = FrameSnapshot { frame, captured_at: Utc::now(), sequence };
        self.inner.write().await.insert(stream_url.to_string(), snapshot);
    }

    pub async fn latest(&self, stream_url: &str) -> Option<FrameSnapshot> {
        self.inner.read().await.get(stream_url).cloned()
    }

    pub async fn remove(&self, stream_url: &str) {
        self.inner.write().await.remove(stream_url);
    }
}
