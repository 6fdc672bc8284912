//! Per-stream render workers.
//!
//! Each worker consumes the newest clip for its stream exactly once:
//! decode, detect on the first and last frame, interpolate, draw,
//! resample to the nominal rate, feed the encoder, then delete the
//! clip and everything older than it.

use crate::metrics::{CLIPS_RENDERED_TOTAL, RENDERS_RUNNING};
use crate::render::decoder::ClipDecoder;
use crate::render::draw::draw_detections;
use crate::render::encoder::{FrameSink, SinkFactory};
use crate::render::interpolate::interpolate_window;
use crate::render::resample::{resample_indices, target_frame_count};
use common::detector::Detector;
use common::error::PipelineError;
use common::store::RecordStore;
use common::streams::{stream_slug, StreamConfig};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct RenderSettings {
    /// Base URL the annotated stream is published under; the stream
    /// slug plus `_annotated` is appended.
    pub output_base: String,
    /// Sleep between polls when there is no new clip.
    pub poll_interval: Duration,
    /// Encoder respawn attempts per clip before the attempt is abandoned.
    pub max_encoder_retries: u32,
    pub encoder_retry_delay: Duration,
    pub join_grace: Duration,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            output_base: "rtmp://127.0.0.1/live".into(),
            poll_interval: Duration::from_millis(200),
            max_encoder_retries: 5,
            encoder_retry_delay: Duration::from_millis(1000),
            join_grace: Duration::from_secs(5),
        }
    }
}

struct RenderEntry {
    cancel: CancellationToken,
    worker: Option<JoinHandle<()>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RenderStatus {
    pub source_url: String,
    pub running: bool,
}

#[derive(Clone)]
pub struct RenderSupervisor {
    store: Arc<dyn RecordStore>,
    decoder: Arc<dyn ClipDecoder>,
    detector: Arc<dyn Detector>,
    sinks: Arc<dyn SinkFactory>,
    settings: RenderSettings,
    registry: Arc<Mutex<HashMap<String, RenderEntry>>>,
}

impl RenderSupervisor {
    pub fn new(
        store: Arc<dyn RecordStore>,
        decoder: Arc<dyn ClipDecoder>,
        detector: Arc<dyn Detector>,
        sinks: Arc<dyn SinkFactory>,
        settings: RenderSettings,
    ) -> Self {
        Self {
            store,
            decoder,
            detector,
            sinks,
            settings,
            registry: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn start(&self, url: &str) -> Result<(), PipelineError> {
        let config = self
            .store
            .get_stream(url)
            .await?
            .ok_or_else(|| PipelineError::ConfigNotFound(url.to_string()))?;

        let mut registry = self.registry.lock().await;
        if registry.contains_key(url) {
            return Err(PipelineError::AlreadyRunning(url.to_string()));
        }
        let cancel = CancellationToken::new();
        let worker = tokio::spawn(self.clone().render_loop(config, cancel.clone()));
        registry.insert(url.to_string(), RenderEntry { cancel, worker: Some(worker) });
        RENDERS_RUNNING.inc();
        info!(stream = %url, "render worker started");
        Ok(())
    }

    pub async fn stop(&self, url: &str) -> Result<(), PipelineError> {
        let entry = {
            let mut registry = self.registry.lock().await;
            registry
                .remove(url)
                .ok_or_else(|| PipelineError::NotRunning(url.to_string()))?
        };
        entry.cancel.cancel();
        if let Some(worker) = entry.worker {
            if tokio::time::timeout(self.settings.join_grace, worker).await.is_err() {
                warn!(stream = %url, "render worker did not stop in time, abandoning");
            }
        }
        RENDERS_RUNNING.dec();
        info!(stream = %url, "render worker stopped");
        Ok(())
    }

    pub async fn is_running(&self, url: &str) -> bool {
        self.registry.lock().await.contains_key(url)
    }

    pub async fn list(&self) -> Vec<RenderStatus> {
        let registry = self.registry.lock().await;
        let mut all: Vec<RenderStatus> = registry
            .keys()
            .map(|url| RenderStatus { source_url: url.clone(), running: true })
            .collect();
        all.sort_by(|a, b| a.source_url.cmp(&b.source_url));
        all
    }

    pub async fn shutdown_all(&self) {
        let urls: Vec<String> = self.registry.lock().await.keys().cloned().collect();
        for url in urls {
            if let Err(e) = self.stop(&url).await {
                warn!(stream = %url, error = %e, "stop during shutdown failed");
            }
        }
    }

    fn output_target(&self, url: &str) -> String {
        format!("{}/{}_annotated", self.settings.output_base, stream_slug(url))
    }

    async fn render_loop(self, config: StreamConfig, cancel: CancellationToken) {
        let url = config.source_url.clone();
        let mut sink = self.sinks.create(
            &self.output_target(&url),
            config.target_fps,
            config.frame_width,
            config.frame_height,
        );
        let mut last_processed: Option<u64> = None;

        info!(stream = %url, "render loop running");
        while !cancel.is_cancelled() {
            // Capture teardown flips the config inactive (or removes it);
            // the worker retires itself rather than polling forever.
            match self.store.get_stream(&url).await {
                Ok(Some(current)) if current.active => {}
                Ok(_) => {
                    info!(stream = %url, "stream no longer active, retiring render worker");
                    break;
                }
                Err(e) => {
                    warn!(stream = %url, error = %e, "stream config check failed");
                    tokio::time::sleep(self.settings.poll_interval).await;
                    continue;
                }
            }
            match self.render_once(&config, sink.as_mut(), &mut last_processed).await {
                Ok(true) => {}
                Ok(false) => tokio::time::sleep(self.settings.poll_interval).await,
                Err(e) => {
                    warn!(stream = %url, error = %e, "render attempt failed");
                    tokio::time::sleep(self.settings.poll_interval).await;
                }
            }
        }
        sink.close().await;
        // Present only when the loop exited on its own; `stop` removes
        // the entry (and decrements) before cancelling.
        if self.registry.lock().await.remove(&url).is_some() {
            RENDERS_RUNNING.dec();
        }
        info!(stream = %url, "render loop exited");
    }

    /// Render the newest unprocessed clip, if any. `Ok(true)` means a
    /// clip was consumed and the caller should poll again immediately.
    async fn render_once(
        &self,
        config: &StreamConfig,
        sink: &mut dyn FrameSink,
        last_processed: &mut Option<u64>,
    ) -> Result<bool, PipelineError> {
        let url = &config.source_url;
        let Some(clip) = self.store.latest_clip(url).await? else {
            return Ok(false);
        };
        if *last_processed == Some(clip.id) || clip.processed {
            return Ok(false);
        }
        if tokio::fs::metadata(&clip.path).await.is_err() {
            debug!(stream = %url, path = %clip.path.display(), "clip file not readable yet");
            return Ok(false);
        }

        let frames = self
            .decoder
            .decode(&clip.path, config.frame_width, config.frame_height)
            .await
            .map_err(|e| {
                PipelineError::ClipUnavailable(format!("{}: {}", clip.path.display(), e))
            })?;
        if frames.is_empty() {
            return Err(PipelineError::ClipUnavailable(format!(
                "no frames decoded from {}",
                clip.path.display()
            )));
        }

        let first = self.detector.detect(&frames[0]).await?;
        let last = self
            .detector
            .detect(frames.last().unwrap_or(&frames[0]))
            .await?;
        let per_frame = interpolate_window(&first, &last, frames.len());

        let mut frames = frames;
        for (frame, detections) in frames.iter_mut().zip(per_frame.iter()) {
            draw_detections(frame, detections);
        }

        let target = target_frame_count(clip.duration_secs, config.target_fps);
        let indices = resample_indices(frames.len(), target);

        let mut retries = 0u32;
        for &index in &indices {
            loop {
                if let Err(e) = sink.ensure_open().await {
                    retries += 1;
                    if retries > self.settings.max_encoder_retries {
                        return Err(e);
                    }
                    tokio::time::sleep(self.settings.encoder_retry_delay).await;
                    continue;
                }
                match sink.write(&frames[index]).await {
                    Ok(()) => break,
                    Err(e @ PipelineError::ProcessDead(_)) => {
                        retries += 1;
                        if retries > self.settings.max_encoder_retries {
                            return Err(e);
                        }
                        tokio::time::sleep(self.settings.encoder_retry_delay).await;
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        // Consumption is destructive: this clip and everything older
        // than it are done with. Flag before deleting so the row never
        // looks renderable once its frames have gone out.
        *last_processed = Some(clip.id);
        self.store.mark_clip_processed(clip.id).await?;
        self.store.delete_clip(clip.id).await?;
        if let Err(e) = tokio::fs::remove_file(&clip.path).await {
            debug!(stream = %url, error = %e, "clip file already gone");
        }
        for old in self.store.clips_before(url, clip.start_time).await? {
            self.store.delete_clip(old.id).await?;
            let _ = tokio::fs::remove_file(&old.path).await;
        }
        CLIPS_RENDERED_TOTAL.inc();
        debug!(stream = %url, clip = clip.id, frames = indices.len(), "clip rendered");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::decoder::ClipDecoder;
    use anyhow::Result;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, Utc};
    use common::clips::NewClip;
    use common::detector::MockDetector;
    use common::frames::Frame;
    use common::store::MemoryStore;
    use common::streams::StreamDefaults;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    const URL: &str = "rtmp://host/live/cam1";

    struct FixedDecoder {
        frames: usize,
    }

    #[async_trait]
    impl ClipDecoder for FixedDecoder {
        async fn decode(&self, _path: &Path, width: u32, height: u32) -> Result<Vec<Frame>> {
            Ok((0..self.frames)
                .map(|_| Frame::solid(width, height, [10, 10, 10]))
                .collect())
        }
    }

    #[derive(Default)]
    struct CountingSink {
        written: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl FrameSink for CountingSink {
        async fn ensure_open(&mut self) -> Result<(), PipelineError> {
            Ok(())
        }

        async fn write(&mut self, _frame: &Frame) -> Result<(), PipelineError> {
            self.written.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn close(&mut self) {}
    }

    struct CountingSinkFactory {
        written: Arc<AtomicUsize>,
    }

    impl SinkFactory for CountingSinkFactory {
        fn create(&self, _target: &str, _fps: u32, _w: u32, _h: u32) -> Box<dyn FrameSink> {
            Box::new(CountingSink { written: self.written.clone() })
        }
    }

    async fn fixture(decoded_frames: usize) -> (RenderSupervisor, Arc<MemoryStore>, Arc<AtomicUsize>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let defaults = StreamDefaults {
            frame_width: 16,
            frame_height: 16,
            clip_root: dir.path().to_path_buf(),
            ..StreamDefaults::default()
        };
        store.get_or_create_stream(URL, &defaults).await.unwrap();
        store.set_active(URL, true).await.unwrap();
        let written = Arc::new(AtomicUsize::new(0));
        let supervisor = RenderSupervisor::new(
            store.clone(),
            Arc::new(FixedDecoder { frames: decoded_frames }),
            Arc::new(MockDetector::default()),
            Arc::new(CountingSinkFactory { written: written.clone() }),
            RenderSettings { poll_interval: Duration::from_millis(10), ..RenderSettings::default() },
        );
        (supervisor, store, written, dir)
    }

    async fn register_clip(store: &MemoryStore, dir: &TempDir, name: &str, age_secs: i64) -> common::clips::Clip {
        let path = dir.path().join(name);
        tokio::fs::write(&path, b"segment").await.unwrap();
        let start = Utc::now() - ChronoDuration::seconds(age_secs);
        store
            .create_clip(NewClip {
                stream_url: URL.into(),
                path,
                start_time: start,
                end_time: start + ChronoDuration::seconds(1),
                duration_secs: 1,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn start_requires_a_known_stream() {
        let (supervisor, _, _, _dir) = fixture(4).await;
        let err = supervisor.start("rtmp://host/live/unknown").await.unwrap_err();
        assert!(matches!(err, PipelineError::ConfigNotFound(_)));
    }

    #[tokio::test]
    async fn renders_exactly_target_frames_and_consumes_the_clip() {
        let (supervisor, store, written, dir) = fixture(7).await;
        let clip = register_clip(&store, &dir, "a.ts", 1).await;
        let config = store.get_stream(URL).await.unwrap().unwrap();

        let mut sink = CountingSink { written: written.clone() };
        let mut last = None;
        let rendered = supervisor
            .render_once(&config, &mut sink, &mut last)
            .await
            .unwrap();

        assert!(rendered);
        // 1 second at the default 15 fps, regardless of the 7 decoded frames.
        assert_eq!(written.load(Ordering::SeqCst), 15);
        assert_eq!(last, Some(clip.id));
        assert_eq!(store.count_clips(URL).await.unwrap(), 0);
        assert!(!clip.path.exists());
    }

    #[tokio::test]
    async fn same_clip_is_never_rendered_twice() {
        let (supervisor, store, written, dir) = fixture(4).await;
        register_clip(&store, &dir, "a.ts", 1).await;
        let config = store.get_stream(URL).await.unwrap().unwrap();

        let mut sink = CountingSink { written: written.clone() };
        let mut last = None;
        assert!(supervisor.render_once(&config, &mut sink, &mut last).await.unwrap());
        let after_first = written.load(Ordering::SeqCst);
        assert!(!supervisor.render_once(&config, &mut sink, &mut last).await.unwrap());
        assert_eq!(written.load(Ordering::SeqCst), after_first);
    }

    #[tokio::test]
    async fn older_clips_are_deleted_with_the_consumed_one() {
        let (supervisor, store, written, dir) = fixture(4).await;
        let old = register_clip(&store, &dir, "old.ts", 10).await;
        let newest = register_clip(&store, &dir, "new.ts", 1).await;
        let config = store.get_stream(URL).await.unwrap().unwrap();

        let mut sink = CountingSink { written };
        let mut last = None;
        assert!(supervisor.render_once(&config, &mut sink, &mut last).await.unwrap());

        assert_eq!(store.count_clips(URL).await.unwrap(), 0);
        assert!(!old.path.exists());
        assert!(!newest.path.exists());
    }

    struct BrokenDecoder;

    #[async_trait]
    impl ClipDecoder for BrokenDecoder {
        async fn decode(&self, _path: &Path, _width: u32, _height: u32) -> Result<Vec<Frame>> {
            anyhow::bail!("corrupt segment")
        }
    }

    #[tokio::test]
    async fn undecodable_clip_is_clip_unavailable_and_retained() {
        let (supervisor, store, written, dir) = fixture(4).await;
        register_clip(&store, &dir, "a.ts", 1).await;
        let config = store.get_stream(URL).await.unwrap().unwrap();

        let supervisor = RenderSupervisor::new(
            store.clone(),
            Arc::new(BrokenDecoder),
            Arc::new(MockDetector::default()),
            Arc::new(CountingSinkFactory { written: written.clone() }),
            supervisor.settings.clone(),
        );
        let mut sink = CountingSink { written: written.clone() };
        let mut last = None;
        let err = supervisor
            .render_once(&config, &mut sink, &mut last)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::ClipUnavailable(_)));
        assert_eq!(written.load(Ordering::SeqCst), 0);
        assert_eq!(store.count_clips(URL).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn clip_decoding_to_zero_frames_is_clip_unavailable_and_retained() {
        let (supervisor, store, written, dir) = fixture(0).await;
        register_clip(&store, &dir, "a.ts", 1).await;
        let config = store.get_stream(URL).await.unwrap().unwrap();

        let mut sink = CountingSink { written: written.clone() };
        let mut last = None;
        let err = supervisor
            .render_once(&config, &mut sink, &mut last)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::ClipUnavailable(_)));
        assert_eq!(written.load(Ordering::SeqCst), 0);
        assert_eq!(store.count_clips(URL).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn missing_clip_file_is_skipped() {
        let (supervisor, store, written, dir) = fixture(4).await;
        let clip = register_clip(&store, &dir, "a.ts", 1).await;
        tokio::fs::remove_file(&clip.path).await.unwrap();
        let config = store.get_stream(URL).await.unwrap().unwrap();

        let mut sink = CountingSink { written: written.clone() };
        let mut last = None;
        assert!(!supervisor.render_once(&config, &mut sink, &mut last).await.unwrap());
        assert_eq!(written.load(Ordering::SeqCst), 0);
        // The record stays; the file may show up later.
        assert_eq!(store.count_clips(URL).await.unwrap(), 1);
        let _ = dir;
    }

    #[tokio::test]
    async fn worker_loop_consumes_clips_until_stopped() {
        let (supervisor, store, written, dir) = fixture(5).await;
        register_clip(&store, &dir, "a.ts", 1).await;

        supervisor.start(URL).await.unwrap();
        assert!(supervisor.is_running(URL).await);
        let err = supervisor.start(URL).await.unwrap_err();
        assert!(matches!(err, PipelineError::AlreadyRunning(_)));

        let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
        loop {
            if store.count_clips(URL).await.unwrap() == 0 {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "clip was not consumed");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(written.load(Ordering::SeqCst), 15);

        supervisor.stop(URL).await.unwrap();
        assert!(!supervisor.is_running(URL).await);
        let err = supervisor.stop(URL).await.unwrap_err();
        assert!(matches!(err, PipelineError::NotRunning(_)));
    }

    #[tokio::test]
    async fn worker_retires_itself_when_the_stream_is_deactivated() {
        let (supervisor, store, _written, _dir) = fixture(4).await;

        supervisor.start(URL).await.unwrap();
        assert!(supervisor.is_running(URL).await);

        store.set_active(URL, false).await.unwrap();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
        loop {
            if !supervisor.is_running(URL).await {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "worker did not retire");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let err = supervisor.stop(URL).await.unwrap_err();
        assert!(matches!(err, PipelineError::NotRunning(_)));
    }
}
