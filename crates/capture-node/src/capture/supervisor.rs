//! Per-stream capture supervision.
//!
//! Each started stream gets one worker task that owns its frame source
//! and segmenter process. The registry maps source URL to worker entry;
//! control calls (`start`/`stop`/`status`) only touch the registry and
//! never block on capture I/O.

use crate::capture::discovery;
use crate::capture::segmenter;
use crate::capture::source::{FrameSource, SourceFactory};
use crate::metrics::{CLIPS_REGISTERED_TOTAL, RECONNECTS_TOTAL, STREAMS_RUNNING};
use common::error::PipelineError;
use common::frames::FrameCache;
use common::process::ExternalProcess;
use common::store::RecordStore;
use common::streams::{CaptureState, StreamConfig, StreamDefaults};
use common::validation::validate_source_url;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub defaults: StreamDefaults,
    /// Per-read timeout handed to the frame source.
    pub read_timeout: Duration,
    /// How long without a frame before the worker starts reconnecting.
    pub stall_threshold: Duration,
    /// Pause between reconnect attempts.
    pub reconnect_delay: Duration,
    pub gop_length: u32,
    /// How long `stop` waits for a worker before abandoning it.
    pub join_grace: Duration,
    /// Grace period for external process shutdown.
    pub process_grace: Duration,
    /// Segmenter binary; `None` disables segment production entirely.
    pub segmenter_program: Option<String>,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            defaults: StreamDefaults::default(),
            read_timeout: Duration::from_millis(500),
            stall_threshold: Duration::from_millis(1000),
            reconnect_delay: Duration::from_millis(1000),
            gop_length: 30,
            join_grace: Duration::from_secs(5),
            process_grace: Duration::from_secs(5),
            segmenter_program: Some("ffmpeg".into()),
        }
    }
}

struct StreamEntry {
    state: CaptureState,
    cancel: CancellationToken,
    worker: Option<JoinHandle<()>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamStatus {
    pub source_url: String,
    pub state: CaptureState,
}

#[derive(Clone)]
pub struct CaptureSupervisor {
    store: Arc<dyn RecordStore>,
    frames: FrameCache,
    sources: Arc<dyn SourceFactory>,
    settings: CaptureSettings,
    registry: Arc<Mutex<HashMap<String, StreamEntry>>>,
}

impl CaptureSupervisor {
    pub fn new(
        store: Arc<dyn RecordStore>,
        frames: FrameCache,
        sources: Arc<dyn SourceFactory>,
        settings: CaptureSettings,
    ) -> Self {
        Self {
            store,
            frames,
            sources,
            settings,
            registry: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Start capturing a stream. A `Failed` entry may be restarted; any
    /// other live entry is rejected as already running.
    pub async fn start(&self, url: &str) -> Result<(), PipelineError> {
        validate_source_url(url).map_err(PipelineError::Other)?;
        let cancel = {
            let mut registry = self.registry.lock().await;
            if let Some(entry) = registry.get(url) {
                if entry.state != CaptureState::Failed {
                    return Err(PipelineError::AlreadyRunning(url.to_string()));
                }
            }
            let cancel = CancellationToken::new();
            registry.insert(
                url.to_string(),
                StreamEntry { state: CaptureState::Connecting, cancel: cancel.clone(), worker: None },
            );
            cancel
        };
        match self.try_start(url, cancel).await {
            Ok(()) => Ok(()),
            Err(e) => {
                let mut registry = self.registry.lock().await;
                if let Some(entry) = registry.get_mut(url) {
                    entry.state = CaptureState::Failed;
                }
                Err(e)
            }
        }
    }

    async fn try_start(&self, url: &str, cancel: CancellationToken) -> Result<(), PipelineError> {
        let config = self
            .store
            .get_or_create_stream(url, &self.settings.defaults)
            .await?;
        tokio::fs::create_dir_all(&config.output_dir)
            .await
            .map_err(|e| PipelineError::CaptureInitFailed(url.to_string(), e.to_string()))?;

        let mut source = self.sources.create(&config);
        source
            .open()
            .await
            .map_err(|e| PipelineError::CaptureInitFailed(url.to_string(), e.to_string()))?;

        let segmenter = match &self.settings.segmenter_program {
            Some(program) => Some(
                ExternalProcess::spawn(&segmenter::segmenter_spec(
                    program,
                    &config,
                    self.settings.gop_length,
                ))
                .map_err(|e| PipelineError::CaptureInitFailed(url.to_string(), e.to_string()))?,
            ),
            None => None,
        };

        self.store.set_active(url, true).await?;

        let worker = tokio::spawn(self.clone().capture_loop(config, source, segmenter, cancel));

        let mut registry = self.registry.lock().await;
        match registry.get_mut(url) {
            Some(entry) => {
                entry.state = CaptureState::Capturing;
                entry.worker = Some(worker);
                STREAMS_RUNNING.inc();
                info!(stream = %url, "capture started");
                Ok(())
            }
            None => {
                // A concurrent stop removed the entry; the worker sees the
                // cancelled token and exits on its own.
                Err(PipelineError::NotRunning(url.to_string()))
            }
        }
    }

    /// Start capture for every stream the store still marks active,
    /// typically after a process restart. Individual failures are logged
    /// and do not stop the sweep.
    pub async fn resume_active(&self) -> usize {
        let configs = match self.store.list_active_streams().await {
            Ok(configs) => configs,
            Err(e) => {
                warn!(error = %e, "could not list active streams");
                return 0;
            }
        };
        let mut resumed = 0;
        for config in configs {
            match self.start(&config.source_url).await {
                Ok(()) => resumed += 1,
                Err(e) => warn!(stream = %config.source_url, error = %e, "resume failed"),
            }
        }
        resumed
    }

    /// Stop a stream, delete its clip records and segment directory, and
    /// mark its config inactive.
    pub async fn stop(&self, url: &str) -> Result<(), PipelineError> {
        let entry = {
            let mut registry = self.registry.lock().await;
            registry
                .remove(url)
                .ok_or_else(|| PipelineError::NotRunning(url.to_string()))?
        };
        entry.cancel.cancel();
        if let Some(worker) = entry.worker {
            // Bounded join: a wedged worker is abandoned, not waited on.
            if tokio::time::timeout(self.settings.join_grace, worker).await.is_err() {
                warn!(stream = %url, "capture worker did not stop in time, abandoning");
            }
        }
        if entry.state.is_running() {
            STREAMS_RUNNING.dec();
        }
        if let Some(config) = self.store.get_stream(url).await? {
            self.teardown_stream(&config).await;
        }
        info!(stream = %url, "capture stopped");
        Ok(())
    }

    /// Current state for a stream; unknown URLs are `Idle`.
    pub async fn status(&self, url: &str) -> CaptureState {
        let registry = self.registry.lock().await;
        registry.get(url).map(|e| e.state).unwrap_or(CaptureState::Idle)
    }

    pub async fn list(&self) -> Vec<StreamStatus> {
        let registry = self.registry.lock().await;
        let mut all: Vec<StreamStatus> = registry
            .iter()
            .map(|(url, entry)| StreamStatus { source_url: url.clone(), state: entry.state })
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

    async fn capture_loop(
        self,
        config: StreamConfig,
        mut source: Box<dyn FrameSource>,
        mut segmenter: Option<ExternalProcess>,
        cancel: CancellationToken,
    ) {
        let url = config.source_url.clone();
        let check_interval = Duration::from_millis(config.check_interval_ms);
        let reconnect_timeout = Duration::from_secs(config.reconnect_timeout_secs);
        let mut reconnect_started: Option<Instant> = None;
        let mut attempts = 0u32;
        let mut last_frame = Instant::now();
        let mut last_check = Instant::now();
        let mut sequence = 0u64;
        let mut failed = false;

        info!(stream = %url, "capture loop running");

        while !cancel.is_cancelled() {
            match source.read_frame(self.settings.read_timeout).await {
                Ok(Some(frame)) => {
                    last_frame = Instant::now();
                    if reconnect_started.take().is_some() {
                        attempts = 0;
                        info!(stream = %url, "capture recovered");
                        self.set_state(&url, CaptureState::Capturing).await;
                    }
                    sequence += 1;
                    if let Some(proc) = segmenter.as_mut() {
                        if let Err(e) = proc.write_frame(&frame.data).await {
                            warn!(stream = %url, error = %e, "segmenter lost, respawning");
                            segmenter = self.respawn_segmenter(&config);
                        }
                    }
                    self.frames.put(&url, frame, sequence).await;
                    if last_check.elapsed() >= check_interval {
                        last_check = Instant::now();
                        if segmenter.is_none() && self.settings.segmenter_program.is_some() {
                            segmenter = self.respawn_segmenter(&config);
                        }
                        match discovery::register_new_clip(self.store.as_ref(), &config).await {
                            Ok(Some(clip)) => {
                                CLIPS_REGISTERED_TOTAL.inc();
                                debug!(stream = %url, path = %clip.path.display(), "clip registered");
                            }
                            Ok(None) => {}
                            Err(e) => warn!(stream = %url, error = %e, "clip discovery failed"),
                        }
                    }
                }
                Ok(None) => {
                    if last_frame.elapsed() >= self.settings.stall_threshold {
                        self
                            .begin_reconnect(&url, source.as_mut(), &mut reconnect_started, &mut attempts)
                            .await;
                    }
                }
                Err(e) => {
                    debug!(stream = %url, error = %e, "frame read failed");
                    self
                        .begin_reconnect(&url, source.as_mut(), &mut reconnect_started, &mut attempts)
                        .await;
                }
            }

            if let Some(started) = reconnect_started {
                if started.elapsed() > reconnect_timeout || attempts > config.max_reconnect_attempts {
                    failed = true;
                    break;
                }
            }
        }

        source.close().await;
        if let Some(proc) = segmenter.take() {
            proc.terminate(self.settings.process_grace).await;
        }

        if failed {
            error!(stream = %url, attempts, "reconnect window exhausted, giving up");
            self.teardown_stream(&config).await;
            self.set_state(&url, CaptureState::Failed).await;
            STREAMS_RUNNING.dec();
        }
        info!(stream = %url, "capture loop exited");
    }

    async fn begin_reconnect(
        &self,
        url: &str,
        source: &mut dyn FrameSource,
        reconnect_started: &mut Option<Instant>,
        attempts: &mut u32,
    ) {
        if reconnect_started.is_none() {
            *reconnect_started = Some(Instant::now());
            self.set_state(url, CaptureState::Reconnecting).await;
        }
        *attempts += 1;
        RECONNECTS_TOTAL.inc();
        warn!(stream = %url, attempt = *attempts, "reacquiring source");
        source.close().await;
        tokio::time::sleep(self.settings.reconnect_delay).await;
        if let Err(e) = source.open().await {
            debug!(stream = %url, error = %e, "source reopen failed");
        }
    }

    fn respawn_segmenter(&self, config: &StreamConfig) -> Option<ExternalProcess> {
        let program = self.settings.segmenter_program.as_ref()?;
        match ExternalProcess::spawn(&segmenter::segmenter_spec(
            program,
            config,
            self.settings.gop_length,
        )) {
            Ok(proc) => Some(proc),
            Err(e) => {
                warn!(stream = %config.source_url, error = %e, "segmenter respawn failed");
                None
            }
        }
    }

    /// Deactivate the config, drop clip records and segment files, and
    /// clear the frame cache entry. Safe to call more than once.
    async fn teardown_stream(&self, config: &StreamConfig) {
        let url = &config.source_url;
        if let Err(e) = self.store.set_active(url, false).await {
            warn!(stream = %url, error = %e, "failed to deactivate stream");
        }
        match self.store.delete_clips(url).await {
            Ok(n) if n > 0 => info!(stream = %url, clips = n, "clip records removed"),
            Ok(_) => {}
            Err(e) => warn!(stream = %url, error = %e, "failed to delete clip records"),
        }
        if let Err(e) = tokio::fs::remove_dir_all(&config.output_dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(stream = %url, error = %e, "failed to remove segment directory");
            }
        }
        self.frames.remove(url).await;
    }

    async fn set_state(&self, url: &str, state: CaptureState) {
        let mut registry = self.registry.lock().await;
        if let Some(entry) = registry.get_mut(url) {
            entry.state = state;
        }
    }
}
