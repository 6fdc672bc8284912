//! Application context wiring the capture, render, and violation
//! services over one shared record store and frame cache.
//!
//! Each service also runs standalone as its own binary; this context
//! exists for single-process deployments and end-to-end tests, and
//! gives the outer process supervisor one explicit `shutdown_all`.

use capture_node::capture::source::SourceFactory;
use capture_node::capture::supervisor::{CaptureSettings, CaptureSupervisor};
use common::detector::{Detector, SceneClassifier};
use common::error::PipelineError;
use common::frames::FrameCache;
use common::store::MemoryStore;
use render_node::render::decoder::ClipDecoder;
use render_node::render::encoder::SinkFactory;
use render_node::render::worker::{RenderSettings, RenderSupervisor};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use violation_node::engine::{EngineSettings, ViolationEngine};
use violation_node::publisher::EventPublisher;

#[derive(Clone, Default)]
pub struct AppOptions {
    pub capture: CaptureSettings,
    pub render: RenderSettings,
    pub engine: EngineSettings,
    pub rules_path: Option<PathBuf>,
}

/// External collaborators the pipeline runs against. Production wiring
/// uses ffmpeg-backed sources/decoders/sinks and an MQTT publisher;
/// tests swap in scripted fakes.
pub struct Collaborators {
    pub sources: Arc<dyn SourceFactory>,
    pub decoder: Arc<dyn ClipDecoder>,
    pub detector: Arc<dyn Detector>,
    pub classifier: Arc<dyn SceneClassifier>,
    pub sinks: Arc<dyn SinkFactory>,
    pub publisher: Arc<dyn EventPublisher>,
}

pub struct AppContext {
    pub store: Arc<MemoryStore>,
    pub frames: FrameCache,
    pub capture: Arc<CaptureSupervisor>,
    pub render: Arc<RenderSupervisor>,
    pub violations: Arc<ViolationEngine>,
}

impl AppContext {
    pub fn new(options: AppOptions, collaborators: Collaborators) -> Self {
        let store = Arc::new(MemoryStore::new());
        let frames = FrameCache::new();

        let capture = Arc::new(CaptureSupervisor::new(
            store.clone(),
            frames.clone(),
            collaborators.sources,
            options.capture,
        ));
        let render = Arc::new(RenderSupervisor::new(
            store.clone(),
            collaborators.decoder,
            collaborators.detector.clone(),
            collaborators.sinks,
            options.render,
        ));
        let violations = Arc::new(ViolationEngine::new(
            store.clone(),
            frames.clone(),
            collaborators.detector,
            collaborators.classifier,
            collaborators.publisher,
            options.rules_path,
            options.engine,
        ));

        Self { store, frames, capture, render, violations }
    }

    /// Start all three workers for a stream. Capture must come first so
    /// the stream config exists for the renderer.
    pub async fn start_stream(&self, url: &str) -> Result<(), PipelineError> {
        self.capture.start(url).await?;
        self.render.start(url).await?;
        self.violations.start(url).await?;
        Ok(())
    }

    /// Stop every worker for a stream, keeping going past individual
    /// `NotRunning` results.
    pub async fn stop_stream(&self, url: &str) -> Result<(), PipelineError> {
        let capture = self.capture.stop(url).await;
        let render = self.render.stop(url).await;
        let violations = self.violations.stop(url).await;
        capture.or(render).or(violations)
    }

    /// Explicit full shutdown for the outer process supervisor.
    pub async fn shutdown_all(&self) {
        self.violations.shutdown_all().await;
        self.render.shutdown_all().await;
        self.capture.shutdown_all().await;
        info!("pipeline shut down");
    }
}
