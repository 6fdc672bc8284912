//! Full pipeline over one shared store: capture discovers a segment,
//! the renderer consumes it, and the violation sampler publishes an
//! event for the cached frames, all with scripted collaborators.

use async_trait::async_trait;
use capture_node::capture::source::ScriptedSourceFactory;
use capture_node::capture::supervisor::CaptureSettings;
use common::detector::{MockDetector, MockSceneClassifier};
use common::error::PipelineError;
use common::frames::Frame;
use common::rules::{Rule, SeverityGate};
use common::store::RecordStore;
use common::streams::{CaptureState, StreamDefaults};
use render_node::render::decoder::ClipDecoder;
use render_node::render::encoder::{FrameSink, SinkFactory};
use render_node::render::worker::RenderSettings;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::Instant;
use vigil_vms::{AppContext, AppOptions, Collaborators};
use violation_node::engine::EngineSettings;
use violation_node::publisher::RecordingPublisher;

const URL: &str = "rtmp://host/live/cam1";

struct FakeDecoder {
    frames: usize,
}

#[async_trait]
impl ClipDecoder for FakeDecoder {
    async fn decode(&self, _path: &Path, width: u32, height: u32) -> anyhow::Result<Vec<Frame>> {
        Ok((0..self.frames)
            .map(|_| Frame::solid(width, height, [20, 20, 20]))
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

fn context(dir: &TempDir) -> (AppContext, RecordingPublisher, Arc<AtomicUsize>) {
    let publisher = RecordingPublisher::new();
    let written = Arc::new(AtomicUsize::new(0));
    let options = AppOptions {
        capture: CaptureSettings {
            defaults: StreamDefaults {
                frame_width: 8,
                frame_height: 8,
                check_interval_ms: 20,
                clip_root: dir.path().to_path_buf(),
                ..StreamDefaults::default()
            },
            read_timeout: Duration::from_millis(20),
            stall_threshold: Duration::from_millis(200),
            reconnect_delay: Duration::from_millis(5),
            segmenter_program: None,
            ..CaptureSettings::default()
        },
        render: RenderSettings {
            poll_interval: Duration::from_millis(10),
            ..RenderSettings::default()
        },
        engine: EngineSettings {
            frame_interval: Duration::from_millis(20),
            gate: SeverityGate::Below(3),
            ..EngineSettings::default()
        },
        rules_path: None,
    };
    let collaborators = Collaborators {
        sources: Arc::new(ScriptedSourceFactory::healthy()),
        decoder: Arc::new(FakeDecoder { frames: 7 }),
        detector: Arc::new(MockDetector::default()),
        classifier: Arc::new(MockSceneClassifier::default()),
        sinks: Arc::new(CountingSinkFactory { written: written.clone() }),
        publisher: Arc::new(publisher.clone()),
    };
    (AppContext::new(options, collaborators), publisher, written)
}

#[tokio::test]
async fn segment_flows_from_capture_through_render_to_a_published_event() {
    let dir = TempDir::new().unwrap();
    let (ctx, publisher, written) = context(&dir);
    ctx
        .store
        .replace_rules(vec![Rule {
            code: "R001".into(),
            description: "person present".into(),
            severity_level: 1,
            condition: json!({"entity_type": "person"}),
        }])
        .await
        .unwrap();

    ctx.start_stream(URL).await.unwrap();
    assert!(ctx.capture.status(URL).await.is_running());
    assert!(ctx.render.is_running(URL).await);
    assert!(ctx.violations.is_running(URL).await);

    let config = ctx.store.get_stream(URL).await.unwrap().unwrap();
    tokio::fs::write(config.output_dir.join("202501010000_1.ts"), b"seg")
        .await
        .unwrap();

    // Capture registers the segment, the renderer decodes it, draws, and
    // consumes it destructively: record and file both gone.
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let consumed = ctx.store.count_clips(URL).await.unwrap() == 0
            && written.load(Ordering::SeqCst) >= 15;
        if consumed {
            break;
        }
        assert!(Instant::now() < deadline, "clip was not rendered");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    // 1 second at 15 fps per consumed clip.
    assert_eq!(written.load(Ordering::SeqCst) % 15, 0);
    assert!(!config.output_dir.join("202501010000_1.ts").exists());

    // The sampler sees cached frames and the severity-1 rule qualifies.
    let deadline = Instant::now() + Duration::from_secs(5);
    while publisher.events().await.is_empty() {
        assert!(Instant::now() < deadline, "no event published");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let events = publisher.events().await;
    let payload: Value = serde_json::from_str(&events[0].1).unwrap();
    assert_eq!(events[0].0, "violations/events");
    assert!(payload["keyframe_id"].as_u64().is_some());
    assert_eq!(payload["violations"][0]["rule_code"], "R001");
    assert_eq!(payload["violations"][0]["severity_level"], 1);
    assert_eq!(payload["scene"]["scene_type"], "indoor");
    assert!(payload["detections"]["person"].as_array().is_some());

    ctx.stop_stream(URL).await.unwrap();
    assert_eq!(ctx.capture.status(URL).await, CaptureState::Idle);
    assert!(!ctx.render.is_running(URL).await);
    assert!(!ctx.violations.is_running(URL).await);
    assert!(!ctx.store.get_stream(URL).await.unwrap().unwrap().active);
    assert_eq!(ctx.store.count_clips(URL).await.unwrap(), 0);
    assert!(!config.output_dir.exists());
    assert!(ctx.frames.latest(URL).await.is_none());

    // Violations are an audit trail; teardown keeps them.
    assert!(!ctx.store.list_violations().await.unwrap().is_empty());
}

#[tokio::test]
async fn shutdown_all_stops_every_worker() {
    let dir = TempDir::new().unwrap();
    let (ctx, _publisher, _written) = context(&dir);

    ctx.start_stream("rtmp://host/live/cam1").await.unwrap();
    ctx.start_stream("rtmp://host/live/cam2").await.unwrap();
    assert_eq!(ctx.capture.list().await.len(), 2);

    ctx.shutdown_all().await;
    assert!(ctx.capture.list().await.is_empty());
    assert!(ctx.render.list().await.is_empty());
    assert!(ctx.violations.list().await.is_empty());
}

#[tokio::test]
async fn stop_stream_tolerates_partially_running_workers() {
    let dir = TempDir::new().unwrap();
    let (ctx, _publisher, _written) = context(&dir);

    ctx.capture.start(URL).await.unwrap();
    // Render and sampler never started; stop still succeeds via capture.
    ctx.stop_stream(URL).await.unwrap();
    assert_eq!(ctx.capture.status(URL).await, CaptureState::Idle);

    let err = ctx.stop_stream(URL).await.unwrap_err();
    assert!(matches!(err, PipelineError::NotRunning(_)));
}
