//! Control-surface and clip-discovery behavior of the capture
//! supervisor, run against a scripted frame source.

use capture_node::capture::source::ScriptedSourceFactory;
use capture_node::capture::supervisor::{CaptureSettings, CaptureSupervisor};
use common::error::PipelineError;
use common::frames::FrameCache;
use common::store::{MemoryStore, RecordStore};
use common::streams::{CaptureState, StreamDefaults};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::Instant;

const URL: &str = "rtmp://host/live/cam1";

fn settings(dir: &TempDir) -> CaptureSettings {
    CaptureSettings {
        defaults: StreamDefaults {
            frame_width: 8,
            frame_height: 8,
            check_interval_ms: 20,
            clip_root: dir.path().to_path_buf(),
            ..StreamDefaults::default()
        },
        read_timeout: Duration::from_millis(20),
        stall_threshold: Duration::from_millis(40),
        reconnect_delay: Duration::from_millis(5),
        join_grace: Duration::from_secs(1),
        process_grace: Duration::from_millis(100),
        segmenter_program: None,
        ..CaptureSettings::default()
    }
}

fn fixture(dir: &TempDir) -> (CaptureSupervisor, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let supervisor = CaptureSupervisor::new(
        store.clone(),
        FrameCache::new(),
        Arc::new(ScriptedSourceFactory::healthy()),
        settings(dir),
    );
    (supervisor, store)
}

async fn wait_for_clip_count(store: &MemoryStore, url: &str, count: usize, what: &str) {
    let deadline = Instant::now() + Duration::from_secs(3);
    loop {
        if store.count_clips(url).await.unwrap() == count {
            return;
        }
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn start_status_stop_lifecycle() {
    let dir = TempDir::new().unwrap();
    let (supervisor, store) = fixture(&dir);

    assert_eq!(supervisor.status(URL).await, CaptureState::Idle);
    supervisor.start(URL).await.unwrap();
    assert!(supervisor.status(URL).await.is_running());
    assert!(store.get_stream(URL).await.unwrap().unwrap().active);

    let err = supervisor.start(URL).await.unwrap_err();
    assert!(matches!(err, PipelineError::AlreadyRunning(_)));

    supervisor.stop(URL).await.unwrap();
    assert_eq!(supervisor.status(URL).await, CaptureState::Idle);
    assert!(!store.get_stream(URL).await.unwrap().unwrap().active);

    let err = supervisor.stop(URL).await.unwrap_err();
    assert!(matches!(err, PipelineError::NotRunning(_)));
}

#[tokio::test]
async fn segments_register_once_and_teardown_removes_them() {
    let dir = TempDir::new().unwrap();
    let (supervisor, store) = fixture(&dir);

    supervisor.start(URL).await.unwrap();
    let config = store.get_stream(URL).await.unwrap().unwrap();

    tokio::fs::write(config.output_dir.join("202501010000_1.ts"), b"seg")
        .await
        .unwrap();
    wait_for_clip_count(&store, URL, 1, "first clip").await;

    let clip = store.latest_clip(URL).await.unwrap().unwrap();
    assert_eq!(clip.path.extension().and_then(|e| e.to_str()), Some("ts"));
    assert_eq!(clip.duration_secs, config.clip_duration_secs);

    // Unchanged directory: the same file is never registered twice.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(store.count_clips(URL).await.unwrap(), 1);

    tokio::time::sleep(Duration::from_millis(20)).await;
    tokio::fs::write(config.output_dir.join("202501010000_2.ts"), b"seg")
        .await
        .unwrap();
    wait_for_clip_count(&store, URL, 2, "second clip").await;

    supervisor.stop(URL).await.unwrap();
    assert_eq!(store.count_clips(URL).await.unwrap(), 0);
    assert!(!config.output_dir.exists());
}

#[tokio::test]
async fn one_stream_failing_leaves_others_running() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    let supervisor = CaptureSupervisor::new(
        store.clone(),
        FrameCache::new(),
        // Breaks after 3 frames and never recovers.
        Arc::new(ScriptedSourceFactory::broken_after(3)),
        CaptureSettings {
            defaults: StreamDefaults {
                max_reconnect_attempts: 1,
                reconnect_timeout_secs: 1,
                clip_root: dir.path().to_path_buf(),
                ..StreamDefaults::default()
            },
            ..settings(&dir)
        },
    );

    supervisor.start("rtmp://host/live/cam1").await.unwrap();
    supervisor.start("rtmp://host/live/cam2").await.unwrap();

    let deadline = Instant::now() + Duration::from_secs(3);
    loop {
        if supervisor.status("rtmp://host/live/cam1").await == CaptureState::Failed {
            break;
        }
        assert!(Instant::now() < deadline, "cam1 never failed");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // cam2's worker fails on its own schedule, but the registry and the
    // control surface stay responsive throughout.
    assert_ne!(supervisor.status("rtmp://host/live/cam2").await, CaptureState::Idle);
    assert!(!store.get_stream("rtmp://host/live/cam1").await.unwrap().unwrap().active);

    supervisor.shutdown_all().await;
    assert!(supervisor.list().await.is_empty());
}
