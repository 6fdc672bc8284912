//! Narrow interface to the external config/record store.
//!
//! All store access in the pipeline goes through [`RecordStore`] so the
//! capture, render, and violation workers can be tested against
//! [`MemoryStore`]. Multi-step mutations are atomic with respect to each
//! other; `MemoryStore` serializes them behind one async mutex.

use crate::clips::{Clip, NewClip};
use crate::detections::{DetectedObject, KeyFrame, NewDetectedObject, Scene};
use crate::rules::{NewViolation, Rule, Violation};
use crate::streams::{stream_slug, StreamConfig, StreamDefaults};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Fetch the config for `url`, creating it from `defaults` on first
    /// use. Stream configs are unique by source URL.
    async fn get_or_create_stream(
        &self,
        url: &str,
        defaults: &StreamDefaults,
    ) -> Result<StreamConfig>;

    async fn get_stream(&self, url: &str) -> Result<Option<StreamConfig>>;

    async fn set_active(&self, url: &str, active: bool) -> Result<()>;

    async fn list_active_streams(&self) -> Result<Vec<StreamConfig>>;

    async fn create_clip(&self, clip: NewClip) -> Result<Clip>;

    /// Most recent clip for a stream, by start time.
    async fn latest_clip(&self, url: &str) -> Result<Option<Clip>>;

    /// Clips strictly older than `start_time`, oldest first.
    async fn clips_before(&self, url: &str, start_time: DateTime<Utc>) -> Result<Vec<Clip>>;

    async fn has_clip_for_path(&self, url: &str, path: &Path) -> Result<bool>;

    /// Flag a clip as consumed. Set before the row is removed so a crash
    /// mid-consumption cannot leave a clip that looks renderable.
    async fn mark_clip_processed(&self, clip_id: u64) -> Result<()>;

    async fn delete_clip(&self, clip_id: u64) -> Result<()>;

    /// Remove every clip row for a stream; returns the number deleted.
    async fn delete_clips(&self, url: &str) -> Result<u64>;

    async fn count_clips(&self, url: &str) -> Result<usize>;

    async fn create_keyframe(
        &self,
        url: &str,
        frame_time: DateTime<Utc>,
        frame_index: u64,
    ) -> Result<KeyFrame>;

    async fn create_detected_object(&self, object: NewDetectedObject) -> Result<DetectedObject>;

    async fn create_scene(
        &self,
        keyframe_id: u64,
        scene_type: &str,
        description: &str,
    ) -> Result<Scene>;

    /// Record a violation. The referenced keyframe must exist.
    async fn create_violation(&self, violation: NewViolation) -> Result<Violation>;

    async fn list_violations(&self) -> Result<Vec<Violation>>;

    async fn list_rules(&self) -> Result<Vec<Rule>>;

    async fn replace_rules(&self, rules: Vec<Rule>) -> Result<()>;
}

#[derive(Default)]
struct Inner {
    streams: Vec<StreamConfig>,
    clips: Vec<Clip>,
    keyframes: Vec<KeyFrame>,
    objects: Vec<DetectedObject>,
    scenes: Vec<Scene>,
    violations: Vec<Violation>,
    rules: Vec<Rule>,
    next_id: u64,
}

impl Inner {
    fn issue_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-memory [`RecordStore`]: the default backing for single-node
/// deployments and the fixture for every pipeline test.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get_or_create_stream(
        &self,
        url: &str,
        defaults: &StreamDefaults,
    ) -> Result<StreamConfig> {
        let mut inner = self.inner.lock().await;
        if let Some(existing) = inner.streams.iter().find(|s| s.source_url == url) {
            return Ok(existing.clone());
        }
        let id = inner.issue_id();
        let config = StreamConfig {
            id,
            source_url: url.to_string(),
            name: format!("stream_{}", id),
            active: false,
            target_fps: defaults.target_fps,
            frame_width: defaults.frame_width,
            frame_height: defaults.frame_height,
            max_reconnect_attempts: defaults.max_reconnect_attempts,
            reconnect_timeout_secs: defaults.reconnect_timeout_secs,
            check_interval_ms: defaults.check_interval_ms,
            clip_duration_secs: defaults.clip_duration_secs,
            output_dir: defaults
                .clip_root
                .join(format!("{}_hls", stream_slug(url))),
        };
        inner.streams.push(config.clone());
        Ok(config)
    }

    async fn get_stream(&self, url: &str) -> Result<Option<StreamConfig>> {
        let inner = self.inner.lock().await;
        Ok(inner.streams.iter().find(|s| s.source_url == url).cloned())
    }

    async fn set_active(&self, url: &str, active: bool) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let config = inner
            .streams
            .iter_mut()
            .find(|s| s.source_url == url)
            .ok_or_else(|| anyhow!("no stream config for '{}'", url))?;
        config.active = active;
        Ok(())
    }

    async fn list_active_streams(&self) -> Result<Vec<StreamConfig>> {
        let inner = self.inner.lock().await;
        Ok(inner.streams.iter().filter(|s| s.active).cloned().collect())
    }

    async fn create_clip(&self, clip: NewClip) -> Result<Clip> {
        let mut inner = self.inner.lock().await;
        if inner
            .clips
            .iter()
            .any(|c| c.stream_url == clip.stream_url && c.path == clip.path)
        {
            return Err(anyhow!("clip already registered for {:?}", clip.path));
        }
        let id = inner.issue_id();
        let row = Clip {
            id,
            stream_url: clip.stream_url,
            path: clip.path,
            start_time: clip.start_time,
            end_time: clip.end_time,
            duration_secs: clip.duration_secs,
            processed: false,
        };
        inner.clips.push(row.clone());
        Ok(row)
    }

    async fn latest_clip(&self, url: &str) -> Result<Option<Clip>> {
        let inner = self.inner.lock().await;
        Ok(
            inner
                .clips
                .iter()
                .filter(|c| c.stream_url == url)
                .max_by_key(|c| c.start_time)
                .cloned(),
        )
    }

    async fn clips_before(&self, url: &str, start_time: DateTime<Utc>) -> Result<Vec<Clip>> {
        let inner = self.inner.lock().await;
        let mut old: Vec<Clip> = inner
            .clips
            .iter()
            .filter(|c| c.stream_url == url && c.start_time < start_time)
            .cloned()
            .collect();
        old.sort_by_key(|c| c.start_time);
        Ok(old)
    }

    async fn has_clip_for_path(&self, url: &str, path: &Path) -> Result<bool> {
        let inner = self.inner.lock().await;
        Ok(
            inner
                .clips
                .iter()
                .any(|c| c.stream_url == url && c.path == path),
        )
    }

    async fn mark_clip_processed(&self, clip_id: u64) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let clip = inner
            .clips
            .iter_mut()
            .find(|c| c.id == clip_id)
            .ok_or_else(|| anyhow!("clip {} does not exist", clip_id))?;
        clip.processed = true;
        Ok(())
    }

    async fn delete_clip(&self, clip_id: u64) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.clips.retain(|c| c.id != clip_id);
        Ok(())
    }

    async fn delete_clips(&self, url: &str) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        let before = inner.clips.len();
        inner.clips.retain(|c| c.stream_url != url);
        Ok((before - inner.clips.len()) as u64)
    }

    async fn count_clips(&self, url: &str) -> Result<usize> {
        let inner = self.inner.lock().await;
        Ok(inner.clips.iter().filter(|c| c.stream_url == url).count())
    }

    async fn create_keyframe(
        &self,
        url: &str,
        frame_time: DateTime<Utc>,
        frame_index: u64,
    ) -> Result<KeyFrame> {
        let mut inner = self.inner.lock().await;
        let id = inner.issue_id();
        let keyframe = KeyFrame {
            id,
            stream_url: url.to_string(),
            frame_time,
            frame_index,
        };
        inner.keyframes.push(keyframe.clone());
        Ok(keyframe)
    }

    async fn create_detected_object(&self, object: NewDetectedObject) -> Result<DetectedObject> {
        let mut inner = self.inner.lock().await;
        if !inner.keyframes.iter().any(|k| k.id == object.keyframe_id) {
            return Err(anyhow!("keyframe {} does not exist", object.keyframe_id));
        }
        let id = inner.issue_id();
        let row = DetectedObject {
            id,
            keyframe_id: object.keyframe_id,
            parent_id: object.parent_id,
            entity_type: object.entity_type,
            specific_type: object.specific_type,
            confidence: object.confidence,
            bbox: object.bbox,
            segmentation: object.segmentation,
            track_id: object.track_id,
        };
        inner.objects.push(row.clone());
        Ok(row)
    }

    async fn create_scene(
        &self,
        keyframe_id: u64,
        scene_type: &str,
        description: &str,
    ) -> Result<Scene> {
        let mut inner = self.inner.lock().await;
        if !inner.keyframes.iter().any(|k| k.id == keyframe_id) {
            return Err(anyhow!("keyframe {} does not exist", keyframe_id));
        }
        let id = inner.issue_id();
        let scene = Scene {
            id,
            keyframe_id,
            scene_type: scene_type.to_string(),
            description: description.to_string(),
        };
        inner.scenes.push(scene.clone());
        Ok(scene)
    }

    async fn create_violation(&self, violation: NewViolation) -> Result<Violation> {
        let mut inner = self.inner.lock().await;
        if !inner
            .keyframes
            .iter()
            .any(|k| k.id == violation.keyframe_id)
        {
            return Err(anyhow!(
                "violation references missing keyframe {}",
                violation.keyframe_id
            ));
        }
        let id = inner.issue_id();
        let row = Violation {
            id,
            rule_code: violation.rule_code,
            keyframe_id: violation.keyframe_id,
            detected_object_id: violation.detected_object_id,
            scene_id: violation.scene_id,
            occurred_at: Utc::now(),
        };
        inner.violations.push(row.clone());
        Ok(row)
    }

    async fn list_violations(&self) -> Result<Vec<Violation>> {
        let inner = self.inner.lock().await;
        Ok(inner.violations.clone())
    }

    async fn list_rules(&self) -> Result<Vec<Rule>> {
        let inner = self.inner.lock().await;
        Ok(inner.rules.clone())
    }

    async fn replace_rules(&self, rules: Vec<Rule>) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.rules = rules;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detections::BoundingBox;
    use std::path::PathBuf;

    fn defaults() -> StreamDefaults {
        StreamDefaults::default()
    }

    #[tokio::test]
    async fn get_or_create_is_unique_by_url() {
        let store = MemoryStore::new();
        let a = store
            .get_or_create_stream("rtmp://cam1", &defaults())
            .await
            .unwrap();
        let b = store
            .get_or_create_stream("rtmp://cam1", &defaults())
            .await
            .unwrap();
        assert_eq!(a.id, b.id);
        assert!(a.output_dir.ends_with("cam1_hls"));
    }

    #[tokio::test]
    async fn clip_path_registered_at_most_once() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let new_clip = || NewClip {
            stream_url: "rtmp://cam1".into(),
            path: PathBuf::from("/tmp/seg_0001.ts"),
            start_time: now,
            end_time: now,
            duration_secs: 1,
        };
        store.create_clip(new_clip()).await.unwrap();
        assert!(store.create_clip(new_clip()).await.is_err());
        assert_eq!(store.count_clips("rtmp://cam1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn marking_a_clip_processed_is_visible_and_checked() {
        let store = MemoryStore::new();
        let clip = store
            .create_clip(NewClip {
                stream_url: "rtmp://cam1".into(),
                path: PathBuf::from("/tmp/seg_0001.ts"),
                start_time: Utc::now(),
                end_time: Utc::now(),
                duration_secs: 1,
            })
            .await
            .unwrap();
        assert!(!clip.processed);

        store.mark_clip_processed(clip.id).await.unwrap();
        let latest = store.latest_clip("rtmp://cam1").await.unwrap().unwrap();
        assert!(latest.processed);

        assert!(store.mark_clip_processed(999).await.is_err());
    }

    #[tokio::test]
    async fn delete_clips_leaves_violations_intact() {
        let store = MemoryStore::new();
        let keyframe = store
            .create_keyframe("rtmp://cam1", Utc::now(), 0)
            .await
            .unwrap();
        store
            .create_violation(NewViolation {
                rule_code: "R001".into(),
                keyframe_id: keyframe.id,
                detected_object_id: None,
                scene_id: None,
            })
            .await
            .unwrap();
        store
            .create_clip(NewClip {
                stream_url: "rtmp://cam1".into(),
                path: PathBuf::from("/tmp/seg_0001.ts"),
                start_time: Utc::now(),
                end_time: Utc::now(),
                duration_secs: 1,
            })
            .await
            .unwrap();

        assert_eq!(store.delete_clips("rtmp://cam1").await.unwrap(), 1);
        assert_eq!(store.list_violations().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn violation_requires_existing_keyframe() {
        let store = MemoryStore::new();
        let result = store
            .create_violation(NewViolation {
                rule_code: "R001".into(),
                keyframe_id: 999,
                detected_object_id: None,
                scene_id: None,
            })
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn detected_object_requires_existing_keyframe() {
        let store = MemoryStore::new();
        let result = store
            .create_detected_object(NewDetectedObject {
                keyframe_id: 42,
                parent_id: None,
                entity_type: "person".into(),
                specific_type: "person".into(),
                confidence: 0.9,
                bbox: BoundingBox::new(0.0, 0.0, 10.0, 10.0),
                segmentation: None,
                track_id: None,
            })
            .await;
        assert!(result.is_err());
    }
}
