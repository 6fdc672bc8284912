//! Per-stream sampling loop: detect, classify, evaluate rules, record
//! violations, publish qualifying events.

use crate::condition::matches_condition;
use crate::metrics::{
    EVENTS_PUBLISHED_TOTAL, KEYFRAMES_SAMPLED_TOTAL, PUBLISH_FAILURES_TOTAL, SAMPLERS_RUNNING,
    VIOLATIONS_TOTAL,
};
use crate::publisher::EventPublisher;
use crate::rules;
use common::detections::{Detection, NewDetectedObject};
use common::detector::{Detector, SceneClassifier, SceneLabel};
use common::error::PipelineError;
use common::frames::{FrameCache, FrameSnapshot};
use common::rules::{NewViolation, Rule, SeverityGate, Violation};
use common::store::RecordStore;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Sampling cadence per stream.
    pub frame_interval: Duration,
    /// Publish-gating predicate over violation severity.
    pub gate: SeverityGate,
    /// Queue topic events are published to.
    pub topic: String,
    pub join_grace: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            frame_interval: Duration::from_secs(1),
            gate: SeverityGate::default(),
            topic: "violations/events".into(),
            join_grace: Duration::from_secs(5),
        }
    }
}

struct SamplerEntry {
    cancel: CancellationToken,
    worker: Option<JoinHandle<()>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SamplerStatus {
    pub source_url: String,
    pub running: bool,
}

#[derive(Clone)]
pub struct ViolationEngine {
    store: Arc<dyn RecordStore>,
    frames: FrameCache,
    detector: Arc<dyn Detector>,
    classifier: Arc<dyn SceneClassifier>,
    publisher: Arc<dyn EventPublisher>,
    rules_path: Option<PathBuf>,
    settings: EngineSettings,
    registry: Arc<Mutex<HashMap<String, SamplerEntry>>>,
}

impl ViolationEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn RecordStore>,
        frames: FrameCache,
        detector: Arc<dyn Detector>,
        classifier: Arc<dyn SceneClassifier>,
        publisher: Arc<dyn EventPublisher>,
        rules_path: Option<PathBuf>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            frames,
            detector,
            classifier,
            publisher,
            rules_path,
            settings,
            registry: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Load the configured rules file into the store. Called once at
    /// startup and again by `update_rules`.
    pub async fn load_rules(&self) -> Result<usize, PipelineError> {
        match &self.rules_path {
            Some(path) => rules::reload_rules(self.store.as_ref(), path).await,
            None => Ok(0),
        }
    }

    /// Reload rules from the configured file, replacing the active set.
    pub async fn update_rules(&self) -> Result<usize, PipelineError> {
        self.load_rules().await
    }

    pub async fn start(&self, url: &str) -> Result<(), PipelineError> {
        let mut registry = self.registry.lock().await;
        if registry.contains_key(url) {
            return Err(PipelineError::AlreadyRunning(url.to_string()));
        }
        let cancel = CancellationToken::new();
        let worker = tokio::spawn(self.clone().sample_loop(url.to_string(), cancel.clone()));
        registry.insert(url.to_string(), SamplerEntry { cancel, worker: Some(worker) });
        SAMPLERS_RUNNING.inc();
        info!(stream = %url, "violation sampler started");
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
                warn!(stream = %url, "violation sampler did not stop in time, abandoning");
            }
        }
        SAMPLERS_RUNNING.dec();
        info!(stream = %url, "violation sampler stopped");
        Ok(())
    }

    pub async fn is_running(&self, url: &str) -> bool {
        self.registry.lock().await.contains_key(url)
    }

    pub async fn list(&self) -> Vec<SamplerStatus> {
        let registry = self.registry.lock().await;
        let mut all: Vec<SamplerStatus> = registry
            .keys()
            .map(|url| SamplerStatus { source_url: url.clone(), running: true })
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

    async fn sample_loop(self, url: String, cancel: CancellationToken) {
        info!(stream = %url, "sampling loop running");
        let mut last_sequence: Option<u64> = None;
        while !cancel.is_cancelled() {
            // A config flipped inactive by capture teardown retires the
            // sampler; a stream with no config at all may be fed
            // externally and keeps sampling.
            if let Ok(Some(config)) = self.store.get_stream(&url).await {
                if !config.active {
                    info!(stream = %url, "stream deactivated, retiring sampler");
                    break;
                }
            }
            if let Some(snapshot) = self.frames.latest(&url).await {
                // Skip if capture has not produced anything new.
                if last_sequence != Some(snapshot.sequence) {
                    last_sequence = Some(snapshot.sequence);
                    if let Err(e) = self.evaluate_snapshot(&url, &snapshot).await {
                        warn!(stream = %url, error = %e, "keyframe evaluation failed");
                    }
                }
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.settings.frame_interval) => {}
            }
        }
        // Present only when the loop exited on its own; `stop` removes
        // the entry (and decrements) before cancelling.
        if self.registry.lock().await.remove(&url).is_some() {
            SAMPLERS_RUNNING.dec();
        }
        info!(stream = %url, "sampling loop exited");
    }

    /// One full evaluation pass for a sampled frame: persist the
    /// keyframe, detections, and scene, run every rule, and publish an
    /// event when a qualifying violation occurred. Publishing is
    /// fire-and-forget.
    pub async fn evaluate_snapshot(
        &self,
        url: &str,
        snapshot: &FrameSnapshot,
    ) -> Result<(), PipelineError> {
        let keyframe = self
            .store
            .create_keyframe(url, snapshot.captured_at, snapshot.sequence)
            .await?;
        KEYFRAMES_SAMPLED_TOTAL.inc();

        let detections = self.detector.detect(&snapshot.frame).await?;
        let scene = self.classifier.classify(&snapshot.frame).await?;
        let scene_row = self
            .store
            .create_scene(keyframe.id, &scene.scene_type, &scene.description)
            .await?;

        let mut objects = Vec::with_capacity(detections.len());
        for detection in &detections {
            let object = self
                .store
                .create_detected_object(NewDetectedObject {
                    keyframe_id: keyframe.id,
                    parent_id: None,
                    entity_type: detection.class_label.clone(),
                    specific_type: detection.class_label.clone(),
                    confidence: detection.confidence,
                    bbox: detection.bbox,
                    segmentation: None,
                    track_id: detection.track_id,
                })
                .await?;
            objects.push(object);
        }

        let rules = self.store.list_rules().await?;
        let mut fired: Vec<(Rule, Violation)> = Vec::new();
        for rule in rules {
            let Some(object_index) = self.first_match(&rule, &detections, &scene) else {
                continue;
            };
            let violation = self
                .store
                .create_violation(NewViolation {
                    rule_code: rule.code.clone(),
                    keyframe_id: keyframe.id,
                    detected_object_id: object_index.map(|i| objects[i].id),
                    scene_id: Some(scene_row.id),
                })
                .await?;
            VIOLATIONS_TOTAL.inc();
            debug!(stream = %url, rule = %rule.code, keyframe = keyframe.id, "violation recorded");
            fired.push((rule, violation));
        }

        let qualifying = fired
            .iter()
            .any(|(rule, _)| self.settings.gate.admits(rule.severity_level));
        if !qualifying {
            return Ok(());
        }

        let payload = build_event(&keyframe.id, snapshot, &scene, &detections, &fired);
        match self.publisher.publish(&self.settings.topic, payload.to_string()).await {
            Ok(()) => {
                EVENTS_PUBLISHED_TOTAL.inc();
            }
            Err(e) if e.is_non_fatal() => {
                // Never retried inline, never blocks the loop.
                PUBLISH_FAILURES_TOTAL.inc();
                warn!(stream = %url, error = %e, "event publish failed");
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    /// `Some(Some(i))` = matched detection i; `Some(None)` = rule fired
    /// on the frame/scene as a whole; `None` = no match.
    fn first_match(
        &self,
        rule: &Rule,
        detections: &[Detection],
        scene: &SceneLabel,
    ) -> Option<Option<usize>> {
        for (i, detection) in detections.iter().enumerate() {
            let context = detection_context(detection, scene);
            if matches_condition(&rule.condition, &context) {
                return Some(Some(i));
            }
        }
        // Detection-free context: scene-only or unconditional rules.
        let context = scene_context(scene);
        if matches_condition(&rule.condition, &context) {
            return Some(None);
        }
        None
    }
}

fn detection_context(detection: &Detection, scene: &SceneLabel) -> HashMap<String, Value> {
    let mut context = scene_context(scene);
    context.insert("entity_type".into(), json!(detection.class_label));
    context.insert("specific_type".into(), json!(detection.class_label));
    context.insert("confidence".into(), json!(detection.confidence));
    context
}

fn scene_context(scene: &SceneLabel) -> HashMap<String, Value> {
    let mut context = HashMap::new();
    context.insert("scene_type".into(), json!(scene.scene_type));
    context
}

/// Structured event payload: keyframe identity, scene summary,
/// detections grouped by entity type, and the violation list with rule
/// metadata.
fn build_event(
    keyframe_id: &u64,
    snapshot: &FrameSnapshot,
    scene: &SceneLabel,
    detections: &[Detection],
    fired: &[(Rule, Violation)],
) -> Value {
    let mut grouped: BTreeMap<String, Vec<Value>> = BTreeMap::new();
    for detection in detections {
        grouped.entry(detection.class_label.clone()).or_default().push(json!({
            "class_label": detection.class_label,
            "confidence": detection.confidence,
            "bbox": detection.bbox,
            "track_id": detection.track_id,
        }));
    }
    json!({
        "keyframe_id": keyframe_id,
        "timestamp": snapshot.captured_at.to_rfc3339(),
        "scene": {
            "scene_type": scene.scene_type,
            "description": scene.description,
        },
        "detections": grouped,
        "violations": fired
            .iter()
            .map(|(rule, violation)| json!({
                "violation_id": violation.id,
                "rule_code": rule.code,
                "description": rule.description,
                "severity_level": rule.severity_level,
                "detected_object_id": violation.detected_object_id,
            }))
            .collect::<Vec<_>>(),
    })
}
