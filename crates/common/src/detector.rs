//! Black-box detection capabilities consumed by the render and
//! violation workers. The actual models live outside this system; the
//! mocks here are deterministic stand-ins for tests and demos.

use crate::detections::{BoundingBox, Detection};
use crate::frames::Frame;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[async_trait]
pub trait Detector: Send + Sync {
    async fn detect(&self, frame: &Frame) -> Result<Vec<Detection>>;
}

/// Scene-level classification result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SceneLabel {
    pub scene_type: String,
    pub description: String,
}

#[async_trait]
pub trait SceneClassifier: Send + Sync {
    async fn classify(&self, frame: &Frame) -> Result<SceneLabel>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockDetectorConfig {
    #[serde(default = "default_confidence")]
    pub confidence: f32,
    #[serde(default = "default_classes")]
    pub classes: Vec<String>,
}

fn default_confidence() -> f32 {
    0.9
}

fn default_classes() -> Vec<String> {
    vec!["person".to_string()]
}

impl Default for MockDetectorConfig {
    fn default() -> Self {
        Self {
            confidence: default_confidence(),
            classes: default_classes(),
        }
    }
}

/// Deterministic detector: one box per configured class, positioned
/// from the frame dimensions so repeated calls on the same frame agree.
pub struct MockDetector {
    config: MockDetectorConfig,
}

impl MockDetector {
    pub fn new(config: MockDetectorConfig) -> Self {
        Self { config }
    }
}

impl Default for MockDetector {
    fn default() -> Self {
        Self::new(MockDetectorConfig::default())
    }
}

#[async_trait]
impl Detector for MockDetector {
    async fn detect(&self, frame: &Frame) -> Result<Vec<Detection>> {
        let w = frame.width as f32;
        let h = frame.height as f32;
        let detections = self
            .config
            .classes
            .iter()
            .enumerate()
            .map(|(i, class)| Detection {
                track_id: Some(i as i64 + 1),
                class_label: class.clone(),
                confidence: self.config.confidence,
                bbox: BoundingBox::new(
                    w * 0.1 * (i as f32 + 1.0),
                    h * 0.1 * (i as f32 + 1.0),
                    w * 0.2,
                    h * 0.2,
                ),
            })
            .collect();
        Ok(detections)
    }
}

/// Fixed-label scene classifier.
pub struct MockSceneClassifier {
    pub scene_type: String,
}

impl Default for MockSceneClassifier {
    fn default() -> Self {
        Self { scene_type: "indoor".to_string() }
    }
}

#[async_trait]
impl SceneClassifier for MockSceneClassifier {
    async fn classify(&self, _frame: &Frame) -> Result<SceneLabel> {
        Ok(SceneLabel {
            scene_type: self.scene_type.clone(),
            description: format!("Detected {}", self.scene_type),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_detector_is_deterministic() {
        let detector = MockDetector::default();
        let frame = Frame::solid(100, 100, [0, 0, 0]);
        let a = detector.detect(&frame).await.unwrap();
        let b = detector.detect(&frame).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 1);
        assert_eq!(a[0].track_id, Some(1));
    }
}
