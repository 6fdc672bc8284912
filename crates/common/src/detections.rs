use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Axis-aligned box in pixel coordinates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Euclidean distance between box centers, the correlation metric
    /// used when matching detections across keyframes.
    pub fn center_distance(&self, other: &BoundingBox) -> f32 {
        let (ax, ay) = self.center();
        let (bx, by) = other.center();
        ((ax - bx).powi(2) + (ay - by).powi(2)).sqrt()
    }
}

/// One detector hit on a single frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Detection {
    /// Re-identification id; the correlation key across keyframes.
    pub track_id: Option<i64>,
    pub class_label: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// A sampled frame on which the detector actually ran.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KeyFrame {
    pub id: u64,
    pub stream_url: String,
    pub frame_time: DateTime<Utc>,
    pub frame_index: u64,
}

/// Persisted detection, attached to a keyframe. `parent_id` supports
/// nested part-of relationships between objects.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DetectedObject {
    pub id: u64,
    pub keyframe_id: u64,
    pub parent_id: Option<u64>,
    pub entity_type: String,
    pub specific_type: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
    pub segmentation: Option<Vec<(f32, f32)>>,
    pub track_id: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct NewDetectedObject {
    pub keyframe_id: u64,
    pub parent_id: Option<u64>,
    pub entity_type: String,
    pub specific_type: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
    pub segmentation: Option<Vec<(f32, f32)>>,
    pub track_id: Option<i64>,
}

/// Scene-level classification of a keyframe.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Scene {
    pub id: u64,
    pub keyframe_id: u64,
    pub scene_type: String,
    pub description: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn center_distance_is_euclidean() {
        let a = BoundingBox::new(0.0, 0.0, 50.0, 50.0);
        let b = BoundingBox::new(30.0, 40.0, 50.0, 50.0);
        assert!((a.center_distance(&b) - 50.0).abs() < f32::EPSILON);
    }
}
