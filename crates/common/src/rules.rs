use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A violation rule. Rules are data, not code: `condition` is an
/// opaque JSON object evaluated by the violation engine against the
/// detection context of a keyframe.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Rule {
    pub code: String,
    pub description: String,
    pub severity_level: i32,
    #[serde(default)]
    pub condition: serde_json::Value,
}

/// A recorded rule violation. Always references a keyframe that exists
/// at creation time; violations are an audit trail and survive stream
/// teardown.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Violation {
    pub id: u64,
    pub rule_code: String,
    pub keyframe_id: u64,
    pub detected_object_id: Option<u64>,
    pub scene_id: Option<u64>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewViolation {
    pub rule_code: String,
    pub keyframe_id: u64,
    pub detected_object_id: Option<u64>,
    pub scene_id: Option<u64>,
}

/// Publish-gating predicate over a rule's numeric severity level.
///
/// The upstream system compared `severity_level < 3` to mean "severe
/// enough to publish", i.e. lower numbers are more severe. Whether
/// that convention is intended is unconfirmed, so the direction is
/// explicit configuration here rather than an assumption.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "direction", content = "threshold")]
pub enum SeverityGate {
    /// Publish when `severity_level < threshold` (lower = more severe).
    Below(i32),
    /// Publish when `severity_level >= threshold` (higher = more severe).
    AtOrAbove(i32),
}

impl SeverityGate {
    pub fn admits(&self, severity_level: i32) -> bool {
        match *self {
            SeverityGate::Below(threshold) => severity_level < threshold,
            SeverityGate::AtOrAbove(threshold) => severity_level >= threshold,
        }
    }

    /// `SEVERITY_GATE` env form: `below:3` or `at_or_above:2`.
    pub fn from_env() -> Self {
        match std::env::var("SEVERITY_GATE") {
            Ok(raw) => Self::parse(&raw).unwrap_or_default(),
            Err(_) => Self::default(),
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let (direction, threshold) = raw.split_once(':')?;
        let threshold: i32 = threshold.trim().parse().ok()?;
        match direction.trim() {
            "below" => Some(SeverityGate::Below(threshold)),
            "at_or_above" => Some(SeverityGate::AtOrAbove(threshold)),
            _ => None,
        }
    }
}

impl Default for SeverityGate {
    fn default() -> Self {
        SeverityGate::Below(3)
    }
}
