use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A registered video segment. Belongs to exactly one stream config;
/// a given physical segment file is registered as at most one clip.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Clip {
    pub id: u64,
    pub stream_url: String,
    pub path: PathBuf,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_secs: u64,
    pub processed: bool,
}

#[derive(Debug, Clone)]
pub struct NewClip {
    pub stream_url: String,
    pub path: PathBuf,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_secs: u64,
}
