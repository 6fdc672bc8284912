//! Clip discovery: turn finished segment files into clip records.
//!
//! Registration keys on the segment path, so polling an unchanged
//! directory is a no-op no matter how often it runs.

use anyhow::Result;
use chrono::{DateTime, Utc};
use common::clips::{Clip, NewClip};
use common::store::RecordStore;
use common::streams::StreamConfig;
use std::path::{Path, PathBuf};

/// Most-recently-modified `.ts` segment in the directory, if any.
pub async fn latest_segment(dir: &Path) -> Result<Option<PathBuf>> {
    let mut read_dir = match tokio::fs::read_dir(dir).await {
        Ok(rd) => rd,
        // The segmenter may not have created the directory yet.
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut newest: Option<(std::time::SystemTime, PathBuf)> = None;
    while let Some(entry) = read_dir.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("ts") {
            continue;
        }
        let modified = entry.metadata().await?.modified()?;
        if newest.as_ref().map_or(true, |(t, _)| modified > *t) {
            newest = Some((modified, path));
        }
    }
    Ok(newest.map(|(_, path)| path))
}

/// Register the newest segment as a clip unless it is already known.
/// Returns the new clip when one was created.
pub async fn register_new_clip(
    store: &dyn RecordStore,
    config: &StreamConfig,
) -> Result<Option<Clip>> {
    let Some(path) = latest_segment(&config.output_dir).await? else {
        return Ok(None);
    };
    if store.has_clip_for_path(&config.source_url, &path).await? {
        return Ok(None);
    }
    let modified = tokio::fs::metadata(&path).await?.modified()?;
    let start_time: DateTime<Utc> = modified.into();
    let end_time = start_time + chrono::Duration::seconds(config.clip_duration_secs as i64);
    let clip = store
        .create_clip(NewClip {
            stream_url: config.source_url.clone(),
            path,
            start_time,
            end_time,
            duration_secs: config.clip_duration_secs,
        })
        .await?;
    Ok(Some(clip))
}
