//! Command line for the HLS segmenter process. Raw BGR24 frames go in
//! on stdin; timestamped `.ts` segments come out in the stream's
//! output directory.

use common::process::ProcessSpec;
use common::streams::StreamConfig;

/// Segment files are named by wall clock (`-strftime 1`) so discovery
/// can order them by modification time and the names stay stable across
/// segmenter restarts.
pub const SEGMENT_NAME_PATTERN: &str = "%Y%m%d%H%M_%s.ts";

pub fn build_segmenter_args(config: &StreamConfig, gop_length: u32) -> Vec<String> {
    let segment_path = config.output_dir.join(SEGMENT_NAME_PATTERN);
    let playlist_path = config.output_dir.join("index.m3u8");
    vec![
        "-y".into(),
        "-f".into(),
        "rawvideo".into(),
        "-pix_fmt".into(),
        "bgr24".into(),
        "-s".into(),
        format!("{}x{}", config.frame_width, config.frame_height),
        "-r".into(),
        config.target_fps.to_string(),
        "-i".into(),
        "-".into(),
        "-c:v".into(),
        "libx264".into(),
        "-pix_fmt".into(),
        "yuv420p".into(),
        "-preset".into(),
        "ultrafast".into(),
        "-tune".into(),
        "zerolatency".into(),
        "-g".into(),
        gop_length.to_string(),
        "-keyint_min".into(),
        gop_length.to_string(),
        "-force_key_frames".into(),
        format!("expr:gte(t,n_forced*{})", config.clip_duration_secs),
        "-f".into(),
        "hls".into(),
        "-hls_time".into(),
        config.clip_duration_secs.to_string(),
        "-hls_list_size".into(),
        "10".into(),
        "-hls_flags".into(),
        "independent_segments".into(),
        "-strftime".into(),
        "1".into(),
        "-hls_segment_filename".into(),
        segment_path.to_string_lossy().into_owned(),
        playlist_path.to_string_lossy().into_owned(),
    ]
}

pub fn segmenter_spec(program: &str, config: &StreamConfig, gop_length: u32) -> ProcessSpec {
    ProcessSpec::new(program, build_segmenter_args(config, gop_length))
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::streams::{StreamConfig, StreamDefaults};
    use std::path::PathBuf;

    fn config() -> StreamConfig {
        let defaults = StreamDefaults::default();
        StreamConfig {
            id: 1,
            source_url: "rtmp://host/live/cam1".into(),
            name: "stream_1".into(),
            active: true,
            target_fps: 15,
            frame_width: 1280,
            frame_height: 720,
            max_reconnect_attempts: defaults.max_reconnect_attempts,
            reconnect_timeout_secs: defaults.reconnect_timeout_secs,
            check_interval_ms: defaults.check_interval_ms,
            clip_duration_secs: 1,
            output_dir: PathBuf::from("/data/clips/cam1_hls"),
        }
    }

    #[test]
    fn segmenter_args_produce_timestamped_hls() {
        let args = build_segmenter_args(&config(), 30);
        let joined = args.join(" ");
        assert!(joined.contains("-f rawvideo"));
        assert!(joined.contains("-s 1280x720"));
        assert!(joined.contains("-c:v libx264"));
        assert!(joined.contains("-g 30"));
        assert!(joined.contains("-hls_time 1"));
        assert!(joined.contains("-strftime 1"));
        assert!(joined.contains("%Y%m%d%H%M_%s.ts"));
        assert!(joined.ends_with("index.m3u8"));
    }

    #[test]
    fn keyframes_are_forced_at_clip_boundaries() {
        let args = build_segmenter_args(&config(), 30);
        assert!(args.contains(&"expr:gte(t,n_forced*1)".to_string()));
    }
}
