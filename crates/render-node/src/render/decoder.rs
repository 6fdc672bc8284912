//! Clip decoding via an external decoder process.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use common::frames::Frame;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

#[async_trait]
pub trait ClipDecoder: Send + Sync {
    /// All frames of the clip at the requested geometry, in order.
    async fn decode(&self, path: &Path, width: u32, height: u32) -> Result<Vec<Frame>>;
}

pub fn build_decode_args(path: &Path, width: u32, height: u32) -> Vec<String> {
    vec![
        "-nostdin".into(),
        "-loglevel".into(),
        "error".into(),
        "-i".into(),
        path.to_string_lossy().into_owned(),
        "-f".into(),
        "rawvideo".into(),
        "-pix_fmt".into(),
        "bgr24".into(),
        "-s".into(),
        format!("{}x{}", width, height),
        "-an".into(),
        "pipe:1".into(),
    ]
}

pub struct FfmpegClipDecoder {
    program: String,
}

impl FfmpegClipDecoder {
    pub fn new(program: impl Into<String>) -> Self {
        Self { program: program.into() }
    }
}

impl Default for FfmpegClipDecoder {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

#[async_trait]
impl ClipDecoder for FfmpegClipDecoder {
    async fn decode(&self, path: &Path, width: u32, height: u32) -> Result<Vec<Frame>> {
        let output = Command::new(&self.program)
            .args(build_decode_args(path, width, height))
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| anyhow!("failed to run {}: {}", self.program, e))?;
        if !output.status.success() {
            bail!("decoder exited with {} for {}", output.status, path.display());
        }
        let frame_len = (width * height * 3) as usize;
        // A trailing partial frame from a truncated segment is dropped.
        let frames: Vec<Frame> = output
            .stdout
            .chunks_exact(frame_len)
            .map(|chunk| Frame::new(width, height, chunk.to_vec()))
            .collect();
        if frames.is_empty() {
            bail!("no frames decoded from {}", path.display());
        }
        Ok(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn decode_args_request_raw_bgr() {
        let args = build_decode_args(&PathBuf::from("/data/clips/a.ts"), 640, 360);
        let joined = args.join(" ");
        assert!(joined.contains("-i /data/clips/a.ts"));
        assert!(joined.contains("-pix_fmt bgr24"));
        assert!(joined.contains("-s 640x360"));
    }

    #[tokio::test]
    async fn missing_decoder_binary_is_an_error() {
        let decoder = FfmpegClipDecoder::new("definitely-not-a-real-binary-xyz");
        let result = decoder.decode(&PathBuf::from("/tmp/none.ts"), 4, 4).await;
        assert!(result.is_err());
    }
}
