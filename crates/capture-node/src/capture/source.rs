//! Frame acquisition behind a trait so the supervisor can run against
//! a real decoder or a scripted fake.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use common::frames::Frame;
use common::streams::StreamConfig;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tokio::time::Instant;
use tracing::debug;

/// One live capture connection. `read_frame` returning `Ok(None)` means
/// the source produced nothing within the timeout; the caller decides
/// when that counts as a stall.
#[async_trait]
pub trait FrameSource: Send {
    async fn open(&mut self) -> Result<()>;

    async fn read_frame(&mut self, timeout: Duration) -> Result<Option<Frame>>;

    async fn close(&mut self);
}

pub trait SourceFactory: Send + Sync {
    fn create(&self, config: &StreamConfig) -> Box<dyn FrameSource>;
}

/// Decoder command line: raw BGR24 frames on stdout at the configured
/// geometry and rate.
pub fn build_decode_args(config: &StreamConfig) -> Vec<String> {
    vec![
        "-nostdin".into(),
        "-loglevel".into(),
        "error".into(),
        "-i".into(),
        config.source_url.clone(),
        "-f".into(),
        "rawvideo".into(),
        "-pix_fmt".into(),
        "bgr24".into(),
        "-s".into(),
        format!("{}x{}", config.frame_width, config.frame_height),
        "-r".into(),
        config.target_fps.to_string(),
        "-an".into(),
        "pipe:1".into(),
    ]
}

pub struct FfmpegFrameSource {
    program: String,
    config: StreamConfig,
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    buf: Vec<u8>,
    filled: usize,
}

impl FfmpegFrameSource {
    pub fn new(program: impl Into<String>, config: StreamConfig) -> Self {
        let frame_len = (config.frame_width * config.frame_height * 3) as usize;
        Self {
            program: program.into(),
            config,
            child: None,
            stdout: None,
            buf: vec![0u8; frame_len],
            filled: 0,
        }
    }
}

#[async_trait]
impl FrameSource for FfmpegFrameSource {
    async fn open(&mut self) -> Result<()> {
        self.close().await;
        let mut child = Command::new(&self.program)
            .args(build_decode_args(&self.config))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| anyhow!("failed to spawn {}: {}", self.program, e))?;
        self.stdout = child.stdout.take();
        self.child = Some(child);
        debug!(stream = %self.config.source_url, "decoder process spawned");
        Ok(())
    }

    async fn read_frame(&mut self, timeout: Duration) -> Result<Option<Frame>> {
        let frame_len = self.buf.len();
        let stdout = self
            .stdout
            .as_mut()
            .ok_or_else(|| anyhow!("source is not open"))?;
        let deadline = Instant::now() + timeout;
        // Partial reads stay in the buffer across calls, so a timeout never
        // loses bytes mid-frame.
        while self.filled < frame_len {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            match tokio::time::timeout(remaining, stdout.read(&mut self.buf[self.filled..])).await {
                Err(_) => return Ok(None),
                Ok(Ok(0)) => return Err(anyhow!("decoder output ended")),
                Ok(Ok(n)) => self.filled += n,
                Ok(Err(e)) => return Err(e.into()),
            }
        }
        self.filled = 0;
        Ok(Some(Frame::new(
            self.config.frame_width,
            self.config.frame_height,
            self.buf.clone(),
        )))
    }

    async fn close(&mut self) {
        self.stdout = None;
        self.filled = 0;
        if let Some(mut child) = self.child.take() {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FfmpegSourceFactory {
    pub program: Option<String>,
}

impl SourceFactory for FfmpegSourceFactory {
    fn create(&self, config: &StreamConfig) -> Box<dyn FrameSource> {
        let program = self.program.clone().unwrap_or_else(|| "ffmpeg".into());
        Box::new(FfmpegFrameSource::new(program, config.clone()))
    }
}

/// What a scripted source does on each `read_frame` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedRead {
    Frame,
    Stall,
    Broken,
}

/// Deterministic stand-in for a live source. The script is consumed one
/// step per read; once exhausted, `when_exhausted` repeats forever.
/// Reopening does not rewind the script.
#[derive(Debug, Clone)]
pub struct ScriptedPlan {
    pub fail_open: bool,
    pub reads: Vec<ScriptedRead>,
    pub when_exhausted: ScriptedRead,
}

impl Default for ScriptedPlan {
    fn default() -> Self {
        Self { fail_open: false, reads: Vec::new(), when_exhausted: ScriptedRead::Frame }
    }
}

pub struct ScriptedSource {
    plan: ScriptedPlan,
    cursor: usize,
    width: u32,
    height: u32,
    open: bool,
}

impl ScriptedSource {
    pub fn new(plan: ScriptedPlan, width: u32, height: u32) -> Self {
        Self { plan, cursor: 0, width, height, open: false }
    }
}

#[async_trait]
impl FrameSource for ScriptedSource {
    async fn open(&mut self) -> Result<()> {
        if self.plan.fail_open {
            return Err(anyhow!("scripted source refuses to open"));
        }
        self.open = true;
        Ok(())
    }

    async fn read_frame(&mut self, timeout: Duration) -> Result<Option<Frame>> {
        if !self.open {
            return Err(anyhow!("source is not open"));
        }
        // Pace reads so the capture loop does not spin during tests.
        tokio::time::sleep(timeout.min(Duration::from_millis(5))).await;
        let step = if self.cursor < self.plan.reads.len() {
            let step = self.plan.reads[self.cursor];
            self.cursor += 1;
            step
        } else {
            self.plan.when_exhausted
        };
        match step {
            ScriptedRead::Frame => Ok(Some(Frame::solid(self.width, self.height, [0, 128, 255]))),
            ScriptedRead::Stall => Ok(None),
            ScriptedRead::Broken => Err(anyhow!("scripted source broke")),
        }
    }

    async fn close(&mut self) {
        self.open = false;
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScriptedSourceFactory {
    pub plan: ScriptedPlan,
}

impl ScriptedSourceFactory {
    pub fn healthy() -> Self {
        Self::default()
    }

    pub fn broken_after(frames: usize) -> Self {
        Self {
            plan: ScriptedPlan {
                fail_open: false,
                reads: vec![ScriptedRead::Frame; frames],
                when_exhausted: ScriptedRead::Broken,
            },
        }
    }

    pub fn refusing_open() -> Self {
        Self { plan: ScriptedPlan { fail_open: true, ..ScriptedPlan::default() } }
    }
}

impl SourceFactory for ScriptedSourceFactory {
    fn create(&self, config: &StreamConfig) -> Box<dyn FrameSource> {
        Box::new(ScriptedSource::new(
            self.plan.clone(),
            config.frame_width,
            config.frame_height,
        ))
    }
}
