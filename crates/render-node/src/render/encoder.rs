//! Annotated-output encoder behind a sink trait, so the render loop
//! can be exercised without a media server.

use crate::metrics::ENCODER_RESPAWNS_TOTAL;
use async_trait::async_trait;
use common::error::PipelineError;
use common::frames::Frame;
use common::process::{ExternalProcess, ProcessSpec};
use std::time::Duration;
use tracing::{info, warn};

pub fn build_encoder_args(output_target: &str, fps: u32, width: u32, height: u32) -> Vec<String> {
    vec![
        "-f".into(),
        "rawvideo".into(),
        "-pix_fmt".into(),
        "bgr24".into(),
        "-s".into(),
        format!("{}x{}", width, height),
        "-r".into(),
        fps.to_string(),
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
        "-f".into(),
        "flv".into(),
        output_target.to_string(),
    ]
}

pub fn encoder_spec(
    program: &str,
    output_target: &str,
    fps: u32,
    width: u32,
    height: u32,
) -> ProcessSpec {
    ProcessSpec::new(program, build_encoder_args(output_target, fps, width, height))
}

/// Destination for annotated frames. `write` failing with
/// [`PipelineError::ProcessDead`] invalidates the sink; the next
/// `ensure_open` re-acquires it.
#[async_trait]
pub trait FrameSink: Send {
    async fn ensure_open(&mut self) -> Result<(), PipelineError>;

    async fn write(&mut self, frame: &Frame) -> Result<(), PipelineError>;

    async fn close(&mut self);
}

pub trait SinkFactory: Send + Sync {
    fn create(&self, output_target: &str, fps: u32, width: u32, height: u32) -> Box<dyn FrameSink>;
}

pub struct EncoderSink {
    program: String,
    spec: ProcessSpec,
    process: Option<ExternalProcess>,
    grace: Duration,
    output_target: String,
}

impl EncoderSink {
    pub fn new(
        program: impl Into<String>,
        output_target: impl Into<String>,
        fps: u32,
        width: u32,
        height: u32,
        grace: Duration,
    ) -> Self {
        let program = program.into();
        let output_target = output_target.into();
        let spec = encoder_spec(&program, &output_target, fps, width, height);
        Self { program, spec, process: None, grace, output_target }
    }
}

#[async_trait]
impl FrameSink for EncoderSink {
    async fn ensure_open(&mut self) -> Result<(), PipelineError> {
        let alive = self.process.as_mut().map_or(false, ExternalProcess::is_alive);
        if alive {
            return Ok(());
        }
        if self.process.take().is_some() {
            ENCODER_RESPAWNS_TOTAL.inc();
            warn!(target = %self.output_target, "encoder process died, respawning");
        }
        let process = ExternalProcess::spawn(&self.spec)
            .map_err(|_| PipelineError::ProcessDead(self.program.clone()))?;
        info!(target = %self.output_target, "encoder process ready");
        self.process = Some(process);
        Ok(())
    }

    async fn write(&mut self, frame: &Frame) -> Result<(), PipelineError> {
        let process = self
            .process
            .as_mut()
            .ok_or_else(|| PipelineError::ProcessDead(self.program.clone()))?;
        match process.write_frame(&frame.data).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.process = None;
                Err(e)
            }
        }
    }

    async fn close(&mut self) {
        if let Some(process) = self.process.take() {
            process.terminate(self.grace).await;
        }
    }
}

#[derive(Debug, Clone)]
pub struct EncoderSinkFactory {
    pub program: String,
    pub grace: Duration,
}

impl Default for EncoderSinkFactory {
    fn default() -> Self {
        Self { program: "ffmpeg".into(), grace: Duration::from_secs(5) }
    }
}

impl SinkFactory for EncoderSinkFactory {
    fn create(&self, output_target: &str, fps: u32, width: u32, height: u32) -> Box<dyn FrameSink> {
        Box::new(EncoderSink::new(
            self.program.clone(),
            output_target,
            fps,
            width,
            height,
            self.grace,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoder_args_stream_flv_to_the_target() {
        let args = build_encoder_args("rtmp://127.0.0.1/live/cam1_annotated", 15, 1280, 720);
        let joined = args.join(" ");
        assert!(joined.contains("-f rawvideo"));
        assert!(joined.contains("-s 1280x720"));
        assert!(joined.contains("-r 15"));
        assert!(joined.contains("-tune zerolatency"));
        assert!(joined.ends_with("-f flv rtmp://127.0.0.1/live/cam1_annotated"));
    }
}
