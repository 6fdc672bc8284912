//! Capture node: supervises one worker per live stream, keeps the
//! latest frame in the shared cache, and registers finished HLS
//! segments as clips.

pub mod api;
pub mod capture;
pub mod config;
pub mod metrics;

pub use capture::source::{FfmpegSourceFactory, FrameSource, SourceFactory};
pub use capture::supervisor::{CaptureSettings, CaptureSupervisor, StreamStatus};
pub use config::Config;
