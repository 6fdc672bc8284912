//! Render node: consumes registered clips, runs sparse detection on
//! keyframes, interpolates boxes across the clip, and feeds an
//! annotated re-encoded stream to an external encoder.

pub mod api;
pub mod config;
pub mod metrics;
pub mod render;

pub use config::Config;
pub use render::worker::{RenderSettings, RenderSupervisor};
