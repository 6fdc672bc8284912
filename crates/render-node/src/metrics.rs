use once_cell::sync::Lazy;
use prometheus::{IntCounter, IntGauge};

pub static RENDERS_RUNNING: Lazy<IntGauge> = Lazy::new(|| {
    telemetry::register_int_gauge("render_workers_running", "Streams with a live render worker")
});

pub static CLIPS_RENDERED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    telemetry::register_int_counter("render_clips_total", "Clips fully rendered and consumed")
});

pub static ENCODER_RESPAWNS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    telemetry::register_int_counter("render_encoder_respawns_total", "Encoder processes respawned after death")
});

pub fn render() -> String {
    telemetry::render_metrics()
}
