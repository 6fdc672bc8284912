use once_cell::sync::Lazy;
use prometheus::{IntCounter, IntGauge};

pub static STREAMS_RUNNING: Lazy<IntGauge> = Lazy::new(|| {
    telemetry::register_int_gauge("capture_streams_running", "Streams with a live capture worker")
});

pub static RECONNECTS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    telemetry::register_int_counter("capture_reconnects_total", "Reconnect attempts across all streams")
});

pub static CLIPS_REGISTERED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    telemetry::register_int_counter("capture_clips_registered_total", "Clips registered from segment discovery")
});

pub fn render() -> String {
    telemetry::render_metrics()
}
