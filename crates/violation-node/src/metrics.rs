use once_cell::sync::Lazy;
use prometheus::{IntCounter, IntGauge};

pub static SAMPLERS_RUNNING: Lazy<IntGauge> = Lazy::new(|| {
    telemetry::register_int_gauge("violation_samplers_running", "Streams with a live sampling loop")
});

pub static KEYFRAMES_SAMPLED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    telemetry::register_int_counter("violation_keyframes_total", "Keyframes sampled and evaluated")
});

pub static VIOLATIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    telemetry::register_int_counter("violation_records_total", "Violations recorded")
});

pub static EVENTS_PUBLISHED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    telemetry::register_int_counter("violation_events_published_total", "Qualifying events published to the queue")
});

pub static PUBLISH_FAILURES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    telemetry::register_int_counter("violation_publish_failures_total", "Event publishes that failed")
});

pub fn render() -> String {
    telemetry::render_metrics()
}
