use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

/// Register an IntGauge on the shared registry. Metric name collisions
/// are ignored rather than fatal so node crates can re-declare.
pub fn register_int_gauge(name: &str, help: &str) -> IntGauge {
    let gauge = IntGauge::new(name, help).expect("metric can be created");
    REGISTRY.register(Box::new(gauge.clone())).ok();
    gauge
}

pub fn register_int_counter(name: &str, help: &str) -> IntCounter {
    let counter = IntCounter::new(name, help).expect("metric can be created");
    REGISTRY.register(Box::new(counter.clone())).ok();
    counter
}

/// Render all registered metrics in the Prometheus text format.
pub fn render_metrics() -> String {
    let mut buf = Vec::new();
    let encoder = TextEncoder::new();
    let mfs = REGISTRY.gather();
    encoder.encode(&mfs, &mut buf).ok();
    String::from_utf8(buf).unwrap_or_default()
}
