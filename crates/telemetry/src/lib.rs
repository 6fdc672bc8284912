pub mod logging;
pub mod metrics;

pub use logging::{init_structured_logging, LogConfig, LogFormat};
pub use metrics::{register_int_counter, register_int_gauge, render_metrics};
