pub mod metrics;
pub mod tracing;

pub use metrics::{counters, encode_metrics, init_metrics};
pub use tracing::{init_tracing, TracingConfig};
