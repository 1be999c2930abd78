//! Observability module
//!
//! Metrics are recorded through the `metrics` facade; the process entry point
//! decides which recorder (if any) is installed.

pub mod metrics_collector;

pub use metrics_collector::MetricsCollector;
