//! Telemetry: structured logging, rolling trade metrics, Prometheus
//! counters.

pub mod collector;
pub mod error;
pub mod logging;
pub mod metrics;

pub use collector::{
    Alert, AlertThresholds, LatencyStats, MetricsCollector, MetricsConfig, MetricsSnapshot,
    TradeSample,
};
pub use error::{TelemetryError, TelemetryResult};
pub use logging::{init_logging, init_logging_with, LogFormat};
pub use metrics::Metrics;
