//! taskgrid-metrics: observability for the TaskGrid engine.
//!
//! Aggregates attempt outcomes into throughput, latency, and error-rate
//! figures for the autoscaler and for callers, and renders them in the
//! Prometheus text format.
//!
//! # Architecture
//!
//! ```text
//! MetricsCollector
//!   ├── record_submitted() ← add_task
//!   ├── record_success() / record_failure() / record_retry() ← dispatcher
//!   ├── update_gauges() ← dispatcher tick (pool, queue, utilization)
//!   └── snapshot() → ProcessorMetrics
//!
//! Prometheus exposition
//!   └── render_prometheus() → text/plain
//! ```

pub mod collector;
pub mod prometheus;

pub use collector::MetricsCollector;
pub use prometheus::render_prometheus;
