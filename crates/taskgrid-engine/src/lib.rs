//! taskgrid-engine: parallel task processing over a self-sizing worker pool.
//!
//! # Architecture
//!
//! ```text
//! TaskEngine (public API)
//!   ├── TaskQueue      (priority order, optional capacity bound)
//!   ├── TaskStore      (state + final result per task)
//!   ├── WorkerPool     (idle/busy/error slots within [min, max])
//!   ├── MetricsCollector
//!   └── Dispatcher     (spawned by start(), stopped by stop())
//!       ├── attempts: handler raced against task timeout
//!       ├── RetryPolicy (retryable errors, exponential backoff)
//!       └── Autoscaler  (backlog + ResourceProbe → grow/shrink)
//! ```
//!
//! Submissions, attempt completions, backoff timers, and config updates all
//! wake the dispatcher; a periodic tick covers idle-timeout scale-down.

mod dispatcher;
pub mod engine;
pub mod error;
pub mod retry;
pub mod store;

pub use engine::TaskEngine;
pub use error::{EngineError, EngineResult};
pub use retry::{RetryDecision, RetryPolicy};

pub use taskgrid_autoscale::{ResourceProbe, StaticProbe, SystemProbe};
pub use taskgrid_worker::{HandlerRegistry, TaskHandler};
