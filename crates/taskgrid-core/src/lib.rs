//! taskgrid-core: shared vocabulary for the TaskGrid engine.
//!
//! Every other crate in the workspace speaks in these types:
//!
//! - [`Task`] / [`TaskSpec`]: a unit of work and the caller's request for one
//! - [`ProcessingResult`]: the outcome of one attempt
//! - [`WorkerStats`] / [`ProcessorMetrics`]: observable engine state
//! - [`WorkerConfig`]: pool bounds, timeouts, thresholds, backoff
//! - [`TaskError`]: failure kinds, classified retryable vs. terminal

pub mod config;
pub mod duration;
pub mod error;
pub mod types;

pub use config::{ConfigFile, WorkerConfig, WorkerConfigUpdate};
pub use duration::{format_duration, parse_duration};
pub use error::{ConfigError, ConfigResult, ErrorClass, HandlerError, TaskError};
pub use types::*;
