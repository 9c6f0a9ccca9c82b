//! Engine error types.

use std::time::Duration;

use thiserror::Error;

use taskgrid_core::{ConfigError, TaskId};
use taskgrid_queue::QueueError;

/// Errors returned to callers of [`TaskEngine`](crate::TaskEngine).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("task queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },

    #[error("task {task_id} did not finish within {waited:?}")]
    WaitTimeout { task_id: TaskId, waited: Duration },

    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("unknown dependency: {0}")]
    UnknownDependency(TaskId),

    #[error("engine is not running")]
    NotRunning,

    #[error("engine is already running")]
    AlreadyRunning,

    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

impl From<QueueError> for EngineError {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::Full { capacity } => EngineError::QueueFull { capacity },
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
