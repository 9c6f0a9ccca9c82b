//! Error types shared across the engine.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{TaskId, TaskType};

/// Whether a failed attempt is worth replaying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Transient; the retry policy may requeue the task.
    Retryable,
    /// Deterministic; replaying cannot succeed.
    Terminal,
}

/// Why a task attempt failed.
///
/// These are captured into a failed [`ProcessingResult`](crate::ProcessingResult)
/// and never propagated out of the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum TaskError {
    #[error("task timed out after {timeout:?}")]
    Timeout {
        #[serde(with = "crate::duration::string")]
        timeout: Duration,
    },

    #[error("task execution failed: {0}")]
    Execution(String),

    #[error("no handler registered for task type {0}")]
    UnsupportedType(TaskType),

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("handler panicked: {0}")]
    Panicked(String),

    #[error("dependency {0} failed permanently")]
    DependencyFailed(TaskId),
}

impl TaskError {
    /// Classify for the retry policy.
    pub fn class(&self) -> ErrorClass {
        match self {
            TaskError::Timeout { .. } | TaskError::Execution(_) | TaskError::Panicked(_) => {
                ErrorClass::Retryable
            }
            TaskError::UnsupportedType(_)
            | TaskError::MalformedPayload(_)
            | TaskError::DependencyFailed(_) => ErrorClass::Terminal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Retryable
    }

    /// The worker could not run the handler at all; it leaves `busy` for `error`.
    pub fn is_worker_fault(&self) -> bool {
        matches!(
            self,
            TaskError::UnsupportedType(_) | TaskError::MalformedPayload(_) | TaskError::Panicked(_)
        )
    }

    /// Short stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            TaskError::Timeout { .. } => "timeout",
            TaskError::Execution(_) => "execution",
            TaskError::UnsupportedType(_) => "unsupported_type",
            TaskError::MalformedPayload(_) => "malformed_payload",
            TaskError::Panicked(_) => "panicked",
            TaskError::DependencyFailed(_) => "dependency_failed",
        }
    }
}

/// Error returned by a task handler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    /// The handler ran and failed; worth retrying.
    #[error("{0}")]
    Failed(String),

    /// The payload cannot be processed by this handler, ever.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

impl HandlerError {
    pub fn failed(msg: impl Into<String>) -> Self {
        HandlerError::Failed(msg.into())
    }

    pub fn invalid_payload(msg: impl Into<String>) -> Self {
        HandlerError::InvalidPayload(msg.into())
    }
}

impl From<HandlerError> for TaskError {
    fn from(e: HandlerError) -> Self {
        match e {
            HandlerError::Failed(msg) => TaskError::Execution(msg),
            HandlerError::InvalidPayload(msg) => TaskError::MalformedPayload(msg),
        }
    }
}

/// Result type alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
