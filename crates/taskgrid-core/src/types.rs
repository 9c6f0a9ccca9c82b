//! Domain types for tasks, attempts, workers, and metrics.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::duration;
use crate::error::TaskError;

/// Unique identifier for a submitted task (stable across retries).
pub type TaskId = String;

/// Unique identifier for a worker slot.
pub type WorkerId = String;

/// Generate a fresh task identifier.
pub fn new_task_id() -> TaskId {
    format!("task-{}", uuid::Uuid::new_v4())
}

// ── Task ───────────────────────────────────────────────────────────

/// Kind of analysis job; selects the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskType {
    SlideValidation,
    AutoCorrection,
    ContentExtraction,
    ImageExtraction,
    AnimationExtraction,
}

impl TaskType {
    pub const ALL: [TaskType; 5] = [
        TaskType::SlideValidation,
        TaskType::AutoCorrection,
        TaskType::ContentExtraction,
        TaskType::ImageExtraction,
        TaskType::AnimationExtraction,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::SlideValidation => "slide-validation",
            TaskType::AutoCorrection => "auto-correction",
            TaskType::ContentExtraction => "content-extraction",
            TaskType::ImageExtraction => "image-extraction",
            TaskType::AnimationExtraction => "animation-extraction",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheduling priority. Variants are declared lowest first so the derived
/// `Ord` gives `Critical > High > Normal > Low`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

/// A unit of work held by the queue.
///
/// Immutable once enqueued; a retry is a new `Task` produced by
/// [`Task::next_attempt`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub task_type: TaskType,
    pub payload: Value,
    pub priority: Priority,
    #[serde(with = "duration::string")]
    pub timeout: Duration,
    pub max_retries: u32,
    /// Attempts already made before this one.
    pub retry_count: u32,
    pub dependencies: Vec<TaskId>,
    pub metadata: HashMap<String, String>,
    /// Unix timestamp (milliseconds) of the original submission.
    pub created_at: u64,
}

impl Task {
    /// Build a task from a submission, filling unset limits from defaults.
    pub fn from_spec(spec: TaskSpec, default_timeout: Duration, default_max_retries: u32) -> Self {
        Self {
            id: new_task_id(),
            task_type: spec.task_type,
            payload: spec.payload,
            priority: spec.priority,
            timeout: spec.timeout.unwrap_or(default_timeout),
            max_retries: spec.max_retries.unwrap_or(default_max_retries),
            retry_count: 0,
            dependencies: spec.dependencies,
            metadata: spec.metadata,
            created_at: epoch_millis(),
        }
    }

    /// Whether another attempt is allowed after this one fails.
    pub fn has_retries_left(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// The task as it will be requeued for its next attempt.
    pub fn next_attempt(&self) -> Task {
        Task {
            retry_count: self.retry_count + 1,
            ..self.clone()
        }
    }
}

/// A caller's request to run a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub task_type: TaskType,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, with = "duration::option", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<TaskId>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl TaskSpec {
    pub fn new(task_type: TaskType, payload: Value) -> Self {
        Self {
            task_type,
            payload,
            priority: Priority::Normal,
            timeout: None,
            max_retries: None,
            dependencies: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn depends_on(mut self, id: impl Into<TaskId>) -> Self {
        self.dependencies.push(id.into());
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

// ── Results ────────────────────────────────────────────────────────

/// Outcome of a single attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingResult {
    pub task_id: TaskId,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
    #[serde(with = "duration::string")]
    pub processing_time: Duration,
    pub worker_id: WorkerId,
    pub retry_count: u32,
    /// Copied from the task.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl ProcessingResult {
    pub fn succeeded(task: &Task, worker_id: &str, output: Value, elapsed: Duration) -> Self {
        Self {
            task_id: task.id.clone(),
            success: true,
            output: Some(output),
            error: None,
            processing_time: elapsed,
            worker_id: worker_id.to_string(),
            retry_count: task.retry_count,
            metadata: task.metadata.clone(),
        }
    }

    pub fn failed(task: &Task, worker_id: &str, error: TaskError, elapsed: Duration) -> Self {
        Self {
            task_id: task.id.clone(),
            success: false,
            output: None,
            error: Some(error),
            processing_time: elapsed,
            worker_id: worker_id.to_string(),
            retry_count: task.retry_count,
            metadata: task.metadata.clone(),
        }
    }
}

/// Where a task currently is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Queued,
    Running,
    /// Failed an attempt; waiting out the backoff delay.
    Retrying,
    Completed,
    Failed,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }
}

// ── Workers ────────────────────────────────────────────────────────

/// Lifecycle status of a worker slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Idle,
    Busy,
    Error,
    Terminated,
}

/// Point-in-time view of a worker's counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerStats {
    pub id: WorkerId,
    pub status: WorkerStatus,
    pub current_task: Option<TaskId>,
    pub tasks_processed: u64,
    #[serde(with = "duration::string")]
    pub total_processing_time: Duration,
    pub error_count: u64,
    /// Unix timestamp (milliseconds) of the last start or finish.
    pub last_activity: u64,
}

impl WorkerStats {
    pub fn average_processing_time(&self) -> Duration {
        if self.tasks_processed == 0 {
            return Duration::ZERO;
        }
        let nanos = self.total_processing_time.as_nanos() / u128::from(self.tasks_processed);
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }
}

// ── Metrics ────────────────────────────────────────────────────────

/// Host resource utilization, each in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Utilization {
    pub cpu: f64,
    pub memory: f64,
}

/// Aggregate engine metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessorMetrics {
    /// Tasks accepted by `add_task`.
    pub total_tasks: u64,
    pub completed_tasks: u64,
    /// Tasks that reached the permanently-failed state.
    pub failed_tasks: u64,
    /// Attempts that were requeued after a failure.
    pub retried_attempts: u64,
    pub active_workers: u32,
    pub busy_workers: u32,
    pub queue_size: usize,
    /// Rolling mean attempt duration, milliseconds.
    pub avg_processing_ms: f64,
    pub p50_processing_ms: f64,
    pub p99_processing_ms: f64,
    /// Completed tasks per second over the rolling window.
    pub throughput: f64,
    /// Failed attempts / all finished attempts (0.0-1.0).
    pub error_rate: f64,
    pub cpu_utilization: f64,
    pub memory_utilization: f64,
}

/// Current Unix epoch in milliseconds.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn priority_ordering() {
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
    }

    #[test]
    fn task_type_serializes_kebab_case() {
        let v = serde_json::to_value(TaskType::SlideValidation).unwrap();
        assert_eq!(v, json!("slide-validation"));
        for t in TaskType::ALL {
            assert_eq!(serde_json::to_value(t).unwrap(), json!(t.as_str()));
        }
    }

    #[test]
    fn spec_defaults_fill_from_config() {
        let spec = TaskSpec::new(TaskType::ContentExtraction, json!({"slide": 1}));
        let task = Task::from_spec(spec, Duration::from_secs(30), 3);
        assert!(task.id.starts_with("task-"));
        assert_eq!(task.timeout, Duration::from_secs(30));
        assert_eq!(task.max_retries, 3);
        assert_eq!(task.retry_count, 0);
        assert_eq!(task.priority, Priority::Normal);
    }

    #[test]
    fn spec_overrides_win() {
        let spec = TaskSpec::new(TaskType::ImageExtraction, json!(null))
            .priority(Priority::Critical)
            .timeout(Duration::from_millis(50))
            .max_retries(0)
            .metadata("deck", "q3-review");
        let task = Task::from_spec(spec, Duration::from_secs(30), 3);
        assert_eq!(task.priority, Priority::Critical);
        assert_eq!(task.timeout, Duration::from_millis(50));
        assert_eq!(task.max_retries, 0);
        assert_eq!(task.metadata["deck"], "q3-review");
    }

    #[test]
    fn next_attempt_keeps_identity() {
        let task = Task::from_spec(
            TaskSpec::new(TaskType::AutoCorrection, json!({})).max_retries(2),
            Duration::from_secs(1),
            3,
        );
        assert!(task.has_retries_left());
        let second = task.next_attempt();
        assert_eq!(second.id, task.id);
        assert_eq!(second.retry_count, 1);
        let third = second.next_attempt();
        assert_eq!(third.retry_count, 2);
        assert!(!third.has_retries_left());
    }

    #[test]
    fn task_spec_parses_from_json() {
        let spec: TaskSpec = serde_json::from_value(json!({
            "task_type": "animation-extraction",
            "priority": "high",
            "timeout": "250ms",
            "payload": {"slide": 4}
        }))
        .unwrap();
        assert_eq!(spec.task_type, TaskType::AnimationExtraction);
        assert_eq!(spec.priority, Priority::High);
        assert_eq!(spec.timeout, Some(Duration::from_millis(250)));
        assert_eq!(spec.max_retries, None);
    }

    #[test]
    fn worker_average_processing_time() {
        let stats = WorkerStats {
            id: "worker-1".into(),
            status: WorkerStatus::Idle,
            current_task: None,
            tasks_processed: 4,
            total_processing_time: Duration::from_millis(400),
            error_count: 0,
            last_activity: 0,
        };
        assert_eq!(stats.average_processing_time(), Duration::from_millis(100));
    }

    #[test]
    fn worker_average_survives_counts_past_u32() {
        let stats = WorkerStats {
            id: "worker-1".into(),
            status: WorkerStatus::Idle,
            current_task: None,
            tasks_processed: 1 << 32,
            total_processing_time: Duration::from_secs(1 << 32),
            error_count: 0,
            last_activity: 0,
        };
        assert_eq!(stats.average_processing_time(), Duration::from_secs(1));
    }

    #[test]
    fn result_carries_metadata_and_string_durations() {
        let task = Task::from_spec(
            TaskSpec::new(TaskType::SlideValidation, json!({})).metadata("owner", "qa"),
            Duration::from_secs(1),
            0,
        );
        let elapsed = Duration::from_micros(1500);
        let ok = ProcessingResult::succeeded(&task, "worker-1", json!(1), elapsed);
        let failed = ProcessingResult::failed(
            &task,
            "worker-1",
            TaskError::Timeout { timeout: Duration::from_millis(50) },
            Duration::from_millis(50),
        );
        assert_eq!(ok.metadata["owner"], "qa");
        assert_eq!(failed.metadata["owner"], "qa");

        let v = serde_json::to_value(&ok).unwrap();
        assert_eq!(v["metadata"]["owner"], "qa");
        assert_eq!(v["processing_time"], "1500us");
        let back: ProcessingResult = serde_json::from_value(v).unwrap();
        assert_eq!(back, ok);

        let v = serde_json::to_value(&failed).unwrap();
        assert_eq!(v["error"]["detail"]["timeout"], "50ms");
        let back: ProcessingResult = serde_json::from_value(v).unwrap();
        assert_eq!(back, failed);
    }

    #[test]
    fn terminal_states() {
        assert!(TaskState::Completed.is_terminal());
        assert!(TaskState::Failed.is_terminal());
        assert!(!TaskState::Retrying.is_terminal());
    }
}
