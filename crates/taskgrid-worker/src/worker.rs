//! A worker slot and the code that runs one attempt.

use std::time::{Duration, Instant};

use tracing::{debug, warn};

use taskgrid_core::{
    ProcessingResult, Task, TaskError, TaskId, WorkerId, WorkerStats, WorkerStatus, epoch_millis,
};

use crate::handler::HandlerRegistry;

/// A logical execution slot bound to at most one task at a time.
///
/// Status is only changed through [`begin`](Worker::begin),
/// [`finish`](Worker::finish), and [`terminate`](Worker::terminate),
/// all of which the pool calls on the dispatcher's behalf.
#[derive(Debug, Clone)]
pub struct Worker {
    id: WorkerId,
    status: WorkerStatus,
    current_task: Option<TaskId>,
    tasks_processed: u64,
    total_processing_time: Duration,
    error_count: u64,
    last_activity: Instant,
    last_activity_ms: u64,
}

impl Worker {
    pub fn new(id: WorkerId) -> Self {
        Self {
            id,
            status: WorkerStatus::Idle,
            current_task: None,
            tasks_processed: 0,
            total_processing_time: Duration::ZERO,
            error_count: 0,
            last_activity: Instant::now(),
            last_activity_ms: epoch_millis(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> WorkerStatus {
        self.status
    }

    pub fn current_task(&self) -> Option<&TaskId> {
        self.current_task.as_ref()
    }

    pub fn is_idle(&self) -> bool {
        self.status == WorkerStatus::Idle
    }

    /// How long the worker has been idle as of `now`; `None` unless idle.
    pub fn idle_for(&self, now: Instant) -> Option<Duration> {
        self.is_idle()
            .then(|| now.saturating_duration_since(self.last_activity))
    }

    /// `idle → busy`. Returns false (and changes nothing) if not idle.
    pub fn begin(&mut self, task: &Task) -> bool {
        if !self.is_idle() {
            warn!(worker_id = %self.id, status = ?self.status, "worker not idle, cannot start task");
            return false;
        }
        self.status = WorkerStatus::Busy;
        self.current_task = Some(task.id.clone());
        self.touch();
        true
    }

    /// Record an attempt outcome: `busy → idle`, or `busy → error` when the
    /// worker could not run the handler at all.
    pub fn finish(&mut self, result: &ProcessingResult) -> WorkerStatus {
        self.tasks_processed += 1;
        self.total_processing_time += result.processing_time;
        self.current_task = None;
        self.touch();

        match &result.error {
            Some(err) => {
                self.error_count += 1;
                if err.is_worker_fault() {
                    warn!(worker_id = %self.id, error = %err, "worker entered error state");
                    self.status = WorkerStatus::Error;
                } else {
                    self.status = WorkerStatus::Idle;
                }
            }
            None => self.status = WorkerStatus::Idle,
        }
        self.status
    }

    pub fn terminate(&mut self) {
        self.status = WorkerStatus::Terminated;
        self.current_task = None;
    }

    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            id: self.id.clone(),
            status: self.status,
            current_task: self.current_task.clone(),
            tasks_processed: self.tasks_processed,
            total_processing_time: self.total_processing_time,
            error_count: self.error_count,
            last_activity: self.last_activity_ms,
        }
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
        self.last_activity_ms = epoch_millis();
    }

    #[cfg(test)]
    pub(crate) fn backdate(&mut self, by: Duration) {
        if let Some(earlier) = self.last_activity.checked_sub(by) {
            self.last_activity = earlier;
        }
    }
}

/// Run a task's handler to completion on the blocking pool.
///
/// Never fails: a missing handler, a handler error, or a handler panic all
/// become a failed [`ProcessingResult`]. The caller races this against the
/// task's timeout.
pub async fn run_handler(
    registry: &HandlerRegistry,
    task: &Task,
    worker_id: &str,
) -> ProcessingResult {
    let started = Instant::now();

    let Some(handler) = registry.get(task.task_type) else {
        debug!(task_id = %task.id, task_type = %task.task_type, "no handler registered");
        return ProcessingResult::failed(
            task,
            worker_id,
            TaskError::UnsupportedType(task.task_type),
            started.elapsed(),
        );
    };

    let payload = task.payload.clone();
    let joined = tokio::task::spawn_blocking(move || handler.handle(&payload)).await;
    let elapsed = started.elapsed();

    match joined {
        Ok(Ok(output)) => ProcessingResult::succeeded(task, worker_id, output, elapsed),
        Ok(Err(e)) => ProcessingResult::failed(task, worker_id, e.into(), elapsed),
        Err(join_err) => {
            let msg = if join_err.is_panic() {
                panic_message(join_err.into_panic())
            } else {
                "handler task cancelled".to_string()
            };
            ProcessingResult::failed(task, worker_id, TaskError::Panicked(msg), elapsed)
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
