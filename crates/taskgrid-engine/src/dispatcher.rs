//! Dispatcher: the scheduling loop.
//!
//! Sole writer of queue order and worker status. Every event (submission,
//! attempt finished, backoff elapsed, config change, periodic tick) runs one
//! scheduling pass:
//!
//! 1. fail queued tasks whose dependencies failed
//! 2. replace errored workers and re-enforce pool bounds
//! 3. pair idle workers with ready tasks and launch attempts
//! 4. let the autoscaler grow or shrink the pool
//! 5. refresh metric gauges
//!
//! Attempts run concurrently on the runtime, each raced against its task's
//! timeout.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::{self, JoinError, JoinSet};
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use taskgrid_autoscale::{Autoscaler, ScaleDecision, ScaleInputs};
use taskgrid_core::{
    ProcessingResult, Task, TaskError, TaskId, TaskState, Utilization, WorkerConfig, WorkerId,
};
use taskgrid_worker::run_handler;

use crate::engine::Shared;
use crate::retry::{RetryDecision, RetryPolicy};

/// An attempt that has been launched and not yet reported back.
#[derive(Debug)]
struct Attempt {
    task: Task,
    worker_id: WorkerId,
}

/// Running attempts, keyed both by runtime task id and by task id so a
/// join failure still resolves to the worker that ran it.
#[derive(Default)]
struct AttemptSet {
    running: JoinSet<ProcessingResult>,
    owners: HashMap<task::Id, TaskId>,
    in_flight: HashMap<TaskId, Attempt>,
}

impl AttemptSet {
    fn spawn<F>(&mut self, attempt: Attempt, run: F)
    where
        F: Future<Output = ProcessingResult> + Send + 'static,
    {
        let handle = self.running.spawn(run);
        self.owners.insert(handle.id(), attempt.task.id.clone());
        self.in_flight.insert(attempt.task.id.clone(), attempt);
    }

    fn is_empty(&self) -> bool {
        self.running.is_empty()
    }

    /// Next finished attempt. An attempt whose future panicked or was
    /// cancelled is reported as a failed result.
    async fn join_next(&mut self) -> Option<(Attempt, ProcessingResult)> {
        loop {
            let (id, outcome) = match self.running.join_next_with_id().await? {
                Ok((id, result)) => (id, Ok(result)),
                Err(e) => (e.id(), Err(e)),
            };
            let Some(attempt) = self
                .owners
                .remove(&id)
                .and_then(|task_id| self.in_flight.remove(&task_id))
            else {
                continue;
            };
            let result = outcome.unwrap_or_else(|e| lost_attempt(&attempt, &e));
            return Some((attempt, result));
        }
    }

    /// Abort everything still running and hand back the tasks.
    async fn shutdown(&mut self) -> Vec<Task> {
        self.running.shutdown().await;
        self.owners.clear();
        self.in_flight.drain().map(|(_, attempt)| attempt.task).collect()
    }
}

fn lost_attempt(attempt: &Attempt, e: &JoinError) -> ProcessingResult {
    error!(
        task_id = %attempt.task.id,
        worker_id = %attempt.worker_id,
        error = %e,
        "attempt task did not complete"
    );
    ProcessingResult::failed(
        &attempt.task,
        &attempt.worker_id,
        TaskError::Panicked(e.to_string()),
        Duration::ZERO,
    )
}

pub(crate) struct Dispatcher {
    shared: Arc<Shared>,
    autoscaler: Autoscaler,
    retry: RetryPolicy,
    tick_interval: Duration,
    last_utilization: Utilization,
    attempts: AttemptSet,
    /// Backoff timers; each yields the id of the task to requeue.
    backoffs: JoinSet<TaskId>,
    backing_off: HashMap<TaskId, Task>,
}

impl Dispatcher {
    pub(crate) fn new(shared: Arc<Shared>, config: &WorkerConfig) -> Self {
        Self {
            shared,
            autoscaler: Autoscaler::new(config),
            retry: RetryPolicy::from_config(config),
            tick_interval: config.tick_interval,
            last_utilization: Utilization::default(),
            attempts: AttemptSet::default(),
            backoffs: JoinSet::new(),
            backing_off: HashMap::new(),
        }
    }

    /// Run until `shutdown` flips (or its sender is dropped).
    pub(crate) async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = new_ticker(self.tick_interval);
        info!(
            tick_ms = self.tick_interval.as_millis() as u64,
            "dispatcher started"
        );

        loop {
            self.tick().await;
            if ticker.period() != self.tick_interval {
                ticker = new_ticker(self.tick_interval);
            }

            tokio::select! {
                _ = shutdown.changed() => break,
                Some((attempt, result)) = self.attempts.join_next(),
                    if !self.attempts.is_empty() =>
                {
                    self.on_attempt(attempt, result).await;
                }
                Some(joined) = self.backoffs.join_next(), if !self.backoffs.is_empty() => {
                    self.on_backoff_elapsed(joined).await;
                }
                _ = self.shared.wake.notified() => {}
                _ = ticker.tick() => {}
            }
        }

        self.drain().await;
        info!("dispatcher stopped");
    }

    async fn tick(&mut self) {
        let config = self.shared.config.read().await.clone();
        self.autoscaler.configure(&config);
        self.retry = RetryPolicy::from_config(&config);
        self.tick_interval = config.tick_interval;

        self.fail_blocked().await;
        self.maintain_pool(&config).await;
        self.dispatch().await;
        if self.autoscale().await {
            self.dispatch().await;
        }
        self.refresh_gauges().await;
    }

    /// Permanently fail queued tasks that depend on a failed task. Repeats
    /// so a failure propagates down a whole chain in one pass.
    async fn fail_blocked(&mut self) {
        let shared = Arc::clone(&self.shared);
        loop {
            let blocked: Vec<(Task, TaskId)> = {
                let tasks = shared.tasks.read().await;
                let mut queue = shared.queue.lock().await;
                queue
                    .remove_where(|t| tasks.failed_dependency(t).is_some())
                    .into_iter()
                    .filter_map(|t| tasks.failed_dependency(&t).cloned().map(|dep| (t, dep)))
                    .collect()
            };
            if blocked.is_empty() {
                return;
            }

            let mut tasks = shared.tasks.write().await;
            for (task, dep) in blocked {
                warn!(task_id = %task.id, dependency = %dep, "dependency failed, failing task");
                let result = ProcessingResult::failed(
                    &task,
                    "",
                    TaskError::DependencyFailed(dep),
                    Duration::ZERO,
                );
                tasks.record_terminal(result);
                shared.metrics.record_dropped();
            }
            drop(tasks);
            shared.terminal.notify_waiters();
        }
    }

    async fn maintain_pool(&mut self, config: &WorkerConfig) {
        let mut pool = self.shared.pool.lock().await;
        pool.configure(config);
        let errored = pool.evict_errored();
        let (spawned, retired) = pool.enforce_bounds();

        if !errored.is_empty() {
            info!(
                evicted = errored.len(),
                spawned = spawned.len(),
                active = pool.active_count(),
                "errored workers replaced"
            );
        }
        if !retired.is_empty() {
            info!(
                retired = retired.len(),
                max = pool.max_workers(),
                "workers above maximum retired"
            );
        }
    }

    /// Pair idle workers with ready tasks, highest priority first.
    async fn dispatch(&mut self) {
        let shared = Arc::clone(&self.shared);
        let mut tasks = shared.tasks.write().await;
        let mut queue = shared.queue.lock().await;
        let mut pool = shared.pool.lock().await;

        let idle = pool.list_idle();
        let k = idle.len().min(queue.size());
        if k == 0 {
            return;
        }

        let ready = queue.dequeue_ready(k, |t| tasks.dependencies_met(t));
        for (task, worker_id) in ready.into_iter().zip(idle) {
            if !pool.begin(&worker_id, &task) {
                queue.requeue(task);
                continue;
            }
            tasks.set_state(&task.id, TaskState::Running);
            debug!(
                task_id = %task.id,
                worker_id = %worker_id,
                task_type = %task.task_type,
                attempt = task.retry_count + 1,
                "dispatching task"
            );
            self.launch(task, worker_id);
        }
    }

    fn launch(&mut self, task: Task, worker_id: WorkerId) {
        let registry = Arc::clone(&self.shared.registry);
        let attempt_task = task.clone();
        let attempt_worker = worker_id.clone();

        let attempt = Attempt { task, worker_id };
        self.attempts.spawn(attempt, async move {
            let timeout = attempt_task.timeout;
            let run = run_handler(&registry, &attempt_task, &attempt_worker);
            match tokio::time::timeout(timeout, run).await {
                Ok(result) => result,
                Err(_) => ProcessingResult::failed(
                    &attempt_task,
                    &attempt_worker,
                    TaskError::Timeout { timeout },
                    timeout,
                ),
            }
        });
    }

    /// Evaluate the autoscaler once. Returns true if a worker was added.
    async fn autoscale(&mut self) -> bool {
        let shared = Arc::clone(&self.shared);
        let utilization = shared.probe.utilization();
        self.last_utilization = utilization;

        let queue_size = shared.queue.lock().await.size();
        let mut pool = shared.pool.lock().await;
        let now = Instant::now();
        let inputs = ScaleInputs {
            queue_size,
            active_workers: pool.active_count(),
            utilization,
            expired_idle: pool.expired_idle(now),
            now,
        };

        match self.autoscaler.evaluate(&inputs) {
            ScaleDecision::ScaleUp => {
                if let Some(worker_id) = pool.spawn() {
                    info!(
                        worker_id = %worker_id,
                        queue = queue_size,
                        active = pool.active_count(),
                        "scaled up"
                    );
                    return true;
                }
            }
            ScaleDecision::ScaleDown(worker_id) => {
                if pool.retire(&worker_id, now) {
                    info!(worker_id = %worker_id, active = pool.active_count(), "scaled down");
                }
            }
            ScaleDecision::NoChange => {}
        }
        false
    }

    async fn refresh_gauges(&self) {
        let queue_size = self.shared.queue.lock().await.size();
        let pool = self.shared.pool.lock().await;
        self.shared.metrics.update_gauges(
            pool.active_count(),
            pool.busy_count(),
            queue_size,
            self.last_utilization,
        );
    }

    async fn on_attempt(&mut self, attempt: Attempt, result: ProcessingResult) {
        let Attempt { task, worker_id } = attempt;
        let shared = Arc::clone(&self.shared);
        shared.pool.lock().await.finish(&worker_id, &result);

        if result.success {
            shared.metrics.record_success(result.processing_time).await;
            debug!(
                task_id = %task.id,
                worker_id = %worker_id,
                elapsed_ms = result.processing_time.as_millis() as u64,
                retry_count = result.retry_count,
                "task completed"
            );
            shared.tasks.write().await.record_terminal(result);
            shared.terminal.notify_waiters();
            return;
        }

        let reason = result
            .error
            .as_ref()
            .map_or_else(String::new, ToString::to_string);
        match self.retry.decide(&task, &result) {
            RetryDecision::Requeue { task: next, delay } => {
                shared.metrics.record_failure(result.processing_time, false).await;
                shared.metrics.record_retry();
                warn!(
                    task_id = %task.id,
                    worker_id = %worker_id,
                    error = %reason,
                    attempt = task.retry_count + 1,
                    delay_ms = delay.as_millis() as u64,
                    "attempt failed, scheduling retry"
                );
                shared.tasks.write().await.record_retrying(result);
                self.schedule_retry(next, delay);
            }
            RetryDecision::Fail => {
                shared.metrics.record_failure(result.processing_time, true).await;
                warn!(
                    task_id = %task.id,
                    worker_id = %worker_id,
                    error = %reason,
                    retry_count = task.retry_count,
                    "task failed permanently"
                );
                shared.tasks.write().await.record_terminal(result);
                shared.terminal.notify_waiters();
            }
        }
    }

    fn schedule_retry(&mut self, task: Task, delay: Duration) {
        let id = task.id.clone();
        self.backing_off.insert(id.clone(), task);
        self.backoffs.spawn(async move {
            tokio::time::sleep(delay).await;
            id
        });
    }

    async fn on_backoff_elapsed(&mut self, joined: Result<TaskId, JoinError>) {
        let id = match joined {
            Ok(id) => id,
            Err(e) => {
                error!(error = %e, "backoff timer did not complete");
                return;
            }
        };
        let Some(task) = self.backing_off.remove(&id) else {
            return;
        };

        let shared = Arc::clone(&self.shared);
        let mut tasks = shared.tasks.write().await;
        debug!(task_id = %id, retry_count = task.retry_count, "retry requeued");
        shared.queue.lock().await.requeue(task);
        tasks.set_state(&id, TaskState::Queued);
    }

    /// Abandon in-flight attempts and backoff timers, returning their tasks
    /// to the queue unchanged.
    async fn drain(&mut self) {
        let mut returned = self.attempts.shutdown().await;
        self.backoffs.shutdown().await;
        returned.extend(self.backing_off.drain().map(|(_, task)| task));
        if returned.is_empty() {
            return;
        }

        let shared = Arc::clone(&self.shared);
        let mut tasks = shared.tasks.write().await;
        let mut queue = shared.queue.lock().await;
        let count = returned.len();
        for task in returned {
            tasks.set_state(&task.id, TaskState::Queued);
            queue.requeue(task);
        }
        info!(returned = count, "unfinished tasks returned to queue");
    }
}

fn new_ticker(period: Duration) -> Interval {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use taskgrid_core::{TaskSpec, TaskType};

    fn attempt(worker_id: &str) -> Attempt {
        let spec = TaskSpec::new(TaskType::SlideValidation, json!({}));
        Attempt {
            task: Task::from_spec(spec, Duration::from_secs(1), 0),
            worker_id: worker_id.to_string(),
        }
    }

    #[tokio::test]
    async fn finished_attempt_pairs_with_its_worker() {
        let mut set = AttemptSet::default();
        let a = attempt("worker-1");
        let expected = ProcessingResult::succeeded(&a.task, "worker-1", json!(1), Duration::ZERO);
        let reported = expected.clone();
        set.spawn(a, async move { reported });

        let (attempt, result) = set.join_next().await.unwrap();
        assert_eq!(attempt.worker_id, "worker-1");
        assert_eq!(result, expected);
        assert!(set.is_empty());
        assert!(set.in_flight.is_empty());
    }

    #[tokio::test]
    async fn panicked_attempt_still_releases_its_worker() {
        let mut set = AttemptSet::default();
        let a = attempt("worker-2");
        let task_id = a.task.id.clone();
        let never = ProcessingResult::succeeded(&a.task, "worker-2", json!(null), Duration::ZERO);
        let explode = true;
        set.spawn(a, async move {
            if explode {
                panic!("attempt future blew up");
            }
            never
        });

        let (attempt, result) = set.join_next().await.unwrap();
        assert_eq!(attempt.worker_id, "worker-2");
        assert_eq!(result.task_id, task_id);
        assert!(!result.success);
        assert!(matches!(result.error, Some(TaskError::Panicked(_))));
        assert!(set.in_flight.is_empty());
        assert!(set.owners.is_empty());
        assert!(set.join_next().await.is_none());
    }

    #[tokio::test]
    async fn shutdown_returns_unfinished_tasks() {
        let mut set = AttemptSet::default();
        let a = attempt("worker-3");
        let task_id = a.task.id.clone();
        set.spawn(a, std::future::pending::<ProcessingResult>());

        let returned = set.shutdown().await;
        assert_eq!(returned.len(), 1);
        assert_eq!(returned[0].id, task_id);
        assert!(set.is_empty());
    }
}
