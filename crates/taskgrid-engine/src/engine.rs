//! The public engine handle.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify, RwLock, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use taskgrid_autoscale::{ResourceProbe, SystemProbe};
use taskgrid_core::{
    ProcessingResult, ProcessorMetrics, Task, TaskId, TaskSpec, TaskState, WorkerConfig,
    WorkerConfigUpdate, WorkerStats,
};
use taskgrid_metrics::{MetricsCollector, render_prometheus};
use taskgrid_queue::TaskQueue;
use taskgrid_worker::{HandlerRegistry, WorkerPool};

use crate::dispatcher::Dispatcher;
use crate::error::{EngineError, EngineResult};
use crate::store::TaskStore;

/// State shared between the engine handle and its dispatcher.
///
/// Lock order: `config`, then `tasks`, then `queue`, then `pool`.
pub(crate) struct Shared {
    pub(crate) config: RwLock<WorkerConfig>,
    pub(crate) registry: Arc<HandlerRegistry>,
    pub(crate) probe: Arc<dyn ResourceProbe>,
    pub(crate) tasks: RwLock<TaskStore>,
    pub(crate) queue: Mutex<TaskQueue>,
    pub(crate) pool: Mutex<WorkerPool>,
    pub(crate) metrics: MetricsCollector,
    /// Wakes the dispatcher after a submission or config change.
    pub(crate) wake: Notify,
    /// Signalled whenever a task reaches a terminal state.
    pub(crate) terminal: Notify,
}

struct Running {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// A task-processing engine: queue, worker pool, dispatcher, autoscaler.
///
/// Engines are independent; construct as many as needed. Dropping a running
/// engine stops its dispatcher.
pub struct TaskEngine {
    shared: Arc<Shared>,
    running: Mutex<Option<Running>>,
}

impl TaskEngine {
    /// Create an engine that reads host utilization through [`SystemProbe`].
    pub fn new(config: WorkerConfig, registry: HandlerRegistry) -> EngineResult<Self> {
        Self::with_probe(config, registry, Arc::new(SystemProbe::new()))
    }

    pub fn with_probe(
        config: WorkerConfig,
        registry: HandlerRegistry,
        probe: Arc<dyn ResourceProbe>,
    ) -> EngineResult<Self> {
        config.validate()?;
        let queue = match config.queue_capacity {
            Some(capacity) => TaskQueue::bounded(capacity),
            None => TaskQueue::new(),
        };
        let pool = WorkerPool::from_config(&config);
        debug!(task_types = ?registry.task_types(), "task engine created");

        Ok(Self {
            shared: Arc::new(Shared {
                config: RwLock::new(config),
                registry: Arc::new(registry),
                probe,
                tasks: RwLock::new(TaskStore::new()),
                queue: Mutex::new(queue),
                pool: Mutex::new(pool),
                metrics: MetricsCollector::new(),
                wake: Notify::new(),
                terminal: Notify::new(),
            }),
            running: Mutex::new(None),
        })
    }

    /// Fill the pool to its minimum and start the dispatcher.
    pub async fn start(&self) -> EngineResult<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(EngineError::AlreadyRunning);
        }

        let config = self.shared.config.read().await.clone();
        {
            let mut pool = self.shared.pool.lock().await;
            pool.configure(&config);
            pool.ensure_minimum();
        }

        let (shutdown, rx) = watch::channel(false);
        let dispatcher = Dispatcher::new(Arc::clone(&self.shared), &config);
        let handle = tokio::spawn(dispatcher.run(rx));
        *running = Some(Running { shutdown, handle });

        info!(
            min_workers = config.min_workers,
            max_workers = config.max_workers,
            "task engine started"
        );
        Ok(())
    }

    /// Halt the dispatcher and terminate every worker.
    ///
    /// In-flight attempts are abandoned and, like tasks waiting out a retry
    /// delay, returned to the queue. A later [`start`](Self::start) resumes
    /// them.
    pub async fn stop(&self) -> EngineResult<()> {
        let Some(Running { shutdown, handle }) = self.running.lock().await.take() else {
            return Err(EngineError::NotRunning);
        };
        let _ = shutdown.send(true);
        if let Err(e) = handle.await {
            error!(error = %e, "dispatcher exited abnormally");
        }
        self.shared.pool.lock().await.terminate_all();
        info!("task engine stopped");
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Submit one task. Unset timeout and retry budget come from the config.
    pub async fn add_task(&self, spec: TaskSpec) -> EngineResult<TaskId> {
        let (timeout, max_retries) = self.task_defaults().await;
        let task = Task::from_spec(spec, timeout, max_retries);
        let id = task.id.clone();
        self.admit(vec![task]).await?;
        Ok(id)
    }

    /// Submit a batch. Either every task is accepted or none is.
    pub async fn add_tasks(&self, specs: Vec<TaskSpec>) -> EngineResult<Vec<TaskId>> {
        let (timeout, max_retries) = self.task_defaults().await;
        let batch: Vec<Task> = specs
            .into_iter()
            .map(|spec| Task::from_spec(spec, timeout, max_retries))
            .collect();
        let ids = batch.iter().map(|t| t.id.clone()).collect();
        self.admit(batch).await?;
        Ok(ids)
    }

    async fn task_defaults(&self) -> (Duration, u32) {
        let config = self.shared.config.read().await;
        (config.task_timeout, config.max_retries)
    }

    async fn admit(&self, batch: Vec<Task>) -> EngineResult<()> {
        let mut tasks = self.shared.tasks.write().await;
        if let Some(dep) = batch
            .iter()
            .flat_map(|t| &t.dependencies)
            .find(|dep| !tasks.contains(dep))
        {
            return Err(EngineError::UnknownDependency(dep.clone()));
        }

        let admitted: Vec<_> = batch
            .iter()
            .map(|t| (t.id.clone(), t.task_type, t.priority))
            .collect();
        self.shared.queue.lock().await.enqueue_all(batch)?;

        for (id, task_type, priority) in admitted.iter() {
            tasks.insert_queued(id.clone());
            debug!(task_id = %id, %task_type, ?priority, "task queued");
        }
        drop(tasks);

        self.shared.metrics.record_submitted(admitted.len() as u64);
        self.shared.wake.notify_one();
        Ok(())
    }

    /// Wait until the task is completed or permanently failed.
    ///
    /// `timeout` bounds the caller's wait only; the task keeps running after
    /// a [`EngineError::WaitTimeout`].
    pub async fn wait_for_task(&self, id: &str, timeout: Duration) -> EngineResult<ProcessingResult> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.shared.terminal.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let tasks = self.shared.tasks.read().await;
                if !tasks.contains(id) {
                    return Err(EngineError::TaskNotFound(id.to_string()));
                }
                if let Some(result) = tasks.terminal_result(id) {
                    return Ok(result.clone());
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(EngineError::WaitTimeout {
                    task_id: id.to_string(),
                    waited: timeout,
                });
            }
        }
    }

    /// The final result of a completed or permanently failed task.
    ///
    /// Results are retained until the engine is dropped.
    pub async fn get_task_result(&self, id: &str) -> Option<ProcessingResult> {
        self.shared.tasks.read().await.terminal_result(id).cloned()
    }

    pub async fn task_status(&self, id: &str) -> Option<TaskState> {
        self.shared.tasks.read().await.state(id)
    }

    /// Aggregate metrics with live queue and pool gauges.
    pub async fn get_metrics(&self) -> ProcessorMetrics {
        let mut metrics = self.shared.metrics.snapshot().await;
        metrics.queue_size = self.shared.queue.lock().await.size();
        let pool = self.shared.pool.lock().await;
        metrics.active_workers = pool.active_count();
        metrics.busy_workers = pool.busy_count();
        metrics
    }

    pub async fn get_worker_stats(&self) -> Vec<WorkerStats> {
        self.shared.pool.lock().await.list_all()
    }

    /// Metrics and worker stats in Prometheus text format.
    pub async fn prometheus(&self) -> String {
        let metrics = self.get_metrics().await;
        let workers = self.get_worker_stats().await;
        render_prometheus(&metrics, &workers)
    }

    pub async fn config(&self) -> WorkerConfig {
        self.shared.config.read().await.clone()
    }

    /// Apply a partial config update atomically.
    ///
    /// Invalid updates are rejected whole. Pool bounds are re-enforced on the
    /// dispatcher's next tick.
    pub async fn update_config(&self, update: WorkerConfigUpdate) -> EngineResult<WorkerConfig> {
        let mut config = self.shared.config.write().await;
        let next = config.merged(&update)?;
        self.shared.queue.lock().await.set_capacity(next.queue_capacity);
        *config = next.clone();
        drop(config);

        info!(
            min_workers = next.min_workers,
            max_workers = next.max_workers,
            queue_capacity = ?next.queue_capacity,
            "engine config updated"
        );
        self.shared.wake.notify_one();
        Ok(next)
    }
}

impl std::fmt::Debug for TaskEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskEngine")
            .field("registry", &self.shared.registry)
            .finish_non_exhaustive()
    }
}
