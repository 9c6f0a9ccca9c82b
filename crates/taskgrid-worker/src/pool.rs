//! Worker pool: owns the live set of workers.
//!
//! Supports min/max bounds, idle-timeout retirement, and replacement of
//! workers that fall into the `error` state. Terminated workers are removed
//! from the live set immediately.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use taskgrid_core::{ProcessingResult, Task, WorkerConfig, WorkerId, WorkerStats, WorkerStatus};

use crate::worker::Worker;

/// The set of live workers for one engine.
#[derive(Debug)]
pub struct WorkerPool {
    /// Live workers in creation order.
    workers: Vec<Worker>,
    min_workers: u32,
    max_workers: u32,
    idle_timeout: Duration,
    /// Sequence for worker ids; never reused.
    next_seq: u64,
}

impl WorkerPool {
    pub fn new(min_workers: u32, max_workers: u32, idle_timeout: Duration) -> Self {
        Self {
            workers: Vec::new(),
            min_workers,
            max_workers,
            idle_timeout,
            next_seq: 1,
        }
    }

    pub fn from_config(config: &WorkerConfig) -> Self {
        Self::new(config.min_workers, config.max_workers, config.idle_timeout)
    }

    /// Adopt new bounds. Call [`enforce_bounds`](Self::enforce_bounds)
    /// afterwards to bring the live set back inside them.
    pub fn configure(&mut self, config: &WorkerConfig) {
        self.min_workers = config.min_workers;
        self.max_workers = config.max_workers;
        self.idle_timeout = config.idle_timeout;
    }

    /// Create workers up to `min_workers`. Returns the new ids.
    pub fn ensure_minimum(&mut self) -> Vec<WorkerId> {
        let mut spawned = Vec::new();
        while self.active_count() < self.min_workers {
            match self.spawn() {
                Some(id) => spawned.push(id),
                None => break,
            }
        }
        if !spawned.is_empty() {
            info!(
                min = self.min_workers,
                spawned = spawned.len(),
                "worker pool filled to minimum"
            );
        }
        spawned
    }

    /// Create and register one worker. `None` if at `max_workers`.
    pub fn spawn(&mut self) -> Option<WorkerId> {
        if self.active_count() >= self.max_workers {
            debug!(max = self.max_workers, "pool at capacity, not spawning");
            return None;
        }
        let id = format!("worker-{}", self.next_seq);
        self.next_seq += 1;
        self.workers.push(Worker::new(id.clone()));
        debug!(worker_id = %id, active = self.active_count(), "worker spawned");
        Some(id)
    }

    /// Retire an idle worker that has outlived `idle_timeout`, as long as the
    /// pool stays at or above `min_workers`. Returns whether it was retired.
    pub fn retire(&mut self, id: &str, now: Instant) -> bool {
        if self.active_count() <= self.min_workers {
            return false;
        }
        let eligible = self
            .get(id)
            .and_then(|w| w.idle_for(now))
            .is_some_and(|idle| idle >= self.idle_timeout);
        if !eligible {
            return false;
        }
        self.evict(id).is_some()
    }

    /// Terminate a worker and drop it from the live set unconditionally.
    pub fn evict(&mut self, id: &str) -> Option<Worker> {
        let pos = self.workers.iter().position(|w| w.id() == id)?;
        let mut worker = self.workers.remove(pos);
        worker.terminate();
        info!(worker_id = %id, active = self.active_count(), "worker retired");
        Some(worker)
    }

    /// Evict every worker in the `error` state. Returns their ids.
    pub fn evict_errored(&mut self) -> Vec<WorkerId> {
        let errored: Vec<WorkerId> = self
            .workers
            .iter()
            .filter(|w| w.status() == WorkerStatus::Error)
            .map(|w| w.id().to_string())
            .collect();
        for id in &errored {
            warn!(worker_id = %id, "replacing worker in error state");
            self.evict(id);
        }
        errored
    }

    /// Bring the live set inside `[min_workers, max_workers]`: retire idle
    /// workers above the maximum (regardless of idle time), then fill to the
    /// minimum. Busy workers above the maximum are left to finish.
    pub fn enforce_bounds(&mut self) -> (Vec<WorkerId>, Vec<WorkerId>) {
        let mut retired = Vec::new();
        while self.active_count() > self.max_workers {
            let Some(id) = self
                .workers
                .iter()
                .rev()
                .find(|w| w.is_idle())
                .map(|w| w.id().to_string())
            else {
                break;
            };
            self.evict(&id);
            retired.push(id);
        }
        let spawned = self.ensure_minimum();
        (spawned, retired)
    }

    /// The idle worker that has been idle longest, if it has been idle for
    /// at least `idle_timeout`.
    pub fn expired_idle(&self, now: Instant) -> Option<WorkerId> {
        self.workers
            .iter()
            .filter_map(|w| w.idle_for(now).map(|idle| (w, idle)))
            .filter(|(_, idle)| *idle >= self.idle_timeout)
            .max_by_key(|(_, idle)| *idle)
            .map(|(w, _)| w.id().to_string())
    }

    /// Mark a worker busy with `task`.
    pub fn begin(&mut self, id: &str, task: &Task) -> bool {
        self.get_mut(id).is_some_and(|w| w.begin(task))
    }

    /// Record an attempt outcome. `None` if the worker is gone (evicted
    /// while its attempt ran).
    pub fn finish(&mut self, id: &str, result: &ProcessingResult) -> Option<WorkerStatus> {
        self.get_mut(id).map(|w| w.finish(result))
    }

    /// Terminate every worker (shutdown).
    pub fn terminate_all(&mut self) -> usize {
        let count = self.workers.len();
        for w in &mut self.workers {
            w.terminate();
        }
        self.workers.clear();
        info!(terminated = count, "all workers terminated");
        count
    }

    pub fn list_idle(&self) -> Vec<WorkerId> {
        self.workers
            .iter()
            .filter(|w| w.is_idle())
            .map(|w| w.id().to_string())
            .collect()
    }

    pub fn list_all(&self) -> Vec<WorkerStats> {
        self.workers.iter().map(Worker::stats).collect()
    }

    pub fn get(&self, id: &str) -> Option<&Worker> {
        self.workers.iter().find(|w| w.id() == id)
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut Worker> {
        self.workers.iter_mut().find(|w| w.id() == id)
    }

    /// Live (non-terminated) workers.
    pub fn active_count(&self) -> u32 {
        self.workers.len() as u32
    }

    pub fn idle_count(&self) -> u32 {
        self.workers.iter().filter(|w| w.is_idle()).count() as u32
    }

    pub fn busy_count(&self) -> u32 {
        self.workers
            .iter()
            .filter(|w| w.status() == WorkerStatus::Busy)
            .count() as u32
    }

    pub fn min_workers(&self) -> u32 {
        self.min_workers
    }

    pub fn max_workers(&self) -> u32 {
        self.max_workers
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    #[cfg(test)]
    pub(crate) fn backdate_all(&mut self, by: Duration) {
        for w in &mut self.workers {
            w.backdate(by);
        }
    }
}
