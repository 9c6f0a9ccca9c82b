//! Autoscaler: backlog-driven worker scaling.
//!
//! Evaluated once per dispatcher tick. Grows the pool by one worker when the
//! backlog outruns it and the host has headroom; shrinks it by one expired
//! idle worker when there is nothing queued. Optional cooldown windows
//! further rate-limit each direction.

use std::time::{Duration, Instant};

use tracing::debug;

use taskgrid_core::{Utilization, WorkerConfig, WorkerId};

/// Backlog per active worker above which the pool grows.
const BACKLOG_FACTOR: usize = 2;

/// A scaling decision for one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScaleDecision {
    /// Spawn one worker.
    ScaleUp,
    /// Retire this idle-expired worker.
    ScaleDown(WorkerId),
    /// No change needed.
    NoChange,
}

/// What the autoscaler observes on a tick.
#[derive(Debug, Clone)]
pub struct ScaleInputs {
    pub queue_size: usize,
    pub active_workers: u32,
    pub utilization: Utilization,
    /// The longest-idle worker past the idle timeout, if any.
    pub expired_idle: Option<WorkerId>,
    pub now: Instant,
}

/// Scaling policy plus cooldown state.
#[derive(Debug, Clone)]
pub struct Autoscaler {
    min_workers: u32,
    max_workers: u32,
    cpu_threshold: f64,
    memory_threshold: f64,
    scale_up_cooldown: Duration,
    scale_down_cooldown: Duration,
    last_scale_up: Option<Instant>,
    last_scale_down: Option<Instant>,
}

impl Autoscaler {
    pub fn new(config: &WorkerConfig) -> Self {
        let mut scaler = Self {
            min_workers: 0,
            max_workers: 0,
            cpu_threshold: 0.0,
            memory_threshold: 0.0,
            scale_up_cooldown: Duration::ZERO,
            scale_down_cooldown: Duration::ZERO,
            last_scale_up: None,
            last_scale_down: None,
        };
        scaler.configure(config);
        scaler
    }

    /// Adopt new bounds and thresholds. Cooldown history is kept.
    pub fn configure(&mut self, config: &WorkerConfig) {
        self.min_workers = config.min_workers;
        self.max_workers = config.max_workers;
        self.cpu_threshold = config.cpu_threshold;
        self.memory_threshold = config.memory_threshold;
        self.scale_up_cooldown = config.scale_up_cooldown;
        self.scale_down_cooldown = config.scale_down_cooldown;
    }

    /// Decide whether to grow or shrink the pool by one worker.
    pub fn evaluate(&mut self, inputs: &ScaleInputs) -> ScaleDecision {
        let active = inputs.active_workers;

        if inputs.queue_size > BACKLOG_FACTOR * active as usize && active < self.max_workers {
            if !self.has_headroom(inputs.utilization) {
                debug!(
                    queue = inputs.queue_size,
                    active,
                    cpu = inputs.utilization.cpu,
                    memory = inputs.utilization.memory,
                    "scale-up blocked by resource utilization"
                );
                return ScaleDecision::NoChange;
            }
            if !cooled(self.last_scale_up, self.scale_up_cooldown, inputs.now) {
                return ScaleDecision::NoChange;
            }
            self.last_scale_up = Some(inputs.now);
            debug!(
                queue = inputs.queue_size,
                from = active,
                to = active + 1,
                "scaling up"
            );
            return ScaleDecision::ScaleUp;
        }

        if inputs.queue_size == 0
            && active > self.min_workers
            && let Some(worker_id) = &inputs.expired_idle
        {
            if !cooled(self.last_scale_down, self.scale_down_cooldown, inputs.now) {
                return ScaleDecision::NoChange;
            }
            self.last_scale_down = Some(inputs.now);
            debug!(
                worker_id = %worker_id,
                from = active,
                to = active - 1,
                "scaling down"
            );
            return ScaleDecision::ScaleDown(worker_id.clone());
        }

        ScaleDecision::NoChange
    }

    fn has_headroom(&self, util: Utilization) -> bool {
        util.cpu < self.cpu_threshold && util.memory < self.memory_threshold
    }
}

fn cooled(last: Option<Instant>, cooldown: Duration, now: Instant) -> bool {
    match last {
        Some(at) => now.saturating_duration_since(at) >= cooldown,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(min: u32, max: u32) -> WorkerConfig {
        WorkerConfig {
            min_workers: min,
            max_workers: max,
            cpu_threshold: 0.8,
            memory_threshold: 0.85,
            ..WorkerConfig::default()
        }
    }

    fn inputs(queue: usize, active: u32) -> ScaleInputs {
        ScaleInputs {
            queue_size: queue,
            active_workers: active,
            utilization: Utilization { cpu: 0.2, memory: 0.3 },
            expired_idle: None,
            now: Instant::now(),
        }
    }

    #[test]
    fn scale_up_on_backlog() {
        let mut scaler = Autoscaler::new(&config(1, 5));
        assert_eq!(scaler.evaluate(&inputs(10, 2)), ScaleDecision::ScaleUp);
    }

    #[test]
    fn no_scale_up_at_exactly_twice_active() {
        let mut scaler = Autoscaler::new(&config(1, 5));
        assert_eq!(scaler.evaluate(&inputs(4, 2)), ScaleDecision::NoChange);
        assert_eq!(scaler.evaluate(&inputs(5, 2)), ScaleDecision::ScaleUp);
    }

    #[test]
    fn respects_max_workers() {
        let mut scaler = Autoscaler::new(&config(1, 5));
        assert_eq!(scaler.evaluate(&inputs(100, 5)), ScaleDecision::NoChange);
    }

    #[test]
    fn blocked_at_cpu_threshold() {
        let mut scaler = Autoscaler::new(&config(1, 5));
        let mut i = inputs(10, 2);
        i.utilization.cpu = 0.8;
        assert_eq!(scaler.evaluate(&i), ScaleDecision::NoChange);
        i.utilization.cpu = 0.79;
        assert_eq!(scaler.evaluate(&i), ScaleDecision::ScaleUp);
    }

    #[test]
    fn blocked_at_memory_threshold() {
        let mut scaler = Autoscaler::new(&config(1, 5));
        let mut i = inputs(10, 2);
        i.utilization.memory = 0.9;
        assert_eq!(scaler.evaluate(&i), ScaleDecision::NoChange);
    }

    #[test]
    fn scale_down_one_at_a_time_to_min() {
        let mut scaler = Autoscaler::new(&config(1, 5));
        let mut active = 3;
        let mut retired = Vec::new();
        for tick in 0..5 {
            let mut i = inputs(0, active);
            i.expired_idle = Some(format!("worker-{tick}"));
            if let ScaleDecision::ScaleDown(id) = scaler.evaluate(&i) {
                retired.push(id);
                active -= 1;
            }
        }
        assert_eq!(active, 1);
        assert_eq!(retired, ["worker-0", "worker-1"]);
    }

    #[test]
    fn no_scale_down_with_backlog() {
        let mut scaler = Autoscaler::new(&config(1, 5));
        let mut i = inputs(1, 3);
        i.expired_idle = Some("worker-1".into());
        assert_eq!(scaler.evaluate(&i), ScaleDecision::NoChange);
    }

    #[test]
    fn no_scale_down_without_expired_worker() {
        let mut scaler = Autoscaler::new(&config(1, 5));
        assert_eq!(scaler.evaluate(&inputs(0, 3)), ScaleDecision::NoChange);
    }

    #[test]
    fn cooldown_limits_scale_up() {
        let mut cfg = config(1, 10);
        cfg.scale_up_cooldown = Duration::from_secs(30);
        let mut scaler = Autoscaler::new(&cfg);

        let start = Instant::now();
        let mut i = inputs(50, 2);
        i.now = start;
        assert_eq!(scaler.evaluate(&i), ScaleDecision::ScaleUp);

        i.active_workers = 3;
        i.now = start + Duration::from_secs(10);
        assert_eq!(scaler.evaluate(&i), ScaleDecision::NoChange);

        i.now = start + Duration::from_secs(30);
        assert_eq!(scaler.evaluate(&i), ScaleDecision::ScaleUp);
    }

    #[test]
    fn configure_updates_bounds() {
        let mut scaler = Autoscaler::new(&config(1, 2));
        assert_eq!(scaler.evaluate(&inputs(10, 2)), ScaleDecision::NoChange);
        scaler.configure(&config(1, 4));
        assert_eq!(scaler.evaluate(&inputs(10, 2)), ScaleDecision::ScaleUp);
    }
}
