//! Metrics collector: aggregates attempt outcomes and engine gauges.
//!
//! Counters are atomics; the rolling latency window and completion
//! timestamps sit behind a mutex.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::debug;

use taskgrid_core::{ProcessorMetrics, Utilization};

/// Number of recent attempt durations kept for averages and percentiles.
const LATENCY_WINDOW: usize = 100;

/// Span over which throughput is measured.
const THROUGHPUT_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
struct Rolling {
    /// Recent attempt durations in microseconds, newest last.
    latencies: VecDeque<u64>,
    /// Completion instants within the throughput window.
    completions: VecDeque<Instant>,
}

impl Rolling {
    fn push_latency(&mut self, elapsed: Duration) {
        if self.latencies.len() == LATENCY_WINDOW {
            self.latencies.pop_front();
        }
        self.latencies.push_back(elapsed.as_micros() as u64);
    }

    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(front) = self.completions.front() {
            if now.saturating_duration_since(*front) > window {
                self.completions.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Collects engine metrics.
#[derive(Debug)]
pub struct MetricsCollector {
    total_tasks: AtomicU64,
    completed_tasks: AtomicU64,
    failed_tasks: AtomicU64,
    retried_attempts: AtomicU64,
    finished_attempts: AtomicU64,
    failed_attempts: AtomicU64,
    active_workers: AtomicU32,
    busy_workers: AtomicU32,
    queue_size: AtomicUsize,
    /// Utilization stored as `f64::to_bits`.
    cpu_bits: AtomicU64,
    memory_bits: AtomicU64,
    rolling: Mutex<Rolling>,
    throughput_window: Duration,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::with_throughput_window(THROUGHPUT_WINDOW)
    }

    pub fn with_throughput_window(window: Duration) -> Self {
        Self {
            total_tasks: AtomicU64::new(0),
            completed_tasks: AtomicU64::new(0),
            failed_tasks: AtomicU64::new(0),
            retried_attempts: AtomicU64::new(0),
            finished_attempts: AtomicU64::new(0),
            failed_attempts: AtomicU64::new(0),
            active_workers: AtomicU32::new(0),
            busy_workers: AtomicU32::new(0),
            queue_size: AtomicUsize::new(0),
            cpu_bits: AtomicU64::new(0f64.to_bits()),
            memory_bits: AtomicU64::new(0f64.to_bits()),
            rolling: Mutex::new(Rolling::default()),
            throughput_window: window,
        }
    }

    /// Count tasks accepted by the engine.
    pub fn record_submitted(&self, count: u64) {
        self.total_tasks.fetch_add(count, Ordering::Relaxed);
    }

    /// A task completed successfully.
    pub async fn record_success(&self, elapsed: Duration) {
        self.completed_tasks.fetch_add(1, Ordering::Relaxed);
        self.finished_attempts.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();
        let mut rolling = self.rolling.lock().await;
        rolling.push_latency(elapsed);
        rolling.prune(now, self.throughput_window);
        rolling.completions.push_back(now);
    }

    /// An attempt failed. `terminal` marks the task permanently failed.
    pub async fn record_failure(&self, elapsed: Duration, terminal: bool) {
        self.finished_attempts.fetch_add(1, Ordering::Relaxed);
        self.failed_attempts.fetch_add(1, Ordering::Relaxed);
        if terminal {
            self.failed_tasks.fetch_add(1, Ordering::Relaxed);
        }
        self.rolling.lock().await.push_latency(elapsed);
    }

    /// A task failed without an attempt (e.g. a dependency failed).
    pub fn record_dropped(&self) {
        self.failed_tasks.fetch_add(1, Ordering::Relaxed);
    }

    /// A failed attempt was scheduled for retry.
    pub fn record_retry(&self) {
        self.retried_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Refresh pool, queue, and resource gauges.
    pub fn update_gauges(&self, active: u32, busy: u32, queue_size: usize, util: Utilization) {
        self.active_workers.store(active, Ordering::Relaxed);
        self.busy_workers.store(busy, Ordering::Relaxed);
        self.queue_size.store(queue_size, Ordering::Relaxed);
        self.cpu_bits.store(util.cpu.to_bits(), Ordering::Relaxed);
        self.memory_bits.store(util.memory.to_bits(), Ordering::Relaxed);
    }

    /// Current metrics.
    pub async fn snapshot(&self) -> ProcessorMetrics {
        let now = Instant::now();
        let mut rolling = self.rolling.lock().await;
        rolling.prune(now, self.throughput_window);

        let latencies: Vec<u64> = rolling.latencies.iter().copied().collect();
        let avg_ms = if latencies.is_empty() {
            0.0
        } else {
            latencies.iter().sum::<u64>() as f64 / latencies.len() as f64 / 1000.0
        };
        let (p50, p99) = compute_percentiles(&latencies);
        let throughput = rolling.completions.len() as f64 / self.throughput_window.as_secs_f64();
        drop(rolling);

        let finished = self.finished_attempts.load(Ordering::Relaxed);
        let failed = self.failed_attempts.load(Ordering::Relaxed);
        let error_rate = if finished > 0 {
            failed as f64 / finished as f64
        } else {
            0.0
        };

        let metrics = ProcessorMetrics {
            total_tasks: self.total_tasks.load(Ordering::Relaxed),
            completed_tasks: self.completed_tasks.load(Ordering::Relaxed),
            failed_tasks: self.failed_tasks.load(Ordering::Relaxed),
            retried_attempts: self.retried_attempts.load(Ordering::Relaxed),
            active_workers: self.active_workers.load(Ordering::Relaxed),
            busy_workers: self.busy_workers.load(Ordering::Relaxed),
            queue_size: self.queue_size.load(Ordering::Relaxed),
            avg_processing_ms: avg_ms,
            p50_processing_ms: p50,
            p99_processing_ms: p99,
            throughput,
            error_rate,
            cpu_utilization: f64::from_bits(self.cpu_bits.load(Ordering::Relaxed)),
            memory_utilization: f64::from_bits(self.memory_bits.load(Ordering::Relaxed)),
        };
        debug!(
            completed = metrics.completed_tasks,
            failed = metrics.failed_tasks,
            queue = metrics.queue_size,
            "metrics snapshot"
        );
        metrics
    }
}

/// Compute P50 and P99 from microsecond samples.
///
/// Returns (p50_ms, p99_ms). If empty, returns (0.0, 0.0).
fn compute_percentiles(latencies: &[u64]) -> (f64, f64) {
    if latencies.is_empty() {
        return (0.0, 0.0);
    }

    let mut sorted = latencies.to_vec();
    sorted.sort_unstable();

    let p50_idx = (sorted.len() as f64 * 0.50) as usize;
    let p99_idx = (sorted.len() as f64 * 0.99) as usize;

    let p50 = sorted[p50_idx.min(sorted.len() - 1)] as f64 / 1000.0;
    let p99 = sorted[p99_idx.min(sorted.len() - 1)] as f64 / 1000.0;

    (p50, p99)
}
