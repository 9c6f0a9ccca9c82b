//! Prometheus text exposition format.
//!
//! Renders an engine metrics snapshot plus per-worker statistics for
//! scraping by a Prometheus server or compatible agent.

use std::fmt::Write;

use taskgrid_core::{ProcessorMetrics, WorkerStats, WorkerStatus};

fn header(out: &mut String, name: &str, kind: &str, help: &str) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} {kind}");
}

fn status_label(status: WorkerStatus) -> &'static str {
    match status {
        WorkerStatus::Idle => "idle",
        WorkerStatus::Busy => "busy",
        WorkerStatus::Error => "error",
        WorkerStatus::Terminated => "terminated",
    }
}

/// Render engine metrics and worker stats into Prometheus text format.
///
/// Engine-wide values are unlabelled; per-worker series carry a `worker`
/// label.
pub fn render_prometheus(metrics: &ProcessorMetrics, workers: &[WorkerStats]) -> String {
    let mut out = String::new();

    header(&mut out, "taskgrid_tasks_total", "counter", "Tasks accepted by the engine.");
    let _ = writeln!(out, "taskgrid_tasks_total {}", metrics.total_tasks);

    header(&mut out, "taskgrid_tasks_completed_total", "counter", "Tasks completed successfully.");
    let _ = writeln!(out, "taskgrid_tasks_completed_total {}", metrics.completed_tasks);

    header(&mut out, "taskgrid_tasks_failed_total", "counter", "Tasks that failed permanently.");
    let _ = writeln!(out, "taskgrid_tasks_failed_total {}", metrics.failed_tasks);

    header(&mut out, "taskgrid_retries_total", "counter", "Attempts scheduled for retry.");
    let _ = writeln!(out, "taskgrid_retries_total {}", metrics.retried_attempts);

    header(&mut out, "taskgrid_queue_size", "gauge", "Tasks waiting in the queue.");
    let _ = writeln!(out, "taskgrid_queue_size {}", metrics.queue_size);

    header(&mut out, "taskgrid_active_workers", "gauge", "Workers in the pool.");
    let _ = writeln!(out, "taskgrid_active_workers {}", metrics.active_workers);

    header(&mut out, "taskgrid_busy_workers", "gauge", "Workers currently running a task.");
    let _ = writeln!(out, "taskgrid_busy_workers {}", metrics.busy_workers);

    header(&mut out, "taskgrid_processing_ms", "gauge", "Attempt duration over the recent window in milliseconds.");
    let _ = writeln!(out, "taskgrid_processing_ms{{stat=\"avg\"}} {:.2}", metrics.avg_processing_ms);
    let _ = writeln!(out, "taskgrid_processing_ms{{stat=\"p50\"}} {:.2}", metrics.p50_processing_ms);
    let _ = writeln!(out, "taskgrid_processing_ms{{stat=\"p99\"}} {:.2}", metrics.p99_processing_ms);

    header(&mut out, "taskgrid_throughput", "gauge", "Completed tasks per second.");
    let _ = writeln!(out, "taskgrid_throughput {:.4}", metrics.throughput);

    header(&mut out, "taskgrid_error_rate", "gauge", "Failed attempts over finished attempts (0.0-1.0).");
    let _ = writeln!(out, "taskgrid_error_rate {:.4}", metrics.error_rate);

    header(&mut out, "taskgrid_cpu_utilization", "gauge", "Host CPU utilization (0.0-1.0).");
    let _ = writeln!(out, "taskgrid_cpu_utilization {:.4}", metrics.cpu_utilization);

    header(&mut out, "taskgrid_memory_utilization", "gauge", "Host memory utilization (0.0-1.0).");
    let _ = writeln!(out, "taskgrid_memory_utilization {:.4}", metrics.memory_utilization);

    header(&mut out, "taskgrid_worker_tasks_processed_total", "counter", "Attempts run by a worker.");
    for w in workers {
        let _ = writeln!(
            out,
            "taskgrid_worker_tasks_processed_total{{worker=\"{}\"}} {}",
            w.id, w.tasks_processed
        );
    }

    header(&mut out, "taskgrid_worker_errors_total", "counter", "Failed attempts run by a worker.");
    for w in workers {
        let _ = writeln!(
            out,
            "taskgrid_worker_errors_total{{worker=\"{}\"}} {}",
            w.id, w.error_count
        );
    }

    header(&mut out, "taskgrid_worker_busy", "gauge", "1 if the worker is running a task.");
    for w in workers {
        let _ = writeln!(
            out,
            "taskgrid_worker_busy{{worker=\"{}\",status=\"{}\"}} {}",
            w.id,
            status_label(w.status),
            u8::from(w.status == WorkerStatus::Busy)
        );
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn metrics() -> ProcessorMetrics {
        ProcessorMetrics {
            total_tasks: 12,
            completed_tasks: 9,
            failed_tasks: 1,
            retried_attempts: 2,
            active_workers: 3,
            busy_workers: 1,
            queue_size: 2,
            avg_processing_ms: 12.5,
            p50_processing_ms: 10.0,
            p99_processing_ms: 48.25,
            throughput: 0.15,
            error_rate: 0.1,
            cpu_utilization: 0.3,
            memory_utilization: 0.55,
        }
    }

    fn worker(id: &str, status: WorkerStatus) -> WorkerStats {
        WorkerStats {
            id: id.to_string(),
            status,
            current_task: None,
            tasks_processed: 7,
            total_processing_time: Duration::from_millis(70),
            error_count: 1,
            last_activity: 0,
        }
    }

    #[test]
    fn render_without_workers() {
        let output = render_prometheus(&ProcessorMetrics::default(), &[]);
        assert!(output.contains("# HELP taskgrid_tasks_total"));
        assert!(output.contains("# TYPE taskgrid_tasks_total counter"));
        assert!(output.contains("# TYPE taskgrid_queue_size gauge"));
        assert!(output.contains("taskgrid_tasks_total 0\n"));
        assert!(output.contains("# TYPE taskgrid_worker_busy gauge"));
        assert!(!output.contains("worker=\""));
    }

    #[test]
    fn render_engine_values() {
        let output = render_prometheus(&metrics(), &[]);
        assert!(output.contains("taskgrid_tasks_completed_total 9\n"));
        assert!(output.contains("taskgrid_tasks_failed_total 1\n"));
        assert!(output.contains("taskgrid_retries_total 2\n"));
        assert!(output.contains("taskgrid_processing_ms{stat=\"p99\"} 48.25"));
        assert!(output.contains("taskgrid_error_rate 0.1000"));
        assert!(output.contains("taskgrid_memory_utilization 0.5500"));
    }

    #[test]
    fn render_worker_series() {
        let workers = vec![
            worker("worker-1", WorkerStatus::Busy),
            worker("worker-2", WorkerStatus::Idle),
        ];
        let output = render_prometheus(&metrics(), &workers);
        assert!(output.contains("taskgrid_worker_tasks_processed_total{worker=\"worker-1\"} 7"));
        assert!(output.contains("taskgrid_worker_errors_total{worker=\"worker-2\"} 1"));
        assert!(output.contains("taskgrid_worker_busy{worker=\"worker-1\",status=\"busy\"} 1"));
        assert!(output.contains("taskgrid_worker_busy{worker=\"worker-2\",status=\"idle\"} 0"));
    }
}
