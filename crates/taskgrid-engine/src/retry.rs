//! Retry/backoff policy.
//!
//! A failed attempt is requeued only when its error is retryable and the
//! task still has budget. The delay before attempt `n` is
//! `base * 2^(n-1)`, capped at `max_delay`.

use std::time::Duration;

use taskgrid_core::{ProcessingResult, Task, WorkerConfig};

/// What to do with a failed attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    /// Put `task` back in the queue after `delay`.
    Requeue { task: Task, delay: Duration },
    /// Record the task as permanently failed.
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    base: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(base: Duration, max_delay: Duration) -> Self {
        Self { base, max_delay }
    }

    pub fn from_config(config: &WorkerConfig) -> Self {
        Self::new(config.retry_base_delay, config.max_retry_delay)
    }

    /// Decide the fate of `task` given its failed `result`.
    pub fn decide(&self, task: &Task, result: &ProcessingResult) -> RetryDecision {
        let retryable = result.error.as_ref().is_some_and(|e| e.is_retryable());
        if !retryable || !task.has_retries_left() {
            return RetryDecision::Fail;
        }
        let next = task.next_attempt();
        let delay = self.delay_for(next.retry_count);
        RetryDecision::Requeue { task: next, delay }
    }

    /// Backoff before the attempt that carries `retry_count`.
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        2u32.checked_pow(retry_count)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use taskgrid_core::{TaskError, TaskSpec, TaskType};

    fn policy() -> RetryPolicy {
        RetryPolicy::new(Duration::from_secs(1), Duration::from_secs(300))
    }

    fn task(max_retries: u32) -> Task {
        Task::from_spec(
            TaskSpec::new(TaskType::AutoCorrection, json!({})),
            Duration::from_secs(5),
            max_retries,
        )
    }

    fn failed(task: &Task, error: TaskError) -> ProcessingResult {
        ProcessingResult::failed(task, "worker-1", error, Duration::from_millis(5))
    }

    #[test]
    fn delay_doubles_per_attempt() {
        let p = policy();
        // Attempt n runs with retry_count n-1; delay is base * 2^(n-1).
        for n in 2..=6u32 {
            let expected = Duration::from_secs(1) * 2u32.pow(n - 1);
            assert_eq!(p.delay_for(n - 1), expected, "attempt {n}");
        }
    }

    #[test]
    fn delay_is_capped() {
        let p = RetryPolicy::new(Duration::from_secs(1), Duration::from_secs(10));
        assert_eq!(p.delay_for(3), Duration::from_secs(8));
        assert_eq!(p.delay_for(4), Duration::from_secs(10));
        assert_eq!(p.delay_for(40), Duration::from_secs(10));
    }

    #[test]
    fn first_failure_waits_twice_base() {
        let t = task(3);
        let decision = policy().decide(&t, &failed(&t, TaskError::Execution("boom".into())));
        match decision {
            RetryDecision::Requeue { task, delay } => {
                assert_eq!(task.retry_count, 1);
                assert_eq!(task.id, t.id);
                assert_eq!(delay, Duration::from_secs(2));
            }
            RetryDecision::Fail => panic!("expected requeue"),
        }
    }

    #[test]
    fn timeout_is_retried() {
        let t = task(1);
        let err = TaskError::Timeout {
            timeout: Duration::from_millis(50),
        };
        assert!(matches!(
            policy().decide(&t, &failed(&t, err)),
            RetryDecision::Requeue { .. }
        ));
    }

    #[test]
    fn budget_exhausted_fails() {
        let mut t = task(2);
        t.retry_count = 2;
        let decision = policy().decide(&t, &failed(&t, TaskError::Execution("boom".into())));
        assert_eq!(decision, RetryDecision::Fail);
    }

    #[test]
    fn zero_budget_fails_immediately() {
        let t = task(0);
        let decision = policy().decide(&t, &failed(&t, TaskError::Execution("boom".into())));
        assert_eq!(decision, RetryDecision::Fail);
    }

    #[test]
    fn terminal_errors_are_not_retried() {
        let t = task(5);
        for err in [
            TaskError::UnsupportedType(TaskType::AutoCorrection),
            TaskError::MalformedPayload("bad".into()),
            TaskError::DependencyFailed("task-x".into()),
        ] {
            assert_eq!(policy().decide(&t, &failed(&t, err)), RetryDecision::Fail);
        }
    }
}
