//! Task ledger: lifecycle state and latest result for every submitted task.

use std::collections::HashMap;

use taskgrid_core::{ProcessingResult, Task, TaskId, TaskState};

#[derive(Debug, Clone)]
struct Entry {
    state: TaskState,
    /// Result of the most recent attempt.
    last_result: Option<ProcessingResult>,
}

/// State of every task the engine has accepted.
///
/// Entries are kept for the lifetime of the engine, finished ones included:
/// dependency checks and result lookups rely on them. Memory grows with the
/// number of submissions.
#[derive(Debug, Default)]
pub struct TaskStore {
    entries: HashMap<TaskId, Entry>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_queued(&mut self, id: TaskId) {
        self.entries.insert(
            id,
            Entry {
                state: TaskState::Queued,
                last_result: None,
            },
        );
    }

    pub fn set_state(&mut self, id: &str, state: TaskState) {
        if let Some(entry) = self.entries.get_mut(id) {
            entry.state = state;
        }
    }

    /// Record a failed attempt that will be retried.
    pub fn record_retrying(&mut self, result: ProcessingResult) {
        self.record(TaskState::Retrying, result);
    }

    /// Record the terminal result for a task.
    pub fn record_terminal(&mut self, result: ProcessingResult) {
        let state = if result.success {
            TaskState::Completed
        } else {
            TaskState::Failed
        };
        self.record(state, result);
    }

    fn record(&mut self, state: TaskState, result: ProcessingResult) {
        let entry = self.entries.entry(result.task_id.clone()).or_insert(Entry {
            state,
            last_result: None,
        });
        entry.state = state;
        entry.last_result = Some(result);
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn state(&self, id: &str) -> Option<TaskState> {
        self.entries.get(id).map(|e| e.state)
    }

    /// The final result, once the task is completed or failed.
    pub fn terminal_result(&self, id: &str) -> Option<&ProcessingResult> {
        self.entries
            .get(id)
            .filter(|e| e.state.is_terminal())
            .and_then(|e| e.last_result.as_ref())
    }

    /// Every dependency of `task` has completed successfully.
    pub fn dependencies_met(&self, task: &Task) -> bool {
        task.dependencies
            .iter()
            .all(|dep| self.state(dep) == Some(TaskState::Completed))
    }

    /// The first dependency of `task` that failed permanently.
    pub fn failed_dependency<'a>(&self, task: &'a Task) -> Option<&'a TaskId> {
        task.dependencies
            .iter()
            .find(|dep| self.state(dep) == Some(TaskState::Failed))
    }

    /// Number of tasks in each state.
    pub fn counts(&self) -> HashMap<TaskState, usize> {
        let mut counts = HashMap::new();
        for entry in self.entries.values() {
            *counts.entry(entry.state).or_insert(0) += 1;
        }
        counts
    }
}
