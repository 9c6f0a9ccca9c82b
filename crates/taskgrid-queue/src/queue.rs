//! Priority queue with FIFO ordering inside each priority band.
//!
//! Insertion places a task before the first queued task of strictly lower
//! priority, so the deque stays sorted by priority without reordering
//! anything already present.

use std::collections::VecDeque;

use thiserror::Error;
use tracing::debug;

use taskgrid_core::{Task, TaskId};

/// Result type alias for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// Errors returned by [`TaskQueue`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("task queue is full (capacity {capacity})")]
    Full { capacity: usize },
}

/// Ordered backlog of pending tasks.
#[derive(Debug, Default)]
pub struct TaskQueue {
    tasks: VecDeque<Task>,
    capacity: Option<usize>,
}

impl TaskQueue {
    /// An unbounded queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// A queue that rejects new submissions once `capacity` tasks are waiting.
    pub fn bounded(capacity: usize) -> Self {
        Self {
            tasks: VecDeque::new(),
            capacity: Some(capacity),
        }
    }

    /// Change the bound. Tasks already queued beyond a lowered bound stay.
    pub fn set_capacity(&mut self, capacity: Option<usize>) {
        self.capacity = capacity;
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Insert a new task, honoring the capacity bound.
    pub fn enqueue(&mut self, task: Task) -> QueueResult<()> {
        self.check_room(1)?;
        self.insert(task);
        Ok(())
    }

    /// Insert several tasks; either all are accepted or none are.
    pub fn enqueue_all(&mut self, tasks: Vec<Task>) -> QueueResult<()> {
        self.check_room(tasks.len())?;
        for task in tasks {
            self.insert(task);
        }
        Ok(())
    }

    /// Put back a task that was already accepted (a retry attempt).
    ///
    /// Not subject to the capacity bound: rejecting here would drop work
    /// the caller was told had been accepted.
    pub fn requeue(&mut self, task: Task) {
        self.insert(task);
    }

    /// Remove and return up to `n` tasks from the front.
    pub fn dequeue_up_to(&mut self, n: usize) -> Vec<Task> {
        let take = n.min(self.tasks.len());
        self.tasks.drain(..take).collect()
    }

    /// Remove and return up to `n` tasks for which `ready` holds, scanning
    /// in queue order. Tasks that are not ready keep their position.
    pub fn dequeue_ready<F>(&mut self, n: usize, mut ready: F) -> Vec<Task>
    where
        F: FnMut(&Task) -> bool,
    {
        let mut taken = Vec::new();
        let mut i = 0;
        while taken.len() < n && i < self.tasks.len() {
            if ready(&self.tasks[i]) {
                if let Some(task) = self.tasks.remove(i) {
                    taken.push(task);
                }
            } else {
                i += 1;
            }
        }
        taken
    }

    /// Remove and return every task matching `pred`, preserving order.
    pub fn remove_where<F>(&mut self, mut pred: F) -> Vec<Task>
    where
        F: FnMut(&Task) -> bool,
    {
        let mut removed = Vec::new();
        let mut kept = VecDeque::with_capacity(self.tasks.len());
        for task in self.tasks.drain(..) {
            if pred(&task) {
                removed.push(task);
            } else {
                kept.push_back(task);
            }
        }
        self.tasks = kept;
        removed
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.tasks.iter().any(|t| &t.id == id)
    }

    pub fn size(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Queued tasks in dequeue order.
    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter()
    }

    fn check_room(&self, incoming: usize) -> QueueResult<()> {
        match self.capacity {
            Some(capacity) if self.tasks.len() + incoming > capacity => {
                debug!(capacity, queued = self.tasks.len(), incoming, "task queue full");
                Err(QueueError::Full { capacity })
            }
            _ => Ok(()),
        }
    }

    fn insert(&mut self, task: Task) {
        let pos = self
            .tasks
            .iter()
            .position(|queued| queued.priority < task.priority)
            .unwrap_or(self.tasks.len());
        self.tasks.insert(pos, task);
    }
}
