//! taskgrid-queue: the holding area for pending work.
//!
//! Tasks are kept ordered by priority (`critical > high > normal > low`);
//! equal priorities leave in submission order. The queue can be bounded,
//! in which case `enqueue` rejects with [`QueueError::Full`] instead of
//! growing without limit.

pub mod queue;

pub use queue::{QueueError, QueueResult, TaskQueue};
