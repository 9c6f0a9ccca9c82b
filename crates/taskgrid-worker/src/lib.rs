//! taskgrid-worker: logical execution slots and the pool that owns them.
//!
//! # Architecture
//!
//! ```text
//! WorkerPool
//!   ├── Vec<Worker> (live slots, creation order)
//!   │   └── status idle → busy → idle | error, lifetime counters
//!   └── bounds [min_workers, max_workers], idle_timeout
//!
//! HandlerRegistry (TaskType → Arc<dyn TaskHandler>)
//!   └── run_handler() → blocking pool, panics captured as TaskError
//! ```
//!
//! The pool never runs anything itself; the dispatcher marks a worker busy,
//! runs the attempt concurrently, and hands the result back to the pool.

pub mod handler;
pub mod pool;
pub mod worker;

pub use handler::{HandlerRegistry, TaskHandler};
pub use pool::WorkerPool;
pub use worker::{Worker, run_handler};
