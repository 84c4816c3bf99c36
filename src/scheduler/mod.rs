//! Scheduler module for dependency-ordered task execution.
//!
//! This module provides:
//! - **TaskGraph**: validates dependencies (unknown IDs, duplicates, cycles)
//!   and computes topological layers.
//! - **Priority rules**: readiness and P1-first ordering.
//! - **Scheduler**: concurrency-bounded batches (`next_batch`), serial
//!   selection (`next_task`), full projection (`plan`) and `stranded` tasks.
//!
//! # Example
//!
//! ```ignore
//! use hermes::scheduler::Scheduler;
//!
//! let scheduler = Scheduler::new().with_max_workers(4);
//! while let Some(batch) = scheduler.next_batch(&tasks)? {
//!     // run batch, update statuses, query again
//! }
//! ```

mod graph;
mod priority;
mod select;

pub use graph::{GraphError, TaskGraph};
pub use priority::{is_ready, ready_by_priority, status_index};
pub use select::{Batch, DEFAULT_MAX_WORKERS, Scheduler};
