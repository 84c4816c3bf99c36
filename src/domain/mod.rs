//! Domain types for Hermes
//!
//! - Task: the unit of work, with a closed status/priority vocabulary and
//!   validated transitions
//! - TaskSet: a run's tasks, enforcing "dependencies COMPLETED before start"
//! - Feature: a group of tasks with derived status

pub mod feature;
pub mod task;

pub use feature::Feature;
pub use task::{Priority, StatusChange, Task, TaskSet, TaskStatus};
