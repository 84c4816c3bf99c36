//! Readiness and ordering rules for scheduling.
//!
//! Ready tasks are ordered by:
//! - Priority (P1 before P4)
//! - Declaration order in the task file, as a stable tie-break

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::domain::{Task, TaskStatus};

/// Status lookup by task ID.
pub type StatusIndex<'a> = HashMap<&'a str, TaskStatus>;

pub fn status_index(tasks: &[Task]) -> StatusIndex<'_> {
    tasks.iter().map(|t| (t.id.as_str(), t.status)).collect()
}

/// Check if a task can start now.
///
/// A task is ready if:
/// 1. Status is `NOT_STARTED`
/// 2. Every dependency has status `COMPLETED`
pub fn is_ready(task: &Task, statuses: &StatusIndex<'_>) -> bool {
    task.status.is_schedulable()
        && task
            .dependencies
            .iter()
            .all(|d| statuses.get(d.as_str()) == Some(&TaskStatus::Completed))
}

/// Order two `(declaration index, task)` pairs, highest priority first.
pub fn compare(a: &(usize, &Task), b: &(usize, &Task)) -> Ordering {
    a.1.priority.cmp(&b.1.priority).then(a.0.cmp(&b.0))
}

/// Ready tasks sorted highest priority first.
pub fn ready_by_priority<'a>(tasks: &'a [Task], statuses: &StatusIndex<'_>) -> Vec<&'a Task> {
    let mut ready: Vec<(usize, &Task)> = tasks
        .iter()
        .enumerate()
        .filter(|(_, t)| is_ready(t, statuses))
        .collect();
    ready.sort_by(compare);
    ready.into_iter().map(|(_, t)| t).collect()
}
