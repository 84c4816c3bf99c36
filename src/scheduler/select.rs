//! Scheduler for selecting which tasks run next.
//!
//! The Scheduler is a pure function of task statuses. It decides:
//! - Which tasks are ready (dependencies COMPLETED)
//! - In what order (priority, then declaration order)
//! - How many run together (worker cap, exclusive files, non-parallelizable tasks)
//!
//! Callers must re-query after every status change.

use std::collections::{HashMap, HashSet};

use crate::domain::{Task, TaskStatus};
use crate::scheduler::graph::{GraphError, TaskGraph};
use crate::scheduler::priority::{ready_by_priority, status_index};

/// Default worker cap.
pub const DEFAULT_MAX_WORKERS: usize = 3;

/// A set of tasks that may run concurrently.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub tasks: Vec<Task>,
}

impl Batch {
    pub fn ids(&self) -> Vec<&str> {
        self.tasks.iter().map(|t| t.id.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Scheduler for selecting runnable tasks.
#[derive(Debug, Clone)]
pub struct Scheduler {
    max_workers: usize,
}

impl Scheduler {
    /// Create a new Scheduler with the default worker cap.
    pub fn new() -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
        }
    }

    /// Set the worker cap (minimum 1).
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Next batch of ready tasks, or `None` when nothing can start.
    pub fn next_batch(&self, tasks: &[Task]) -> Result<Option<Batch>, GraphError> {
        TaskGraph::build(tasks)?;

        let statuses = status_index(tasks);
        let ready = ready_by_priority(tasks, &statuses);
        let batch = self.fill(ready);

        if batch.is_empty() {
            return Ok(None);
        }

        tracing::debug!(tasks = ?batch.ids(), "Selected batch");
        Ok(Some(batch))
    }

    /// Single highest-priority ready task, for serial execution.
    pub fn next_task(&self, tasks: &[Task]) -> Result<Option<Task>, GraphError> {
        TaskGraph::build(tasks)?;

        let statuses = status_index(tasks);
        Ok(ready_by_priority(tasks, &statuses).first().map(|t| (*t).clone()))
    }

    /// Project the full sequence of batches from the current statuses.
    ///
    /// IN_PROGRESS tasks are assumed to finish. Tasks behind a BLOCKED,
    /// PAUSED or AT_RISK dependency are left out (see `stranded`).
    pub fn plan(&self, tasks: &[Task]) -> Result<Vec<Batch>, GraphError> {
        TaskGraph::build(tasks)?;

        let mut simulated: Vec<Task> = tasks
            .iter()
            .map(|t| {
                let mut t = t.clone();
                if t.status == TaskStatus::InProgress {
                    t.status = TaskStatus::Completed;
                }
                t
            })
            .collect();

        let mut batches = Vec::new();
        loop {
            let statuses = status_index(&simulated);
            let batch = self.fill(ready_by_priority(&simulated, &statuses));
            if batch.is_empty() {
                break;
            }

            let ids: HashSet<&str> = batch.ids().into_iter().collect();
            for t in simulated.iter_mut().filter(|t| ids.contains(t.id.as_str())) {
                t.status = TaskStatus::Completed;
            }
            batches.push(batch);
        }

        Ok(batches)
    }

    /// NOT_STARTED tasks that can never become ready in this run because a
    /// transitive dependency is BLOCKED, PAUSED or AT_RISK.
    pub fn stranded(&self, tasks: &[Task]) -> Result<Vec<String>, GraphError> {
        TaskGraph::build(tasks)?;

        let by_id: HashMap<&str, &Task> = tasks.iter().map(|t| (t.id.as_str(), t)).collect();
        let mut memo: HashMap<&str, bool> = HashMap::new();

        fn can_finish<'a>(id: &'a str, by_id: &HashMap<&'a str, &'a Task>, memo: &mut HashMap<&'a str, bool>) -> bool {
            if let Some(&v) = memo.get(id) {
                return v;
            }
            let task = by_id[id];
            let v = match task.status {
                TaskStatus::Completed | TaskStatus::InProgress => true,
                TaskStatus::NotStarted => task
                    .dependencies
                    .iter()
                    .all(|d| can_finish(d.as_str(), by_id, memo)),
                TaskStatus::Blocked | TaskStatus::Paused | TaskStatus::AtRisk => false,
            };
            memo.insert(id, v);
            v
        }

        Ok(tasks
            .iter()
            .filter(|t| t.status == TaskStatus::NotStarted)
            .filter(|t| !can_finish(t.id.as_str(), &by_id, &mut memo))
            .map(|t| t.id.clone())
            .collect())
    }

    /// Take ready tasks in priority order until the batch is full.
    ///
    /// A non-parallelizable task runs alone. A task sharing an exclusive
    /// file with one already in the batch is deferred.
    fn fill(&self, ready: Vec<&Task>) -> Batch {
        let mut selected: Vec<&Task> = Vec::new();

        for task in ready {
            if selected.len() >= self.max_workers {
                break;
            }
            if !task.parallelizable {
                if selected.is_empty() {
                    selected.push(task);
                    break;
                }
                continue;
            }
            if selected.iter().any(|s| s.shares_exclusive_file(task)) {
                continue;
            }
            selected.push(task);
        }

        Batch {
            tasks: selected.into_iter().cloned().collect(),
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
