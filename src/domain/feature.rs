//! Feature: a named group of tasks whose status is derived from its tasks.

use serde::{Deserialize, Serialize};

use super::task::{Task, TaskStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

impl Feature {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            tasks: Vec::new(),
        }
    }

    /// Add a task, stamping it with this feature's ID.
    pub fn with_task(mut self, mut task: Task) -> Self {
        task.feature_id = self.id.clone();
        self.tasks.push(task);
        self
    }

    /// Aggregate status of the feature's tasks.
    pub fn status(&self) -> TaskStatus {
        let all = |s: TaskStatus| self.tasks.iter().all(|t| t.status == s);
        let any = |s: TaskStatus| self.tasks.iter().any(|t| t.status == s);

        if self.tasks.is_empty() {
            TaskStatus::NotStarted
        } else if all(TaskStatus::Completed) {
            TaskStatus::Completed
        } else if any(TaskStatus::Blocked) {
            TaskStatus::Blocked
        } else if any(TaskStatus::AtRisk) {
            TaskStatus::AtRisk
        } else if any(TaskStatus::InProgress) || any(TaskStatus::Completed) {
            TaskStatus::InProgress
        } else if all(TaskStatus::Paused) {
            TaskStatus::Paused
        } else {
            TaskStatus::NotStarted
        }
    }

    /// Fraction of tasks completed, in [0, 1].
    pub fn progress(&self) -> f64 {
        if self.tasks.is_empty() {
            return 0.0;
        }
        let done = self.tasks.iter().filter(|t| t.status == TaskStatus::Completed).count();
        done as f64 / self.tasks.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feature_with(statuses: &[TaskStatus]) -> Feature {
        statuses.iter().enumerate().fold(Feature::new("F1", "Auth"), |f, (i, s)| {
            f.with_task(Task::new(format!("T{}", i), "t").with_status(*s))
        })
    }

    #[test]
    fn test_empty_feature_not_started() {
        assert_eq!(Feature::new("F", "f").status(), TaskStatus::NotStarted);
    }

    #[test]
    fn test_all_completed() {
        let f = feature_with(&[TaskStatus::Completed, TaskStatus::Completed]);
        assert_eq!(f.status(), TaskStatus::Completed);
        assert_eq!(f.progress(), 1.0);
    }

    #[test]
    fn test_partial_completion_is_in_progress() {
        let f = feature_with(&[TaskStatus::Completed, TaskStatus::NotStarted]);
        assert_eq!(f.status(), TaskStatus::InProgress);
        assert_eq!(f.progress(), 0.5);
    }

    #[test]
    fn test_blocked_dominates() {
        let f = feature_with(&[TaskStatus::Completed, TaskStatus::AtRisk, TaskStatus::Blocked]);
        assert_eq!(f.status(), TaskStatus::Blocked);
    }

    #[test]
    fn test_all_paused() {
        let f = feature_with(&[TaskStatus::Paused, TaskStatus::Paused]);
        assert_eq!(f.status(), TaskStatus::Paused);
    }

    #[test]
    fn test_with_task_sets_feature_id() {
        let f = Feature::new("F7", "Billing").with_task(Task::new("T1", "x"));
        assert_eq!(f.tasks[0].feature_id, "F7");
    }
}
