//! Task record and related types
//!
//! A Task is the unit of work handed to an agent. Tasks are never deleted;
//! every status change is recorded in the task's history for audit.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{HermesError, Result};

/// Status of a task's execution
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Waiting to be scheduled
    #[default]
    NotStarted,
    /// An agent is working on it
    InProgress,
    /// Work finished and merged
    Completed,
    /// Retries exhausted or workspace unusable; excluded from the run
    Blocked,
    /// Finished but its branch could not be merged cleanly
    AtRisk,
    /// Operator-paused; never scheduled
    Paused,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::NotStarted => "NOT_STARTED",
            TaskStatus::InProgress => "IN_PROGRESS",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Blocked => "BLOCKED",
            TaskStatus::AtRisk => "AT_RISK",
            TaskStatus::Paused => "PAUSED",
        }
    }

    /// Returns true if moving from `self` to `to` is permitted.
    pub fn can_transition_to(&self, to: TaskStatus) -> bool {
        use TaskStatus::{AtRisk, Blocked, Completed, InProgress, NotStarted, Paused};

        if *self == to {
            return true;
        }

        match self {
            NotStarted => matches!(to, InProgress | Paused | Blocked),
            InProgress => matches!(to, Completed | Blocked | AtRisk | NotStarted | Paused),
            Paused => matches!(to, NotStarted | InProgress),
            AtRisk => matches!(to, Completed | Blocked | InProgress),
            Blocked => matches!(to, NotStarted),
            Completed => matches!(to, AtRisk),
        }
    }

    /// Returns true if the scheduler may pick up a task in this status.
    pub fn is_schedulable(&self) -> bool {
        matches!(self, TaskStatus::NotStarted)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Task priority; P1 runs first
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    P1,
    #[default]
    P2,
    P3,
    P4,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Priority::P1 => "P1",
            Priority::P2 => "P2",
            Priority::P3 => "P3",
            Priority::P4 => "P4",
        };
        f.write_str(s)
    }
}

/// One entry of a task's status history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChange {
    pub from: TaskStatus,
    pub to: TaskStatus,
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

fn default_parallelizable() -> bool {
    true
}

/// A unit of work driven through an agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub name: String,

    /// Instructions handed to the agent
    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub status: TaskStatus,

    #[serde(default)]
    pub priority: Priority,

    /// Task IDs that must be COMPLETED before this one starts
    #[serde(default)]
    pub dependencies: BTreeSet<String>,

    /// Files no other task in the same batch may claim
    #[serde(default)]
    pub exclusive_files: Vec<String>,

    /// When false the task always runs alone in its batch
    #[serde(default = "default_parallelizable")]
    pub parallelizable: bool,

    /// Owning feature (filled in by the task store)
    #[serde(default)]
    pub feature_id: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<StatusChange>,
}

impl Task {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            status: TaskStatus::NotStarted,
            priority: Priority::default(),
            dependencies: BTreeSet::new(),
            exclusive_files: Vec::new(),
            parallelizable: true,
            feature_id: String::new(),
            history: Vec::new(),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(deps.into_iter().map(Into::into));
        self
    }

    pub fn with_exclusive_files<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclusive_files.extend(files.into_iter().map(Into::into));
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    /// Mark the task as one that must run alone.
    pub fn serial(mut self) -> Self {
        self.parallelizable = false;
        self
    }

    /// Move the task to `to`, recording the change.
    ///
    /// Self-transitions are accepted and leave no history entry.
    pub fn transition(&mut self, to: TaskStatus, reason: Option<&str>) -> Result<()> {
        let from = self.status;
        if from == to {
            return Ok(());
        }
        if !from.can_transition_to(to) {
            return Err(HermesError::InvalidTransition {
                task: self.id.clone(),
                from,
                to,
            });
        }

        self.status = to;
        self.history.push(StatusChange {
            from,
            to,
            at: Utc::now(),
            reason: reason.map(str::to_string),
        });
        log::debug!("Task {} {} -> {}", self.id, from, to);
        Ok(())
    }

    /// True if any exclusive file is also claimed by `other`.
    pub fn shares_exclusive_file(&self, other: &Task) -> bool {
        self.exclusive_files
            .iter()
            .any(|f| other.exclusive_files.iter().any(|g| g == f))
    }
}

/// Mutable view over a run's tasks that enforces the dependency invariant.
#[derive(Debug, Clone, Default)]
pub struct TaskSet {
    tasks: Vec<Task>,
}

impl TaskSet {
    pub fn new(tasks: Vec<Task>) -> Self {
        Self { tasks }
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn into_tasks(self) -> Vec<Task> {
        self.tasks
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    fn get_mut(&mut self, id: &str) -> Result<&mut Task> {
        self.tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| HermesError::TaskNotFound(id.to_string()))
    }

    /// Move a task to IN_PROGRESS; refused unless every dependency is COMPLETED.
    pub fn start(&mut self, id: &str) -> Result<()> {
        let task = self.get(id).ok_or_else(|| HermesError::TaskNotFound(id.to_string()))?;
        let unmet: Vec<&String> = task
            .dependencies
            .iter()
            .filter(|dep| self.get(dep).map(|d| d.status) != Some(TaskStatus::Completed))
            .collect();

        if !unmet.is_empty() {
            return Err(HermesError::InvalidTransition {
                task: id.to_string(),
                from: task.status,
                to: TaskStatus::InProgress,
            });
        }

        self.get_mut(id)?.transition(TaskStatus::InProgress, None)
    }

    pub fn transition(&mut self, id: &str, to: TaskStatus, reason: Option<&str>) -> Result<()> {
        self.get_mut(id)?.transition(to, reason)
    }

    pub fn status(&self, id: &str) -> Option<TaskStatus> {
        self.get(id).map(|t| t.status)
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|t| t.status == status).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&TaskStatus::NotStarted).unwrap();
        assert_eq!(json, "\"NOT_STARTED\"");
        let status: TaskStatus = serde_json::from_str("\"AT_RISK\"").unwrap();
        assert_eq!(status, TaskStatus::AtRisk);
    }

    #[test]
    fn test_priority_ordering() {
        let mut priorities = vec![Priority::P3, Priority::P1, Priority::P4, Priority::P2];
        priorities.sort();
        assert_eq!(priorities, vec![Priority::P1, Priority::P2, Priority::P3, Priority::P4]);
    }

    #[test]
    fn test_transition_records_history() {
        let mut task = Task::new("T1", "First");
        task.transition(TaskStatus::InProgress, Some("scheduled")).unwrap();
        task.transition(TaskStatus::Completed, None).unwrap();

        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.history.len(), 2);
        assert_eq!(task.history[0].from, TaskStatus::NotStarted);
        assert_eq!(task.history[0].reason.as_deref(), Some("scheduled"));
        assert_eq!(task.history[1].to, TaskStatus::Completed);
    }

    #[test]
    fn test_invalid_transition_rejected() {
        let mut task = Task::new("T1", "First");
        let err = task.transition(TaskStatus::Completed, None).unwrap_err();
        assert!(matches!(err, HermesError::InvalidTransition { .. }));
        assert_eq!(task.status, TaskStatus::NotStarted);
        assert!(task.history.is_empty());
    }

    #[test]
    fn test_self_transition_is_noop() {
        let mut task = Task::new("T1", "First");
        task.transition(TaskStatus::NotStarted, None).unwrap();
        assert!(task.history.is_empty());
    }

    #[test]
    fn test_blocked_only_returns_to_not_started() {
        assert!(TaskStatus::Blocked.can_transition_to(TaskStatus::NotStarted));
        assert!(!TaskStatus::Blocked.can_transition_to(TaskStatus::InProgress));
        assert!(!TaskStatus::Blocked.can_transition_to(TaskStatus::Completed));
    }

    #[test]
    fn test_start_requires_completed_dependencies() {
        let mut set = TaskSet::new(vec![
            Task::new("A", "a"),
            Task::new("B", "b").depends_on(["A"]),
        ]);

        assert!(set.start("B").is_err());
        assert_eq!(set.status("B"), Some(TaskStatus::NotStarted));

        set.start("A").unwrap();
        set.transition("A", TaskStatus::Completed, None).unwrap();
        set.start("B").unwrap();
        assert_eq!(set.status("B"), Some(TaskStatus::InProgress));
    }

    #[test]
    fn test_start_unknown_task() {
        let mut set = TaskSet::new(vec![]);
        assert!(matches!(set.start("X"), Err(HermesError::TaskNotFound(_))));
    }

    #[test]
    fn test_shares_exclusive_file() {
        let a = Task::new("A", "a").with_exclusive_files(["src/lib.rs"]);
        let b = Task::new("B", "b").with_exclusive_files(["src/main.rs", "src/lib.rs"]);
        let c = Task::new("C", "c").with_exclusive_files(["README.md"]);
        assert!(a.shares_exclusive_file(&b));
        assert!(!a.shares_exclusive_file(&c));
    }

    #[test]
    fn test_yaml_defaults() {
        let task: Task = serde_yaml::from_str("id: T9\nname: Docs\n").unwrap();
        assert_eq!(task.status, TaskStatus::NotStarted);
        assert_eq!(task.priority, Priority::P2);
        assert!(task.parallelizable);
        assert!(task.dependencies.is_empty());
    }
}
