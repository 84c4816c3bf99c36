//! Error types for Hermes
//!
//! Centralized error handling using thiserror. Module-level error enums
//! (`GraphError`, `ProviderError`, `AiMergeError`) convert into `HermesError`.

use thiserror::Error;

use crate::conflict::AiMergeError;
use crate::domain::TaskStatus;
use crate::scheduler::GraphError;
use crate::provider::ProviderError;

/// All error types that can occur in Hermes
#[derive(Debug, Error)]
pub enum HermesError {
    /// Cyclic or unresolvable task dependencies
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    /// Git branch or worktree operation failed
    #[error("Workspace error: {0}")]
    Workspace(String),

    /// Git reported a real conflict while merging a branch
    #[error("Merge conflict merging {branch}: {}", files.join(", "))]
    MergeConflict { branch: String, files: Vec<String> },

    /// Agent invocation failed or timed out
    #[error("Invocation error: {0}")]
    Invocation(#[from] ProviderError),

    /// AI-assisted merge produced an unusable result
    #[error("AI merge error: {0}")]
    AiMerge(#[from] AiMergeError),

    /// Circuit breaker is open; no further loops may run
    #[error("Circuit open at loop {loop_number}: {reason}")]
    CircuitOpen { reason: String, loop_number: u64 },

    /// Task status transition not permitted
    #[error("Invalid transition for task {task}: {from} -> {to}")]
    InvalidTransition {
        task: String,
        from: TaskStatus,
        to: TaskStatus,
    },

    /// Task not found in the task set
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    /// Storage/persistence error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Prompt template rendering failed
    #[error("Template error: {0}")]
    Template(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl HermesError {
    /// Errors that only affect the task that raised them.
    pub fn is_task_local(&self) -> bool {
        matches!(
            self,
            HermesError::Workspace(_) | HermesError::Invocation(_) | HermesError::MergeConflict { .. }
        )
    }
}

/// Result type alias for Hermes operations
pub type Result<T> = std::result::Result<T, HermesError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workspace_error() {
        let err = HermesError::Workspace("worktree add failed".to_string());
        assert_eq!(err.to_string(), "Workspace error: worktree add failed");
        assert!(err.is_task_local());
    }

    #[test]
    fn test_merge_conflict_error() {
        let err = HermesError::MergeConflict {
            branch: "hermes/T1".to_string(),
            files: vec!["a.rs".to_string(), "b.rs".to_string()],
        };
        assert_eq!(err.to_string(), "Merge conflict merging hermes/T1: a.rs, b.rs");
    }

    #[test]
    fn test_circuit_open_error() {
        let err = HermesError::CircuitOpen {
            reason: "no progress in 3 loops".to_string(),
            loop_number: 7,
        };
        assert_eq!(err.to_string(), "Circuit open at loop 7: no progress in 3 loops");
        assert!(!err.is_task_local());
    }

    #[test]
    fn test_graph_error_conversion() {
        let err: HermesError = GraphError::Cycle {
            stuck: vec!["A".to_string(), "B".to_string()],
        }
        .into();
        assert!(matches!(err, HermesError::Graph(_)));
        assert!(err.to_string().contains("A, B"));
    }

    #[test]
    fn test_invalid_transition_error() {
        let err = HermesError::InvalidTransition {
            task: "T1".to_string(),
            from: TaskStatus::Blocked,
            to: TaskStatus::Completed,
        };
        assert_eq!(err.to_string(), "Invalid transition for task T1: BLOCKED -> COMPLETED");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: HermesError = io_err.into();
        assert!(matches!(err, HermesError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid").unwrap_err();
        let err: HermesError = json_err.into();
        assert!(matches!(err, HermesError::Json(_)));
    }
}
