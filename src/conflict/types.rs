//! Conflict records and resolution outcomes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of overlap between tasks touching the same file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictType {
    #[default]
    #[serde(rename = "NONE")]
    NoConflict,
    SameFile,
    SameFunction,
    Import,
    Semantic,
}

impl ConflictType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictType::NoConflict => "NONE",
            ConflictType::SameFile => "SAME_FILE",
            ConflictType::SameFunction => "SAME_FUNCTION",
            ConflictType::Import => "IMPORT",
            ConflictType::Semantic => "SEMANTIC",
        }
    }
}

impl fmt::Display for ConflictType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Overlap between two or more tasks in one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    pub file: String,
    /// Involved task IDs, in scheduler order
    pub tasks: Vec<String>,
    pub conflict_type: ConflictType,
    /// 1 (benign) to 3 (needs a human or AI)
    pub severity: u8,
    pub can_auto_resolve: bool,
    /// Functions modified by more than one task
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub functions: Vec<String>,
    pub description: String,
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{} sev {}] {}: {}",
            self.file,
            self.conflict_type,
            self.severity,
            self.tasks.join(", "),
            self.description
        )
    }
}

/// How a conflict is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolutionStrategy {
    /// Sequential `--no-ff` merges; undone entirely on a real conflict
    AutoMerge,
    /// On a conflicted merge, take the file from the first involved branch
    TakeFirst,
    /// On a conflicted merge, take the file from the last involved branch
    TakeLast,
    /// Merge the file with the AI merger and overlay the result
    AiAssisted,
    /// Leave it to the operator; nothing is merged
    Manual,
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResolutionStrategy::AutoMerge => "AUTO_MERGE",
            ResolutionStrategy::TakeFirst => "TAKE_FIRST",
            ResolutionStrategy::TakeLast => "TAKE_LAST",
            ResolutionStrategy::AiAssisted => "AI_ASSISTED",
            ResolutionStrategy::Manual => "MANUAL",
        };
        f.write_str(s)
    }
}

/// Outcome of resolving one conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub file: String,
    pub tasks: Vec<String>,
    /// Strategy that was finally applied (AI failures downgrade to MANUAL)
    pub strategy: ResolutionStrategy,
    pub success: bool,
    /// Branches merged into the base branch by this resolution
    pub merged_branches: Vec<String>,
    pub message: String,
}

/// Outcome of `resolve_all`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolutionReport {
    pub resolutions: Vec<Resolution>,
    /// Task IDs whose branches are now merged, in merge order
    pub merged_tasks: Vec<String>,
    /// Task IDs held back by a manual or failed resolution
    pub held_tasks: Vec<String>,
    /// Files left for the operator
    pub manual_files: Vec<String>,
    /// (file, error) for resolutions that failed
    pub failures: Vec<(String, String)>,
}

impl ResolutionReport {
    pub fn is_clean(&self) -> bool {
        self.held_tasks.is_empty() && self.failures.is_empty()
    }
}
