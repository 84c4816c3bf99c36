//! Conflict detection and resolution for task branches.
//!
//! After a batch, each task's branch diff goes into the `ConflictDetector`;
//! the `Resolver` then merges what it can and holds back the rest.

mod ai_merge;
mod detector;
pub mod diff;
mod resolver;
mod semantic;
mod types;

pub use ai_merge::{AiMergeError, AiMerger, ChangeSet, DEFAULT_CONFIDENCE, MERGED_CODE_END, MERGED_CODE_START, MergedCode};
pub use detector::{ConflictDetector, TaskChanges};
pub use resolver::{BranchMergeResult, Resolver};
pub use semantic::{SemanticChecker, SemanticConflictWarning, WarningSeverity};
pub use types::{Conflict, ConflictType, Resolution, ResolutionReport, ResolutionStrategy};
