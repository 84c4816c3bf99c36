//! Conflict detector: classifies overlap between per-task diffs.
//!
//! Tasks are added in scheduler order. For every file touched by two or
//! more tasks each pair is classified, and the file reports its most severe
//! pair:
//!
//! | pair overlap                          | type          | sev | auto |
//! |---------------------------------------|---------------|-----|------|
//! | same function modified                | SAME_FUNCTION | 3   | no   |
//! | import-only, touching ranges          | IMPORT        | 2   | no   |
//! | import-only, disjoint ranges          | IMPORT        | 1   | yes  |
//! | touching line ranges                  | SAME_FILE     | 2   | no   |
//! | disjoint line ranges                  | SAME_FILE     | 1   | yes  |

use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::conflict::diff::{self, FileDiff, ranges_touch};
use crate::conflict::types::{Conflict, ConflictType};

static FUNCTION_DECL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:fn|def|function)\s+([A-Za-z_$][\w$]*)|\bfunc\s+(?:\([^)]*\)\s*)?([A-Za-z_]\w*)").unwrap()
});

static IMPORT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:use\s+\S|import\s|import\(|from\s+\S+\s+import\s|#include\s|extern\s+crate\s|(?:const|let|var)\s+.+=\s*require\()"#,
    )
    .unwrap()
});

/// A task's changes: touched files plus a `-U0` unified diff.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskChanges {
    pub files: Vec<String>,
    pub diff: String,
}

impl TaskChanges {
    pub fn new(files: Vec<String>, diff: impl Into<String>) -> Self {
        Self {
            files,
            diff: diff.into(),
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    task_id: String,
    changes: TaskChanges,
    parsed: BTreeMap<String, FileDiff>,
}

#[derive(Debug, Clone, PartialEq)]
struct PairClass {
    conflict_type: ConflictType,
    severity: u8,
    can_auto_resolve: bool,
    functions: Vec<String>,
}

impl PairClass {
    fn rank(&self) -> (u8, u8) {
        let type_rank = match self.conflict_type {
            ConflictType::SameFunction => 3,
            ConflictType::SameFile => 2,
            ConflictType::Import => 1,
            ConflictType::Semantic | ConflictType::NoConflict => 0,
        };
        (self.severity, type_rank)
    }
}

/// Accumulates per-task changes for one batch and classifies overlaps.
#[derive(Debug, Clone, Default)]
pub struct ConflictDetector {
    entries: Vec<Entry>,
}

impl ConflictDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task's changes. Re-adding a task replaces its entry.
    pub fn add(&mut self, task_id: impl Into<String>, changes: TaskChanges) {
        let task_id = task_id.into();
        let parsed = diff::parse(&changes.diff);
        let entry = Entry {
            task_id: task_id.clone(),
            changes,
            parsed,
        };
        match self.entries.iter_mut().find(|e| e.task_id == task_id) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Changes registered for a task.
    pub fn changes(&self, task_id: &str) -> Option<&TaskChanges> {
        self.entries.iter().find(|e| e.task_id == task_id).map(|e| &e.changes)
    }

    /// Conflicts for every file touched by two or more tasks, sorted by path.
    pub fn analyze(&self) -> Vec<Conflict> {
        let mut touched: BTreeMap<&str, Vec<&Entry>> = BTreeMap::new();
        for entry in &self.entries {
            let files: BTreeSet<&str> = entry
                .changes
                .files
                .iter()
                .map(String::as_str)
                .chain(entry.parsed.keys().map(String::as_str))
                .collect();
            for file in files {
                touched.entry(file).or_default().push(entry);
            }
        }

        let conflicts: Vec<Conflict> = touched
            .into_iter()
            .filter(|(_, entries)| entries.len() >= 2)
            .map(|(file, entries)| classify_file(file, &entries))
            .collect();

        log::debug!("Detected {} conflict(s) across {} task(s)", conflicts.len(), self.entries.len());
        conflicts
    }
}

fn classify_file(file: &str, entries: &[&Entry]) -> Conflict {
    let mut worst: Option<PairClass> = None;
    let mut functions: BTreeSet<String> = BTreeSet::new();

    for (i, a) in entries.iter().enumerate() {
        for b in &entries[i + 1..] {
            let pair = classify_pair(a.parsed.get(file), b.parsed.get(file));
            functions.extend(pair.functions.iter().cloned());
            if worst.as_ref().is_none_or(|w| pair.rank() > w.rank()) {
                worst = Some(pair);
            }
        }
    }

    let worst = worst.unwrap_or(PairClass {
        conflict_type: ConflictType::SameFile,
        severity: 1,
        can_auto_resolve: true,
        functions: Vec::new(),
    });
    let tasks: Vec<String> = entries.iter().map(|e| e.task_id.clone()).collect();
    let functions: Vec<String> = functions.into_iter().collect();

    let description = match worst.conflict_type {
        ConflictType::SameFunction => format!("Function(s) {} modified by multiple tasks", functions.join(", ")),
        ConflictType::Import if worst.can_auto_resolve => "Import-only changes in separate places".to_string(),
        ConflictType::Import => "Import-only changes to the same lines".to_string(),
        _ if worst.can_auto_resolve => "Changes to separate regions of the file".to_string(),
        _ => "Overlapping line ranges modified".to_string(),
    };

    Conflict {
        file: file.to_string(),
        tasks,
        conflict_type: worst.conflict_type,
        severity: worst.severity,
        can_auto_resolve: worst.can_auto_resolve,
        functions,
        description,
    }
}

/// Classify one pair of diffs of the same file. A missing diff (binary or
/// listed without hunks) is treated as a whole-file change.
fn classify_pair(a: Option<&FileDiff>, b: Option<&FileDiff>) -> PairClass {
    let (Some(a), Some(b)) = (a, b) else {
        return PairClass {
            conflict_type: ConflictType::SameFile,
            severity: 2,
            can_auto_resolve: false,
            functions: Vec::new(),
        };
    };

    let shared: Vec<String> = functions_in(a).intersection(&functions_in(b)).cloned().collect();
    if !shared.is_empty() {
        return PairClass {
            conflict_type: ConflictType::SameFunction,
            severity: 3,
            can_auto_resolve: false,
            functions: shared,
        };
    }

    let overlap = a.hunks.is_empty()
        || b.hunks.is_empty()
        || a
            .hunks
            .iter()
            .any(|x| b.hunks.iter().any(|y| ranges_touch(x.old_range(), y.old_range())));

    let conflict_type = if is_import_only(a) && is_import_only(b) {
        ConflictType::Import
    } else {
        ConflictType::SameFile
    };

    PairClass {
        conflict_type,
        severity: if overlap { 2 } else { 1 },
        can_auto_resolve: !overlap,
        functions: Vec::new(),
    }
}

/// Function names declared on changed lines or named by hunk context.
fn functions_in(file: &FileDiff) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    for hunk in &file.hunks {
        for text in hunk.changed_lines().chain(std::iter::once(hunk.context.as_str())) {
            for caps in FUNCTION_DECL.captures_iter(text) {
                if let Some(name) = caps.get(1).or_else(|| caps.get(2)) {
                    names.insert(name.as_str().to_string());
                }
            }
        }
    }
    names
}

fn is_import_only(file: &FileDiff) -> bool {
    let mut lines = file.changed_lines().filter(|l| !l.trim().is_empty()).peekable();
    lines.peek().is_some() && lines.all(|l| IMPORT_LINE.is_match(l))
}
