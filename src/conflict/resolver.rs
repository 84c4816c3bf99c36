//! Resolver - applies a strategy to each detected conflict and merges task
//! branches back into the base branch.
//!
//! Every strategy that touches git records the base HEAD first; a sequence
//! that ends in a real conflict is aborted and hard-reset to that HEAD, so
//! the base branch never holds a half-merged state.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use crate::conflict::ai_merge::{AiMerger, ChangeSet};
use crate::conflict::detector::TaskChanges;
use crate::conflict::diff;
use crate::conflict::types::{Conflict, ConflictType, Resolution, ResolutionReport, ResolutionStrategy};
use crate::error::{HermesError, Result};
use crate::worktree::{BRANCH_PREFIX, MergeOutcome, VersionControl, WorkspaceManager};

/// Result of merging one branch in `merge_branches_sequentially`.
#[derive(Debug)]
pub struct BranchMergeResult {
    pub branch: String,
    pub result: Result<MergeOutcome>,
}

impl BranchMergeResult {
    pub fn is_merged(&self) -> bool {
        self.result.is_ok()
    }
}

/// Outcome of one merge sequence.
enum Sequence {
    /// All branches merged
    Merged(Vec<String>),
    /// Sequence undone; (branch, conflicted files)
    Undone(String, Vec<String>),
}

#[derive(Debug, Clone)]
pub struct Resolver {
    vcs: Arc<dyn VersionControl>,
    repo_root: PathBuf,
    base_branch: String,
    ai_merger: Option<AiMerger>,
    intents: HashMap<String, String>,
    changes: HashMap<String, TaskChanges>,
}

impl Resolver {
    pub fn new(manager: &WorkspaceManager) -> Self {
        Self {
            vcs: manager.vcs().clone(),
            repo_root: manager.repo_root().to_path_buf(),
            base_branch: manager.base_branch().to_string(),
            ai_merger: None,
            intents: HashMap::new(),
            changes: HashMap::new(),
        }
    }

    pub fn with_ai_merger(mut self, merger: AiMerger) -> Self {
        self.ai_merger = Some(merger);
        self
    }

    /// Natural-language intent per task ID, used in AI merge prompts
    pub fn with_intents(mut self, intents: HashMap<String, String>) -> Self {
        self.intents = intents;
        self
    }

    /// Branch diffs per task ID, used in AI merge prompts
    pub fn with_task_changes(mut self, changes: HashMap<String, TaskChanges>) -> Self {
        self.changes = changes;
        self
    }

    pub fn has_ai_merger(&self) -> bool {
        self.ai_merger.is_some()
    }

    pub fn branch_for(task_id: &str) -> String {
        format!("{}{}", BRANCH_PREFIX, task_id)
    }

    fn task_for(branch: &str) -> String {
        branch.strip_prefix(BRANCH_PREFIX).unwrap_or(branch).to_string()
    }

    pub fn strategy_for(&self, conflict: &Conflict) -> ResolutionStrategy {
        if conflict.can_auto_resolve {
            return ResolutionStrategy::AutoMerge;
        }
        if conflict.conflict_type == ConflictType::SameFunction || conflict.severity >= 3 {
            if self.ai_merger.is_some() {
                return ResolutionStrategy::AiAssisted;
            }
            return ResolutionStrategy::Manual;
        }
        ResolutionStrategy::Manual
    }

    pub async fn resolve(&self, conflict: &Conflict) -> Result<Resolution> {
        self.resolve_with(conflict, self.strategy_for(conflict)).await
    }

    /// Apply `strategy` regardless of what `strategy_for` would choose.
    pub async fn resolve_with(&self, conflict: &Conflict, strategy: ResolutionStrategy) -> Result<Resolution> {
        log::info!("Resolving {} with {}", conflict, strategy);
        match strategy {
            ResolutionStrategy::AutoMerge => self.auto_merge(conflict),
            ResolutionStrategy::TakeFirst | ResolutionStrategy::TakeLast => self.take_side(conflict, strategy),
            ResolutionStrategy::AiAssisted => self.ai_assisted(conflict).await,
            ResolutionStrategy::Manual => Ok(manual(conflict, "Left for manual resolution")),
        }
    }

    /// Resolve every conflict in order.
    ///
    /// Tasks in a MANUAL conflict are held for the whole call: any other
    /// conflict involving them is treated as MANUAL as well, so a held branch
    /// is never merged through a different file.
    pub async fn resolve_all(&self, conflicts: &[Conflict]) -> ResolutionReport {
        let strategies: Vec<ResolutionStrategy> = conflicts.iter().map(|c| self.strategy_for(c)).collect();
        let mut held: BTreeSet<String> = conflicts
            .iter()
            .zip(&strategies)
            .filter(|(_, s)| **s == ResolutionStrategy::Manual)
            .flat_map(|(c, _)| c.tasks.iter().cloned())
            .collect();

        let mut report = ResolutionReport::default();
        for (conflict, strategy) in conflicts.iter().zip(strategies) {
            let resolution = if strategy != ResolutionStrategy::Manual && conflict.tasks.iter().any(|t| held.contains(t)) {
                Ok(manual(conflict, "Involves a task held by another conflict"))
            } else {
                self.resolve_with(conflict, strategy).await
            };

            match resolution {
                Ok(resolution) => {
                    for branch in &resolution.merged_branches {
                        let task = Self::task_for(branch);
                        if !report.merged_tasks.contains(&task) {
                            report.merged_tasks.push(task);
                        }
                    }
                    if !resolution.success {
                        held.extend(conflict.tasks.iter().cloned());
                        if resolution.strategy == ResolutionStrategy::Manual {
                            report.manual_files.push(conflict.file.clone());
                        } else {
                            report.failures.push((conflict.file.clone(), resolution.message.clone()));
                        }
                    }
                    report.resolutions.push(resolution);
                }
                Err(e) => {
                    log::error!("Resolution of {} failed: {}", conflict.file, e);
                    held.extend(conflict.tasks.iter().cloned());
                    report.failures.push((conflict.file.clone(), e.to_string()));
                }
            }
        }

        report.held_tasks = held.into_iter().filter(|t| !report.merged_tasks.contains(t)).collect();
        report
    }

    /// Merge each branch in order. A conflicted merge is aborted and
    /// reported for that branch; the sequence continues.
    pub fn merge_branches_sequentially(&self, branches: &[String]) -> Result<Vec<BranchMergeResult>> {
        self.ensure_base()?;
        let mut results = Vec::with_capacity(branches.len());

        for branch in branches {
            let message = format!("Merge {} into {}", branch, self.base_branch);
            let result = match self.vcs.merge(&self.repo_root, branch, &message) {
                Ok(MergeOutcome::Conflicted(files)) => {
                    log::warn!("Merge of {} conflicted on {}; aborting", branch, files.join(", "));
                    self.vcs.merge_abort(&self.repo_root)?;
                    Err(HermesError::MergeConflict {
                        branch: branch.clone(),
                        files,
                    })
                }
                Ok(outcome) => {
                    log::info!("Merged {} into {}", branch, self.base_branch);
                    Ok(outcome)
                }
                Err(e) => {
                    log::warn!("Merge of {} failed: {}", branch, e);
                    Err(e)
                }
            };
            results.push(BranchMergeResult {
                branch: branch.clone(),
                result,
            });
        }

        Ok(results)
    }

    fn ensure_base(&self) -> Result<()> {
        let current = self.vcs.current_branch(&self.repo_root)?;
        if current != self.base_branch {
            log::debug!("Checking out {} (was {})", self.base_branch, current);
            self.vcs.checkout(&self.repo_root, &self.base_branch)?;
        }
        Ok(())
    }

    /// Merge the conflict's branches in order. `on_conflict` gets the branch
    /// and its conflicted files and returns true once it has concluded the
    /// merge; otherwise the whole sequence is undone.
    fn merge_sequence<F>(&self, conflict: &Conflict, mut on_conflict: F) -> Result<Sequence>
    where
        F: FnMut(&str, &[String]) -> Result<bool>,
    {
        self.ensure_base()?;
        let head = self.vcs.rev_parse(&self.repo_root, "HEAD")?;
        let mut merged = Vec::new();

        for task in &conflict.tasks {
            let branch = Self::branch_for(task);
            let message = format!("Merge {} into {} ({})", branch, self.base_branch, conflict.file);
            let outcome = match self.vcs.merge(&self.repo_root, &branch, &message) {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.vcs.reset_hard(&self.repo_root, &head)?;
                    return Err(e);
                }
            };

            match outcome {
                MergeOutcome::Merged | MergeOutcome::AlreadyUpToDate => merged.push(branch),
                MergeOutcome::Conflicted(files) => {
                    match on_conflict(&branch, &files) {
                        Ok(true) => {
                            merged.push(branch);
                            continue;
                        }
                        Ok(false) => {}
                        Err(e) => {
                            log::warn!("Resolving {} failed ({}); undoing sequence", branch, e);
                            if let Err(abort) = self.vcs.merge_abort(&self.repo_root) {
                                log::debug!("No merge to abort: {}", abort);
                            }
                            self.vcs.reset_hard(&self.repo_root, &head)?;
                            return Err(e);
                        }
                    }
                    log::warn!(
                        "Merge of {} conflicted on {}; undoing sequence to {}",
                        branch,
                        files.join(", "),
                        &head[..head.len().min(8)]
                    );
                    self.vcs.merge_abort(&self.repo_root)?;
                    self.vcs.reset_hard(&self.repo_root, &head)?;
                    return Ok(Sequence::Undone(branch, files));
                }
            }
        }

        Ok(Sequence::Merged(merged))
    }

    fn auto_merge(&self, conflict: &Conflict) -> Result<Resolution> {
        let sequence = self.merge_sequence(conflict, |_, _| Ok(false))?;
        Ok(finish(conflict, ResolutionStrategy::AutoMerge, sequence, "Merged cleanly"))
    }

    fn take_side(&self, conflict: &Conflict, strategy: ResolutionStrategy) -> Result<Resolution> {
        let chosen = match strategy {
            ResolutionStrategy::TakeFirst => conflict.tasks.first(),
            _ => conflict.tasks.last(),
        };
        let Some(chosen) = chosen.map(|t| Self::branch_for(t)) else {
            return Ok(manual(conflict, "No tasks to take a side from"));
        };

        let sequence = self.merge_sequence(conflict, |_, files| {
            if files.len() != 1 || files[0] != conflict.file {
                return Ok(false);
            }
            let Some(content) = self.vcs.show_file(&self.repo_root, &chosen, &conflict.file)? else {
                return Ok(false);
            };
            self.vcs.write_and_stage(&self.repo_root, &conflict.file, &content)?;
            self.vcs.commit(
                &self.repo_root,
                &format!("Resolve {} with {} ({})", conflict.file, chosen, strategy),
            )?;
            Ok(true)
        })?;

        Ok(finish(conflict, strategy, sequence, &format!("Took {} from {}", conflict.file, chosen)))
    }

    async fn ai_assisted(&self, conflict: &Conflict) -> Result<Resolution> {
        let Some(merger) = &self.ai_merger else {
            return Ok(manual(conflict, "No AI merger configured"));
        };
        let Some(first) = conflict.tasks.first() else {
            return Ok(manual(conflict, "No tasks to merge"));
        };

        let merge_base = self
            .vcs
            .merge_base(&self.repo_root, &self.base_branch, &Self::branch_for(first))?;
        let original = self
            .vcs
            .show_file(&self.repo_root, &merge_base, &conflict.file)?
            .unwrap_or_default();

        let changes: Vec<ChangeSet> = conflict.tasks.iter().map(|t| self.change_set(t, &conflict.file)).collect();

        let merged = match merger.merge_all(&conflict.file, &original, &changes).await {
            Ok(merged) => merged,
            Err(e) => {
                log::warn!("AI merge of {} rejected: {}", conflict.file, e);
                return Ok(manual(conflict, &format!("AI merge failed: {}", e)));
            }
        };

        let sequence = self.merge_sequence(conflict, |branch, files| {
            if files.len() != 1 || files[0] != conflict.file {
                return Ok(false);
            }
            self.vcs.write_and_stage(&self.repo_root, &conflict.file, &merged.content)?;
            self.vcs
                .commit(&self.repo_root, &format!("AI merge of {} ({})", conflict.file, branch))?;
            Ok(true)
        })?;

        let message = format!(
            "AI merged {} with confidence {:.2}: {}",
            conflict.file, merged.confidence, merged.explanation
        );
        Ok(finish(conflict, ResolutionStrategy::AiAssisted, sequence, &message))
    }

    fn change_set(&self, task_id: &str, file: &str) -> ChangeSet {
        let intent = self
            .intents
            .get(task_id)
            .cloned()
            .unwrap_or_else(|| format!("Changes from task {}", task_id));
        let diff = self
            .changes
            .get(task_id)
            .and_then(|c| diff::file_section(&c.diff, file))
            .unwrap_or_default();
        ChangeSet::new(task_id, intent, diff)
    }
}

fn manual(conflict: &Conflict, message: &str) -> Resolution {
    Resolution {
        file: conflict.file.clone(),
        tasks: conflict.tasks.clone(),
        strategy: ResolutionStrategy::Manual,
        success: false,
        merged_branches: Vec::new(),
        message: message.to_string(),
    }
}

fn finish(conflict: &Conflict, strategy: ResolutionStrategy, sequence: Sequence, merged_message: &str) -> Resolution {
    let (success, merged_branches, message) = match sequence {
        Sequence::Merged(branches) => (true, branches, merged_message.to_string()),
        Sequence::Undone(branch, files) => (
            false,
            Vec::new(),
            format!("Merge of {} conflicted on {}; sequence undone", branch, files.join(", ")),
        ),
    };
    Resolution {
        file: conflict.file.clone(),
        tasks: conflict.tasks.clone(),
        strategy,
        success,
        merged_branches,
        message,
    }
}
