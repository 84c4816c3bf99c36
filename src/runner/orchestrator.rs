//! Orchestrator - runs the task graph batch by batch.
//!
//! One pass of the loop: pick the next batch, give every task a workspace,
//! run the workers on a bounded pool while feeding each attempt to the
//! circuit breaker, wait for the whole batch, then detect conflicts, resolve
//! them and merge the finished branches into the base branch.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::analyzer::ResponseAnalyzer;
use crate::breaker::{CircuitBreaker, CircuitState};
use crate::conflict::{
    AiMerger, ChangeSet, Conflict, ConflictDetector, Resolver, SemanticChecker, SemanticConflictWarning, TaskChanges, diff,
};
use crate::domain::{Task, TaskStatus};
use crate::error::{HermesError, Result};
use crate::prompt::{PromptInjector, PromptRenderer};
use crate::provider::{AiProvider, DEFAULT_TIMEOUT};
use crate::runner::worker::{AttemptEvent, Worker, WorkerOutcome};
use crate::scheduler::{DEFAULT_MAX_WORKERS, Scheduler};
use crate::store::TaskStore;
use crate::worktree::{Workspace, WorkspaceManager};

/// Default attempts per task before it is BLOCKED.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Configuration for the Orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Maximum number of concurrent workers
    pub max_workers: usize,
    /// Attempts per task
    pub max_attempts: u32,
    /// Per-invocation timeout
    pub timeout: Duration,
    /// One task at a time in the main checkout, no branches
    pub serial: bool,
    /// Delete task branches once merged
    pub delete_merged_branches: bool,
    /// Resolve same-function conflicts with the AI merger
    pub ai_merge: bool,
    /// Minimum confidence for an AI merge to be applied
    pub min_merge_confidence: f64,
    /// Ask the agent for a semantic review of each conflict
    pub semantic_review: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            timeout: DEFAULT_TIMEOUT,
            serial: false,
            delete_merged_branches: false,
            ai_merge: true,
            min_merge_confidence: 0.7,
            semantic_review: false,
        }
    }
}

/// What a call to `Orchestrator::run` did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub batches: usize,
    /// Attempts fed to the circuit breaker
    pub loops: u64,
    pub completed: Vec<String>,
    pub blocked: Vec<String>,
    pub at_risk: Vec<String>,
    /// Returned to NOT_STARTED by cancellation
    pub cancelled: Vec<String>,
    /// NOT_STARTED tasks behind a BLOCKED, PAUSED or AT_RISK dependency
    pub stranded: Vec<String>,
    pub conflicts: Vec<Conflict>,
    pub warnings: Vec<SemanticConflictWarning>,
    /// Breaker reason when the run was halted by the circuit opening
    pub halted: Option<String>,
}

impl RunSummary {
    /// True when every scheduled task completed and nothing was left behind.
    pub fn is_clean(&self) -> bool {
        self.blocked.is_empty()
            && self.at_risk.is_empty()
            && self.cancelled.is_empty()
            && self.stranded.is_empty()
            && self.halted.is_none()
    }
}

/// Runs tasks from a `TaskStore` until nothing more can start.
pub struct Orchestrator {
    store: Arc<dyn TaskStore>,
    provider: Arc<dyn AiProvider>,
    workspaces: WorkspaceManager,
    breaker: CircuitBreaker,
    analyzer: ResponseAnalyzer,
    renderer: PromptRenderer,
    injector: PromptInjector,
    scheduler: Scheduler,
    config: OrchestratorConfig,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn TaskStore>,
        provider: Arc<dyn AiProvider>,
        workspaces: WorkspaceManager,
        breaker: CircuitBreaker,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            provider,
            workspaces,
            breaker,
            analyzer: ResponseAnalyzer::new(),
            renderer: PromptRenderer::new(),
            injector: PromptInjector::default(),
            scheduler: Scheduler::new().with_max_workers(config.max_workers),
            config,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_renderer(mut self, renderer: PromptRenderer) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn with_injector(mut self, injector: PromptInjector) -> Self {
        self.injector = injector;
        self
    }

    /// Use `token` as the run's parent token; cancelling it stops the run.
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn workspaces(&self) -> &WorkspaceManager {
        &self.workspaces
    }

    /// Run batches until nothing is ready, the run is cancelled, or the
    /// circuit breaker opens.
    ///
    /// Fails up front with `CircuitOpen` when the breaker is already OPEN,
    /// and with `Graph` on cyclic or dangling dependencies.
    pub async fn run(&mut self) -> Result<RunSummary> {
        let token = self.cancel.child_token();
        let mut summary = RunSummary::default();

        loop {
            if token.is_cancelled() {
                tracing::info!("Run cancelled");
                break;
            }
            if !self.breaker.can_execute() {
                if summary.batches == 0 {
                    let record = self.breaker.record();
                    return Err(HermesError::CircuitOpen {
                        reason: record.reason.clone().unwrap_or_else(|| "circuit open".to_string()),
                        loop_number: record.current_loop,
                    });
                }
                break;
            }

            let tasks = self.store.tasks()?;
            let batch = if self.config.serial {
                self.scheduler.next_task(&tasks)?.map(|t| vec![t])
            } else {
                self.scheduler.next_batch(&tasks)?.map(|b| b.tasks)
            };
            let Some(batch) = batch else {
                break;
            };

            summary.batches += 1;
            let ids: Vec<&str> = batch.iter().map(|t| t.id.as_str()).collect();
            tracing::info!(batch = summary.batches, tasks = ?ids, "Starting batch");
            self.run_batch(batch, &token, &mut summary).await?;
        }

        summary.stranded = self.scheduler.stranded(&self.store.tasks()?)?;
        tracing::info!(
            batches = summary.batches,
            completed = summary.completed.len(),
            blocked = summary.blocked.len(),
            at_risk = summary.at_risk.len(),
            stranded = summary.stranded.len(),
            "Run finished"
        );
        Ok(summary)
    }

    async fn run_batch(&mut self, batch: Vec<Task>, token: &CancellationToken, summary: &mut RunSummary) -> Result<()> {
        let features: HashMap<String, String> = self.store.load()?.into_iter().map(|f| (f.id, f.name)).collect();

        // Workspaces are created here, one at a time, never inside workers.
        let mut running: Vec<(Task, Workspace)> = Vec::new();
        for mut task in batch {
            let workspace = if self.config.serial {
                Ok(self.workspaces.setup_shared(&task.id))
            } else {
                self.workspaces.setup(&task.id)
            };
            let started = match workspace {
                Ok(workspace) => match self.finish(&mut task, TaskStatus::InProgress, "Started") {
                    Ok(()) => {
                        running.push((task, workspace));
                        Ok(())
                    }
                    Err(e) => {
                        self.discard(&workspace, false);
                        Err(e)
                    }
                },
                Err(e) => {
                    tracing::error!(task = %task.id, error = %e, "Workspace setup failed");
                    summary.blocked.push(task.id.clone());
                    self.finish(&mut task, TaskStatus::Blocked, &format!("Workspace setup failed: {}", e))
                }
            };
            if let Err(e) = started {
                tracing::error!(error = %e, "Batch setup failed, releasing started tasks");
                self.release(running);
                return Err(e);
            }
        }
        if running.is_empty() {
            return Ok(());
        }

        let worker = Worker {
            provider: self.provider.clone(),
            workspaces: self.workspaces.clone(),
            renderer: self.renderer.clone(),
            injector: self.injector.clone(),
            analyzer: self.analyzer,
            max_attempts: self.config.max_attempts,
            timeout: self.config.timeout,
            cancel: token.clone(),
        };
        let semaphore = Arc::new(Semaphore::new(self.config.max_workers.max(1)));
        let (tx, mut rx) = mpsc::channel::<AttemptEvent>(running.len() * 2);
        let mut workers = JoinSet::new();

        for (task, workspace) in &running {
            let worker = worker.clone();
            let semaphore = semaphore.clone();
            let tx = tx.clone();
            let task = task.clone();
            let workspace = workspace.clone();
            let feature = features.get(&task.feature_id).cloned();
            workers.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let id = task.id.clone();
                let outcome = worker.run(task, feature, workspace, tx).await;
                (id, outcome)
            });
        }
        drop(tx);

        // Breaker updates in receive order; the channel closes once every
        // worker has returned.
        while let Some(event) = rx.recv().await {
            self.apply_attempt(event, token, summary);
        }

        let mut outcomes: HashMap<String, WorkerOutcome> = HashMap::new();
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok((id, outcome)) => {
                    outcomes.insert(id, outcome);
                }
                Err(e) => tracing::error!(error = %e, "Worker task failed"),
            }
        }

        let mut finished = Vec::new();
        for (mut task, workspace) in running {
            let outcome = outcomes
                .remove(&task.id)
                .unwrap_or_else(|| WorkerOutcome::Failed("Worker task failed".to_string()));
            match outcome {
                WorkerOutcome::Completed { attempts, committed } => {
                    tracing::info!(task = %task.id, attempts, committed, "Task finished");
                    finished.push((task, workspace));
                }
                WorkerOutcome::Exhausted { attempts, reason } => {
                    let reason = format!("Failed after {} attempt(s): {}", attempts, reason);
                    self.finish(&mut task, TaskStatus::Blocked, &reason)?;
                    self.discard(&workspace, false);
                    summary.blocked.push(task.id);
                }
                WorkerOutcome::Failed(reason) => {
                    self.finish(&mut task, TaskStatus::Blocked, &reason)?;
                    self.discard(&workspace, false);
                    summary.blocked.push(task.id);
                }
                WorkerOutcome::Cancelled { attempts } => {
                    tracing::info!(task = %task.id, attempts, "Task cancelled; workspace kept");
                    self.finish(&mut task, TaskStatus::NotStarted, "Cancelled")?;
                    summary.cancelled.push(task.id);
                }
            }
        }

        if self.config.serial {
            for (mut task, _) in finished {
                self.finish(&mut task, TaskStatus::Completed, "Committed to base branch")?;
                summary.completed.push(task.id);
            }
            return Ok(());
        }

        self.merge_finished(finished, summary).await
    }

    fn apply_attempt(&mut self, event: AttemptEvent, token: &CancellationToken, summary: &mut RunSummary) {
        let loop_number = self.breaker.record().current_loop + 1;
        summary.loops += 1;

        match self.breaker.add_loop_result(event.has_progress, event.has_error, loop_number) {
            Ok(CircuitState::Open) => {
                if summary.halted.is_none() {
                    let reason = self.breaker.record().reason.clone().unwrap_or_default();
                    tracing::warn!(loop_number, task = %event.task_id, reason = %reason, "Circuit breaker open; cancelling run");
                    summary.halted = Some(reason);
                }
                token.cancel();
            }
            Ok(state) => {
                tracing::debug!(
                    loop_number,
                    task = %event.task_id,
                    attempt = event.attempt,
                    complete = event.is_complete,
                    state = %state,
                    "{}",
                    event.summary
                );
            }
            Err(e) => tracing::error!(error = %e, "Failed to record breaker state"),
        }

        let _ = event.ack.send(());
    }

    /// Detect, resolve and merge the branches of finished tasks.
    async fn merge_finished(&mut self, finished: Vec<(Task, Workspace)>, summary: &mut RunSummary) -> Result<()> {
        if finished.is_empty() {
            return Ok(());
        }

        let mut detector = ConflictDetector::new();
        let mut changes: HashMap<String, TaskChanges> = HashMap::new();
        let mut intents: HashMap<String, String> = HashMap::new();
        let mut mergeable = Vec::new();

        for (mut task, workspace) in finished {
            match self.branch_changes(&workspace) {
                Ok(task_changes) => {
                    detector.add(task.id.clone(), task_changes.clone());
                    changes.insert(task.id.clone(), task_changes);
                    intents.insert(task.id.clone(), intent(&task));
                    mergeable.push((task, workspace));
                }
                Err(e) => {
                    tracing::error!(task = %task.id, error = %e, "Could not read branch changes");
                    self.finish(&mut task, TaskStatus::AtRisk, &format!("Could not read branch changes: {}", e))?;
                    summary.at_risk.push(task.id);
                }
            }
        }

        let conflicts = detector.analyze();
        for conflict in &conflicts {
            tracing::warn!(
                file = %conflict.file,
                tasks = ?conflict.tasks,
                kind = %conflict.conflict_type,
                severity = conflict.severity,
                "Conflict detected"
            );
        }

        let checker = self.semantic_checker();
        for conflict in &conflicts {
            let sets: Vec<ChangeSet> = conflict
                .tasks
                .iter()
                .map(|t| {
                    let diff = changes
                        .get(t)
                        .and_then(|c| diff::file_section(&c.diff, &conflict.file))
                        .unwrap_or_default();
                    ChangeSet::new(t.as_str(), intents.get(t).cloned().unwrap_or_default(), diff)
                })
                .collect();
            for warning in checker.check(&conflict.file, &sets).await {
                tracing::warn!(file = %warning.file, severity = %warning.severity, "Possible semantic conflict: {}", warning.description);
                summary.warnings.push(warning);
            }
        }

        let mut resolver = Resolver::new(&self.workspaces)
            .with_intents(intents)
            .with_task_changes(changes);
        if self.config.ai_merge {
            let merger = AiMerger::new(self.provider.clone(), self.workspaces.repo_root())
                .with_min_confidence(self.config.min_merge_confidence)
                .with_timeout(self.config.timeout)
                .with_renderer(self.renderer.clone());
            resolver = resolver.with_ai_merger(merger);
        }

        let report = resolver.resolve_all(&conflicts).await;
        let mut merged: HashSet<String> = report.merged_tasks.iter().cloned().collect();
        let held: HashSet<String> = report.held_tasks.iter().cloned().collect();
        let mut reasons: HashMap<String, String> = HashMap::new();
        for resolution in report.resolutions.iter().filter(|r| !r.success) {
            for task in &resolution.tasks {
                reasons
                    .entry(task.clone())
                    .or_insert_with(|| format!("{} conflict on {}: {}", resolution.strategy, resolution.file, resolution.message));
            }
        }

        let remaining: Vec<&Task> = mergeable
            .iter()
            .map(|(t, _)| t)
            .filter(|t| !merged.contains(&t.id) && !held.contains(&t.id))
            .collect();
        let branches: Vec<String> = remaining.iter().map(|t| Resolver::branch_for(&t.id)).collect();
        let results = resolver.merge_branches_sequentially(&branches)?;
        for (task, result) in remaining.iter().zip(results) {
            match result.result {
                Ok(_) => {
                    merged.insert(task.id.clone());
                }
                Err(e) => {
                    reasons.insert(task.id.clone(), e.to_string());
                }
            }
        }

        for (mut task, workspace) in mergeable {
            if merged.contains(&task.id) {
                self.finish(&mut task, TaskStatus::Completed, "Merged into base branch")?;
                self.discard(&workspace, true);
                summary.completed.push(task.id);
            } else {
                let reason = reasons
                    .remove(&task.id)
                    .unwrap_or_else(|| "Branch not merged".to_string());
                self.finish(&mut task, TaskStatus::AtRisk, &reason)?;
                summary.at_risk.push(task.id);
            }
        }

        summary.conflicts.extend(conflicts);
        Ok(())
    }

    fn branch_changes(&self, workspace: &Workspace) -> Result<TaskChanges> {
        let files = self.workspaces.get_branch_changes(workspace)?;
        let diff = self.workspaces.get_branch_diff(workspace)?;
        Ok(TaskChanges::new(files, diff))
    }

    fn semantic_checker(&self) -> SemanticChecker {
        let checker = SemanticChecker::new();
        if self.config.semantic_review {
            checker
                .with_provider(self.provider.clone(), self.workspaces.repo_root())
                .with_timeout(self.config.timeout)
        } else {
            checker
        }
    }

    fn finish(&self, task: &mut Task, status: TaskStatus, reason: &str) -> Result<()> {
        task.transition(status, Some(reason))?;
        self.store.save_task(task)?;
        tracing::info!(task = %task.id, status = %status, reason, "Task status changed");
        Ok(())
    }

    /// Undo a partially started batch: drop its workspaces and put the
    /// tasks back to NOT_STARTED so the next run plans them again.
    fn release(&self, running: Vec<(Task, Workspace)>) {
        for (mut task, workspace) in running {
            self.discard(&workspace, false);
            if let Err(e) = self.finish(&mut task, TaskStatus::NotStarted, "Batch setup failed") {
                tracing::warn!(task = %task.id, error = %e, "Could not release task");
            }
        }
    }

    /// Remove a workspace that is no longer needed.
    fn discard(&self, workspace: &Workspace, merged: bool) {
        if workspace.shared {
            return;
        }
        if let Err(e) = self.workspaces.cleanup(workspace) {
            tracing::warn!(task = %workspace.task_id, error = %e, "Workspace cleanup failed");
        }
        if merged
            && self.config.delete_merged_branches
            && let Err(e) = self.workspaces.delete_branch(&workspace.task_id)
        {
            tracing::warn!(task = %workspace.task_id, error = %e, "Branch deletion failed");
        }
    }
}

fn intent(task: &Task) -> String {
    if task.description.is_empty() {
        task.name.clone()
    } else {
        format!("{}: {}", task.name, task.description)
    }
}
