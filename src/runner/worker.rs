//! Worker - drives one task through its attempts inside its workspace.
//!
//! Each attempt renders a fresh prompt (with feedback from the previous
//! attempt), injects it into the instruction file, invokes the agent and
//! analyzes the reply. Every attempt is reported to the orchestrator, which
//! acknowledges it after updating the circuit breaker; only then does the
//! worker decide whether to continue.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::analyzer::{AnalysisResult, ResponseAnalyzer};
use crate::domain::Task;
use crate::error::Result;
use crate::prompt::{PromptInjector, PromptRenderer, TASK_TEMPLATE};
use crate::provider::{AiProvider, ExecuteRequest, ExecuteResult, ProviderError};
use crate::worktree::{Workspace, WorkspaceManager};

/// Report of one attempt, sent to the orchestrator.
#[derive(Debug)]
pub struct AttemptEvent {
    pub task_id: String,
    pub attempt: u32,
    pub has_progress: bool,
    pub has_error: bool,
    pub is_complete: bool,
    pub summary: String,
    /// Dropped or answered once the breaker has seen this attempt
    pub ack: oneshot::Sender<()>,
}

/// How a worker finished.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerOutcome {
    /// An attempt succeeded; `committed` is false when nothing changed
    Completed { attempts: u32, committed: bool },
    /// Every attempt failed
    Exhausted { attempts: u32, reason: String },
    /// Cancelled before finishing; the workspace is left as is
    Cancelled { attempts: u32 },
    /// The workspace itself failed (prompt injection, commit)
    Failed(String),
}

#[derive(Serialize)]
struct TaskPromptContext<'a> {
    task: &'a Task,
    feature: Option<&'a str>,
    attempt: u32,
    max_attempts: u32,
    feedback: Option<&'a str>,
}

/// Shared, read-only dependencies of every worker in a run.
#[derive(Clone)]
pub struct Worker {
    pub provider: Arc<dyn AiProvider>,
    pub workspaces: WorkspaceManager,
    pub renderer: PromptRenderer,
    pub injector: PromptInjector,
    pub analyzer: ResponseAnalyzer,
    pub max_attempts: u32,
    pub timeout: Duration,
    pub cancel: CancellationToken,
}

impl Worker {
    /// Run `task` in `workspace` until an attempt succeeds, attempts run
    /// out, or the run is cancelled.
    pub async fn run(
        &self,
        task: Task,
        feature: Option<String>,
        workspace: Workspace,
        events: mpsc::Sender<AttemptEvent>,
    ) -> WorkerOutcome {
        let max_attempts = self.max_attempts.max(1);
        let mut feedback: Option<String> = None;
        let mut attempts = 0;

        while attempts < max_attempts {
            if self.cancel.is_cancelled() {
                return WorkerOutcome::Cancelled { attempts };
            }
            attempts += 1;
            tracing::info!(task = %task.id, attempt = attempts, max_attempts, "Starting attempt");

            let prompt = match self.render(&task, feature.as_deref(), attempts, feedback.as_deref()) {
                Ok(prompt) => prompt,
                Err(e) => return WorkerOutcome::Failed(e.to_string()),
            };
            if let Err(e) = self.injector.inject(&workspace.work_path, &prompt) {
                return WorkerOutcome::Failed(e.to_string());
            }

            let request = ExecuteRequest::new(prompt, &workspace.work_path).with_timeout(self.timeout);
            let result = tokio::select! {
                _ = self.cancel.cancelled() => Err(ProviderError::Cancelled),
                result = self.provider.execute(request) => result,
            };

            if let Err(e) = self.injector.remove(&workspace.work_path) {
                tracing::warn!(task = %task.id, error = %e, "Failed to remove injected prompt");
            }

            if matches!(result, Err(ProviderError::Cancelled)) {
                tracing::info!(task = %task.id, attempt = attempts, "Attempt cancelled");
                return WorkerOutcome::Cancelled { attempts };
            }

            let verdict = Verdict::judge(&self.analyzer, result);
            tracing::info!(
                task = %task.id,
                attempt = attempts,
                success = verdict.success,
                progress = verdict.has_progress,
                error = verdict.has_error,
                "{}",
                verdict.summary
            );

            self.report(&events, &task.id, attempts, &verdict).await;

            if verdict.success {
                let message = format!("hermes: {} {}", task.id, task.name);
                return match self.workspaces.commit_changes(&workspace, &message) {
                    Ok(committed) => WorkerOutcome::Completed { attempts, committed },
                    Err(e) => WorkerOutcome::Failed(format!("Commit failed: {}", e)),
                };
            }

            feedback = Some(verdict.summary);
        }

        WorkerOutcome::Exhausted {
            attempts,
            reason: feedback.unwrap_or_else(|| "No attempts made".to_string()),
        }
    }

    fn render(&self, task: &Task, feature: Option<&str>, attempt: u32, feedback: Option<&str>) -> Result<String> {
        self.renderer.render_named(
            TASK_TEMPLATE,
            &TaskPromptContext {
                task,
                feature,
                attempt,
                max_attempts: self.max_attempts.max(1),
                feedback,
            },
        )
    }

    /// Send the attempt and wait for the orchestrator's acknowledgement.
    async fn report(&self, events: &mpsc::Sender<AttemptEvent>, task_id: &str, attempt: u32, verdict: &Verdict) {
        let (ack, acked) = oneshot::channel();
        let event = AttemptEvent {
            task_id: task_id.to_string(),
            attempt,
            has_progress: verdict.has_progress,
            has_error: verdict.has_error,
            is_complete: verdict.is_complete,
            summary: verdict.summary.clone(),
            ack,
        };
        if events.send(event).await.is_err() {
            tracing::debug!(task = %task_id, "Orchestrator gone; attempt not reported");
            return;
        }
        let _ = acked.await;
    }
}

/// What one attempt amounted to.
#[derive(Debug, Clone, PartialEq)]
struct Verdict {
    success: bool,
    has_progress: bool,
    has_error: bool,
    is_complete: bool,
    summary: String,
}

impl Verdict {
    fn judge(analyzer: &ResponseAnalyzer, result: std::result::Result<ExecuteResult, ProviderError>) -> Self {
        let output = match result {
            Ok(output) => output,
            Err(e) => {
                return Self {
                    success: false,
                    has_progress: false,
                    has_error: true,
                    is_complete: false,
                    summary: format!("Agent invocation failed: {}", e),
                };
            }
        };

        let analysis: AnalysisResult = analyzer.analyze(&output.output);
        let has_error = !output.success || analysis.is_stuck;
        let success = !has_error && (analysis.has_progress || analysis.is_complete);

        let summary = if !output.success {
            "Agent exited unsuccessfully".to_string()
        } else if analysis.is_stuck {
            format!("Agent looks stuck ({} errors reported)", analysis.error_count)
        } else if !success {
            "No progress and no completion detected".to_string()
        } else if analysis.is_complete {
            "Task reported complete".to_string()
        } else {
            "Progress detected".to_string()
        };

        let summary = match analysis.recommendation {
            Some(rec) if !rec.is_empty() => format!("{}. Recommendation: {}", summary, rec),
            _ => summary,
        };

        Self {
            success,
            has_progress: analysis.has_progress,
            has_error,
            is_complete: analysis.is_complete,
            summary,
        }
    }
}
