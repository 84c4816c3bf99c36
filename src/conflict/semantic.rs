//! Advisory semantic conflict checks.
//!
//! Warnings are never applied automatically. A provider-free heuristic
//! flags opposing edits (one task adds a line another removes); an optional
//! AI review adds a judgement on top.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::conflict::ai_merge::ChangeSet;
use crate::conflict::diff;
use crate::conflict::types::{Conflict, ConflictType};
use crate::prompt::{PromptRenderer, SEMANTIC_TEMPLATE};
use crate::provider::{AiProvider, DEFAULT_TIMEOUT, ExecuteRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarningSeverity {
    Low,
    Medium,
    High,
}

impl WarningSeverity {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "high" | "3" => WarningSeverity::High,
            "low" | "1" => WarningSeverity::Low,
            _ => WarningSeverity::Medium,
        }
    }

    fn level(&self) -> u8 {
        match self {
            WarningSeverity::Low => 1,
            WarningSeverity::Medium => 2,
            WarningSeverity::High => 3,
        }
    }
}

impl fmt::Display for WarningSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WarningSeverity::Low => "low",
            WarningSeverity::Medium => "medium",
            WarningSeverity::High => "high",
        };
        f.write_str(s)
    }
}

/// Possible meaning-level conflict between tasks in one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticConflictWarning {
    pub file: String,
    pub tasks: Vec<String>,
    pub severity: WarningSeverity,
    pub description: String,
    pub suggestion: String,
}

impl SemanticConflictWarning {
    /// View as a SEMANTIC conflict for reporting.
    pub fn to_conflict(&self) -> Conflict {
        Conflict {
            file: self.file.clone(),
            tasks: self.tasks.clone(),
            conflict_type: ConflictType::Semantic,
            severity: self.severity.level(),
            can_auto_resolve: false,
            functions: Vec::new(),
            description: self.description.clone(),
        }
    }
}

impl fmt::Display for SemanticConflictWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) [{}]: {}",
            self.file,
            self.tasks.join(", "),
            self.severity,
            self.description
        )?;
        if !self.suggestion.is_empty() {
            write!(f, " Suggestion: {}", self.suggestion)?;
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct SemanticContext<'a> {
    file: &'a str,
    changes: &'a [ChangeSet],
}

/// Semantic conflict checker.
#[derive(Clone, Default)]
pub struct SemanticChecker {
    provider: Option<Arc<dyn AiProvider>>,
    renderer: PromptRenderer,
    workdir: PathBuf,
    timeout: Option<Duration>,
}

impl fmt::Debug for SemanticChecker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SemanticChecker")
            .field("provider", &self.provider.as_ref().map(|p| p.name().to_string()))
            .field("workdir", &self.workdir)
            .finish()
    }
}

impl SemanticChecker {
    /// Heuristic-only checker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Checker that also asks the agent.
    pub fn with_provider(mut self, provider: Arc<dyn AiProvider>, workdir: impl Into<PathBuf>) -> Self {
        self.provider = Some(provider);
        self.workdir = workdir.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Heuristic warnings, then the AI review when a provider is set.
    /// Provider failures only drop the AI opinion.
    pub async fn check(&self, file: &str, changes: &[ChangeSet]) -> Vec<SemanticConflictWarning> {
        let mut warnings = Self::heuristic(file, changes);

        if let Some(provider) = &self.provider
            && changes.len() >= 2
        {
            match self.ask(provider.as_ref(), file, changes).await {
                Ok(Some(warning)) => warnings.push(warning),
                Ok(None) => {}
                Err(e) => log::warn!("Semantic review of {} failed: {}", file, e),
            }
        }

        warnings
    }

    /// Opposing edits: a line one task adds that another task removes.
    pub fn heuristic(file: &str, changes: &[ChangeSet]) -> Vec<SemanticConflictWarning> {
        let parsed: Vec<Option<diff::FileDiff>> = changes
            .iter()
            .map(|c| {
                let mut files = diff::parse(&c.diff);
                files.remove(file).or_else(|| files.into_values().next())
            })
            .collect();

        let mut warnings = Vec::new();
        for i in 0..changes.len() {
            for j in (i + 1)..changes.len() {
                let (Some(a), Some(b)) = (&parsed[i], &parsed[j]) else {
                    continue;
                };
                let opposing = opposing_line(a, b).or_else(|| opposing_line(b, a));
                if let Some(line) = opposing {
                    warnings.push(SemanticConflictWarning {
                        file: file.to_string(),
                        tasks: vec![changes[i].task_id.clone(), changes[j].task_id.clone()],
                        severity: WarningSeverity::Medium,
                        description: format!("One task adds `{}` while another removes it", line),
                        suggestion: "Check that both changes still agree on this line".to_string(),
                    });
                }
            }
        }
        warnings
    }

    async fn ask(
        &self,
        provider: &dyn AiProvider,
        file: &str,
        changes: &[ChangeSet],
    ) -> crate::error::Result<Option<SemanticConflictWarning>> {
        let prompt = self.renderer.render_named(SEMANTIC_TEMPLATE, &SemanticContext { file, changes })?;
        let request = ExecuteRequest::new(prompt, &self.workdir).with_timeout(self.timeout.unwrap_or(DEFAULT_TIMEOUT));
        let result = provider.execute(request).await?;

        let tasks = changes.iter().map(|c| c.task_id.clone()).collect();
        Ok(parse_reply(file, tasks, &result.output))
    }
}

fn opposing_line(adder: &diff::FileDiff, remover: &diff::FileDiff) -> Option<String> {
    let removed: Vec<&str> = remover.removed_lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    adder
        .added_lines()
        .map(str::trim)
        .find(|l| !l.is_empty() && removed.contains(l))
        .map(str::to_string)
}

/// Parse `SEMANTIC_CONFLICT:` / `SEVERITY:` / `DESCRIPTION:` / `SUGGESTION:`.
pub fn parse_reply(file: &str, tasks: Vec<String>, output: &str) -> Option<SemanticConflictWarning> {
    let field = |name: &str| {
        output
            .lines()
            .find_map(|l| l.trim().strip_prefix(name).map(|v| v.trim().to_string()))
    };

    let flagged = field("SEMANTIC_CONFLICT:")?;
    if !matches!(flagged.to_ascii_lowercase().as_str(), "yes" | "true") {
        return None;
    }

    Some(SemanticConflictWarning {
        file: file.to_string(),
        tasks,
        severity: field("SEVERITY:").map(|s| WarningSeverity::parse(&s)).unwrap_or(WarningSeverity::Medium),
        description: field("DESCRIPTION:").unwrap_or_default(),
        suggestion: field("SUGGESTION:").unwrap_or_default(),
    })
}
