//! AI-assisted merge of one file changed by several tasks.
//!
//! The agent sees the original file plus each change's diff and intent,
//! and must answer between `MERGED_CODE_START` / `MERGED_CODE_END`.
//! Results with leftover conflict markers, an empty body, or confidence
//! below the configured minimum are rejected.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::prompt::{MERGE_TEMPLATE, PromptRenderer};
use crate::provider::{AiProvider, DEFAULT_TIMEOUT, ExecuteRequest, ProviderError};

pub const MERGED_CODE_START: &str = "MERGED_CODE_START";
pub const MERGED_CODE_END: &str = "MERGED_CODE_END";

/// Confidence assumed when the reply omits `CONFIDENCE:`.
pub const DEFAULT_CONFIDENCE: f64 = 0.5;

const CONFLICT_MARKERS: [&str; 3] = ["<<<<<<<", "=======", ">>>>>>>"];

/// Errors that make an AI merge unusable
#[derive(Debug, Error)]
pub enum AiMergeError {
    #[error("provider failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("agent exited unsuccessfully")]
    Unsuccessful,

    #[error("reply has no MERGED_CODE_START/MERGED_CODE_END block")]
    MissingMarkers,

    #[error("merged code is empty")]
    EmptyResult,

    #[error("merged code still contains conflict markers")]
    ConflictMarkers,

    #[error("confidence {confidence:.2} below minimum {minimum:.2}")]
    LowConfidence { confidence: f64, minimum: f64 },

    #[error("need at least two changes to merge, got {0}")]
    InsufficientChanges(usize),

    #[error("prompt rendering failed: {0}")]
    Prompt(String),
}

/// One side of a merge.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeSet {
    pub task_id: String,
    /// Natural-language description of what the change is for
    pub intent: String,
    pub diff: String,
}

impl ChangeSet {
    pub fn new(task_id: impl Into<String>, intent: impl Into<String>, diff: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            intent: intent.into(),
            diff: diff.into(),
        }
    }
}

/// Validated merge result.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedCode {
    pub content: String,
    pub explanation: String,
    pub confidence: f64,
}

#[derive(Serialize)]
struct MergeContext<'a> {
    file: &'a str,
    original: &'a str,
    a: &'a ChangeSet,
    b: &'a ChangeSet,
}

/// Merges conflicting edits through an `AiProvider`.
#[derive(Clone)]
pub struct AiMerger {
    provider: Arc<dyn AiProvider>,
    renderer: PromptRenderer,
    workdir: PathBuf,
    timeout: Duration,
    min_confidence: f64,
}

impl std::fmt::Debug for AiMerger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AiMerger")
            .field("provider", &self.provider.name())
            .field("workdir", &self.workdir)
            .field("min_confidence", &self.min_confidence)
            .finish()
    }
}

impl AiMerger {
    pub fn new(provider: Arc<dyn AiProvider>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            provider,
            renderer: PromptRenderer::new(),
            workdir: workdir.into(),
            timeout: DEFAULT_TIMEOUT,
            min_confidence: 0.0,
        }
    }

    pub fn with_min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = min_confidence.clamp(0.0, 1.0);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_renderer(mut self, renderer: PromptRenderer) -> Self {
        self.renderer = renderer;
        self
    }

    /// Merge two changes to `file`.
    pub async fn merge_pair(
        &self,
        file: &str,
        original: &str,
        a: &ChangeSet,
        b: &ChangeSet,
    ) -> Result<MergedCode, AiMergeError> {
        let prompt = self
            .renderer
            .render_named(MERGE_TEMPLATE, &MergeContext { file, original, a, b })
            .map_err(|e| AiMergeError::Prompt(e.to_string()))?;

        let request = ExecuteRequest::new(prompt, &self.workdir).with_timeout(self.timeout);
        let result = self.provider.execute(request).await?;
        if !result.success {
            return Err(AiMergeError::Unsuccessful);
        }

        let merged = parse_reply(&result.output)?;
        self.validate(&merged)?;
        log::info!(
            "AI merged {} ({} + {}) with confidence {:.2}",
            file,
            a.task_id,
            b.task_id,
            merged.confidence
        );
        Ok(merged)
    }

    /// Fold any number of changes left to right; each result becomes the
    /// original for the next pairing.
    pub async fn merge_all(&self, file: &str, original: &str, changes: &[ChangeSet]) -> Result<MergedCode, AiMergeError> {
        let [first, second, rest @ ..] = changes else {
            return Err(AiMergeError::InsufficientChanges(changes.len()));
        };

        let mut merged = self.merge_pair(file, original, first, second).await?;
        let mut folded = vec![first.task_id.clone(), second.task_id.clone()];

        for next in rest {
            let applied = ChangeSet::new(
                folded.join("+"),
                format!("Already merged: changes from {}", folded.join(", ")),
                "(already applied to the original above)",
            );
            let step = self.merge_pair(file, &merged.content, &applied, next).await?;
            folded.push(next.task_id.clone());
            merged = MergedCode {
                confidence: merged.confidence.min(step.confidence),
                explanation: format!("{} {}", merged.explanation, step.explanation).trim().to_string(),
                content: step.content,
            };
        }

        Ok(merged)
    }

    fn validate(&self, merged: &MergedCode) -> Result<(), AiMergeError> {
        if merged.content.trim().is_empty() {
            return Err(AiMergeError::EmptyResult);
        }
        let has_markers = merged
            .content
            .lines()
            .any(|l| CONFLICT_MARKERS.iter().any(|m| l.trim_start().starts_with(m)));
        if has_markers {
            return Err(AiMergeError::ConflictMarkers);
        }
        if merged.confidence < self.min_confidence {
            return Err(AiMergeError::LowConfidence {
                confidence: merged.confidence,
                minimum: self.min_confidence,
            });
        }
        Ok(())
    }
}

/// Parse the marker-delimited reply.
pub fn parse_reply(output: &str) -> Result<MergedCode, AiMergeError> {
    let start = output.find(MERGED_CODE_START).ok_or(AiMergeError::MissingMarkers)?;
    let body_start = start + MERGED_CODE_START.len();
    let end = output[body_start..]
        .find(MERGED_CODE_END)
        .map(|i| body_start + i)
        .ok_or(AiMergeError::MissingMarkers)?;

    let mut content = output[body_start..end].trim_start_matches([' ', '\t']);
    content = content.strip_prefix("\r\n").or_else(|| content.strip_prefix('\n')).unwrap_or(content);
    let content = strip_fence(content);

    let tail = &output[end + MERGED_CODE_END.len()..];
    let field = |name: &str| {
        tail.lines()
            .find_map(|l| l.trim().strip_prefix(name).map(|v| v.trim().to_string()))
    };

    let explanation = field("EXPLANATION:").unwrap_or_default();
    let confidence = field("CONFIDENCE:")
        .and_then(|v| parse_confidence(&v))
        .unwrap_or(DEFAULT_CONFIDENCE);

    Ok(MergedCode {
        content,
        explanation,
        confidence,
    })
}

/// `0.85`, `85%` or `85` -> 0.85, clamped to [0, 1].
fn parse_confidence(value: &str) -> Option<f64> {
    let number: f64 = value.trim_end_matches('%').trim().parse().ok()?;
    let scaled = if number > 1.0 { number / 100.0 } else { number };
    Some(scaled.clamp(0.0, 1.0))
}

/// Drop a surrounding Markdown code fence, if the agent added one.
fn strip_fence(content: &str) -> String {
    let trimmed = content.trim_end();
    if let Some(inner) = trimmed.strip_prefix("```")
        && let Some(body) = inner.strip_suffix("```")
    {
        let body = body.split_once('\n').map(|(_, rest)| rest).unwrap_or("");
        return body.to_string();
    }
    if content.ends_with('\n') {
        content.to_string()
    } else {
        format!("{}\n", content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ScriptedProvider, ScriptedReply};

    fn reply(code: &str, confidence: &str) -> String {
        format!(
            "Here you go.\n{}\n{}{}\nEXPLANATION: kept both\n{}",
            MERGED_CODE_START, code, MERGED_CODE_END, confidence
        )
    }

    fn changes(n: usize) -> Vec<ChangeSet> {
        (1..=n)
            .map(|i| ChangeSet::new(format!("T{}", i), format!("intent {}", i), format!("+line {}", i)))
            .collect()
    }

    #[test]
    fn test_parse_reply() {
        let merged = parse_reply(&reply("fn a() {}\nfn b() {}\n", "CONFIDENCE: 0.8")).unwrap();
        assert_eq!(merged.content, "fn a() {}\nfn b() {}\n");
        assert_eq!(merged.explanation, "kept both");
        assert!((merged.confidence - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn test_missing_confidence_defaults() {
        let merged = parse_reply(&reply("x\n", "")).unwrap();
        assert_eq!(merged.confidence, DEFAULT_CONFIDENCE);
    }

    #[test]
    fn test_percent_confidence() {
        let merged = parse_reply(&reply("x\n", "CONFIDENCE: 90%")).unwrap();
        assert!((merged.confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_fenced_body() {
        let merged = parse_reply(&reply("```rust\nfn a() {}\n```\n", "CONFIDENCE: 1")).unwrap();
        assert_eq!(merged.content, "fn a() {}\n");
    }

    #[test]
    fn test_missing_markers() {
        assert!(matches!(parse_reply("no code here"), Err(AiMergeError::MissingMarkers)));
        assert!(matches!(
            parse_reply("MERGED_CODE_START\nunterminated"),
            Err(AiMergeError::MissingMarkers)
        ));
    }

    #[tokio::test]
    async fn test_rejects_conflict_markers_despite_confidence() {
        let code = "<<<<<<< HEAD\na\n=======\nb\n>>>>>>> other\n";
        let provider = Arc::new(ScriptedProvider::new().with_replies([ScriptedReply::output(reply(code, "CONFIDENCE: 1.0"))]));
        let merger = AiMerger::new(provider, "/tmp");
        let c = changes(2);
        let err = merger.merge_pair("f.rs", "orig\n", &c[0], &c[1]).await.unwrap_err();
        assert!(matches!(err, AiMergeError::ConflictMarkers));
    }

    #[tokio::test]
    async fn test_rejects_indented_conflict_markers() {
        let code = "fn a() {\n    <<<<<<< HEAD\n    x\n    =======\n    y\n    >>>>>>> other\n}\n";
        let provider = Arc::new(ScriptedProvider::new().with_replies([ScriptedReply::output(reply(code, "CONFIDENCE: 1.0"))]));
        let merger = AiMerger::new(provider, "/tmp");
        let c = changes(2);
        let err = merger.merge_pair("f.rs", "orig\n", &c[0], &c[1]).await.unwrap_err();
        assert!(matches!(err, AiMergeError::ConflictMarkers));
    }

    #[tokio::test]
    async fn test_rejects_empty() {
        let provider = Arc::new(ScriptedProvider::new().with_replies([ScriptedReply::output(reply("\n", "CONFIDENCE: 1.0"))]));
        let merger = AiMerger::new(provider, "/tmp");
        let c = changes(2);
        let err = merger.merge_pair("f.rs", "orig\n", &c[0], &c[1]).await.unwrap_err();
        assert!(matches!(err, AiMergeError::EmptyResult));
    }

    #[tokio::test]
    async fn test_min_confidence() {
        let provider = Arc::new(ScriptedProvider::new().with_replies([ScriptedReply::output(reply("ok\n", "CONFIDENCE: 0.4"))]));
        let merger = AiMerger::new(provider, "/tmp").with_min_confidence(0.6);
        let c = changes(2);
        let err = merger.merge_pair("f.rs", "orig\n", &c[0], &c[1]).await.unwrap_err();
        assert!(matches!(err, AiMergeError::LowConfidence { .. }));
    }

    #[tokio::test]
    async fn test_prompt_contents() {
        let provider = Arc::new(ScriptedProvider::new().with_replies([ScriptedReply::output(reply("ok\n", "CONFIDENCE: 0.9"))]));
        let merger = AiMerger::new(provider.clone(), "/tmp");
        let c = changes(2);
        merger.merge_pair("src/f.rs", "ORIGINAL BODY\n", &c[0], &c[1]).await.unwrap();

        let prompt = &provider.prompts()[0];
        assert!(prompt.contains("src/f.rs"));
        assert!(prompt.contains("ORIGINAL BODY"));
        assert!(prompt.contains("intent 1"));
        assert!(prompt.contains("+line 2"));
    }

    #[tokio::test]
    async fn test_fold_left_to_right() {
        let provider = Arc::new(ScriptedProvider::new().with_replies([
            ScriptedReply::output(reply("STEP ONE\n", "CONFIDENCE: 0.9")),
            ScriptedReply::output(reply("STEP TWO\n", "CONFIDENCE: 0.7")),
        ]));
        let merger = AiMerger::new(provider.clone(), "/tmp");

        let merged = merger.merge_all("f.rs", "orig\n", &changes(3)).await.unwrap();
        assert_eq!(merged.content, "STEP TWO\n");
        assert!((merged.confidence - 0.7).abs() < f64::EPSILON);

        let prompts = provider.prompts();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].contains("STEP ONE"));
        assert!(prompts[1].contains("Already merged: changes from T1, T2"));
        assert!(prompts[1].contains("+line 3"));
    }

    #[tokio::test]
    async fn test_fold_needs_two() {
        let merger = AiMerger::new(Arc::new(ScriptedProvider::new()), "/tmp");
        let err = merger.merge_all("f.rs", "", &changes(1)).await.unwrap_err();
        assert!(matches!(err, AiMergeError::InsufficientChanges(1)));
    }

    #[tokio::test]
    async fn test_provider_failure() {
        let provider = Arc::new(ScriptedProvider::new().with_replies([ScriptedReply::failure("crash")]));
        let merger = AiMerger::new(provider, "/tmp");
        let c = changes(2);
        assert!(matches!(
            merger.merge_pair("f.rs", "", &c[0], &c[1]).await,
            Err(AiMergeError::Unsuccessful)
        ));
    }
}
