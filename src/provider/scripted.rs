//! Scripted provider for deterministic tests and dry runs.
//!
//! Replies are queued up front. A reply may also write files into the
//! request's workdir, standing in for the edits a real agent would make.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::types::{AiProvider, ExecuteRequest, ExecuteResult, ProviderError};

/// What one scripted invocation does.
#[derive(Debug, Clone)]
pub struct ScriptedReply {
    kind: ReplyKind,
    writes: Vec<(PathBuf, String)>,
}

#[derive(Debug, Clone)]
enum ReplyKind {
    Output(ExecuteResult),
    Error(String),
    Timeout,
}

impl ScriptedReply {
    pub fn output(text: impl Into<String>) -> Self {
        Self {
            kind: ReplyKind::Output(ExecuteResult::success(text)),
            writes: Vec::new(),
        }
    }

    /// Agent exited unsuccessfully.
    pub fn failure(text: impl Into<String>) -> Self {
        Self {
            kind: ReplyKind::Output(ExecuteResult::failure(text)),
            writes: Vec::new(),
        }
    }

    /// Invocation error.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: ReplyKind::Error(message.into()),
            writes: Vec::new(),
        }
    }

    pub fn timeout() -> Self {
        Self {
            kind: ReplyKind::Timeout,
            writes: Vec::new(),
        }
    }

    /// Write `content` to `path` (relative to the workdir) before replying.
    pub fn writing(mut self, path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        self.writes.push((path.into(), content.into()));
        self
    }
}

#[derive(Debug, Default)]
struct Script {
    routes: Vec<(String, VecDeque<ScriptedReply>)>,
    queue: VecDeque<ScriptedReply>,
    prompts: Vec<String>,
}

/// Provider that plays back queued replies and records every prompt.
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    script: Mutex<Script>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replies served in order to any prompt.
    pub fn with_replies<I: IntoIterator<Item = ScriptedReply>>(self, replies: I) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.queue.extend(replies);
        }
        self
    }

    /// Replies served only to prompts containing `needle`. Routes are
    /// checked before the shared queue, so concurrent callers stay
    /// deterministic.
    pub fn route<I: IntoIterator<Item = ScriptedReply>>(self, needle: impl Into<String>, replies: I) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.routes.push((needle.into(), replies.into_iter().collect()));
        }
        self
    }

    /// Every prompt received so far.
    pub fn prompts(&self) -> Vec<String> {
        self.script.lock().map(|s| s.prompts.clone()).unwrap_or_default()
    }

    pub fn remaining(&self) -> usize {
        self.script
            .lock()
            .map(|s| s.queue.len() + s.routes.iter().map(|(_, q)| q.len()).sum::<usize>())
            .unwrap_or_default()
    }

    fn next_reply(&self, prompt: &str) -> Result<ScriptedReply, ProviderError> {
        let mut script = self
            .script
            .lock()
            .map_err(|e| ProviderError::Other(e.to_string()))?;
        script.prompts.push(prompt.to_string());

        let routed = script
            .routes
            .iter_mut()
            .find(|(needle, queue)| !queue.is_empty() && prompt.contains(needle.as_str()))
            .and_then(|(_, queue)| queue.pop_front());

        routed.or_else(|| script.queue.pop_front()).ok_or(ProviderError::Exhausted)
    }

    fn play(reply: ScriptedReply, request: &ExecuteRequest) -> Result<ExecuteResult, ProviderError> {
        for (path, content) in &reply.writes {
            let target = request.workdir.join(path);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&target, content)?;
        }

        match reply.kind {
            ReplyKind::Output(result) => Ok(result),
            ReplyKind::Error(message) => Err(ProviderError::Other(message)),
            ReplyKind::Timeout => Err(ProviderError::Timeout(request.timeout)),
        }
    }
}

#[async_trait]
impl AiProvider for ScriptedProvider {
    async fn execute(&self, request: ExecuteRequest) -> Result<ExecuteResult, ProviderError> {
        let reply = self.next_reply(&request.prompt)?;
        Self::play(reply, &request)
    }

    async fn execute_streaming(
        &self,
        request: ExecuteRequest,
        chunk_tx: mpsc::Sender<String>,
    ) -> Result<ExecuteResult, ProviderError> {
        let result = self.execute(request).await?;
        for line in result.output.lines() {
            let _ = chunk_tx.send(line.to_string()).await;
        }
        Ok(result)
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
