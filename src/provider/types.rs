//! Core provider types and trait definitions

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Default per-invocation timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(900);

/// An opaque AI coding agent. Each call is independent (fresh context).
#[async_trait]
pub trait AiProvider: Send + Sync {
    /// Run the agent to completion and return its transcript.
    async fn execute(&self, request: ExecuteRequest) -> Result<ExecuteResult, ProviderError>;

    /// Like `execute`, forwarding output chunks as they arrive.
    async fn execute_streaming(
        &self,
        request: ExecuteRequest,
        chunk_tx: mpsc::Sender<String>,
    ) -> Result<ExecuteResult, ProviderError>;

    /// Short name for logs.
    fn name(&self) -> &str {
        "agent"
    }
}

/// One agent invocation
#[derive(Debug, Clone)]
pub struct ExecuteRequest {
    pub prompt: String,
    /// Directory the agent runs in
    pub workdir: PathBuf,
    pub timeout: Duration,
}

impl ExecuteRequest {
    pub fn new(prompt: impl Into<String>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            prompt: prompt.into(),
            workdir: workdir.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Transcript and accounting from one invocation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecuteResult {
    pub output: String,
    /// False when the agent exited unsuccessfully
    pub success: bool,
    /// Cost in USD, when the agent reports it
    pub cost: Option<f64>,
    pub tokens_in: Option<u64>,
    pub tokens_out: Option<u64>,
}

impl ExecuteResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            success: true,
            ..Default::default()
        }
    }

    pub fn failure(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            success: false,
            ..Default::default()
        }
    }
}

/// Errors that can occur while invoking an agent
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Agent timed out after {0:?}")]
    Timeout(Duration),

    #[error("Failed to spawn agent: {0}")]
    Spawn(String),

    #[error("Agent I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Agent invocation cancelled")]
    Cancelled,

    #[error("Scripted provider has no reply left")]
    Exhausted,

    #[error("Agent error: {0}")]
    Other(String),
}

impl ProviderError {
    /// Worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Timeout(_) => true,
            ProviderError::Io(_) => true,
            ProviderError::Other(_) => true,
            ProviderError::Spawn(_) => false,
            ProviderError::Cancelled => false,
            ProviderError::Exhausted => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let req = ExecuteRequest::new("do it", "/tmp/ws").with_timeout(Duration::from_secs(5));
        assert_eq!(req.prompt, "do it");
        assert_eq!(req.timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_result_constructors() {
        assert!(ExecuteResult::success("ok").success);
        let failed = ExecuteResult::failure("boom");
        assert!(!failed.success);
        assert_eq!(failed.cost, None);
    }

    #[test]
    fn test_retryable() {
        assert!(ProviderError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!ProviderError::Spawn("missing binary".to_string()).is_retryable());
        assert!(!ProviderError::Cancelled.is_retryable());
    }
}
