//! Provider that runs an agent CLI as a subprocess.
//!
//! The prompt is written to stdin; stdout is the transcript. The child is
//! killed if the invocation times out or the future is dropped.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

use super::types::{AiProvider, ExecuteRequest, ExecuteResult, ProviderError};

/// Agent CLI invoked once per request.
#[derive(Debug, Clone)]
pub struct CommandProvider {
    command: String,
    args: Vec<String>,
}

impl CommandProvider {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    async fn spawn(&self, request: &ExecuteRequest) -> Result<Child, ProviderError> {
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .current_dir(&request.workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ProviderError::Spawn(format!("{}: {}", self.command, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(request.prompt.as_bytes()).await?;
            stdin.shutdown().await?;
        }
        Ok(child)
    }

    fn finish(stdout: String, stderr: String, success: bool) -> ExecuteResult {
        let output = if stderr.trim().is_empty() {
            stdout
        } else {
            format!("{}\n\nSTDERR:\n{}", stdout, stderr)
        };
        if success {
            ExecuteResult::success(output)
        } else {
            ExecuteResult::failure(output)
        }
    }
}

#[async_trait]
impl AiProvider for CommandProvider {
    async fn execute(&self, request: ExecuteRequest) -> Result<ExecuteResult, ProviderError> {
        log::debug!("Running {} in {}", self.command, request.workdir.display());
        let child = self.spawn(&request).await?;

        let output = tokio::time::timeout(request.timeout, child.wait_with_output())
            .await
            .map_err(|_| ProviderError::Timeout(request.timeout))??;

        Ok(Self::finish(
            String::from_utf8_lossy(&output.stdout).into_owned(),
            String::from_utf8_lossy(&output.stderr).into_owned(),
            output.status.success(),
        ))
    }

    async fn execute_streaming(
        &self,
        request: ExecuteRequest,
        chunk_tx: mpsc::Sender<String>,
    ) -> Result<ExecuteResult, ProviderError> {
        let mut child = self.spawn(&request).await?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ProviderError::Other("stdout not captured".to_string()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| ProviderError::Other("stderr not captured".to_string()))?;

        let run = async {
            let mut transcript = String::new();
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines.next_line().await? {
                transcript.push_str(&line);
                transcript.push('\n');
                // Receiver going away only stops forwarding.
                let _ = chunk_tx.send(line).await;
            }
            let mut err = String::new();
            stderr.read_to_string(&mut err).await?;
            let status = child.wait().await?;
            Ok::<_, ProviderError>((transcript, err, status.success()))
        };

        let (transcript, err, success) = tokio::time::timeout(request.timeout, run)
            .await
            .map_err(|_| ProviderError::Timeout(request.timeout))??;

        Ok(Self::finish(transcript, err, success))
    }

    fn name(&self) -> &str {
        &self.command
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    fn sh(script: &str) -> CommandProvider {
        CommandProvider::new("sh", vec!["-c".to_string(), script.to_string()])
    }

    #[tokio::test]
    async fn test_prompt_on_stdin() {
        let dir = tempdir().unwrap();
        let result = sh("cat").execute(ExecuteRequest::new("hello agent", dir.path())).await.unwrap();
        assert!(result.success);
        assert_eq!(result.output, "hello agent");
    }

    #[tokio::test]
    async fn test_runs_in_workdir() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "found").unwrap();
        let result = sh("cat marker.txt").execute(ExecuteRequest::new("", dir.path())).await.unwrap();
        assert_eq!(result.output, "found");
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_failure() {
        let dir = tempdir().unwrap();
        let result = sh("echo oops >&2; exit 3").execute(ExecuteRequest::new("", dir.path())).await.unwrap();
        assert!(!result.success);
        assert!(result.output.contains("oops"));
    }

    #[tokio::test]
    async fn test_timeout() {
        let dir = tempdir().unwrap();
        let request = ExecuteRequest::new("", dir.path()).with_timeout(Duration::from_millis(100));
        let err = sh("sleep 5").execute(request).await.unwrap_err();
        assert!(matches!(err, ProviderError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let dir = tempdir().unwrap();
        let provider = CommandProvider::new("definitely-not-a-real-agent", vec![]);
        let err = provider.execute(ExecuteRequest::new("", dir.path())).await.unwrap_err();
        assert!(matches!(err, ProviderError::Spawn(_)));
    }

    #[tokio::test]
    async fn test_streaming_chunks() {
        let dir = tempdir().unwrap();
        let (tx, mut rx) = mpsc::channel(16);
        let result = sh("echo one; echo two")
            .execute_streaming(ExecuteRequest::new("", dir.path()), tx)
            .await
            .unwrap();

        assert_eq!(result.output, "one\ntwo\n");
        assert_eq!(rx.recv().await.as_deref(), Some("one"));
        assert_eq!(rx.recv().await.as_deref(), Some("two"));
    }
}
