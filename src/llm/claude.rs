//! Claude CLI client.
//!
//! Runs the `claude` command-line tool in print mode and returns its text
//! output. Failures are classified from the exit status and stderr so the
//! generator can tell transient problems (rate limits, server errors,
//! timeouts) from permanent ones (missing binary, bad credentials).

use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command as AsyncCommand;
use tracing::debug;

use super::LlmClient;

/// Errors from the Claude CLI.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClaudeCliError {
    /// The configured command is not installed or not on PATH.
    #[error("The '{command}' CLI is not installed or not in PATH")]
    CliNotFound { command: String },

    /// Rate limited by the API.
    #[error("Rate limited: {message}")]
    RateLimited { message: String },

    /// Authentication failed - check API key.
    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    /// Server error - may be transient.
    #[error("Server error: {message}")]
    ServerError { message: String },

    /// Could not talk to the child process.
    #[error("Connection error: {message}")]
    ConnectionError { message: String },

    /// Process exited with non-zero code.
    #[error("Process failed with exit code {exit_code}: {stderr}")]
    ProcessFailed { exit_code: i32, stderr: String },

    /// Timeout waiting for response.
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },
}

impl ClaudeCliError {
    /// Check if this error indicates the request should be retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::ServerError { .. } | Self::Timeout { .. }
        )
    }

    /// Parse error from Claude CLI stderr output.
    pub fn from_stderr(stderr: &str, exit_code: i32) -> Self {
        let lower = stderr.to_lowercase();
        let message = stderr.trim().to_string();

        if lower.contains("rate limit") || lower.contains("too many requests") || lower.contains("429")
        {
            return Self::RateLimited { message };
        }

        if lower.contains("authentication")
            || lower.contains("unauthorized")
            || lower.contains("api key")
            || lower.contains("401")
        {
            return Self::AuthenticationFailed { message };
        }

        if lower.contains("500")
            || lower.contains("502")
            || lower.contains("503")
            || lower.contains("overloaded")
            || lower.contains("server error")
        {
            return Self::ServerError { message };
        }

        Self::ProcessFailed {
            exit_code,
            stderr: message,
        }
    }
}

/// LLM client backed by the `claude` CLI.
///
/// # Example
///
/// ```rust,ignore
/// use taskforge::llm::{ClaudeCliClient, LlmClient};
///
/// let client = ClaudeCliClient::new(".").with_model("sonnet");
/// let reply = client.run_prompt("List three tasks").await?;
/// ```
#[derive(Debug, Clone)]
pub struct ClaudeCliClient {
    /// Working directory for the CLI.
    project_dir: PathBuf,
    /// Executable name or path.
    command: String,
    /// Model variant passed via `--model`.
    model: String,
    /// Request timeout in seconds.
    timeout_secs: u64,
}

impl ClaudeCliClient {
    /// Default timeout for requests (5 minutes).
    pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

    #[must_use]
    pub fn new<P: Into<PathBuf>>(project_dir: P) -> Self {
        Self {
            project_dir: project_dir.into(),
            command: "claude".to_string(),
            model: "sonnet".to_string(),
            timeout_secs: Self::DEFAULT_TIMEOUT_SECS,
        }
    }

    /// Set the model variant to use (e.g. "opus", "sonnet").
    #[must_use]
    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    /// Use a different executable.
    #[must_use]
    pub fn with_command(mut self, command: &str) -> Self {
        self.command = command.to_string();
        self
    }

    /// Set the request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Whether the executable can be found.
    #[must_use]
    pub fn is_available(&self) -> bool {
        which::which(&self.command).is_ok()
    }

    async fn execute_cli(&self, prompt: &str) -> std::result::Result<String, ClaudeCliError> {
        if !self.is_available() {
            return Err(ClaudeCliError::CliNotFound {
                command: self.command.clone(),
            });
        }

        let args = [
            "-p",
            "--model",
            self.model.as_str(),
            "--output-format",
            "text",
        ];

        debug!(
            "Running {} with model {} ({} chars prompt)",
            self.command,
            self.model,
            prompt.len()
        );

        let mut child = match AsyncCommand::new(&self.command)
            .args(args)
            .current_dir(&self.project_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ClaudeCliError::CliNotFound {
                    command: self.command.clone(),
                });
            }
            Err(e) => {
                return Err(ClaudeCliError::ConnectionError {
                    message: format!("Failed to spawn {}: {e}", self.command),
                });
            }
        };

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(prompt.as_bytes())
                .await
                .map_err(|e| ClaudeCliError::ConnectionError {
                    message: format!("Failed to write prompt to stdin: {e}"),
                })?;
            drop(stdin);
        }

        let output = match tokio::time::timeout(
            Duration::from_secs(self.timeout_secs),
            child.wait_with_output(),
        )
        .await
        {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(ClaudeCliError::ConnectionError {
                    message: format!("Failed to read output: {e}"),
                });
            }
            Err(_) => {
                return Err(ClaudeCliError::Timeout {
                    timeout_secs: self.timeout_secs,
                });
            }
        };

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(ClaudeCliError::from_stderr(
                &stderr,
                output.status.code().unwrap_or(-1),
            ))
        }
    }
}

#[async_trait]
impl LlmClient for ClaudeCliClient {
    async fn run_prompt(&self, prompt: &str) -> Result<String> {
        Ok(self.execute_cli(prompt).await?)
    }

    fn model_name(&self) -> &str {
        match self.model.as_str() {
            "opus" => "claude-opus-4",
            "sonnet" => "claude-sonnet-4",
            "haiku" => "claude-haiku-3.5",
            other => other,
        }
    }
}
