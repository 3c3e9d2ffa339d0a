//! LLM client abstraction layer.
//!
//! The [`LlmClient`] trait is the seam between the task generator and a
//! concrete model backend. It is:
//!
//! - **Object-safe**: used as `Box<dyn LlmClient>`
//! - **Thread-safe**: `Send + Sync` bounds
//! - **Async**: prompts run without blocking the runtime
//!
//! [`ClaudeCliClient`] drives the `claude` CLI; [`MockLlmClient`] returns
//! scripted replies for tests.

mod claude;

pub use claude::{ClaudeCliClient, ClaudeCliError};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;

/// Abstraction for LLM client operations.
///
/// # Example
///
/// ```rust,ignore
/// use taskforge::llm::LlmClient;
///
/// async fn ask(client: &dyn LlmClient, prompt: &str) -> anyhow::Result<String> {
///     println!("Using model: {}", client.model_name());
///     client.run_prompt(prompt).await
/// }
/// ```
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Run a prompt and return the model's response.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The backend is not installed or unreachable
    /// - Authentication fails
    /// - The request times out
    async fn run_prompt(&self, prompt: &str) -> Result<String>;

    /// Get the name of the model being used.
    fn model_name(&self) -> &str;
}

// =============================================================================
// Mock client
// =============================================================================

/// Scripted stand-in for a model backend.
///
/// Each call pops the next scripted reply; when the script runs out the
/// fixed response (or the permanent error, if one is set) is used. Every
/// prompt is recorded so tests can inspect what was sent.
///
/// ```rust,ignore
/// use taskforge::llm::MockLlmClient;
///
/// let client = MockLlmClient::new()
///     .with_response("[]")
///     .with_fail_count(1, "503 service unavailable");
/// ```
#[derive(Debug)]
pub struct MockLlmClient {
    model: String,
    fallback: std::result::Result<String, String>,
    script: Mutex<VecDeque<std::result::Result<String, String>>>,
    prompts: Mutex<Vec<String>>,
}

impl Default for MockLlmClient {
    fn default() -> Self {
        Self {
            model: "mock-llm".to_string(),
            fallback: Ok(String::new()),
            script: Mutex::new(VecDeque::new()),
            prompts: Mutex::new(Vec::new()),
        }
    }
}

impl MockLlmClient {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply returned once the script is exhausted.
    #[must_use]
    pub fn with_response(mut self, response: &str) -> Self {
        self.fallback = Ok(response.to_string());
        self
    }

    /// Queue one reply after those already scripted.
    #[must_use]
    pub fn then_respond(self, response: &str) -> Self {
        self.push_back(Ok(response.to_string()));
        self
    }

    /// Fail every unscripted call with `error`.
    #[must_use]
    pub fn with_error(mut self, error: &str) -> Self {
        self.fallback = Err(error.to_string());
        self
    }

    #[must_use]
    pub fn with_model_name(mut self, name: &str) -> Self {
        self.model = name.to_string();
        self
    }

    /// Fail the next `count` calls with `error` before anything scripted.
    #[must_use]
    pub fn with_fail_count(self, count: u32, error: &str) -> Self {
        if let Ok(mut script) = self.script.lock() {
            for _ in 0..count {
                script.push_front(Err(error.to_string()));
            }
        }
        self
    }

    fn push_back(&self, reply: std::result::Result<String, String>) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(reply);
        }
    }

    pub fn call_count(&self) -> u32 {
        self.prompts
            .lock()
            .map_or(0, |p| u32::try_from(p.len()).unwrap_or(u32::MAX))
    }

    /// Prompts received so far, oldest first.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn run_prompt(&self, prompt: &str) -> Result<String> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
        match next.unwrap_or_else(|| self.fallback.clone()) {
            Ok(reply) => Ok(reply),
            Err(message) => Err(anyhow::anyhow!(message)),
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

// =============================================================================
// LLM Configuration
// =============================================================================

/// Models this build can talk to.
pub const VALID_MODELS: [&str; 1] = ["claude"];

/// Claude variants accepted by the CLI.
pub const CLAUDE_VARIANTS: [&str; 3] = ["opus", "sonnet", "haiku"];

/// Configuration for the LLM backend.
///
/// Loaded from the `llm` section of `.taskforge/settings.json`.
///
/// # Example settings.json
///
/// ```json
/// {
///   "llm": {
///     "model": "claude",
///     "variant": "sonnet",
///     "researchVariant": "opus",
///     "timeoutSecs": 120
///   }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmConfig {
    /// The LLM backend to use. Default: "claude".
    #[serde(default = "default_model")]
    pub model: String,

    /// Model variant for regular requests. Default: "sonnet".
    #[serde(default = "default_variant")]
    pub variant: String,

    /// Model variant used when research mode is requested. Default: "opus".
    #[serde(default = "default_research_variant")]
    pub research_variant: String,

    /// Executable to run. Default: "claude".
    #[serde(default = "default_command")]
    pub command: String,

    /// Per-request timeout. Default: 300.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Retries for transient failures. Default: 2.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_model() -> String {
    "claude".to_string()
}

fn default_variant() -> String {
    "sonnet".to_string()
}

fn default_research_variant() -> String {
    "opus".to_string()
}

fn default_command() -> String {
    "claude".to_string()
}

fn default_timeout_secs() -> u64 {
    ClaudeCliClient::DEFAULT_TIMEOUT_SECS
}

fn default_max_retries() -> u32 {
    2
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            variant: default_variant(),
            research_variant: default_research_variant(),
            command: default_command(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

impl LlmConfig {
    /// Validate the LLM configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The model name is not recognized
    /// - A variant is not recognized
    /// - The timeout is zero
    pub fn validate(&self) -> std::result::Result<(), String> {
        if !VALID_MODELS.contains(&self.model.as_str()) {
            return Err(format!(
                "Invalid model '{}'. Valid options: {}",
                self.model,
                VALID_MODELS.join(", ")
            ));
        }

        for (field, variant) in [
            ("variant", &self.variant),
            ("researchVariant", &self.research_variant),
        ] {
            if !CLAUDE_VARIANTS.contains(&variant.as_str()) {
                return Err(format!(
                    "Invalid Claude {field} '{variant}'. Valid options: {}",
                    CLAUDE_VARIANTS.join(", ")
                ));
            }
        }

        if self.timeout_secs == 0 {
            return Err("llm.timeoutSecs must be greater than zero".to_string());
        }

        if self.command.trim().is_empty() {
            return Err("llm.command must not be empty".to_string());
        }

        Ok(())
    }
}

/// Create an LLM client based on configuration.
///
/// `research` selects the research variant.
///
/// # Errors
///
/// Returns an error if the configuration is invalid.
pub fn create_llm_client(
    config: &LlmConfig,
    project_dir: &Path,
    research: bool,
) -> Result<Box<dyn LlmClient>> {
    config.validate().map_err(|e| anyhow::anyhow!("{}", e))?;

    let variant = if research {
        &config.research_variant
    } else {
        &config.variant
    };

    match config.model.as_str() {
        "claude" => Ok(Box::new(
            ClaudeCliClient::new(project_dir)
                .with_command(&config.command)
                .with_model(variant)
                .with_timeout(config.timeout_secs),
        )),
        other => anyhow::bail!(
            "Unknown model '{}'. Valid options: {}",
            other,
            VALID_MODELS.join(", ")
        ),
    }
}
