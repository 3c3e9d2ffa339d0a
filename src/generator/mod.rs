//! AI-backed content generation.
//!
//! The action layer only sees the [`TaskGenerator`] trait: draft tasks from a
//! requirements document, draft subtasks for one task, and score task
//! complexity. [`LlmTaskGenerator`] implements it on top of any
//! [`LlmClient`] by prompting for a JSON array and parsing the reply.
//!
//! # Retry policy
//!
//! Transient failures (timeouts, rate limits, server errors, unparseable
//! replies) are retried with exponential backoff up to `max_retries` times.
//! Permanent failures (missing CLI, bad credentials) fail immediately.

use async_trait::async_trait;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::llm::{create_llm_client, ClaudeCliError, LlmClient, LlmConfig};
use crate::task::{Priority, Task};

// ============================================================================
// Errors
// ============================================================================

/// Failure of the generator collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GeneratorError {
    /// The backend cannot be used at all (not installed, bad credentials).
    #[error("AI generator unavailable: {message}")]
    Unavailable { message: String },

    /// The backend did not answer in time.
    #[error("AI generator timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// A request failed but may succeed if repeated.
    #[error("AI generator request failed: {message}")]
    Request { message: String },

    /// A request was refused and will not succeed if repeated.
    #[error("AI generator rejected the request: {message}")]
    Rejected { message: String },

    /// The reply did not contain the expected JSON.
    #[error("AI generator returned a malformed response: {message}")]
    MalformedResponse { message: String },

    /// The reply parsed but contained nothing.
    #[error("AI generator returned no {what}")]
    Empty { what: &'static str },
}

impl GeneratorError {
    /// Check if repeating the request might succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Request { .. } | Self::MalformedResponse { .. }
        )
    }

    /// Classify an error returned by an [`LlmClient`].
    pub fn from_client(err: &anyhow::Error) -> Self {
        match err.downcast_ref::<ClaudeCliError>() {
            Some(ClaudeCliError::CliNotFound { command }) => Self::Unavailable {
                message: format!(
                    "the '{command}' CLI is not installed or not in PATH. Install Claude Code \
                     or set \"llm\": {{\"command\": \"...\"}} in .taskforge/settings.json"
                ),
            },
            Some(ClaudeCliError::AuthenticationFailed { message }) => Self::Unavailable {
                message: format!("authentication failed ({message}). Log in with the claude CLI"),
            },
            Some(ClaudeCliError::Timeout { timeout_secs }) => Self::Timeout {
                timeout_secs: *timeout_secs,
            },
            Some(cli) if cli.is_retryable() => Self::Request {
                message: cli.to_string(),
            },
            Some(cli) => Self::Rejected {
                message: cli.to_string(),
            },
            None => Self::Request {
                message: format!("{err:#}"),
            },
        }
    }
}

// ============================================================================
// Drafts
// ============================================================================

fn lenient_ids<'de, D>(deserializer: D) -> Result<Vec<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Vec<serde_json::Value>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(raw
        .into_iter()
        .filter_map(|v| match v {
            serde_json::Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
        .collect())
}

/// A task proposed by the generator.
///
/// `id` and `dependencies` are local to the generated batch; the action
/// layer remaps them onto real task ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDraft {
    #[serde(default)]
    pub id: u32,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub test_strategy: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default, deserialize_with = "lenient_ids")]
    pub dependencies: Vec<u32>,
}

impl TaskDraft {
    /// Parsed priority; unknown spellings are ignored.
    #[must_use]
    pub fn priority(&self) -> Option<Priority> {
        self.priority.as_deref().and_then(|p| p.parse().ok())
    }
}

/// A subtask proposed by the generator.
///
/// `dependencies` are positions (1-based) of earlier drafts in the batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubtaskDraft {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub test_strategy: Option<String>,
    #[serde(default, deserialize_with = "lenient_ids")]
    pub dependencies: Vec<u32>,
}

/// Complexity score for one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplexityAssessment {
    pub task_id: u32,
    #[serde(alias = "complexityScore")]
    pub score: u8,
    #[serde(default)]
    pub recommended_subtasks: u32,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub expansion_prompt: Option<String>,
}

// ============================================================================
// Generator trait
// ============================================================================

/// Source of AI-generated content.
#[async_trait]
pub trait TaskGenerator: Send + Sync {
    /// Draft `count` tasks from a requirements document.
    async fn generate_tasks(
        &self,
        prd: &str,
        count: u32,
        research: bool,
    ) -> Result<Vec<TaskDraft>, GeneratorError>;

    /// Draft `count` subtasks for `task`.
    async fn generate_subtasks(
        &self,
        task: &Task,
        count: u32,
        context: Option<&str>,
        research: bool,
    ) -> Result<Vec<SubtaskDraft>, GeneratorError>;

    /// Score the complexity of each task.
    async fn analyze_complexity(
        &self,
        tasks: &[Task],
        research: bool,
    ) -> Result<Vec<ComplexityAssessment>, GeneratorError>;
}

// ============================================================================
// Backoff
// ============================================================================

/// Base backoff delay for retry attempts.
pub const RETRY_BACKOFF_BASE: Duration = Duration::from_millis(1000);

/// Maximum backoff delay.
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Exponential backoff for attempt `attempt` (1-indexed), capped at
/// [`MAX_BACKOFF`].
#[must_use]
pub fn calculate_backoff(base: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    base.saturating_mul(2u32.saturating_pow(exponent))
        .min(MAX_BACKOFF)
}

// ============================================================================
// Reply parsing
// ============================================================================

static FENCED_ARRAY: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json)?\s*(\[.*?\])\s*```").ok());

/// Pull the first JSON array out of a model reply.
///
/// Prefers a fenced code block; otherwise takes the outermost `[` ... `]`.
#[must_use]
pub fn extract_json_array(reply: &str) -> Option<&str> {
    if let Some(caps) = FENCED_ARRAY.as_ref().and_then(|re| re.captures(reply)) {
        if let Some(m) = caps.get(1) {
            return Some(m.as_str());
        }
    }
    let start = reply.find('[')?;
    let end = reply.rfind(']')?;
    (end > start).then(|| &reply[start..=end])
}

/// An element of a generated JSON array.
pub trait GeneratedItem: DeserializeOwned {
    /// Reject elements that cannot become a task or subtask.
    fn check(&self) -> Result<(), String> {
        Ok(())
    }
}

fn require_title(title: &str) -> Result<(), String> {
    if title.trim().is_empty() {
        Err("title is empty".to_string())
    } else {
        Ok(())
    }
}

impl GeneratedItem for TaskDraft {
    fn check(&self) -> Result<(), String> {
        require_title(&self.title)
    }
}

impl GeneratedItem for SubtaskDraft {
    fn check(&self) -> Result<(), String> {
        require_title(&self.title)
    }
}

impl GeneratedItem for ComplexityAssessment {}

fn parse_array<T: GeneratedItem>(reply: &str, what: &'static str) -> Result<Vec<T>, GeneratorError> {
    let json = extract_json_array(reply).ok_or_else(|| GeneratorError::MalformedResponse {
        message: format!("no JSON array of {what} found in reply"),
    })?;
    let items: Vec<T> =
        serde_json::from_str(json).map_err(|e| GeneratorError::MalformedResponse {
            message: format!("could not parse {what}: {e}"),
        })?;
    if items.is_empty() {
        return Err(GeneratorError::Empty { what });
    }
    for (i, item) in items.iter().enumerate() {
        item.check().map_err(|reason| GeneratorError::MalformedResponse {
            message: format!("{what} entry {}: {reason}", i + 1),
        })?;
    }
    Ok(items)
}

// ============================================================================
// Prompts
// ============================================================================

const RESEARCH_INSTRUCTIONS: &str = "Before answering, research current best practices, \
libraries and pitfalls for this kind of work, and reflect them in the details and test \
strategy of each item.";

fn research_suffix(research: bool) -> &'static str {
    if research {
        RESEARCH_INSTRUCTIONS
    } else {
        ""
    }
}

fn tasks_prompt(prd: &str, count: u32, research: bool) -> String {
    format!(
        "You are planning a software project. Break the requirements document below into \
exactly {count} implementation tasks, ordered so that dependencies come first.\n\
{research}\n\n\
Respond with ONLY a JSON array. Each element must look like:\n\
{{\"id\": 1, \"title\": \"...\", \"description\": \"...\", \"details\": \"...\", \
\"testStrategy\": \"...\", \"priority\": \"high|medium|low\", \"dependencies\": [ids of earlier tasks]}}\n\n\
Requirements document:\n{prd}",
        research = research_suffix(research),
    )
}

fn subtasks_prompt(task: &Task, count: u32, context: Option<&str>, research: bool) -> String {
    let mut prompt = format!(
        "Break the following task into exactly {count} subtasks.\n\n\
Task {id}: {title}\nDescription: {description}\n",
        id = task.id,
        title = task.title,
        description = task.description,
    );
    if let Some(details) = &task.details {
        prompt.push_str(&format!("Details: {details}\n"));
    }
    if let Some(expansion) = task.complexity.as_ref().and_then(|c| c.expansion_prompt.as_ref()) {
        prompt.push_str(&format!("Guidance: {expansion}\n"));
    }
    if let Some(context) = context {
        prompt.push_str(&format!("Additional context: {context}\n"));
    }
    prompt.push_str(research_suffix(research));
    prompt.push_str(
        "\n\nRespond with ONLY a JSON array. Each element must look like:\n\
{\"title\": \"...\", \"description\": \"...\", \"details\": \"...\", \"testStrategy\": \"...\", \
\"dependencies\": [1-based positions of earlier subtasks in this list]}",
    );
    prompt
}

fn complexity_prompt(tasks: &[Task], research: bool) -> String {
    let listing: Vec<String> = tasks
        .iter()
        .map(|t| format!("- Task {}: {} -- {}", t.id, t.title, t.description))
        .collect();
    format!(
        "Rate the implementation complexity of each task below on a scale of 1 (trivial) \
to 10 (very complex), and recommend how many subtasks it should be broken into.\n{research}\n\n\
{tasks}\n\n\
Respond with ONLY a JSON array. Each element must look like:\n\
{{\"taskId\": 1, \"score\": 5, \"recommendedSubtasks\": 3, \"reasoning\": \"...\", \
\"expansionPrompt\": \"...\"}}",
        research = research_suffix(research),
        tasks = listing.join("\n"),
    )
}

// ============================================================================
// LLM-backed generator
// ============================================================================

/// [`TaskGenerator`] that prompts an [`LlmClient`] for JSON.
pub struct LlmTaskGenerator {
    client: Box<dyn LlmClient>,
    research_client: Option<Box<dyn LlmClient>>,
    max_retries: u32,
    backoff_base: Duration,
}

impl LlmTaskGenerator {
    #[must_use]
    pub fn new(client: Box<dyn LlmClient>) -> Self {
        Self {
            client,
            research_client: None,
            max_retries: 2,
            backoff_base: RETRY_BACKOFF_BASE,
        }
    }

    /// Client used when research mode is requested.
    #[must_use]
    pub fn with_research_client(mut self, client: Box<dyn LlmClient>) -> Self {
        self.research_client = Some(client);
        self
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    /// Generator with a normal and a research client built from `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the LLM configuration is invalid.
    pub fn from_config(config: &LlmConfig, project_dir: &Path) -> anyhow::Result<Self> {
        let client = create_llm_client(config, project_dir, false)?;
        let research = create_llm_client(config, project_dir, true)?;
        Ok(Self::new(client)
            .with_research_client(research)
            .with_max_retries(config.max_retries))
    }

    fn client_for(&self, research: bool) -> &dyn LlmClient {
        match (&self.research_client, research) {
            (Some(client), true) => client.as_ref(),
            _ => self.client.as_ref(),
        }
    }

    async fn request<T: GeneratedItem>(
        &self,
        prompt: &str,
        research: bool,
        what: &'static str,
    ) -> Result<Vec<T>, GeneratorError> {
        let client = self.client_for(research);
        let mut attempt = 0;
        loop {
            attempt += 1;
            debug!(
                "Requesting {what} from {} (attempt {attempt})",
                client.model_name()
            );
            let result = match client.run_prompt(prompt).await {
                Ok(reply) => parse_array(&reply, what),
                Err(e) => Err(GeneratorError::from_client(&e)),
            };
            match result {
                Err(e) if e.is_transient() && attempt <= self.max_retries => {
                    let delay = calculate_backoff(self.backoff_base, attempt);
                    warn!("{e}; retrying in {}ms", delay.as_millis());
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }
}

#[async_trait]
impl TaskGenerator for LlmTaskGenerator {
    async fn generate_tasks(
        &self,
        prd: &str,
        count: u32,
        research: bool,
    ) -> Result<Vec<TaskDraft>, GeneratorError> {
        let prompt = tasks_prompt(prd, count, research);
        self.request(&prompt, research, "tasks").await
    }

    async fn generate_subtasks(
        &self,
        task: &Task,
        count: u32,
        context: Option<&str>,
        research: bool,
    ) -> Result<Vec<SubtaskDraft>, GeneratorError> {
        let prompt = subtasks_prompt(task, count, context, research);
        self.request(&prompt, research, "subtasks").await
    }

    async fn analyze_complexity(
        &self,
        tasks: &[Task],
        research: bool,
    ) -> Result<Vec<ComplexityAssessment>, GeneratorError> {
        if tasks.is_empty() {
            return Ok(Vec::new());
        }
        let prompt = complexity_prompt(tasks, research);
        self.request(&prompt, research, "complexity assessments")
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use std::sync::Arc;

    /// Shares a mock between the generator and the test body.
    struct Shared(Arc<MockLlmClient>);

    #[async_trait]
    impl LlmClient for Shared {
        async fn run_prompt(&self, prompt: &str) -> anyhow::Result<String> {
            self.0.run_prompt(prompt).await
        }

        fn model_name(&self) -> &str {
            self.0.model_name()
        }
    }

    fn generator(mock: &Arc<MockLlmClient>) -> LlmTaskGenerator {
        LlmTaskGenerator::new(Box::new(Shared(Arc::clone(mock))))
            .with_backoff_base(Duration::ZERO)
    }

    const TASKS_REPLY: &str = r#"Here is the plan:
```json
[
  {"id": 1, "title": "Set up repo", "description": "init", "priority": "High", "dependencies": []},
  {"id": 2, "title": "Add parser", "description": "parse", "dependencies": [1, "1", "x"]}
]
```"#;

    #[test]
    fn test_extract_json_array_fenced_and_bare() {
        assert_eq!(extract_json_array("```json\n[1,2]\n```"), Some("[1,2]"));
        assert_eq!(extract_json_array("sure: [1, 2] done"), Some("[1, 2]"));
        assert_eq!(extract_json_array("no array here"), None);
    }

    #[test]
    fn test_calculate_backoff_grows_and_caps() {
        let base = Duration::from_millis(1000);
        assert_eq!(calculate_backoff(base, 1), Duration::from_millis(1000));
        assert_eq!(calculate_backoff(base, 2), Duration::from_millis(2000));
        assert_eq!(calculate_backoff(base, 3), Duration::from_millis(4000));
        assert_eq!(calculate_backoff(base, 20), MAX_BACKOFF);
    }

    #[test]
    fn test_classify_missing_cli_as_unavailable() {
        let err = anyhow::Error::new(ClaudeCliError::CliNotFound {
            command: "claude".into(),
        });
        let classified = GeneratorError::from_client(&err);
        assert!(matches!(classified, GeneratorError::Unavailable { .. }));
        assert!(!classified.is_transient());
        assert!(classified.to_string().contains("settings.json"));
    }

    #[test]
    fn test_classify_plain_error_as_transient_request() {
        let err = anyhow::anyhow!("socket closed");
        assert!(GeneratorError::from_client(&err).is_transient());
    }

    #[tokio::test]
    async fn test_generate_tasks_parses_fenced_reply() {
        let mock = Arc::new(MockLlmClient::new().with_response(TASKS_REPLY));
        let drafts = generator(&mock)
            .generate_tasks("Build a CLI", 2, false)
            .await
            .unwrap();
        assert_eq!(drafts.len(), 2);
        assert_eq!(drafts[0].priority(), Some(Priority::High));
        assert_eq!(drafts[1].dependencies, vec![1, 1]);
        assert!(mock.prompts()[0].contains("Build a CLI"));
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let mock = Arc::new(
            MockLlmClient::new()
                .with_response(TASKS_REPLY)
                .with_fail_count(2, "server hiccup"),
        );
        let drafts = generator(&mock)
            .with_max_retries(2)
            .generate_tasks("prd", 2, false)
            .await
            .unwrap();
        assert_eq!(drafts.len(), 2);
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let mock = Arc::new(MockLlmClient::new().with_error("always down"));
        let err = generator(&mock)
            .with_max_retries(1)
            .generate_tasks("prd", 2, false)
            .await
            .unwrap_err();
        assert!(matches!(err, GeneratorError::Request { .. }));
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn test_malformed_reply_is_reported() {
        let mock = Arc::new(MockLlmClient::new().with_response("I cannot help with that"));
        let err = generator(&mock)
            .with_max_retries(0)
            .generate_tasks("prd", 2, false)
            .await
            .unwrap_err();
        assert!(matches!(err, GeneratorError::MalformedResponse { .. }));
    }

    #[tokio::test]
    async fn test_blank_titles_are_malformed() {
        let mock = Arc::new(MockLlmClient::new().with_response(r#"[{"title": "   "}, {"title": ""}]"#));
        let err = generator(&mock)
            .with_max_retries(0)
            .generate_tasks("prd", 2, false)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            GeneratorError::MalformedResponse {
                message: "tasks entry 1: title is empty".to_string()
            }
        );

        let mock = Arc::new(MockLlmClient::new().with_response(r#"[{"title": "Schema"}, {"title": " "}]"#));
        let err = generator(&mock)
            .with_max_retries(0)
            .generate_subtasks(&Task::new(1, "x"), 2, None, false)
            .await
            .unwrap_err();
        assert!(matches!(err, GeneratorError::MalformedResponse { .. }));
    }

    #[tokio::test]
    async fn test_empty_array_is_empty_error() {
        let mock = Arc::new(MockLlmClient::new().with_response("[]"));
        let task = Task::new(1, "x");
        let err = generator(&mock)
            .generate_subtasks(&task, 3, None, false)
            .await
            .unwrap_err();
        assert_eq!(err, GeneratorError::Empty { what: "subtasks" });
    }

    #[tokio::test]
    async fn test_research_uses_research_client_and_prompt() {
        let regular = Arc::new(MockLlmClient::new().with_response(r#"[{"title": "a"}]"#));
        let research = Arc::new(MockLlmClient::new().with_response(r#"[{"title": "b"}]"#));
        let gen = generator(&regular).with_research_client(Box::new(Shared(Arc::clone(&research))));

        let task = Task::new(4, "Cache layer");
        let drafts = gen
            .generate_subtasks(&task, 1, Some("use redis"), true)
            .await
            .unwrap();
        assert_eq!(drafts[0].title, "b");
        assert_eq!(regular.call_count(), 0);
        let prompt = &research.prompts()[0];
        assert!(prompt.contains("research current best practices"));
        assert!(prompt.contains("use redis"));
    }

    #[tokio::test]
    async fn test_analyze_complexity_accepts_alias() {
        let mock = Arc::new(MockLlmClient::new().with_response(
            r#"[{"taskId": 2, "complexityScore": 8, "recommendedSubtasks": 5, "reasoning": "big"}]"#,
        ));
        let tasks = vec![Task::new(2, "Migrate database")];
        let scores = generator(&mock)
            .analyze_complexity(&tasks, false)
            .await
            .unwrap();
        assert_eq!(scores[0].score, 8);
        assert_eq!(scores[0].recommended_subtasks, 5);
    }

    #[tokio::test]
    async fn test_analyze_complexity_of_nothing_skips_request() {
        let mock = Arc::new(MockLlmClient::new());
        let scores = generator(&mock).analyze_complexity(&[], false).await.unwrap();
        assert!(scores.is_empty());
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn test_from_config_with_missing_cli_is_unavailable() {
        let config = LlmConfig {
            command: "taskforge-test-missing-cli".to_string(),
            max_retries: 3,
            ..LlmConfig::default()
        };
        let generator = LlmTaskGenerator::from_config(&config, Path::new(".")).unwrap();
        let err = generator
            .generate_tasks("Build a tracker", 3, false)
            .await
            .unwrap_err();
        assert!(matches!(err, GeneratorError::Unavailable { .. }));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_from_config_rejects_unknown_model() {
        let config = LlmConfig {
            model: "gpt".to_string(),
            ..LlmConfig::default()
        };
        assert!(LlmTaskGenerator::from_config(&config, Path::new(".")).is_err());
    }
}
