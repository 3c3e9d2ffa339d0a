//! Project configuration.
//!
//! Settings live in `<project>/.taskforge/settings.json`. When a project has
//! no settings file, a user-level file at
//! `<config_dir>/taskforge/settings.json` is used instead; when neither
//! exists every field takes its default.
//!
//! # Example
//!
//! ```json
//! {
//!   "tasksFile": "tasks.json",
//!   "projectName": "billing-service",
//!   "defaultSubtasks": 4,
//!   "persistence": { "debounceMs": 200, "backup": true },
//!   "llm": { "model": "claude", "variant": "sonnet" }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::error::{IntoTaskforgeError, Result, TaskforgeError};
use crate::llm::LlmConfig;
use crate::task::Priority;

/// Directory holding project settings.
pub const SETTINGS_DIR: &str = ".taskforge";

/// Settings file name.
pub const SETTINGS_FILE: &str = "settings.json";

/// Upper bound for the debounce window.
pub const MAX_DEBOUNCE_MS: u64 = 10_000;

// ============================================================================
// Persistence Configuration
// ============================================================================

/// How the task file is written to disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistenceConfig {
    /// Changes within this window collapse into one write. 0 writes
    /// synchronously after every commit.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Copy the previous file to `<file>.bak` before overwriting it.
    #[serde(default = "default_true")]
    pub backup: bool,

    /// Attempts to take the `<file>.lock` lock before giving up.
    #[serde(default = "default_lock_retries")]
    pub lock_retries: u32,

    /// Attempts for a whole save before the error is surfaced.
    #[serde(default = "default_save_retries")]
    pub save_retries: u32,
}

fn default_debounce_ms() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

fn default_lock_retries() -> u32 {
    5
}

fn default_save_retries() -> u32 {
    3
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            backup: true,
            lock_retries: default_lock_retries(),
            save_retries: default_save_retries(),
        }
    }
}

impl PersistenceConfig {
    #[must_use]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Configuration suited to tests: synchronous writes, no backup.
    #[must_use]
    pub fn immediate() -> Self {
        Self {
            debounce_ms: 0,
            backup: false,
            ..Self::default()
        }
    }
}

// ============================================================================
// Project Configuration
// ============================================================================

/// Project configuration loaded from `.taskforge/settings.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectConfig {
    /// Task file, relative to the project directory unless absolute.
    #[serde(default = "default_tasks_file")]
    pub tasks_file: PathBuf,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,

    #[serde(default)]
    pub default_priority: Priority,

    /// Subtasks generated by `expand` when no count is given.
    #[serde(default = "default_subtasks")]
    pub default_subtasks: u32,

    /// Tasks generated by `parse-prd` when no count is given.
    #[serde(default = "default_tasks")]
    pub default_tasks: u32,

    /// Promote a parent to done once all its subtasks are done.
    #[serde(default = "default_true")]
    pub auto_complete_parent: bool,

    #[serde(default)]
    pub persistence: PersistenceConfig,

    #[serde(default)]
    pub llm: LlmConfig,
}

fn default_tasks_file() -> PathBuf {
    PathBuf::from("tasks.json")
}

fn default_subtasks() -> u32 {
    3
}

fn default_tasks() -> u32 {
    10
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            tasks_file: default_tasks_file(),
            project_name: None,
            default_priority: Priority::Medium,
            default_subtasks: default_subtasks(),
            default_tasks: default_tasks(),
            auto_complete_parent: true,
            persistence: PersistenceConfig::default(),
            llm: LlmConfig::default(),
        }
    }
}

impl ProjectConfig {
    /// Load configuration for a project directory.
    ///
    /// Falls back to the user-level settings file, then to defaults.
    ///
    /// # Errors
    ///
    /// Returns [`TaskforgeError::Config`] if a settings file exists but cannot
    /// be read or parsed, or if the loaded values fail validation.
    pub fn load(project_dir: &Path) -> Result<Self> {
        let candidates = std::iter::once(Self::settings_path(project_dir))
            .chain(Self::user_settings_path());

        for path in candidates {
            if path.exists() {
                debug!("Loading settings from {}", path.display());
                return Self::load_file(&path);
            }
        }

        Ok(Self::default())
    }

    /// Load and validate a specific settings file.
    ///
    /// # Errors
    ///
    /// Returns [`TaskforgeError::Config`] on read, parse, or validation failure.
    pub fn load_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            TaskforgeError::config_with_path(format!("failed to read: {e}"), path.to_path_buf())
        })?;
        let config: ProjectConfig = serde_json::from_str(&content).map_err(|e| {
            TaskforgeError::config_with_path(format!("failed to parse: {e}"), path.to_path_buf())
        })?;
        config
            .validate()
            .map_err(|msg| TaskforgeError::config_with_path(msg, path.to_path_buf()))?;
        Ok(config)
    }

    /// Write settings to the project's settings file.
    ///
    /// # Errors
    ///
    /// Returns [`TaskforgeError::Config`] if the file cannot be written.
    pub fn save(&self, project_dir: &Path) -> Result<PathBuf> {
        let path = Self::settings_path(project_dir);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).into_config()?;
        }
        let json = serde_json::to_string_pretty(self).into_config()?;
        std::fs::write(&path, json + "\n").into_config()?;
        Ok(path)
    }

    /// Get the settings.json path for a project
    pub fn settings_path(project_dir: &Path) -> PathBuf {
        project_dir.join(SETTINGS_DIR).join(SETTINGS_FILE)
    }

    /// Get the user-level settings path, if the platform has a config dir
    pub fn user_settings_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("taskforge").join(SETTINGS_FILE))
    }

    /// Resolve the task file for a project.
    ///
    /// `override_path` (from `--file`) wins over the configured file.
    #[must_use]
    pub fn tasks_path(&self, project_dir: &Path, override_path: Option<&Path>) -> PathBuf {
        let file = override_path.unwrap_or(&self.tasks_file);
        if file.is_absolute() {
            file.to_path_buf()
        } else {
            project_dir.join(file)
        }
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The LLM model or variant is not recognized
    /// - The LLM timeout is zero
    /// - The debounce window exceeds ten seconds
    /// - A default count is zero
    pub fn validate(&self) -> std::result::Result<(), String> {
        self.llm.validate()?;

        if self.persistence.debounce_ms > MAX_DEBOUNCE_MS {
            return Err(format!(
                "persistence.debounceMs is {} but must be at most {MAX_DEBOUNCE_MS}",
                self.persistence.debounce_ms
            ));
        }
        if self.default_subtasks == 0 {
            return Err("defaultSubtasks must be at least 1".to_string());
        }
        if self.default_tasks == 0 {
            return Err("defaultTasks must be at least 1".to_string());
        }
        Ok(())
    }
}
