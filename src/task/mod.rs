//! Task data model.
//!
//! This module defines everything persisted in the task file:
//!
//! ```text
//! TaskFile
//!   ├── meta: TaskMeta            (free-form, typed accessors)
//!   ├── tasks: Vec<Task>
//!   │     ├── dependencies: Vec<DependencyRef>
//!   │     └── subtasks: Vec<Subtask>
//!   └── changeHistory: Vec<ChangeRecord>
//! ```
//!
//! Task ids are unique among top-level tasks. Subtask ids are scoped to
//! their parent, so `5.2` and `6.2` are unrelated entities.

mod dependency;
pub mod status;

pub use dependency::{parse_id_list, DependencyRef, EntityId, ParseEntityIdError, TaskId};
pub use status::{
    can_transition, transition, transition_subtask, ParseStatusError, TaskStatus, Transitionable,
    CANONICAL_STATUSES,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::error::TaskforgeError;

/// Maximum number of `changeHistory` entries kept in the task file.
pub const MAX_CHANGE_HISTORY: usize = 200;

// ============================================================================
// Priority
// ============================================================================

/// Task priority. Ordered so that `High > Medium > Low`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            other => Err(format!(
                "Unknown priority '{other}'. Valid options: high, medium, low"
            )),
        }
    }
}

impl TryFrom<String> for Priority {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Priority> for String {
    fn from(value: Priority) -> Self {
        value.as_str().to_string()
    }
}

// ============================================================================
// Complexity
// ============================================================================

/// Complexity assessment attached by the complexity-analysis generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Complexity {
    /// 1 (trivial) to 10 (very complex)
    pub score: u8,
    pub recommended_subtasks: u32,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expansion_prompt: Option<String>,
}

// ============================================================================
// Subtask
// ============================================================================

/// A unit of work scoped to a parent task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subtask {
    pub id: u32,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: TaskStatus,
    /// Inherits the parent's priority when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(
        default,
        with = "dependency::subtask_deps",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub dependencies: Vec<DependencyRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_strategy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_changed_at: Option<DateTime<Utc>>,
}

impl Subtask {
    /// Create a pending subtask with no dependencies.
    #[must_use]
    pub fn new(id: u32, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            description: String::new(),
            status: TaskStatus::Pending,
            priority: None,
            dependencies: Vec::new(),
            details: None,
            test_strategy: None,
            status_changed_at: None,
        }
    }

    /// Priority of this subtask, falling back to its parent's.
    #[must_use]
    pub fn effective_priority(&self, parent: &Task) -> Priority {
        self.priority.unwrap_or(parent.priority)
    }
}

// ============================================================================
// Task
// ============================================================================

/// A top-level unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, with = "dependency::task_deps")]
    pub dependencies: Vec<DependencyRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_strategy: Option<String>,
    #[serde(default)]
    pub subtasks: Vec<Subtask>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complexity: Option<Complexity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_changed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a pending, medium-priority task with no dependencies.
    #[must_use]
    pub fn new(id: TaskId, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            description: String::new(),
            status: TaskStatus::Pending,
            priority: Priority::Medium,
            dependencies: Vec::new(),
            details: None,
            test_strategy: None,
            subtasks: Vec::new(),
            complexity: None,
            status_changed_at: None,
        }
    }

    #[must_use]
    pub fn entity_id(&self) -> EntityId {
        EntityId::task(self.id)
    }

    #[must_use]
    pub fn subtask(&self, id: u32) -> Option<&Subtask> {
        self.subtasks.iter().find(|s| s.id == id)
    }

    pub fn subtask_mut(&mut self, id: u32) -> Option<&mut Subtask> {
        self.subtasks.iter_mut().find(|s| s.id == id)
    }

    /// Id the next appended subtask should receive.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the largest subtask id is `u32::MAX`.
    pub fn next_subtask_id(&self) -> Result<u32, TaskforgeError> {
        let max = self.subtasks.iter().map(|s| s.id).max().unwrap_or(0);
        max.checked_add(1).ok_or_else(|| {
            TaskforgeError::validation(format!("task {} has no free subtask ids", self.id))
        })
    }

    /// Rewrite `"N.M"` references to this task's own subtasks as sibling
    /// references inside subtask dependency lists.
    pub fn normalize_dependencies(&mut self) {
        let parent = self.id;
        for sub in &mut self.subtasks {
            for dep in &mut sub.dependencies {
                if let DependencyRef::Subtask { task, subtask } = *dep {
                    if task == parent {
                        *dep = DependencyRef::Sibling(subtask);
                    }
                }
            }
        }
    }

    /// Whether every subtask is done. False when there are no subtasks.
    #[must_use]
    pub fn all_subtasks_done(&self) -> bool {
        !self.subtasks.is_empty() && self.subtasks.iter().all(|s| s.status == TaskStatus::Done)
    }
}

/// Look up a task or subtask status by entity id.
#[must_use]
pub fn status_of<'a>(tasks: &'a [Task], id: EntityId) -> Option<&'a TaskStatus> {
    let task = tasks.iter().find(|t| t.id == id.task)?;
    match id.subtask {
        Some(sub) => task.subtask(sub).map(|s| &s.status),
        None => Some(&task.status),
    }
}

/// Check whether a task or subtask exists.
#[must_use]
pub fn entity_exists(tasks: &[Task], id: EntityId) -> bool {
    status_of(tasks, id).is_some()
}

/// Next free top-level id: `max + 1`, or `1` for an empty list.
///
/// # Errors
///
/// Returns a validation error if the largest id is already `u32::MAX`.
pub fn next_task_id(tasks: &[Task]) -> Result<TaskId, TaskforgeError> {
    let max = tasks.iter().map(|t| t.id).max().unwrap_or(0);
    max.checked_add(1)
        .ok_or_else(|| TaskforgeError::validation(format!("no task ids left after {max}")))
}

// ============================================================================
// Metadata and change history
// ============================================================================

/// Free-form project metadata. Unknown keys survive a load/save cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskMeta(Map<String, Value>);

impl TaskMeta {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    #[must_use]
    pub fn project_name(&self) -> Option<&str> {
        self.get_str("projectName")
    }

    #[must_use]
    pub fn version(&self) -> Option<&str> {
        self.get_str("version")
    }

    #[must_use]
    pub fn source_file(&self) -> Option<&str> {
        self.get_str("sourceFile")
    }

    #[must_use]
    pub fn generated_at(&self) -> Option<&str> {
        self.get_str("generatedAt")
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

/// One entry of the persisted `changeHistory` log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub timestamp: DateTime<Utc>,
    pub description: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub details: Value,
}

impl ChangeRecord {
    #[must_use]
    pub fn new(description: impl Into<String>, details: Value) -> Self {
        Self {
            timestamp: Utc::now(),
            description: description.into(),
            details,
        }
    }
}

/// On-disk layout of the task file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskFile {
    #[serde(default)]
    pub meta: TaskMeta,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub change_history: Vec<ChangeRecord>,
}
