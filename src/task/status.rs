//! Task status types and transitions.
//!
//! This module contains the status state machine shared by tasks and subtasks:
//! - [`TaskStatus`] - Current status of a task or subtask
//! - [`transition`] / [`transition_subtask`] - Pure, validated status changes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use super::{EntityId, Subtask, Task, TaskId};
use crate::error::{Result, TaskforgeError};

// ============================================================================
// Task Status
// ============================================================================

/// Current status of a task or subtask.
///
/// # State Transitions
///
/// - `Pending` -> `InProgress` | `Done` | `Deferred` | `Cancelled`
/// - `InProgress` -> `Done` | `Pending` | `Deferred` | `Review` | `Cancelled`
/// - `Review` -> `InProgress` | `Done` | `Pending`
/// - `Deferred` -> `Pending` | `InProgress` | `Cancelled`
/// - `Cancelled` -> `Pending`
/// - `Done` -> `Pending` (reopen)
///
/// Staying in the same status is always allowed. `Custom` statuses can be
/// entered from and left to any status.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TaskStatus {
    /// Not started yet
    #[default]
    Pending,
    /// Currently being worked on
    InProgress,
    /// Submitted for review
    Review,
    /// Finished
    Done,
    /// Postponed
    Deferred,
    /// Abandoned
    Cancelled,
    /// Project-specific status outside the canonical set
    Custom(String),
}

/// The canonical (non-custom) statuses in display order.
pub const CANONICAL_STATUSES: [TaskStatus; 6] = [
    TaskStatus::Pending,
    TaskStatus::InProgress,
    TaskStatus::Review,
    TaskStatus::Done,
    TaskStatus::Deferred,
    TaskStatus::Cancelled,
];

impl TaskStatus {
    /// Create a custom status.
    #[must_use]
    pub fn custom(name: impl Into<String>) -> Self {
        TaskStatus::Custom(name.into())
    }

    /// The on-disk spelling of this status.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in-progress",
            TaskStatus::Review => "review",
            TaskStatus::Done => "done",
            TaskStatus::Deferred => "deferred",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Custom(name) => name,
        }
    }

    /// Check if this status can transition to the target status.
    ///
    /// # Example
    ///
    /// ```
    /// use taskforge::task::TaskStatus;
    ///
    /// assert!(TaskStatus::Pending.can_transition_to(&TaskStatus::InProgress));
    /// assert!(!TaskStatus::Done.can_transition_to(&TaskStatus::InProgress));
    /// assert!(TaskStatus::Done.can_transition_to(&TaskStatus::Done));
    /// ```
    #[must_use]
    pub fn can_transition_to(&self, target: &TaskStatus) -> bool {
        use TaskStatus::*;
        if self == target {
            return true;
        }
        matches!(
            (self, target),
            (Custom(_), _) | (_, Custom(_)) |
            // From Pending
            (Pending, InProgress) | (Pending, Done) | (Pending, Deferred) | (Pending, Cancelled) |
            // From InProgress
            (InProgress, Done) | (InProgress, Pending) | (InProgress, Deferred) |
            (InProgress, Review) | (InProgress, Cancelled) |
            // From Review
            (Review, InProgress) | (Review, Done) | (Review, Pending) |
            // From Deferred
            (Deferred, Pending) | (Deferred, InProgress) | (Deferred, Cancelled) |
            // From Cancelled
            (Cancelled, Pending) |
            // From Done
            (Done, Pending)
        )
    }

    /// Check if this status counts as finished work.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Cancelled)
    }

    /// Check if this status represents active work.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, TaskStatus::InProgress | TaskStatus::Review)
    }

    /// Check if this is one of the built-in statuses.
    #[must_use]
    pub fn is_canonical(&self) -> bool {
        !matches!(self, TaskStatus::Custom(_))
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stored values are matched without regard to case, so a hand-edited
/// `"Done"` still loads as [`TaskStatus::Done`]. Anything else is kept
/// verbatim as a custom status.
impl From<String> for TaskStatus {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => TaskStatus::Pending,
            "in-progress" => TaskStatus::InProgress,
            "review" => TaskStatus::Review,
            "done" => TaskStatus::Done,
            "deferred" => TaskStatus::Deferred,
            "cancelled" => TaskStatus::Cancelled,
            _ => TaskStatus::Custom(value),
        }
    }
}

impl From<TaskStatus> for String {
    fn from(value: TaskStatus) -> Self {
        match value {
            TaskStatus::Custom(name) => name,
            other => other.as_str().to_string(),
        }
    }
}

/// Error returned when user input does not name a known status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown status '{0}'. Valid options: pending, in-progress, review, done, deferred, cancelled, or custom:<name>")]
pub struct ParseStatusError(String);

impl FromStr for TaskStatus {
    type Err = ParseStatusError;

    /// Parse user input. Accepts common aliases; custom statuses must be
    /// spelled `custom:<name>` so typos are not silently accepted.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Some(name) = trimmed.strip_prefix("custom:") {
            let name = name.trim();
            if name.is_empty() {
                return Err(ParseStatusError(s.to_string()));
            }
            return Ok(TaskStatus::from(name.to_string()));
        }
        match trimmed.to_lowercase().as_str() {
            "pending" | "todo" => Ok(TaskStatus::Pending),
            "in-progress" | "in_progress" | "inprogress" | "active" => Ok(TaskStatus::InProgress),
            "review" | "in-review" => Ok(TaskStatus::Review),
            "done" | "complete" | "completed" => Ok(TaskStatus::Done),
            "deferred" => Ok(TaskStatus::Deferred),
            "cancelled" | "canceled" => Ok(TaskStatus::Cancelled),
            _ => Err(ParseStatusError(s.to_string())),
        }
    }
}

// ============================================================================
// Transitions
// ============================================================================

/// Something that carries a status governed by the state machine.
pub trait Transitionable: Clone {
    /// Current status.
    fn status(&self) -> &TaskStatus;

    /// Overwrite the status and stamp the transition time.
    fn apply_status(&mut self, status: TaskStatus, at: DateTime<Utc>);
}

impl Transitionable for Task {
    fn status(&self) -> &TaskStatus {
        &self.status
    }

    fn apply_status(&mut self, status: TaskStatus, at: DateTime<Utc>) {
        self.status = status;
        self.status_changed_at = Some(at);
    }
}

impl Transitionable for Subtask {
    fn status(&self) -> &TaskStatus {
        &self.status
    }

    fn apply_status(&mut self, status: TaskStatus, at: DateTime<Utc>) {
        self.status = status;
        self.status_changed_at = Some(at);
    }
}

/// Check whether a status change is legal.
#[must_use]
pub fn can_transition(from: &TaskStatus, to: &TaskStatus) -> bool {
    from.can_transition_to(to)
}

fn apply<T: Transitionable>(item: &T, id: EntityId, to: TaskStatus) -> Result<T> {
    if !item.status().can_transition_to(&to) {
        return Err(TaskforgeError::InvalidTransition {
            id,
            from: item.status().clone(),
            to,
        });
    }
    let mut next = item.clone();
    next.apply_status(to, Utc::now());
    Ok(next)
}

/// Return a copy of `task` moved to status `to`.
///
/// The input is never modified, so callers decide when to commit the result.
///
/// # Errors
///
/// Returns [`TaskforgeError::InvalidTransition`] if the state machine rejects
/// the change.
///
/// # Example
///
/// ```
/// use taskforge::task::{transition, Task, TaskStatus};
///
/// let task = Task::new(1, "Write parser");
/// let started = transition(&task, TaskStatus::InProgress).unwrap();
/// assert_eq!(started.status, TaskStatus::InProgress);
/// assert_eq!(task.status, TaskStatus::Pending);
/// ```
pub fn transition(task: &Task, to: TaskStatus) -> Result<Task> {
    apply(task, EntityId::task(task.id), to)
}

/// Return a copy of `subtask` (owned by `parent`) moved to status `to`.
///
/// # Errors
///
/// Returns [`TaskforgeError::InvalidTransition`] if the state machine rejects
/// the change.
pub fn transition_subtask(parent: TaskId, subtask: &Subtask, to: TaskStatus) -> Result<Subtask> {
    apply(subtask, EntityId::subtask(parent, subtask.id), to)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn all_statuses() -> Vec<TaskStatus> {
        let mut statuses = CANONICAL_STATUSES.to_vec();
        statuses.push(TaskStatus::custom("blocked-on-legal"));
        statuses
    }

    #[test]
    fn test_status_default() {
        assert_eq!(TaskStatus::default(), TaskStatus::Pending);
    }

    #[test]
    fn test_status_display() {
        assert_eq!(TaskStatus::Pending.to_string(), "pending");
        assert_eq!(TaskStatus::InProgress.to_string(), "in-progress");
        assert_eq!(TaskStatus::Done.to_string(), "done");
        assert_eq!(TaskStatus::custom("qa").to_string(), "qa");
    }

    #[test]
    fn test_same_status_is_always_allowed() {
        for status in all_statuses() {
            assert!(
                can_transition(&status, &status),
                "{status} -> {status} should be allowed"
            );
        }
    }

    #[test]
    fn test_transitions_from_pending() {
        let from = TaskStatus::Pending;
        assert!(from.can_transition_to(&TaskStatus::InProgress));
        assert!(from.can_transition_to(&TaskStatus::Done));
        assert!(from.can_transition_to(&TaskStatus::Deferred));
        assert!(!from.can_transition_to(&TaskStatus::Review));
    }

    #[test]
    fn test_transitions_from_in_progress() {
        let from = TaskStatus::InProgress;
        assert!(from.can_transition_to(&TaskStatus::Done));
        assert!(from.can_transition_to(&TaskStatus::Pending));
        assert!(from.can_transition_to(&TaskStatus::Deferred));
        assert!(from.can_transition_to(&TaskStatus::Review));
    }

    #[test]
    fn test_transitions_from_deferred() {
        let from = TaskStatus::Deferred;
        assert!(from.can_transition_to(&TaskStatus::Pending));
        assert!(from.can_transition_to(&TaskStatus::InProgress));
        assert!(!from.can_transition_to(&TaskStatus::Done));
    }

    #[test]
    fn test_done_only_reopens_to_pending() {
        let from = TaskStatus::Done;
        assert!(from.can_transition_to(&TaskStatus::Pending));
        assert!(!from.can_transition_to(&TaskStatus::InProgress));
        assert!(!from.can_transition_to(&TaskStatus::Deferred));
        assert!(!from.can_transition_to(&TaskStatus::Review));
    }

    #[test]
    fn test_custom_status_is_permissive() {
        let custom = TaskStatus::custom("waiting-on-vendor");
        assert!(TaskStatus::Done.can_transition_to(&custom));
        assert!(custom.can_transition_to(&TaskStatus::Review));
    }

    #[test]
    fn test_status_serialize() {
        let json = serde_json::to_string(&TaskStatus::InProgress).unwrap();
        assert_eq!(json, "\"in-progress\"");
        let json = serde_json::to_string(&TaskStatus::custom("qa")).unwrap();
        assert_eq!(json, "\"qa\"");
    }

    #[test]
    fn test_status_deserialize_unknown_becomes_custom() {
        let status: TaskStatus = serde_json::from_str("\"blocked\"").unwrap();
        assert_eq!(status, TaskStatus::custom("blocked"));
        let status: TaskStatus = serde_json::from_str("\"deferred\"").unwrap();
        assert_eq!(status, TaskStatus::Deferred);
    }

    #[test]
    fn test_stored_status_ignores_case() {
        let status: TaskStatus = serde_json::from_str("\"Done\"").unwrap();
        assert_eq!(status, TaskStatus::Done);
        let status: TaskStatus = serde_json::from_str("\"In-Progress\"").unwrap();
        assert_eq!(status, TaskStatus::InProgress);
        let status: TaskStatus = serde_json::from_str("\"Blocked\"").unwrap();
        assert_eq!(status, TaskStatus::custom("Blocked"));
    }

    #[test]
    fn test_parse_aliases() {
        assert_eq!("in_progress".parse::<TaskStatus>(), Ok(TaskStatus::InProgress));
        assert_eq!("Completed".parse::<TaskStatus>(), Ok(TaskStatus::Done));
        assert_eq!(
            "custom:qa".parse::<TaskStatus>(),
            Ok(TaskStatus::custom("qa"))
        );
        assert!("dne".parse::<TaskStatus>().is_err());
        assert!("custom:".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn test_transition_is_pure() {
        let task = Task::new(3, "Design schema");
        let done = transition(&task, TaskStatus::Done).unwrap();
        assert_eq!(done.status, TaskStatus::Done);
        assert!(done.status_changed_at.is_some());
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.status_changed_at.is_none());
    }

    #[test]
    fn test_transition_rejects_illegal_change() {
        let mut task = Task::new(3, "Design schema");
        task.status = TaskStatus::Done;
        let err = transition(&task, TaskStatus::Deferred).unwrap_err();
        assert!(matches!(
            err,
            TaskforgeError::InvalidTransition {
                from: TaskStatus::Done,
                to: TaskStatus::Deferred,
                ..
            }
        ));
    }

    #[test]
    fn test_transition_subtask_reports_composite_id() {
        let mut subtask = Subtask::new(2, "Write migration");
        subtask.status = TaskStatus::Done;
        let err = transition_subtask(9, &subtask, TaskStatus::InProgress).unwrap_err();
        assert!(err.to_string().contains("9.2"));
    }
}
