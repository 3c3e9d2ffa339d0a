//! Post-commit hooks.
//!
//! Hooks run synchronously, in registration order, after every committed
//! store update. A hook sees the committed state read-only and may ask for
//! follow-up status changes by returning [`Cascade`]s. The store applies
//! cascades through a separate commit path:
//!
//! - cascades are only honoured for commits that came from an action
//! - cascade commits never produce further cascades
//! - hooks that return `false` from [`StoreHook::observes_cascades`] are not
//!   run for cascade commits at all
//!
//! so one logical change triggers at most one round of follow-ups.

use serde_json::json;
use tracing::{debug, info};

use super::debounce::WriteQueue;
use super::persistence::TaskFilePersistence;
use super::StoreState;
use crate::error::Result;
use crate::task::{ChangeRecord, EntityId, TaskStatus};

/// Where a commit came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    /// An action layer call
    Action,
    /// A follow-up requested by a hook
    Cascade,
    /// Loading the task file
    Load,
    Undo,
    Redo,
}

/// One status that differs between the pre- and post-commit state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub id: EntityId,
    pub from: TaskStatus,
    pub to: TaskStatus,
}

/// Description of a committed update, handed to every hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub origin: ChangeOrigin,
    pub description: String,
    /// Whether persisted data (tasks, meta, change history) changed
    pub touches_data: bool,
    pub status_changes: Vec<StatusChange>,
}

/// Follow-up mutation requested by a hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cascade {
    /// Move a task or subtask to a new status through the state machine.
    SetStatus {
        id: EntityId,
        status: TaskStatus,
        reason: String,
    },
}

/// Observer invoked after each commit.
pub trait StoreHook: Send {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Whether the hook runs for cascade commits.
    fn observes_cascades(&self) -> bool {
        true
    }

    /// React to a committed change.
    ///
    /// # Errors
    ///
    /// Errors are surfaced to the caller of the commit. The commit itself is
    /// not rolled back.
    fn after_commit(&mut self, change: &Change, state: &StoreState) -> Result<Vec<Cascade>>;
}

// ============================================================================
// Persistence
// ============================================================================

enum Sink {
    Immediate(TaskFilePersistence),
    Debounced(WriteQueue),
}

/// Writes the task file after each data change.
///
/// With a zero debounce window the write happens inside the commit, so
/// failures surface immediately. Otherwise the snapshot is queued on the
/// debounced writer and failures surface on close.
pub struct PersistenceHook {
    sink: Sink,
}

impl PersistenceHook {
    #[must_use]
    pub fn immediate(persistence: TaskFilePersistence) -> Self {
        Self {
            sink: Sink::Immediate(persistence),
        }
    }

    #[must_use]
    pub fn debounced(queue: WriteQueue) -> Self {
        Self {
            sink: Sink::Debounced(queue),
        }
    }
}

impl StoreHook for PersistenceHook {
    fn name(&self) -> &'static str {
        "persistence"
    }

    fn after_commit(&mut self, change: &Change, state: &StoreState) -> Result<Vec<Cascade>> {
        if change.origin == ChangeOrigin::Load || !change.touches_data {
            return Ok(Vec::new());
        }
        let file = state.to_task_file();
        match &self.sink {
            Sink::Immediate(persistence) => persistence.save(&file)?,
            Sink::Debounced(queue) => queue.submit(file)?,
        }
        Ok(Vec::new())
    }
}

// ============================================================================
// Auto-complete parent
// ============================================================================

/// Promotes a parent task to `done` once an action finishes its last open
/// subtask.
///
/// Only subtask changes made by actions trigger it; the promotion it
/// requests is a cascade, which this hook never observes.
#[derive(Debug, Default)]
pub struct AutoCompleteParentHook;

impl StoreHook for AutoCompleteParentHook {
    fn name(&self) -> &'static str {
        "auto-complete-parent"
    }

    fn observes_cascades(&self) -> bool {
        false
    }

    fn after_commit(&mut self, change: &Change, state: &StoreState) -> Result<Vec<Cascade>> {
        if change.origin != ChangeOrigin::Action {
            return Ok(Vec::new());
        }

        let mut parents: Vec<u32> = change
            .status_changes
            .iter()
            .filter(|c| c.id.is_subtask() && c.to == TaskStatus::Done)
            .map(|c| c.id.task)
            .collect();
        parents.sort_unstable();
        parents.dedup();

        let cascades = parents
            .into_iter()
            .filter_map(|id| state.tasks.iter().find(|t| t.id == id))
            .filter(|parent| {
                parent.all_subtasks_done()
                    && parent.status != TaskStatus::Done
                    && parent.status.can_transition_to(&TaskStatus::Done)
            })
            .map(|parent| {
                debug!("All subtasks of task {} done, promoting parent", parent.id);
                Cascade::SetStatus {
                    id: parent.entity_id(),
                    status: TaskStatus::Done,
                    reason: format!("Auto-completed task {} (all subtasks done)", parent.id),
                }
            })
            .collect();
        Ok(cascades)
    }
}

// ============================================================================
// Logging
// ============================================================================

/// Logs every commit at debug level and status changes at info.
#[derive(Debug, Default)]
pub struct LoggingHook;

impl StoreHook for LoggingHook {
    fn name(&self) -> &'static str {
        "logging"
    }

    fn after_commit(&mut self, change: &Change, state: &StoreState) -> Result<Vec<Cascade>> {
        debug!(
            "Committed {:?}: {} ({} tasks)",
            change.origin,
            change.description,
            state.tasks.len()
        );
        for status in &change.status_changes {
            info!("{}: {} -> {}", status.id, status.from, status.to);
        }
        Ok(Vec::new())
    }
}

/// Change log entry for a cascade.
pub(crate) fn cascade_record(id: EntityId, status: &TaskStatus, reason: &str) -> ChangeRecord {
    ChangeRecord::new(
        reason,
        json!({ "id": id.to_string(), "status": status.as_str() }),
    )
}
