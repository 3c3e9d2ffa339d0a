//! In-memory task store.
//!
//! [`TaskStore`] owns the canonical task list and metadata. Reads go through
//! non-mutating accessors; every write is a single commit through
//! [`TaskStore::set_state`], which records undo history, runs the
//! post-commit hooks, and applies any cascades they request.
//!
//! # Lifecycle
//!
//! ```rust,ignore
//! let mut store = TaskStore::open(StoreOptions::from_config(&config, path))?;
//! // ... actions ...
//! store.close().await?; // flushes the debounced writer
//! ```

mod debounce;
pub mod history;
pub mod hooks;
pub mod persistence;

pub use debounce::{DebouncedWriter, WriteQueue};
pub use history::{History, Snapshot, HISTORY_CAPACITY};
pub use hooks::{
    AutoCompleteParentHook, Cascade, Change, ChangeOrigin, LoggingHook, PersistenceHook,
    StatusChange, StoreHook,
};
pub use persistence::TaskFilePersistence;

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::config::{PersistenceConfig, ProjectConfig};
use crate::error::{Result, TaskforgeError};
use crate::task::{
    status_of, transition, transition_subtask, ChangeRecord, EntityId, Subtask, Task, TaskFile,
    TaskId, TaskMeta, TaskStatus, MAX_CHANGE_HISTORY,
};

// ============================================================================
// State
// ============================================================================

/// Everything the store holds.
///
/// `loading`, `error` and `last_updated` are bookkeeping and never reach the
/// task file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreState {
    pub tasks: Vec<Task>,
    pub meta: TaskMeta,
    pub change_history: Vec<ChangeRecord>,
    /// Task the UI is focused on, by id
    pub current_task: Option<TaskId>,
    pub loading: bool,
    pub error: Option<String>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl StoreState {
    /// The persisted part of the state.
    #[must_use]
    pub fn to_task_file(&self) -> TaskFile {
        TaskFile {
            meta: self.meta.clone(),
            tasks: self.tasks.clone(),
            change_history: self.change_history.clone(),
        }
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            tasks: self.tasks.clone(),
            meta: self.meta.clone(),
        }
    }
}

/// Partial update merged into the state by [`TaskStore::set_state`].
#[derive(Debug, Clone, Default)]
pub struct StatePatch {
    tasks: Option<Vec<Task>>,
    meta: Option<TaskMeta>,
    change_history: Option<Vec<ChangeRecord>>,
    current_task: Option<Option<TaskId>>,
    error: Option<Option<String>>,
    record: Option<ChangeRecord>,
}

impl StatePatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn tasks(mut self, tasks: Vec<Task>) -> Self {
        self.tasks = Some(tasks);
        self
    }

    #[must_use]
    pub fn meta(mut self, meta: TaskMeta) -> Self {
        self.meta = Some(meta);
        self
    }

    /// Replace the whole change log.
    #[must_use]
    pub fn change_history(mut self, history: Vec<ChangeRecord>) -> Self {
        self.change_history = Some(history);
        self
    }

    #[must_use]
    pub fn current_task(mut self, id: Option<TaskId>) -> Self {
        self.current_task = Some(id);
        self
    }

    #[must_use]
    pub fn error(mut self, error: Option<String>) -> Self {
        self.error = Some(error);
        self
    }

    /// Append one entry to the change log.
    #[must_use]
    pub fn record(mut self, record: ChangeRecord) -> Self {
        self.record = Some(record);
        self
    }

    fn touches_data(&self) -> bool {
        self.tasks.is_some()
            || self.meta.is_some()
            || self.change_history.is_some()
            || self.record.is_some()
    }
}

/// How a commit is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitOptions {
    /// Snapshot the pre-commit state for undo
    pub record_history: bool,
    pub origin: ChangeOrigin,
}

impl Default for CommitOptions {
    fn default() -> Self {
        Self {
            record_history: true,
            origin: ChangeOrigin::Action,
        }
    }
}

impl CommitOptions {
    /// An action commit that is not undoable.
    #[must_use]
    pub fn without_history() -> Self {
        Self {
            record_history: false,
            ..Self::default()
        }
    }

    fn internal(origin: ChangeOrigin) -> Self {
        Self {
            record_history: false,
            origin,
        }
    }
}

/// Construction parameters for [`TaskStore`].
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Default load/save target
    pub path: PathBuf,
    pub persistence: PersistenceConfig,
    /// Register [`AutoCompleteParentHook`]
    pub auto_complete_parent: bool,
    /// Register [`PersistenceHook`]
    pub persist: bool,
}

impl StoreOptions {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            persistence: PersistenceConfig::default(),
            auto_complete_parent: true,
            persist: true,
        }
    }

    /// A store that never touches the file system unless asked to.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            persist: false,
            ..Self::new("tasks.json")
        }
    }

    /// Options for `path` using the project's persistence settings.
    #[must_use]
    pub fn from_config(config: &ProjectConfig, path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            persistence: config.persistence.clone(),
            auto_complete_parent: config.auto_complete_parent,
            persist: true,
        }
    }

    #[must_use]
    pub fn with_persistence(mut self, persistence: PersistenceConfig) -> Self {
        self.persistence = persistence;
        self
    }

    #[must_use]
    pub fn with_auto_complete_parent(mut self, enabled: bool) -> Self {
        self.auto_complete_parent = enabled;
        self
    }
}

// ============================================================================
// Store
// ============================================================================

/// Canonical holder of all task data.
pub struct TaskStore {
    state: StoreState,
    history: History,
    hooks: Vec<Box<dyn StoreHook>>,
    persistence: TaskFilePersistence,
    writer: Option<DebouncedWriter>,
    persist: bool,
}

impl std::fmt::Debug for TaskStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskStore")
            .field("path", &self.persistence.path())
            .field("tasks", &self.state.tasks.len())
            .field("history", &self.history.len())
            .field(
                "hooks",
                &self.hooks.iter().map(|h| h.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl TaskStore {
    /// Build an empty store and register the built-in hooks.
    ///
    /// A non-zero debounce window needs a tokio runtime for the background
    /// writer. Outside a runtime the store falls back to immediate writes.
    #[must_use]
    pub fn new(options: StoreOptions) -> Self {
        let persistence = TaskFilePersistence::new(&options.path, options.persistence.clone());
        let mut hooks: Vec<Box<dyn StoreHook>> = vec![Box::new(LoggingHook)];
        let mut writer = None;

        if options.persist {
            let window = options.persistence.debounce();
            let runtime = tokio::runtime::Handle::try_current().is_ok();
            if window.is_zero() || !runtime {
                if !window.is_zero() {
                    debug!("No async runtime, task file writes will not be debounced");
                }
                hooks.push(Box::new(PersistenceHook::immediate(persistence.clone())));
            } else {
                let spawned = DebouncedWriter::spawn(persistence.clone(), window);
                if let Some(queue) = spawned.queue() {
                    hooks.push(Box::new(PersistenceHook::debounced(queue)));
                }
                writer = Some(spawned);
            }
        }
        if options.auto_complete_parent {
            hooks.push(Box::new(AutoCompleteParentHook));
        }

        Self {
            state: StoreState::default(),
            history: History::default(),
            hooks,
            persistence,
            writer,
            persist: options.persist,
        }
    }

    /// Build the store and load the configured task file.
    ///
    /// # Errors
    ///
    /// Returns [`TaskforgeError::Persistence`] if the file exists but cannot
    /// be read or parsed.
    pub fn open(options: StoreOptions) -> Result<Self> {
        let persist = options.persist;
        let mut store = Self::new(options);
        if persist {
            store.load_state(None)?;
        }
        Ok(store)
    }

    /// A store seeded with `tasks` and no persistence. Used by tests and
    /// benchmarks.
    #[must_use]
    pub fn with_tasks(tasks: Vec<Task>) -> Self {
        let mut store = Self::new(StoreOptions::in_memory());
        store.state.tasks = tasks;
        store
    }

    /// Append a hook after the built-in ones.
    pub fn register_hook(&mut self, hook: Box<dyn StoreHook>) {
        self.hooks.push(hook);
    }

    /// Default load/save target.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.persistence.path()
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    /// Owned copy of the whole state.
    #[must_use]
    pub fn get_state(&self) -> StoreState {
        self.state.clone()
    }

    #[must_use]
    pub fn tasks(&self) -> &[Task] {
        &self.state.tasks
    }

    #[must_use]
    pub fn meta(&self) -> &TaskMeta {
        &self.state.meta
    }

    #[must_use]
    pub fn change_history(&self) -> &[ChangeRecord] {
        &self.state.change_history
    }

    #[must_use]
    pub fn current_task(&self) -> Option<&Task> {
        self.state
            .current_task
            .and_then(|id| self.get_task_by_id(id))
    }

    #[must_use]
    pub fn get_task_by_id(&self, id: TaskId) -> Option<&Task> {
        self.state.tasks.iter().find(|t| t.id == id)
    }

    #[must_use]
    pub fn get_subtask_by_id(&self, task_id: TaskId, subtask_id: u32) -> Option<&Subtask> {
        self.get_task_by_id(task_id)?.subtask(subtask_id)
    }

    #[must_use]
    pub fn get_tasks_by_status(&self, status: &TaskStatus) -> Vec<&Task> {
        self.state
            .tasks
            .iter()
            .filter(|t| &t.status == status)
            .collect()
    }

    #[must_use]
    pub fn get_tasks_with_satisfied_dependencies(&self) -> Vec<&Task> {
        tasks_with_satisfied_dependencies(&self.state.tasks)
    }

    #[must_use]
    pub fn get_next_task(&self) -> Option<&Task> {
        next_task(&self.state.tasks)
    }

    #[must_use]
    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    #[must_use]
    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    // ------------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------------

    /// Merge `patch` into the state and notify hooks.
    ///
    /// Cascades requested by hooks are applied for action commits only.
    ///
    /// # Errors
    ///
    /// Returns the first hook error (for example a failed immediate save) or
    /// a cascade failure. The patch itself is committed either way.
    pub fn set_state(&mut self, patch: StatePatch, options: CommitOptions) -> Result<Change> {
        let before = statuses(&self.state.tasks);
        let touches_data = patch.touches_data();

        if options.record_history && (patch.tasks.is_some() || patch.meta.is_some()) {
            self.history.record(self.state.snapshot());
        }

        let description = patch
            .record
            .as_ref()
            .map_or_else(|| "state update".to_string(), |r| r.description.clone());

        let StatePatch {
            tasks,
            meta,
            change_history,
            current_task,
            error,
            record,
        } = patch;
        if let Some(tasks) = tasks {
            self.state.tasks = tasks;
        }
        if let Some(meta) = meta {
            self.state.meta = meta;
        }
        if let Some(history) = change_history {
            self.state.change_history = history;
        }
        if let Some(current) = current_task {
            self.state.current_task = current;
        }
        if let Some(error) = error {
            self.state.error = error;
        }
        if let Some(record) = record {
            self.state.change_history.push(record);
        }
        let overflow = self
            .state
            .change_history
            .len()
            .saturating_sub(MAX_CHANGE_HISTORY);
        if overflow > 0 {
            self.state.change_history.drain(..overflow);
        }
        self.state.last_updated = Some(Utc::now());

        let change = Change {
            origin: options.origin,
            description,
            touches_data,
            status_changes: status_changes(&before, &self.state.tasks),
        };

        let (cascades, hook_error) = run_hooks(&mut self.hooks, &change, &self.state);

        if options.origin == ChangeOrigin::Action {
            for cascade in cascades {
                self.apply_cascade(cascade)?;
            }
        } else if !cascades.is_empty() {
            debug!(
                "Ignoring {} cascades from a {:?} commit",
                cascades.len(),
                options.origin
            );
        }

        match hook_error {
            Some(e) => Err(e),
            None => Ok(change),
        }
    }

    fn apply_cascade(&mut self, cascade: Cascade) -> Result<Change> {
        let Cascade::SetStatus { id, status, reason } = cascade;
        let mut tasks = self.state.tasks.clone();
        let task = tasks
            .iter_mut()
            .find(|t| t.id == id.task)
            .ok_or_else(|| TaskforgeError::not_found(id))?;

        match id.subtask {
            None => *task = transition(task, status.clone())?,
            Some(sub_id) => {
                let parent = task.id;
                let sub = task
                    .subtask_mut(sub_id)
                    .ok_or_else(|| TaskforgeError::not_found(id))?;
                *sub = transition_subtask(parent, sub, status.clone())?;
            }
        }

        let record = hooks::cascade_record(id, &status, &reason);
        self.set_state(
            StatePatch::new().tasks(tasks).record(record),
            CommitOptions::internal(ChangeOrigin::Cascade),
        )
    }

    /// Focus the UI on a task, or clear the focus.
    ///
    /// # Errors
    ///
    /// Returns [`TaskforgeError::NotFound`] for an unknown id.
    pub fn set_current_task(&mut self, id: Option<TaskId>) -> Result<()> {
        if let Some(id) = id {
            if self.get_task_by_id(id).is_none() {
                return Err(TaskforgeError::not_found(EntityId::task(id)));
            }
        }
        self.set_state(
            StatePatch::new().current_task(id),
            CommitOptions::without_history(),
        )?;
        Ok(())
    }

    /// Restore the state before the last undoable commit.
    ///
    /// Returns `false` when there is nothing to undo.
    ///
    /// # Errors
    ///
    /// Surfaces hook errors from the restoring commit.
    pub fn undo(&mut self) -> Result<bool> {
        let Some(previous) = self.history.undo(self.state.snapshot()) else {
            return Ok(false);
        };
        self.restore(previous, ChangeOrigin::Undo, "Undo")?;
        Ok(true)
    }

    /// Reapply the last undone commit.
    ///
    /// Returns `false` when there is nothing to redo.
    ///
    /// # Errors
    ///
    /// Surfaces hook errors from the restoring commit.
    pub fn redo(&mut self) -> Result<bool> {
        let Some(next) = self.history.redo(self.state.snapshot()) else {
            return Ok(false);
        };
        self.restore(next, ChangeOrigin::Redo, "Redo")?;
        Ok(true)
    }

    fn restore(&mut self, snapshot: Snapshot, origin: ChangeOrigin, label: &str) -> Result<()> {
        let record = ChangeRecord::new(label, serde_json::Value::Null);
        self.set_state(
            StatePatch::new()
                .tasks(snapshot.tasks)
                .meta(snapshot.meta)
                .record(record),
            CommitOptions::internal(origin),
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------------

    /// Replace the state with the contents of `path` (or the configured
    /// file). A missing file yields an empty task list.
    ///
    /// Undo history is reset. The default save target does not change.
    ///
    /// # Errors
    ///
    /// Returns [`TaskforgeError::Persistence`] for unreadable or malformed
    /// files; the in-memory tasks are left untouched in that case.
    pub fn load_state(&mut self, path: Option<&Path>) -> Result<StoreState> {
        let source = match path {
            Some(path) => self.persistence.with_path(path),
            None => self.persistence.clone(),
        };

        self.state.loading = true;
        let loaded = source.load();
        self.state.loading = false;

        let file = match loaded {
            Ok(file) => file.unwrap_or_default(),
            Err(e) => {
                warn!("Keeping current state, load failed: {e}");
                self.state.error = Some(e.to_string());
                return Err(e);
            }
        };

        let mut tasks = file.tasks;
        for task in &mut tasks {
            task.normalize_dependencies();
        }
        let count = tasks.len();
        self.set_state(
            StatePatch::new()
                .tasks(tasks)
                .meta(file.meta)
                .change_history(file.change_history)
                .current_task(None)
                .error(None),
            CommitOptions::internal(ChangeOrigin::Load),
        )?;
        self.history.clear();
        debug!("Loaded {count} tasks from {}", source.path().display());
        Ok(self.get_state())
    }

    /// Write the task file now, bypassing the debounce window.
    ///
    /// # Errors
    ///
    /// Returns [`TaskforgeError::Persistence`] once the bounded retries are
    /// exhausted.
    pub fn save_state(&self, path: Option<&Path>) -> Result<()> {
        let target = match path {
            Some(path) => self.persistence.with_path(path),
            None => self.persistence.clone(),
        };
        target.save(&self.state.to_task_file())
    }

    /// Wait for pending debounced writes.
    ///
    /// # Errors
    ///
    /// Returns the write error, if any.
    pub async fn flush(&self) -> Result<()> {
        match &self.writer {
            Some(writer) => writer.flush().await,
            None => Ok(()),
        }
    }

    /// Drop the hooks and finish any pending write.
    ///
    /// # Errors
    ///
    /// Returns the last deferred write error.
    pub async fn close(mut self) -> Result<()> {
        self.hooks.clear();
        if let Some(writer) = self.writer.take() {
            writer.shutdown().await?;
        }
        if self.persist {
            debug!("Closed task store for {}", self.persistence.path().display());
        }
        Ok(())
    }
}

fn run_hooks(
    hooks: &mut [Box<dyn StoreHook>],
    change: &Change,
    state: &StoreState,
) -> (Vec<Cascade>, Option<TaskforgeError>) {
    let mut cascades = Vec::new();
    let mut first_error = None;
    for hook in hooks.iter_mut() {
        if change.origin == ChangeOrigin::Cascade && !hook.observes_cascades() {
            continue;
        }
        match hook.after_commit(change, state) {
            Ok(mut requested) => cascades.append(&mut requested),
            Err(e) => {
                warn!("Hook '{}' failed: {e}", hook.name());
                first_error.get_or_insert(e);
            }
        }
    }
    (cascades, first_error)
}

fn statuses(tasks: &[Task]) -> BTreeMap<EntityId, TaskStatus> {
    let mut map = BTreeMap::new();
    for task in tasks {
        map.insert(task.entity_id(), task.status.clone());
        for sub in &task.subtasks {
            map.insert(EntityId::subtask(task.id, sub.id), sub.status.clone());
        }
    }
    map
}

fn status_changes(before: &BTreeMap<EntityId, TaskStatus>, after: &[Task]) -> Vec<StatusChange> {
    statuses(after)
        .into_iter()
        .filter_map(|(id, to)| {
            let from = before.get(&id)?;
            (from != &to).then(|| StatusChange {
                id,
                from: from.clone(),
                to,
            })
        })
        .collect()
}

// ============================================================================
// Queries
// ============================================================================

/// Whether every dependency of `task` resolves to a `done` task or subtask.
#[must_use]
pub fn dependencies_satisfied(tasks: &[Task], task: &Task) -> bool {
    task.dependencies.iter().all(|dep| {
        dep.resolve(None)
            .and_then(|id| status_of(tasks, id))
            .is_some_and(|status| *status == TaskStatus::Done)
    })
}

/// Tasks whose dependencies are all done, in list order.
#[must_use]
pub fn tasks_with_satisfied_dependencies(tasks: &[Task]) -> Vec<&Task> {
    tasks
        .iter()
        .filter(|t| dependencies_satisfied(tasks, t))
        .collect()
}

/// The pending task to work on next: highest priority among tasks with
/// satisfied dependencies, lowest id on ties.
#[must_use]
pub fn next_task(tasks: &[Task]) -> Option<&Task> {
    tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Pending && dependencies_satisfied(tasks, t))
        .max_by_key(|t| (t.priority, Reverse(t.id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{DependencyRef, Priority};
    use std::fs;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    fn task(id: TaskId, deps: &[TaskId]) -> Task {
        let mut t = Task::new(id, format!("Task {id}"));
        t.dependencies = deps.iter().copied().map(DependencyRef::Task).collect();
        t
    }

    fn file_store(temp: &TempDir) -> TaskStore {
        TaskStore::open(
            StoreOptions::new(temp.path().join("tasks.json"))
                .with_persistence(PersistenceConfig::immediate()),
        )
        .unwrap()
    }

    fn commit_tasks(store: &mut TaskStore, tasks: Vec<Task>) {
        store
            .set_state(
                StatePatch::new()
                    .tasks(tasks)
                    .record(ChangeRecord::new("test", serde_json::Value::Null)),
                CommitOptions::default(),
            )
            .unwrap();
    }

    struct Recorder(Arc<Mutex<Vec<ChangeOrigin>>>);

    impl StoreHook for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }

        fn after_commit(&mut self, change: &Change, _state: &StoreState) -> Result<Vec<Cascade>> {
            self.0.lock().unwrap().push(change.origin);
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_get_state_is_an_owned_copy() {
        let store = TaskStore::with_tasks(vec![task(1, &[])]);
        let mut state = store.get_state();
        state.tasks.clear();
        assert_eq!(store.tasks().len(), 1);
    }

    #[test]
    fn test_lookups() {
        let mut parent = task(1, &[]);
        parent.subtasks.push(Subtask::new(1, "Child"));
        let store = TaskStore::with_tasks(vec![parent, task(2, &[1])]);

        assert_eq!(store.get_task_by_id(2).unwrap().title, "Task 2");
        assert!(store.get_task_by_id(9).is_none());
        assert_eq!(store.get_subtask_by_id(1, 1).unwrap().title, "Child");
        assert!(store.get_subtask_by_id(2, 1).is_none());
        assert_eq!(store.get_tasks_by_status(&TaskStatus::Pending).len(), 2);
    }

    #[test]
    fn test_satisfied_dependencies_require_done() {
        let mut first = task(1, &[]);
        first.status = TaskStatus::Cancelled;
        let store = TaskStore::with_tasks(vec![first, task(2, &[1]), task(3, &[99])]);

        let ids: Vec<_> = store
            .get_tasks_with_satisfied_dependencies()
            .iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, vec![1]);
    }

    #[test]
    fn test_satisfied_dependencies_on_subtask() {
        let mut parent = task(1, &[]);
        let mut child = Subtask::new(1, "Child");
        child.status = TaskStatus::Done;
        parent.subtasks.push(child);
        let mut dependent = task(2, &[]);
        dependent.dependencies = vec![DependencyRef::Subtask { task: 1, subtask: 1 }];

        let store = TaskStore::with_tasks(vec![parent, dependent]);
        assert_eq!(store.get_tasks_with_satisfied_dependencies().len(), 2);
    }

    #[test]
    fn test_next_task_prefers_priority_then_lowest_id() {
        let mut low = task(1, &[]);
        low.priority = Priority::Low;
        let mut high_a = task(4, &[]);
        high_a.priority = Priority::High;
        let mut high_b = task(3, &[]);
        high_b.priority = Priority::High;
        let mut blocked = task(2, &[1]);
        blocked.priority = Priority::High;

        let store = TaskStore::with_tasks(vec![low, high_a, high_b, blocked]);
        assert_eq!(store.get_next_task().unwrap().id, 3);
    }

    #[test]
    fn test_next_task_skips_non_pending() {
        let mut started = task(1, &[]);
        started.status = TaskStatus::InProgress;
        let store = TaskStore::with_tasks(vec![started]);
        assert!(store.get_next_task().is_none());
    }

    #[test]
    fn test_set_state_updates_last_updated_and_log() {
        let mut store = TaskStore::with_tasks(Vec::new());
        assert!(store.get_state().last_updated.is_none());
        commit_tasks(&mut store, vec![task(1, &[])]);

        let state = store.get_state();
        assert!(state.last_updated.is_some());
        assert_eq!(state.change_history.len(), 1);
        assert_eq!(state.change_history[0].description, "test");
    }

    #[test]
    fn test_change_log_is_bounded() {
        let mut store = TaskStore::with_tasks(Vec::new());
        for _ in 0..(MAX_CHANGE_HISTORY + 10) {
            store
                .set_state(
                    StatePatch::new().record(ChangeRecord::new("tick", serde_json::Value::Null)),
                    CommitOptions::without_history(),
                )
                .unwrap();
        }
        assert_eq!(store.change_history().len(), MAX_CHANGE_HISTORY);
    }

    #[test]
    fn test_undo_redo() {
        let mut store = TaskStore::with_tasks(Vec::new());
        commit_tasks(&mut store, vec![task(1, &[])]);
        commit_tasks(&mut store, vec![task(1, &[]), task(2, &[])]);

        assert!(store.undo().unwrap());
        assert_eq!(store.tasks().len(), 1);
        assert!(store.undo().unwrap());
        assert!(store.tasks().is_empty());
        assert!(!store.undo().unwrap());

        assert!(store.redo().unwrap());
        assert_eq!(store.tasks().len(), 1);

        // A new commit drops the redo tail.
        commit_tasks(&mut store, vec![task(7, &[])]);
        assert!(!store.redo().unwrap());
    }

    #[test]
    fn test_commit_without_history_is_not_undoable() {
        let mut store = TaskStore::with_tasks(Vec::new());
        store
            .set_state(
                StatePatch::new().tasks(vec![task(1, &[])]),
                CommitOptions::without_history(),
            )
            .unwrap();
        assert!(!store.can_undo());
    }

    #[test]
    fn test_hooks_see_every_commit_origin() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut store = TaskStore::with_tasks(Vec::new());
        store.register_hook(Box::new(Recorder(Arc::clone(&seen))));

        commit_tasks(&mut store, vec![task(1, &[])]);
        store.undo().unwrap();
        store.redo().unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![ChangeOrigin::Action, ChangeOrigin::Undo, ChangeOrigin::Redo]
        );
    }

    #[test]
    fn test_auto_complete_cascade_runs_once() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut parent = task(5, &[]);
        parent.subtasks = vec![Subtask::new(1, "a"), Subtask::new(2, "b")];
        let mut store = TaskStore::with_tasks(vec![parent]);
        store.register_hook(Box::new(Recorder(Arc::clone(&seen))));

        let mut tasks = store.tasks().to_vec();
        for sub in &mut tasks[0].subtasks {
            sub.status = TaskStatus::Done;
        }
        commit_tasks(&mut store, tasks);

        assert_eq!(store.get_task_by_id(5).unwrap().status, TaskStatus::Done);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![ChangeOrigin::Action, ChangeOrigin::Cascade]
        );

        // Undo reverts the action and its cascade together.
        store.undo().unwrap();
        assert_eq!(store.get_task_by_id(5).unwrap().status, TaskStatus::Pending);
    }

    #[test]
    fn test_auto_complete_can_be_disabled() {
        let mut parent = task(5, &[]);
        parent.subtasks = vec![Subtask::new(1, "a")];
        let mut store = TaskStore::new(StoreOptions::in_memory().with_auto_complete_parent(false));
        commit_tasks(&mut store, vec![parent]);

        let mut tasks = store.tasks().to_vec();
        tasks[0].subtasks[0].status = TaskStatus::Done;
        commit_tasks(&mut store, tasks);
        assert_eq!(store.get_task_by_id(5).unwrap().status, TaskStatus::Pending);
    }

    #[test]
    fn test_set_current_task() {
        let mut store = TaskStore::with_tasks(vec![task(1, &[])]);
        store.set_current_task(Some(1)).unwrap();
        assert_eq!(store.current_task().unwrap().id, 1);
        assert!(matches!(
            store.set_current_task(Some(8)),
            Err(TaskforgeError::NotFound { .. })
        ));
    }

    #[test]
    fn test_open_missing_file_starts_empty() {
        let temp = TempDir::new().unwrap();
        let store = file_store(&temp);
        assert!(store.tasks().is_empty());
        assert!(!temp.path().join("tasks.json").exists());
    }

    #[test]
    fn test_commits_persist_immediately() {
        let temp = TempDir::new().unwrap();
        let mut store = file_store(&temp);
        commit_tasks(&mut store, vec![task(1, &[]), task(2, &[1])]);

        let reopened = file_store(&temp);
        assert_eq!(reopened.tasks().len(), 2);
        assert_eq!(reopened.change_history().len(), 1);
    }

    #[test]
    fn test_malformed_file_keeps_previous_state() {
        let temp = TempDir::new().unwrap();
        let mut store = file_store(&temp);
        commit_tasks(&mut store, vec![task(1, &[])]);

        let other = temp.path().join("broken.json");
        fs::write(&other, "{ not json").unwrap();
        let err = store.load_state(Some(&other)).unwrap_err();

        assert!(matches!(err, TaskforgeError::Persistence { .. }));
        assert_eq!(store.tasks().len(), 1);
        assert!(store.get_state().error.is_some());
        assert!(!store.get_state().loading);
    }

    #[test]
    fn test_load_resets_history_and_normalizes_sibling_refs() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("tasks.json");
        fs::write(
            &path,
            r#"{"meta":{},"tasks":[{"id":3,"title":"P","subtasks":[
                {"id":1,"title":"a"},{"id":2,"title":"b","dependencies":["3.1"]}]}]}"#,
        )
        .unwrap();

        let mut store = file_store(&temp);
        assert!(!store.can_undo());
        assert_eq!(
            store.get_subtask_by_id(3, 2).unwrap().dependencies,
            vec![DependencyRef::Sibling(1)]
        );
        commit_tasks(&mut store, Vec::new());
        store.load_state(None).unwrap();
        assert!(!store.can_undo());
    }

    #[test]
    fn test_load_then_save_round_trip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("tasks.json");
        let original = r#"{
  "meta": {
    "projectName": "demo",
    "custom": 1
  },
  "tasks": [
    {
      "id": 1,
      "title": "One",
      "description": "",
      "status": "done",
      "priority": "high",
      "dependencies": [],
      "subtasks": []
    }
  ]
}
"#;
        fs::write(&path, original).unwrap();

        let store = file_store(&temp);
        store.save_state(None).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), original);
    }

    #[test]
    fn test_save_state_to_alternate_path() {
        let temp = TempDir::new().unwrap();
        let store = TaskStore::with_tasks(vec![task(1, &[])]);
        let other = temp.path().join("export.json");
        store.save_state(Some(&other)).unwrap();
        assert!(other.exists());
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_debounced_store_writes_on_close() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("tasks.json");
        let config = PersistenceConfig {
            debounce_ms: 5_000,
            backup: false,
            ..PersistenceConfig::default()
        };
        let mut store =
            TaskStore::open(StoreOptions::new(&path).with_persistence(config)).unwrap();
        for n in 1..=3 {
            commit_tasks(&mut store, (1..=n).map(|id| task(id, &[])).collect());
        }
        assert!(!path.exists());

        store.close().await.unwrap();
        let saved = TaskFilePersistence::new(&path, PersistenceConfig::immediate())
            .load()
            .unwrap()
            .unwrap();
        assert_eq!(saved.tasks.len(), 3);
    }
}
