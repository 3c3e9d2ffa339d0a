//! Action layer.
//!
//! Every mutation of the task store goes through [`TaskActions`]. Each
//! action validates its input against the current tasks, builds the new
//! task list, and commits it as one store update with a `changeHistory`
//! entry. Validation, not-found, transition, dependency, and persistence
//! errors are always returned to the caller.
//!
//! Generator failures are handled per action:
//!
//! - `expand_task` falls back to placeholder subtasks and reports the error
//! - `parse_prd` and `analyze_complexity` surface the error, since there is
//!   nothing to fall back to

pub mod files;

pub use files::{generate_task_files, FileFormat, GenerateOptions, GeneratedFiles};

use std::path::Path;

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::ProjectConfig;
use crate::error::{Result, TaskforgeError};
use crate::generator::{GeneratorError, SubtaskDraft, TaskDraft, TaskGenerator};
use crate::graph::{self, DependencyGraph, RepairSummary, ValidationReport};
use crate::store::{CommitOptions, StatePatch, TaskStore};
use crate::task::{
    entity_exists, next_task_id, transition, transition_subtask, ChangeRecord, Complexity,
    DependencyRef, EntityId, Priority, Subtask, Task, TaskId, TaskStatus, Transitionable,
};

/// Placeholder subtasks created when the generator fails, at most.
const MAX_PLACEHOLDERS: u32 = 3;

// ============================================================================
// Inputs and results
// ============================================================================

/// Data for [`TaskActions::add_task`].
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    /// Explicit id; `max + 1` when unset
    pub id: Option<TaskId>,
    pub title: Option<String>,
    pub description: String,
    pub priority: Option<Priority>,
    pub status: Option<TaskStatus>,
    pub dependencies: Vec<EntityId>,
    pub details: Option<String>,
    pub test_strategy: Option<String>,
}

impl NewTask {
    #[must_use]
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    #[must_use]
    pub fn with_dependencies(mut self, deps: Vec<EntityId>) -> Self {
        self.dependencies = deps;
        self
    }
}

/// Field changes for [`TaskActions::update_task`]. `None` leaves a field
/// as it is.
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<Priority>,
    pub status: Option<TaskStatus>,
    pub details: Option<String>,
    pub test_strategy: Option<String>,
    /// Replaces the whole dependency list
    pub dependencies: Option<Vec<EntityId>>,
}

impl TaskUpdate {
    fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.priority.is_none()
            && self.status.is_none()
            && self.details.is_none()
            && self.test_strategy.is_none()
            && self.dependencies.is_none()
    }
}

/// Data for a fresh subtask.
#[derive(Debug, Clone, Default)]
pub struct NewSubtask {
    pub title: String,
    pub description: String,
    pub priority: Option<Priority>,
    pub status: Option<TaskStatus>,
    pub dependencies: Vec<EntityId>,
    pub details: Option<String>,
    pub test_strategy: Option<String>,
}

impl NewSubtask {
    #[must_use]
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }
}

/// What [`TaskActions::add_subtask`] attaches to the parent.
#[derive(Debug, Clone)]
pub enum SubtaskSource {
    New(NewSubtask),
    /// Convert an existing top-level task
    Existing(TaskId),
}

/// Outcome of [`TaskActions::remove_subtask`].
#[derive(Debug, Clone, PartialEq)]
pub enum RemovedSubtask {
    Deleted(Subtask),
    /// The subtask now lives on as this top-level task
    Converted(Task),
}

/// Options for [`TaskActions::expand_task`].
#[derive(Debug, Clone, Default)]
pub struct ExpandOptions {
    /// Subtask count; falls back to the complexity recommendation, then the
    /// configured default
    pub num_subtasks: Option<u32>,
    pub research: bool,
    pub context: Option<String>,
    /// Replace existing subtasks
    pub force: bool,
}

/// Result of [`TaskActions::expand_task`].
#[derive(Debug, Clone)]
pub struct Expansion {
    pub task: Task,
    /// Set when the generator failed
    pub fallback: Option<GeneratorError>,
    /// The generator failed on a forced expand and the existing subtasks
    /// were left as they were
    pub kept_existing: bool,
}

/// Options for [`TaskActions::parse_prd`].
#[derive(Debug, Clone, Default)]
pub struct ParsePrdOptions {
    pub num_tasks: Option<u32>,
    /// Keep existing tasks and number new ones after them
    pub append: bool,
    pub research: bool,
}

/// Options for [`TaskActions::analyze_complexity`].
#[derive(Debug, Clone)]
pub struct ComplexityOptions {
    /// Scores at or above this are flagged for expansion
    pub threshold: u8,
    pub research: bool,
    /// Restrict to these tasks; all open tasks otherwise
    pub ids: Option<Vec<TaskId>>,
}

impl Default for ComplexityOptions {
    fn default() -> Self {
        Self {
            threshold: 5,
            research: false,
            ids: None,
        }
    }
}

/// One row of a [`ComplexityReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplexityEntry {
    pub task_id: TaskId,
    pub title: String,
    pub score: u8,
    pub recommended_subtasks: u32,
    pub reasoning: String,
    pub needs_expansion: bool,
}

/// Complexity assessments, highest score first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplexityReport {
    pub threshold: u8,
    pub entries: Vec<ComplexityEntry>,
}

impl ComplexityReport {
    pub fn needing_expansion(&self) -> impl Iterator<Item = &ComplexityEntry> {
        self.entries.iter().filter(|e| e.needs_expansion)
    }
}

/// Defaults applied when an action's input leaves something unset.
#[derive(Debug, Clone)]
pub struct ActionDefaults {
    pub priority: Priority,
    pub subtasks: u32,
    pub tasks: u32,
}

impl Default for ActionDefaults {
    fn default() -> Self {
        Self {
            priority: Priority::Medium,
            subtasks: 3,
            tasks: 10,
        }
    }
}

impl ActionDefaults {
    #[must_use]
    pub fn from_config(config: &ProjectConfig) -> Self {
        Self {
            priority: config.default_priority,
            subtasks: config.default_subtasks,
            tasks: config.default_tasks,
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn require_title(title: Option<&str>) -> Result<String> {
    match title.map(str::trim) {
        Some(t) if !t.is_empty() => Ok(t.to_string()),
        _ => Err(TaskforgeError::validation("title is required")),
    }
}

fn find_task(tasks: &mut [Task], id: TaskId) -> Result<&mut Task> {
    tasks
        .iter_mut()
        .find(|t| t.id == id)
        .ok_or_else(|| TaskforgeError::not_found(EntityId::task(id)))
}

/// Check that `owner` may depend on `dep` in `tasks`.
fn check_dependency(tasks: &[Task], owner: EntityId, dep: EntityId) -> Result<()> {
    if owner == dep {
        return Err(TaskforgeError::SelfDependency { id: owner });
    }
    if !entity_exists(tasks, dep) {
        return Err(TaskforgeError::MissingDependency {
            id: owner,
            dependency: dep,
        });
    }
    if let Some(cycle) = graph::would_create_cycle(tasks, owner, dep) {
        return Err(TaskforgeError::CircularDependency { cycle });
    }
    Ok(())
}

fn dependency_list_mut(tasks: &mut [Task], owner: EntityId) -> Result<&mut Vec<DependencyRef>> {
    let task = find_task(tasks, owner.task)?;
    match owner.subtask {
        None => Ok(&mut task.dependencies),
        Some(sub) => task
            .subtask_mut(sub)
            .map(|s| &mut s.dependencies)
            .ok_or_else(|| TaskforgeError::not_found(owner)),
    }
}

/// Entities (outside `exclude_task`) whose dependencies point at any of
/// `targets`.
fn dependents_of(tasks: &[Task], targets: &[EntityId], exclude_task: Option<TaskId>) -> Vec<EntityId> {
    let hits = |deps: &[DependencyRef], parent: Option<TaskId>| {
        deps.iter()
            .filter_map(|d| d.resolve(parent))
            .any(|id| targets.contains(&id))
    };

    let mut found = Vec::new();
    for task in tasks.iter().filter(|t| Some(t.id) != exclude_task) {
        if hits(&task.dependencies, None) {
            found.push(task.entity_id());
        }
        for sub in &task.subtasks {
            if hits(&sub.dependencies, Some(task.id)) {
                found.push(EntityId::subtask(task.id, sub.id));
            }
        }
    }
    found.sort();
    found
}

/// Point every reference to `from` at `to`, or drop it when `to` is `None`.
fn retarget_references(tasks: &mut [Task], from: EntityId, to: Option<EntityId>) {
    fn retarget(
        deps: &mut Vec<DependencyRef>,
        parent: Option<TaskId>,
        from: EntityId,
        to: Option<EntityId>,
    ) {
        deps.retain_mut(|dep| {
            if dep.resolve(parent) != Some(from) {
                return true;
            }
            match to {
                Some(target) => {
                    *dep = DependencyRef::from_entity(target, parent);
                    true
                }
                None => false,
            }
        });
    }

    for task in tasks {
        retarget(&mut task.dependencies, None, from, to);
        let parent = task.id;
        for sub in &mut task.subtasks {
            retarget(&mut sub.dependencies, Some(parent), from, to);
        }
    }
}

/// Move a task or subtask to `status`. A task moved to `done` forces its
/// subtasks to `done` as well; their ids are returned.
fn apply_status(tasks: &mut [Task], id: EntityId, status: &TaskStatus) -> Result<Vec<EntityId>> {
    let task = find_task(tasks, id.task)?;
    let mut forced = Vec::new();

    match id.subtask {
        Some(sub_id) => {
            let parent = task.id;
            let sub = task
                .subtask_mut(sub_id)
                .ok_or_else(|| TaskforgeError::not_found(id))?;
            *sub = transition_subtask(parent, sub, status.clone())?;
        }
        None => {
            *task = transition(task, status.clone())?;
            if *status == TaskStatus::Done {
                let now = Utc::now();
                for sub in task.subtasks.iter_mut().filter(|s| s.status != TaskStatus::Done) {
                    sub.apply_status(TaskStatus::Done, now);
                    forced.push(EntityId::subtask(task.id, sub.id));
                }
            }
        }
    }
    Ok(forced)
}

fn placeholder_subtasks(task: &Task, count: u32, reason: &GeneratorError) -> Vec<SubtaskDraft> {
    (1..=count.clamp(1, MAX_PLACEHOLDERS))
        .map(|n| SubtaskDraft {
            title: format!("Placeholder subtask {n} for task {}", task.id),
            description: format!(
                "Generated content was unavailable ({reason}). Replace this with a real step of \"{}\".",
                task.title
            ),
            details: None,
            test_strategy: None,
            dependencies: Vec::new(),
        })
        .collect()
}

// ============================================================================
// Actions
// ============================================================================

/// The sanctioned mutation entry points into a [`TaskStore`].
pub struct TaskActions<'a> {
    store: &'a mut TaskStore,
    defaults: ActionDefaults,
}

impl<'a> TaskActions<'a> {
    pub fn new(store: &'a mut TaskStore) -> Self {
        Self {
            store,
            defaults: ActionDefaults::default(),
        }
    }

    #[must_use]
    pub fn with_defaults(mut self, defaults: ActionDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// Read access to the underlying store.
    #[must_use]
    pub fn store(&self) -> &TaskStore {
        &*self.store
    }

    fn commit(&mut self, tasks: Vec<Task>, description: String, details: serde_json::Value) -> Result<()> {
        debug!("{description}");
        self.store.set_state(
            StatePatch::new()
                .tasks(tasks)
                .record(ChangeRecord::new(description, details)),
            CommitOptions::default(),
        )?;
        Ok(())
    }

    fn task(&self, id: TaskId) -> Result<Task> {
        self.store
            .get_task_by_id(id)
            .cloned()
            .ok_or_else(|| TaskforgeError::not_found(EntityId::task(id)))
    }

    // ------------------------------------------------------------------------
    // Project
    // ------------------------------------------------------------------------

    /// Stamp project metadata on the task file.
    ///
    /// Sets `createdAt` once and `projectName` when given. Returns `false`
    /// if the metadata was already in place and nothing was committed.
    ///
    /// # Errors
    ///
    /// Persistence errors from the commit.
    pub fn initialize(&mut self, project_name: Option<&str>) -> Result<bool> {
        let mut meta = self.store.meta().clone();
        let mut changed = false;

        if let Some(name) = project_name.map(str::trim).filter(|n| !n.is_empty()) {
            if meta.project_name() != Some(name) {
                meta.set("projectName", name);
                changed = true;
            }
        }
        if meta.get_str("createdAt").is_none() {
            meta.set("createdAt", Utc::now().to_rfc3339());
            changed = true;
        }
        if !changed {
            return Ok(false);
        }

        self.store.set_state(
            StatePatch::new().meta(meta).record(ChangeRecord::new(
                "Initialized project",
                json!({ "action": "init", "projectName": project_name }),
            )),
            CommitOptions::default(),
        )?;
        info!("Initialized {}", self.store.path().display());
        Ok(true)
    }

    // ------------------------------------------------------------------------
    // Tasks
    // ------------------------------------------------------------------------

    /// Create a task.
    ///
    /// # Errors
    ///
    /// - [`TaskforgeError::Validation`] without a title or with a taken id
    /// - a dependency error for missing, self, or circular dependencies
    pub fn add_task(&mut self, data: NewTask) -> Result<Task> {
        let title = require_title(data.title.as_deref())?;
        let mut tasks = self.store.tasks().to_vec();

        let id = match data.id {
            Some(0) => return Err(TaskforgeError::validation("task ids start at 1")),
            Some(id) if tasks.iter().any(|t| t.id == id) => {
                return Err(TaskforgeError::validation(format!(
                    "task {id} already exists"
                )))
            }
            Some(id) => id,
            None => next_task_id(&tasks)?,
        };

        let mut task = Task::new(id, title);
        task.description = data.description;
        task.priority = data.priority.unwrap_or(self.defaults.priority);
        task.status = data.status.unwrap_or_default();
        task.details = data.details;
        task.test_strategy = data.test_strategy;
        tasks.push(task);

        let owner = EntityId::task(id);
        for dep in data.dependencies {
            check_dependency(&tasks, owner, dep)?;
            let list = dependency_list_mut(&mut tasks, owner)?;
            if !list.iter().any(|d| d.points_to(dep, None)) {
                list.push(DependencyRef::from_entity(dep, None));
            }
        }

        self.commit(
            tasks,
            format!("Added task {id}"),
            json!({ "action": "add-task", "id": id }),
        )?;
        info!("Added task {id}");
        self.task(id)
    }

    /// Change fields of a task. A status change goes through the state
    /// machine, including the subtask cascade for `done`.
    ///
    /// # Errors
    ///
    /// [`TaskforgeError::NotFound`], [`TaskforgeError::Validation`] for an
    /// empty title, a transition error, or a dependency error.
    pub fn update_task(&mut self, id: TaskId, update: TaskUpdate) -> Result<Task> {
        let current = self.task(id)?;
        if update.is_empty() {
            return Ok(current);
        }

        let mut tasks = self.store.tasks().to_vec();
        let mut fields = Vec::new();
        {
            let task = find_task(&mut tasks, id)?;
            if let Some(title) = update.title.as_deref() {
                task.title = require_title(Some(title))?;
                fields.push("title");
            }
            if let Some(description) = update.description {
                task.description = description;
                fields.push("description");
            }
            if let Some(priority) = update.priority {
                task.priority = priority;
                fields.push("priority");
            }
            if let Some(details) = update.details {
                task.details = Some(details);
                fields.push("details");
            }
            if let Some(strategy) = update.test_strategy {
                task.test_strategy = Some(strategy);
                fields.push("testStrategy");
            }
        }

        if let Some(deps) = update.dependencies {
            let owner = EntityId::task(id);
            find_task(&mut tasks, id)?.dependencies.clear();
            for dep in deps {
                check_dependency(&tasks, owner, dep)?;
                let list = dependency_list_mut(&mut tasks, owner)?;
                if !list.iter().any(|d| d.points_to(dep, None)) {
                    list.push(DependencyRef::from_entity(dep, None));
                }
            }
            fields.push("dependencies");
        }

        if let Some(status) = update.status.filter(|s| *s != current.status) {
            apply_status(&mut tasks, EntityId::task(id), &status)?;
            fields.push("status");
        }

        self.commit(
            tasks,
            format!("Updated task {id}"),
            json!({ "action": "update-task", "id": id, "fields": fields }),
        )?;
        self.task(id)
    }

    /// Remove a task.
    ///
    /// Removal is refused while anything outside the task still depends on
    /// it or on one of its subtasks.
    ///
    /// # Errors
    ///
    /// [`TaskforgeError::NotFound`] or [`TaskforgeError::DependencyConflict`]
    /// listing the blocking entities.
    pub fn remove_task(&mut self, id: TaskId) -> Result<Task> {
        let removed = self.task(id)?;
        let mut targets = vec![removed.entity_id()];
        targets.extend(removed.subtasks.iter().map(|s| EntityId::subtask(id, s.id)));

        let blocked_by = dependents_of(self.store.tasks(), &targets, Some(id));
        if !blocked_by.is_empty() {
            return Err(TaskforgeError::DependencyConflict {
                id: removed.entity_id(),
                blocked_by,
            });
        }

        let tasks: Vec<Task> = self
            .store
            .tasks()
            .iter()
            .filter(|t| t.id != id)
            .cloned()
            .collect();
        self.commit(
            tasks,
            format!("Removed task {id}"),
            json!({ "action": "remove-task", "id": id, "title": removed.title }),
        )?;
        info!("Removed task {id}");
        Ok(removed)
    }

    /// Set the status of a task or subtask.
    ///
    /// Setting a task to `done` also forces its subtasks to `done`.
    ///
    /// # Errors
    ///
    /// [`TaskforgeError::NotFound`] or [`TaskforgeError::InvalidTransition`].
    pub fn set_task_status(&mut self, id: EntityId, status: TaskStatus) -> Result<Task> {
        let mut tasks = self.store.tasks().to_vec();
        let forced = apply_status(&mut tasks, id, &status)?;
        if !forced.is_empty() {
            debug!("Marked {} subtasks of {id} done", forced.len());
        }
        self.commit(
            tasks,
            format!("Set {id} to {status}"),
            json!({
                "action": "set-status",
                "id": id.to_string(),
                "status": status.as_str(),
                "cascaded": forced.iter().map(ToString::to_string).collect::<Vec<_>>(),
            }),
        )?;
        self.task(id.task)
    }

    /// Set several statuses in one commit. Nothing is committed if any
    /// transition fails.
    ///
    /// # Errors
    ///
    /// The first [`TaskforgeError::NotFound`] or
    /// [`TaskforgeError::InvalidTransition`] encountered.
    pub fn set_statuses(&mut self, ids: &[EntityId], status: TaskStatus) -> Result<Vec<Task>> {
        if ids.is_empty() {
            return Err(TaskforgeError::validation("no ids given"));
        }
        let mut tasks = self.store.tasks().to_vec();
        for id in ids {
            apply_status(&mut tasks, *id, &status)?;
        }
        let names: Vec<String> = ids.iter().map(ToString::to_string).collect();
        self.commit(
            tasks,
            format!("Set {} to {status}", names.join(", ")),
            json!({ "action": "set-status", "ids": names, "status": status.as_str() }),
        )?;

        let mut touched: Vec<TaskId> = ids.iter().map(|id| id.task).collect();
        touched.sort_unstable();
        touched.dedup();
        touched.into_iter().map(|id| self.task(id)).collect()
    }

    // ------------------------------------------------------------------------
    // Subtasks
    // ------------------------------------------------------------------------

    /// Attach a subtask to `parent_id`, either fresh or by converting an
    /// existing top-level task.
    ///
    /// A converted task keeps its content and status. Its dependency on the
    /// parent is dropped, and references to it elsewhere are redirected to
    /// the new subtask.
    ///
    /// # Errors
    ///
    /// - [`TaskforgeError::NotFound`] for an unknown parent or task
    /// - [`TaskforgeError::Validation`] for an empty title, converting a task
    ///   into itself, or converting a task that has its own subtasks
    /// - [`TaskforgeError::CircularConversion`] if the parent depends on the
    ///   task being converted
    pub fn add_subtask(&mut self, parent_id: TaskId, source: SubtaskSource) -> Result<Subtask> {
        let parent = self.task(parent_id)?;
        let sub_id = parent.next_subtask_id()?;
        let new_id = EntityId::subtask(parent_id, sub_id);
        let mut tasks = self.store.tasks().to_vec();

        let (subtask, details) = match source {
            SubtaskSource::New(data) => {
                let mut sub = Subtask::new(sub_id, require_title(Some(data.title.as_str()))?);
                sub.description = data.description;
                sub.priority = data.priority;
                sub.status = data.status.unwrap_or_default();
                sub.details = data.details;
                sub.test_strategy = data.test_strategy;
                for dep in data.dependencies {
                    check_dependency(&tasks, new_id, dep)?;
                    if !sub.dependencies.iter().any(|d| d.points_to(dep, Some(parent_id))) {
                        sub.dependencies.push(DependencyRef::from_entity(dep, Some(parent_id)));
                    }
                }
                (sub, json!({ "action": "add-subtask", "id": new_id.to_string() }))
            }
            SubtaskSource::Existing(task_id) => {
                if task_id == parent_id {
                    return Err(TaskforgeError::validation(format!(
                        "task {task_id} cannot become a subtask of itself"
                    )));
                }
                let source = self.task(task_id)?;
                if !source.subtasks.is_empty() {
                    return Err(TaskforgeError::validation(format!(
                        "task {task_id} has subtasks of its own; clear them before converting"
                    )));
                }
                let graph = DependencyGraph::from_tasks(&tasks);
                if graph.depends_transitively(parent.entity_id(), source.entity_id()) {
                    return Err(TaskforgeError::CircularConversion {
                        task: source.entity_id(),
                        parent: parent.entity_id(),
                    });
                }

                let mut sub = Subtask::new(sub_id, source.title.clone());
                sub.description = source.description.clone();
                sub.status = source.status.clone();
                sub.status_changed_at = source.status_changed_at;
                sub.priority = (source.priority != parent.priority).then_some(source.priority);
                sub.details = source.details.clone();
                sub.test_strategy = source.test_strategy.clone();
                sub.dependencies = source
                    .dependencies
                    .iter()
                    .filter_map(|d| d.resolve(None))
                    .filter(|d| *d != parent.entity_id())
                    .map(|d| DependencyRef::from_entity(d, Some(parent_id)))
                    .collect();

                tasks.retain(|t| t.id != task_id);
                retarget_references(&mut tasks, source.entity_id(), Some(new_id));
                (
                    sub,
                    json!({
                        "action": "add-subtask",
                        "id": new_id.to_string(),
                        "convertedFrom": task_id,
                    }),
                )
            }
        };

        find_task(&mut tasks, parent_id)?.subtasks.push(subtask);
        self.commit(tasks, format!("Added subtask {new_id}"), details)?;
        self.store
            .get_subtask_by_id(parent_id, sub_id)
            .cloned()
            .ok_or_else(|| TaskforgeError::not_found(new_id))
    }

    /// Remove a subtask, or promote it to a top-level task with `convert`.
    ///
    /// A deleted subtask's incoming references are dropped. A converted one
    /// gets id `max + 1`, the parent's priority when it had none, and a
    /// dependency on its former parent; references to it are redirected.
    ///
    /// # Errors
    ///
    /// [`TaskforgeError::NotFound`], or [`TaskforgeError::CircularDependency`]
    /// if the parent depended on the subtask being promoted.
    pub fn remove_subtask(
        &mut self,
        parent_id: TaskId,
        subtask_id: u32,
        convert: bool,
    ) -> Result<RemovedSubtask> {
        let old_id = EntityId::subtask(parent_id, subtask_id);
        let parent = self.task(parent_id)?;
        let sub = parent
            .subtask(subtask_id)
            .cloned()
            .ok_or_else(|| TaskforgeError::not_found(old_id))?;

        let mut tasks = self.store.tasks().to_vec();
        find_task(&mut tasks, parent_id)?
            .subtasks
            .retain(|s| s.id != subtask_id);

        if !convert {
            retarget_references(&mut tasks, old_id, None);
            self.commit(
                tasks,
                format!("Removed subtask {old_id}"),
                json!({ "action": "remove-subtask", "id": old_id.to_string() }),
            )?;
            return Ok(RemovedSubtask::Deleted(sub));
        }

        let new_id = next_task_id(&tasks)?;
        let mut task = Task::new(new_id, sub.title.clone());
        task.description = sub.description.clone();
        task.status = sub.status.clone();
        task.status_changed_at = sub.status_changed_at;
        task.priority = sub.effective_priority(&parent);
        task.details = sub.details.clone();
        task.test_strategy = sub.test_strategy.clone();
        task.dependencies = std::iter::once(parent.entity_id())
            .chain(sub.dependencies.iter().filter_map(|d| d.resolve(Some(parent_id))))
            .filter(|d| *d != old_id)
            .map(|d| DependencyRef::from_entity(d, None))
            .collect();
        tasks.push(task);
        retarget_references(&mut tasks, old_id, Some(EntityId::task(new_id)));

        if let Some(cycle) = DependencyGraph::from_tasks(&tasks)
            .find_cycles()
            .into_iter()
            .find(|c| c.contains(&EntityId::task(new_id)))
        {
            return Err(TaskforgeError::CircularDependency {
                cycle: graph::closed_cycle(&cycle),
            });
        }

        self.commit(
            tasks,
            format!("Converted subtask {old_id} to task {new_id}"),
            json!({ "action": "remove-subtask", "id": old_id.to_string(), "convertedTo": new_id }),
        )?;
        info!("Converted subtask {old_id} to task {new_id}");
        Ok(RemovedSubtask::Converted(self.task(new_id)?))
    }

    /// Remove every subtask of the given tasks. Returns how many were
    /// removed.
    ///
    /// # Errors
    ///
    /// [`TaskforgeError::NotFound`] if any id is unknown; nothing is
    /// committed in that case.
    pub fn clear_subtasks(&mut self, ids: &[TaskId]) -> Result<usize> {
        let mut tasks = self.store.tasks().to_vec();
        let mut removed = Vec::new();
        for &id in ids {
            let task = find_task(&mut tasks, id)?;
            removed.extend(task.subtasks.drain(..).map(|s| EntityId::subtask(id, s.id)));
        }
        if removed.is_empty() {
            return Ok(0);
        }
        for old in &removed {
            retarget_references(&mut tasks, *old, None);
        }
        self.commit(
            tasks,
            format!("Cleared {} subtasks", removed.len()),
            json!({ "action": "clear-subtasks", "ids": ids }),
        )?;
        Ok(removed.len())
    }

    // ------------------------------------------------------------------------
    // Dependencies
    // ------------------------------------------------------------------------

    /// Make `id` depend on `depends_on`. Adding an existing dependency is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// [`TaskforgeError::NotFound`] for an unknown `id`; a dependency error
    /// for a missing target, a self reference, or a new cycle.
    pub fn add_dependency(&mut self, id: EntityId, depends_on: EntityId) -> Result<Task> {
        let mut tasks = self.store.tasks().to_vec();
        let parent = id.subtask.map(|_| id.task);
        if dependency_list_mut(&mut tasks, id)?
            .iter()
            .any(|d| d.points_to(depends_on, parent))
        {
            info!("{id} already depends on {depends_on}");
            return self.task(id.task);
        }
        check_dependency(&tasks, id, depends_on)?;
        dependency_list_mut(&mut tasks, id)?.push(DependencyRef::from_entity(depends_on, parent));

        self.commit(
            tasks,
            format!("Added dependency {id} -> {depends_on}"),
            json!({ "action": "add-dependency", "id": id.to_string(), "dependsOn": depends_on.to_string() }),
        )?;
        self.task(id.task)
    }

    /// Drop the dependency of `id` on `depends_on`.
    ///
    /// # Errors
    ///
    /// [`TaskforgeError::NotFound`] for an unknown `id`, or
    /// [`TaskforgeError::Validation`] if the dependency does not exist.
    pub fn remove_dependency(&mut self, id: EntityId, depends_on: EntityId) -> Result<Task> {
        let mut tasks = self.store.tasks().to_vec();
        let parent = id.subtask.map(|_| id.task);
        let list = dependency_list_mut(&mut tasks, id)?;
        let before = list.len();
        list.retain(|d| !d.points_to(depends_on, parent));
        if list.len() == before {
            return Err(TaskforgeError::validation(format!(
                "{id} does not depend on {depends_on}"
            )));
        }

        self.commit(
            tasks,
            format!("Removed dependency {id} -> {depends_on}"),
            json!({ "action": "remove-dependency", "id": id.to_string(), "dependsOn": depends_on.to_string() }),
        )?;
        self.task(id.task)
    }

    /// Check every dependency. Does not modify anything.
    #[must_use]
    pub fn validate_dependencies(&self) -> ValidationReport {
        graph::validate(self.store.tasks())
    }

    /// Remove duplicate, missing, and self dependencies. Cycles are left
    /// for the user to resolve.
    ///
    /// # Errors
    ///
    /// Persistence errors from the commit.
    pub fn fix_dependencies(&mut self) -> Result<RepairSummary> {
        let (tasks, summary) = graph::repair_with_summary(self.store.tasks());
        if summary.total() == 0 {
            return Ok(summary);
        }
        self.commit(
            tasks,
            format!("Fixed {} dependency problems", summary.total()),
            json!({ "action": "fix-dependencies", "summary": summary }),
        )?;
        Ok(summary)
    }

    // ------------------------------------------------------------------------
    // Generator-backed actions
    // ------------------------------------------------------------------------

    /// Generate tasks from a requirements document.
    ///
    /// Without `append`, the generated tasks replace the current list and are
    /// numbered from 1. Generated dependencies are kept only when they point
    /// at an earlier task of the same batch.
    ///
    /// # Errors
    ///
    /// - [`TaskforgeError::NotFound`] / [`TaskforgeError::Io`] if the file
    ///   cannot be read, [`TaskforgeError::Validation`] if it is empty
    /// - [`TaskforgeError::Generator`] if generation fails or returns nothing
    pub async fn parse_prd(
        &mut self,
        generator: &dyn TaskGenerator,
        prd_path: &Path,
        options: ParsePrdOptions,
    ) -> Result<Vec<Task>> {
        let prd = match std::fs::read_to_string(prd_path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TaskforgeError::missing(
                    "PRD file",
                    prd_path.display().to_string(),
                ))
            }
            Err(e) => return Err(e.into()),
        };
        if prd.trim().is_empty() {
            return Err(TaskforgeError::validation(format!(
                "{} is empty",
                prd_path.display()
            )));
        }

        let count = options.num_tasks.unwrap_or(self.defaults.tasks).max(1);
        info!("Generating {count} tasks from {}", prd_path.display());
        let drafts = generator
            .generate_tasks(&prd, count, options.research)
            .await?;
        let drafts: Vec<TaskDraft> = drafts
            .into_iter()
            .filter(|d| !d.title.trim().is_empty())
            .collect();
        if drafts.is_empty() {
            return Err(GeneratorError::Empty { what: "tasks" }.into());
        }

        let mut tasks = if options.append {
            self.store.tasks().to_vec()
        } else {
            Vec::new()
        };
        let created = self.tasks_from_drafts(&tasks, drafts)?;
        let new_ids: Vec<TaskId> = created.iter().map(|t| t.id).collect();
        tasks.extend(created);

        let mut meta = self.store.meta().clone();
        meta.set("sourceFile", prd_path.display().to_string());
        meta.set("generatedAt", Utc::now().to_rfc3339());
        meta.set("totalTasks", tasks.len());

        debug!("Parsed PRD into tasks {new_ids:?}");
        self.store.set_state(
            StatePatch::new()
                .tasks(tasks)
                .meta(meta)
                .record(ChangeRecord::new(
                    format!("Generated {} tasks from {}", new_ids.len(), prd_path.display()),
                    json!({ "action": "parse-prd", "ids": new_ids, "append": options.append }),
                )),
            CommitOptions::default(),
        )?;

        Ok(self
            .store
            .tasks()
            .iter()
            .filter(|t| new_ids.contains(&t.id))
            .cloned()
            .collect())
    }

    fn tasks_from_drafts(&self, existing: &[Task], drafts: Vec<TaskDraft>) -> Result<Vec<Task>> {
        let first = next_task_id(existing)?;
        u32::try_from(drafts.len())
            .ok()
            .and_then(|n| first.checked_add(n.saturating_sub(1)))
            .ok_or_else(|| {
                TaskforgeError::validation(format!("no room for {} tasks after {first}", drafts.len()))
            })?;
        let local_ids: Vec<u32> = drafts
            .iter()
            .enumerate()
            .map(|(i, d)| if d.id == 0 { i as u32 + 1 } else { d.id })
            .collect();

        Ok(drafts
            .into_iter()
            .enumerate()
            .map(|(i, draft)| {
                let id = first + i as u32;
                let mut task = Task::new(id, draft.title.trim().to_string());
                task.priority = draft.priority().unwrap_or(self.defaults.priority);
                task.dependencies = draft
                    .dependencies
                    .iter()
                    .filter_map(|local| local_ids[..i].iter().position(|l| l == local))
                    .map(|pos| DependencyRef::Task(first + pos as u32))
                    .collect();
                task.dependencies.dedup();
                task.description = draft.description;
                task.details = draft.details;
                task.test_strategy = draft.test_strategy;
                task
            })
            .collect())
    }

    /// Break a task into subtasks using the generator.
    ///
    /// If the generator fails or returns nothing, a few clearly labelled
    /// placeholder subtasks are added instead and the error is reported in
    /// [`Expansion::fallback`]. Existing subtasks, and references to them,
    /// are only replaced once the generator has produced usable drafts; a
    /// failed forced expand leaves the task untouched.
    ///
    /// # Errors
    ///
    /// [`TaskforgeError::NotFound`], [`TaskforgeError::Validation`] if the
    /// task already has subtasks and `force` is not set, or persistence
    /// errors from the commit.
    pub async fn expand_task(
        &mut self,
        generator: &dyn TaskGenerator,
        id: TaskId,
        options: ExpandOptions,
    ) -> Result<Expansion> {
        let mut task = self.task(id)?;
        if !task.subtasks.is_empty() && !options.force {
            return Err(TaskforgeError::validation(format!(
                "task {id} already has {} subtasks; use force to replace them",
                task.subtasks.len()
            )));
        }

        let existing = std::mem::take(&mut task.subtasks);

        let count = options
            .num_subtasks
            .or_else(|| task.complexity.as_ref().map(|c| c.recommended_subtasks))
            .filter(|n| *n > 0)
            .unwrap_or(self.defaults.subtasks);
        let context = options.context.clone().or_else(|| {
            task.complexity
                .as_ref()
                .and_then(|c| c.expansion_prompt.clone())
        });

        info!("Expanding task {id} into {count} subtasks");
        let outcome = generator
            .generate_subtasks(&task, count, context.as_deref(), options.research)
            .await
            .and_then(|drafts| {
                let drafts: Vec<SubtaskDraft> = drafts
                    .into_iter()
                    .filter(|d| !d.title.trim().is_empty())
                    .collect();
                if drafts.is_empty() {
                    Err(GeneratorError::Empty { what: "subtasks" })
                } else {
                    Ok(drafts)
                }
            });
        let (drafts, fallback) = match outcome {
            Ok(drafts) => (drafts, None),
            Err(e) if !existing.is_empty() => {
                warn!("Subtask generation for task {id} failed, keeping its subtasks: {e}");
                task.subtasks = existing;
                return Ok(Expansion {
                    task,
                    fallback: Some(e),
                    kept_existing: true,
                });
            }
            Err(e) => {
                warn!("Subtask generation for task {id} failed, adding placeholders: {e}");
                (placeholder_subtasks(&task, count, &e), Some(e))
            }
        };

        // Old subtasks go only once there is something to replace them with.
        let mut tasks = self.store.tasks().to_vec();
        find_task(&mut tasks, id)?.subtasks.clear();
        for old in existing.iter().map(|s| EntityId::subtask(id, s.id)) {
            retarget_references(&mut tasks, old, None);
        }

        let subtasks: Vec<Subtask> = drafts
            .into_iter()
            .enumerate()
            .map(|(i, draft)| {
                let sub_id = i as u32 + 1;
                let mut sub = Subtask::new(sub_id, draft.title.trim().to_string());
                sub.description = draft.description;
                sub.details = draft.details;
                sub.test_strategy = draft.test_strategy;
                sub.dependencies = draft
                    .dependencies
                    .iter()
                    .filter(|pos| **pos >= 1 && **pos < sub_id)
                    .map(|pos| DependencyRef::Sibling(*pos))
                    .collect();
                sub.dependencies.dedup();
                sub
            })
            .collect();
        let added = subtasks.len();
        find_task(&mut tasks, id)?.subtasks = subtasks;

        self.commit(
            tasks,
            format!("Expanded task {id} into {added} subtasks"),
            json!({
                "action": "expand",
                "id": id,
                "count": added,
                "fallback": fallback.as_ref().map(ToString::to_string),
            }),
        )?;
        Ok(Expansion {
            task: self.task(id)?,
            fallback,
            kept_existing: false,
        })
    }

    /// Score task complexity and attach the result to each task.
    ///
    /// # Errors
    ///
    /// [`TaskforgeError::NotFound`] for unknown ids in `options.ids`, or
    /// [`TaskforgeError::Generator`] if the generator fails.
    pub async fn analyze_complexity(
        &mut self,
        generator: &dyn TaskGenerator,
        options: ComplexityOptions,
    ) -> Result<ComplexityReport> {
        let candidates: Vec<Task> = match &options.ids {
            Some(ids) => ids.iter().map(|id| self.task(*id)).collect::<Result<_>>()?,
            None => self
                .store
                .tasks()
                .iter()
                .filter(|t| !t.status.is_complete())
                .cloned()
                .collect(),
        };
        if candidates.is_empty() {
            return Ok(ComplexityReport {
                threshold: options.threshold,
                entries: Vec::new(),
            });
        }

        let assessments = generator
            .analyze_complexity(&candidates, options.research)
            .await?;

        let mut tasks = self.store.tasks().to_vec();
        let mut entries = Vec::new();
        for assessment in assessments {
            if !candidates.iter().any(|t| t.id == assessment.task_id) {
                debug!("Ignoring assessment for unknown task {}", assessment.task_id);
                continue;
            }
            let Some(task) = tasks.iter_mut().find(|t| t.id == assessment.task_id) else {
                continue;
            };
            let score = assessment.score.clamp(1, 10);
            task.complexity = Some(Complexity {
                score,
                recommended_subtasks: assessment.recommended_subtasks,
                reasoning: assessment.reasoning.clone(),
                expansion_prompt: assessment.expansion_prompt,
            });
            entries.push(ComplexityEntry {
                task_id: task.id,
                title: task.title.clone(),
                score,
                recommended_subtasks: assessment.recommended_subtasks,
                reasoning: assessment.reasoning,
                needs_expansion: score >= options.threshold,
            });
        }
        entries.sort_by(|a, b| b.score.cmp(&a.score).then(a.task_id.cmp(&b.task_id)));

        if !entries.is_empty() {
            self.commit(
                tasks,
                format!("Analyzed complexity of {} tasks", entries.len()),
                json!({ "action": "analyze-complexity", "threshold": options.threshold }),
            )?;
        }
        Ok(ComplexityReport {
            threshold: options.threshold,
            entries,
        })
    }

    // ------------------------------------------------------------------------
    // History
    // ------------------------------------------------------------------------

    /// Undo the last action. Returns `false` if there was nothing to undo.
    ///
    /// # Errors
    ///
    /// Persistence errors from the restoring commit.
    pub fn undo(&mut self) -> Result<bool> {
        self.store.undo()
    }

    /// Redo the last undone action. Returns `false` if there was nothing to
    /// redo.
    ///
    /// # Errors
    ///
    /// Persistence errors from the restoring commit.
    pub fn redo(&mut self) -> Result<bool> {
        self.store.redo()
    }
}
