//! Entity identifiers and dependency references.
//!
//! Tasks are addressed by a bare number (`5`), subtasks by a composite id
//! (`5.2`). Dependency lists store a [`DependencyRef`], which keeps the
//! legacy "bare number inside a subtask means sibling" shorthand as its own
//! variant instead of overloading the task-id meaning.

use serde::de::Error as _;
use serde::ser::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Identifier of a top-level task.
pub type TaskId = u32;

// ============================================================================
// Entity Identifier
// ============================================================================

/// Address of a task (`5`) or subtask (`5.2`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId {
    /// Owning top-level task
    pub task: TaskId,
    /// Subtask id within the task, if this addresses a subtask
    pub subtask: Option<u32>,
}

impl EntityId {
    /// Address a top-level task.
    #[must_use]
    pub const fn task(task: TaskId) -> Self {
        Self {
            task,
            subtask: None,
        }
    }

    /// Address a subtask.
    #[must_use]
    pub const fn subtask(task: TaskId, subtask: u32) -> Self {
        Self {
            task,
            subtask: Some(subtask),
        }
    }

    /// Whether this addresses a subtask.
    #[must_use]
    pub fn is_subtask(&self) -> bool {
        self.subtask.is_some()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.subtask {
            Some(sub) => write!(f, "{}.{}", self.task, sub),
            None => write!(f, "{}", self.task),
        }
    }
}

/// Error returned when an id is neither `N` nor `N.M`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid id '{0}': expected a task id like 5 or a subtask id like 5.2")]
pub struct ParseEntityIdError(String);

impl FromStr for EntityId {
    type Err = ParseEntityIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let err = || ParseEntityIdError(s.to_string());
        match trimmed.split_once('.') {
            Some((task, sub)) => {
                let task = task.parse::<TaskId>().map_err(|_| err())?;
                let sub = sub.parse::<u32>().map_err(|_| err())?;
                Ok(EntityId::subtask(task, sub))
            }
            None => trimmed.parse::<TaskId>().map(EntityId::task).map_err(|_| err()),
        }
    }
}

impl Serialize for EntityId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for EntityId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match RawDependency::deserialize(deserializer)? {
            RawDependency::Number(id) => Ok(EntityId::task(id)),
            RawDependency::Text(text) => text.parse().map_err(D::Error::custom),
        }
    }
}

/// Parse a comma-separated id list such as `1,2.1, 4`.
///
/// # Errors
///
/// Returns the first id that fails to parse.
pub fn parse_id_list(input: &str) -> Result<Vec<EntityId>, ParseEntityIdError> {
    input
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(EntityId::from_str)
        .collect()
}

// ============================================================================
// Dependency Reference
// ============================================================================

/// One entry of a dependency list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DependencyRef {
    /// A top-level task
    Task(TaskId),
    /// A subtask addressed by its full composite id
    Subtask { task: TaskId, subtask: u32 },
    /// A sibling subtask under the same parent (legacy bare-number shorthand)
    Sibling(u32),
}

impl DependencyRef {
    /// Resolve to an absolute entity id.
    ///
    /// `parent` is the owning task when the reference lives in a subtask's
    /// dependency list; sibling references cannot be resolved without it.
    #[must_use]
    pub fn resolve(&self, parent: Option<TaskId>) -> Option<EntityId> {
        match *self {
            DependencyRef::Task(id) => Some(EntityId::task(id)),
            DependencyRef::Subtask { task, subtask } => Some(EntityId::subtask(task, subtask)),
            DependencyRef::Sibling(sub) => parent.map(|p| EntityId::subtask(p, sub)),
        }
    }

    /// Build the canonical reference to `target` from a list owned by
    /// `parent` (`None` for a top-level task's list).
    ///
    /// References to siblings use the shorthand form so files written by
    /// older tools round-trip unchanged.
    #[must_use]
    pub fn from_entity(target: EntityId, parent: Option<TaskId>) -> Self {
        match (target.subtask, parent) {
            (None, _) => DependencyRef::Task(target.task),
            (Some(sub), Some(p)) if p == target.task => DependencyRef::Sibling(sub),
            (Some(sub), _) => DependencyRef::Subtask {
                task: target.task,
                subtask: sub,
            },
        }
    }

    /// Whether this reference resolves to `target`.
    #[must_use]
    pub fn points_to(&self, target: EntityId, parent: Option<TaskId>) -> bool {
        self.resolve(parent) == Some(target)
    }
}

impl fmt::Display for DependencyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DependencyRef::Task(id) => write!(f, "{id}"),
            DependencyRef::Subtask { task, subtask } => write!(f, "{task}.{subtask}"),
            DependencyRef::Sibling(sub) => write!(f, "sibling {sub}"),
        }
    }
}

// ============================================================================
// Custom Serialization
// ============================================================================

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawDependency {
    Number(u32),
    Text(String),
}

fn parse_text<E: serde::de::Error>(text: &str) -> Result<DependencyRef, E> {
    let id = EntityId::from_str(text).map_err(E::custom)?;
    Ok(match id.subtask {
        Some(sub) => DependencyRef::Subtask {
            task: id.task,
            subtask: sub,
        },
        None => DependencyRef::Task(id.task),
    })
}

/// Dependency lists on top-level tasks.
///
/// Numbers are task ids; strings are `"N"` or `"N.M"`.
pub(crate) mod task_deps {
    use super::*;

    pub fn serialize<S>(deps: &[DependencyRef], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let raw = deps
            .iter()
            .map(|dep| match *dep {
                DependencyRef::Task(id) => Ok(RawDependency::Number(id)),
                DependencyRef::Subtask { task, subtask } => {
                    Ok(RawDependency::Text(format!("{task}.{subtask}")))
                }
                DependencyRef::Sibling(sub) => Err(S::Error::custom(format!(
                    "sibling reference {sub} is only valid inside a subtask"
                ))),
            })
            .collect::<Result<Vec<_>, _>>()?;
        raw.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<DependencyRef>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Vec::<RawDependency>::deserialize(deserializer)?
            .into_iter()
            .map(|raw| match raw {
                RawDependency::Number(id) => Ok(DependencyRef::Task(id)),
                RawDependency::Text(text) => parse_text::<D::Error>(&text),
            })
            .collect()
    }
}

/// Dependency lists on subtasks.
///
/// Numbers are sibling subtask ids (legacy shorthand); a top-level task is
/// written as the string `"N"`, another task's subtask as `"N.M"`.
pub(crate) mod subtask_deps {
    use super::*;

    pub fn serialize<S>(deps: &[DependencyRef], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let raw: Vec<RawDependency> = deps
            .iter()
            .map(|dep| match *dep {
                DependencyRef::Sibling(sub) => RawDependency::Number(sub),
                DependencyRef::Task(id) => RawDependency::Text(id.to_string()),
                DependencyRef::Subtask { task, subtask } => {
                    RawDependency::Text(format!("{task}.{subtask}"))
                }
            })
            .collect();
        raw.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<DependencyRef>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Vec::<RawDependency>::deserialize(deserializer)?
            .into_iter()
            .map(|raw| match raw {
                RawDependency::Number(sub) => Ok(DependencyRef::Sibling(sub)),
                RawDependency::Text(text) => parse_text::<D::Error>(&text),
            })
            .collect()
    }
}
