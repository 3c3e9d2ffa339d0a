//! Custom error types for taskforge.
//!
//! This module provides structured error types that enable better
//! error handling, reporting, and exit-code mapping throughout the application.

use std::path::PathBuf;
use thiserror::Error;

use crate::generator::GeneratorError;
use crate::task::{EntityId, TaskStatus};

/// Main error type for taskforge operations
#[derive(Error, Debug)]
pub enum TaskforgeError {
    // =========================================================================
    // Input Errors
    // =========================================================================
    /// Bad input shape or missing required field
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// Referenced task or subtask does not exist
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    /// Status state machine rejected the change
    #[error("Invalid status transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: EntityId,
        from: TaskStatus,
        to: TaskStatus,
    },

    // =========================================================================
    // Dependency Errors
    // =========================================================================
    /// A dependency points at an entity that does not exist
    #[error("Missing dependency: {id} depends on {dependency}, which does not exist")]
    MissingDependency { id: EntityId, dependency: EntityId },

    /// An entity lists itself as a dependency
    #[error("Self dependency: {id} cannot depend on itself")]
    SelfDependency { id: EntityId },

    /// The change would close a loop in the dependency graph
    #[error("Circular dependency: {}", join_ids(cycle, " -> "))]
    CircularDependency { cycle: Vec<EntityId> },

    /// Removal is blocked because other entities still depend on the target
    #[error("Cannot remove {id}: still required by {}", join_ids(blocked_by, ", "))]
    DependencyConflict {
        id: EntityId,
        blocked_by: Vec<EntityId>,
    },

    /// Converting a task into a subtask would make the parent depend on itself
    #[error("Cannot convert task {task} into a subtask of {parent}: {parent} already depends on {task}")]
    CircularConversion { task: EntityId, parent: EntityId },

    // =========================================================================
    // Storage Errors
    // =========================================================================
    /// Task file could not be read, parsed, locked, or written
    #[error("Persistence error ({}): {message}", path.display())]
    Persistence { path: PathBuf, message: String },

    // =========================================================================
    // Collaborator Errors
    // =========================================================================
    /// AI generator failure
    #[error(transparent)]
    Generator(#[from] GeneratorError),

    /// Failed to load or validate configuration
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        path: Option<PathBuf>,
    },

    // =========================================================================
    // Wrapped Errors
    // =========================================================================
    /// IO error wrapper
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON error wrapper
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Generic error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

fn join_ids(ids: &[EntityId], sep: &str) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(sep)
}

impl TaskforgeError {
    // =========================================================================
    // Constructor helpers
    // =========================================================================

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a not-found error for a task or subtask
    pub fn not_found(id: EntityId) -> Self {
        Self::NotFound {
            kind: if id.is_subtask() { "Subtask" } else { "Task" },
            id: id.to_string(),
        }
    }

    /// Create a not-found error for an arbitrary resource
    pub fn missing(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Create a persistence error
    pub fn persistence(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Persistence {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            path: None,
        }
    }

    /// Create a configuration error with path
    pub fn config_with_path(message: impl Into<String>, path: PathBuf) -> Self {
        Self::Config {
            message: message.into(),
            path: Some(path),
        }
    }

    // =========================================================================
    // Classification helpers
    // =========================================================================

    /// Check if this error belongs to the dependency family
    pub fn is_dependency_error(&self) -> bool {
        matches!(
            self,
            Self::MissingDependency { .. }
                | Self::SelfDependency { .. }
                | Self::CircularDependency { .. }
                | Self::DependencyConflict { .. }
                | Self::CircularConversion { .. }
        )
    }

    /// Check if this error was caused by user input rather than the environment
    pub fn is_user_error(&self) -> bool {
        self.is_dependency_error()
            || matches!(
                self,
                Self::Validation { .. } | Self::NotFound { .. } | Self::InvalidTransition { .. }
            )
    }

    /// Check if retrying the same operation might succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Persistence { .. } | Self::Io(_) => true,
            Self::Generator(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Get error code for exit status
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Validation { .. } => 2,
            Self::NotFound { .. } => 3,
            Self::InvalidTransition { .. } => 4,
            e if e.is_dependency_error() => 5,
            Self::Persistence { .. } => 6,
            Self::Generator(_) => 7,
            Self::Config { .. } => 8,
            _ => 1,
        }
    }
}

/// Type alias for taskforge results
pub type Result<T> = std::result::Result<T, TaskforgeError>;

/// Extension trait for converting foreign errors to TaskforgeError
pub trait IntoTaskforgeError<T> {
    fn into_persistence(self, path: &std::path::Path) -> Result<T>;
    fn into_config(self) -> Result<T>;
}

impl<T, E: Into<anyhow::Error>> IntoTaskforgeError<T> for std::result::Result<T, E> {
    fn into_persistence(self, path: &std::path::Path) -> Result<T> {
        self.map_err(|e| TaskforgeError::persistence(path, format!("{:#}", e.into())))
    }

    fn into_config(self) -> Result<T> {
        self.map_err(|e| TaskforgeError::config(format!("{:#}", e.into())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TaskforgeError::CircularDependency {
            cycle: vec![EntityId::task(1), EntityId::task(2), EntityId::task(1)],
        };
        assert_eq!(err.to_string(), "Circular dependency: 1 -> 2 -> 1");
    }

    #[test]
    fn test_not_found_names_the_entity_kind() {
        assert_eq!(
            TaskforgeError::not_found(EntityId::task(7)).to_string(),
            "Task 7 not found"
        );
        assert_eq!(
            TaskforgeError::not_found(EntityId::subtask(7, 2)).to_string(),
            "Subtask 7.2 not found"
        );
    }

    #[test]
    fn test_dependency_conflict_lists_blockers() {
        let err = TaskforgeError::DependencyConflict {
            id: EntityId::task(1),
            blocked_by: vec![EntityId::task(2), EntityId::subtask(3, 1)],
        };
        let msg = err.to_string();
        assert!(msg.contains("Cannot remove 1"));
        assert!(msg.contains("2, 3.1"));
    }

    #[test]
    fn test_dependency_family() {
        assert!(TaskforgeError::SelfDependency {
            id: EntityId::task(1)
        }
        .is_dependency_error());
        assert!(!TaskforgeError::validation("x").is_dependency_error());
    }

    #[test]
    fn test_is_user_error() {
        assert!(TaskforgeError::validation("missing title").is_user_error());
        assert!(TaskforgeError::not_found(EntityId::task(1)).is_user_error());
        assert!(!TaskforgeError::persistence("/tmp/x", "denied").is_user_error());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(TaskforgeError::validation("x").exit_code(), 2);
        assert_eq!(TaskforgeError::not_found(EntityId::task(1)).exit_code(), 3);
        assert_eq!(
            TaskforgeError::InvalidTransition {
                id: EntityId::task(1),
                from: TaskStatus::Done,
                to: TaskStatus::Deferred,
            }
            .exit_code(),
            4
        );
        assert_eq!(
            TaskforgeError::SelfDependency {
                id: EntityId::task(1)
            }
            .exit_code(),
            5
        );
        assert_eq!(TaskforgeError::persistence("/x", "y").exit_code(), 6);
        assert_eq!(TaskforgeError::config("bad").exit_code(), 8);
    }

    #[test]
    fn test_config_with_path() {
        let path = PathBuf::from("/test/settings.json");
        let err = TaskforgeError::config_with_path("failed to parse", path.clone());
        if let TaskforgeError::Config {
            message,
            path: opt_path,
        } = err
        {
            assert_eq!(message, "failed to parse");
            assert_eq!(opt_path, Some(path));
        } else {
            panic!("Wrong error variant");
        }
    }

    #[test]
    fn test_into_persistence_trait() {
        let result: std::result::Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "access denied",
        ));

        let converted = result.into_persistence(std::path::Path::new("/data/tasks.json"));
        match converted {
            Err(TaskforgeError::Persistence { path, message }) => {
                assert_eq!(path, PathBuf::from("/data/tasks.json"));
                assert!(message.contains("access denied"));
            }
            other => panic!("Wrong error variant after conversion: {other:?}"),
        }
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err: TaskforgeError = io_err.into();
        assert!(matches!(err, TaskforgeError::Io(_)));
        assert!(err.is_retryable());
    }
}
