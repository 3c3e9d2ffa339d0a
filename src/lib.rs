//! Taskforge - task tracking with dependency validation
//!
//! A task list persisted as JSON, with a status state machine, dependency
//! graph checks, undo history, and optional AI-generated tasks and subtasks.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`task`] - Task data model and the status state machine
//! - [`graph`] - Dependency validation, cycle detection, and repair
//! - [`store`] - In-memory task store with hooks, history, and persistence
//! - [`actions`] - The mutation entry points used by the CLI
//! - [`generator`] - AI task generation behind the [`TaskGenerator`] trait
//! - [`llm`] - LLM clients (Claude CLI, mock)
//! - [`config`] - Configuration loading and validation
//! - [`error`] - Custom error types and exit codes
//!
//! # Example
//!
//! ```rust,ignore
//! use taskforge::{NewTask, StoreOptions, TaskActions, TaskStore};
//!
//! let mut store = TaskStore::open(StoreOptions::new("tasks.json"))?;
//! let task = TaskActions::new(&mut store).add_task(NewTask::titled("Write parser"))?;
//! println!("Added task {}", task.id);
//! store.close().await?;
//! ```

pub mod actions;
pub mod config;
pub mod error;
pub mod generator;
pub mod graph;
pub mod llm;
pub mod store;
pub mod task;

// Re-export commonly used types
pub use error::{IntoTaskforgeError, Result, TaskforgeError};

pub use config::{PersistenceConfig, ProjectConfig};

pub use task::{
    can_transition, transition, DependencyRef, EntityId, Priority, Subtask, Task, TaskFile,
    TaskId, TaskMeta, TaskStatus,
};

pub use graph::{validate, would_create_cycle, DependencyGraph, IssueKind, ValidationReport};

pub use store::{StoreOptions, StoreState, TaskStore};

pub use actions::{
    ExpandOptions, NewSubtask, NewTask, ParsePrdOptions, RemovedSubtask, SubtaskSource,
    TaskActions, TaskUpdate,
};

pub use generator::{GeneratorError, LlmTaskGenerator, TaskGenerator};

pub use llm::{create_llm_client, LlmClient, LlmConfig, MockLlmClient};
