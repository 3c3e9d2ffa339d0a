//! Bounded undo/redo history of store snapshots.

use std::collections::VecDeque;

use crate::task::{Task, TaskMeta};

/// Number of snapshots kept for undo.
pub const HISTORY_CAPACITY: usize = 50;

/// Immutable copy of the task data at one point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub tasks: Vec<Task>,
    pub meta: TaskMeta,
}

/// Undo stack with a redo tail.
///
/// Recording a new snapshot discards the redo tail. When the undo stack is
/// full the oldest snapshot is dropped.
#[derive(Debug, Clone)]
pub struct History {
    past: VecDeque<Snapshot>,
    future: Vec<Snapshot>,
    capacity: usize,
}

impl Default for History {
    fn default() -> Self {
        Self::with_capacity(HISTORY_CAPACITY)
    }
}

impl History {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            past: VecDeque::with_capacity(capacity),
            future: Vec::new(),
            capacity: capacity.max(1),
        }
    }

    /// Remember the state as it was before a change.
    pub fn record(&mut self, before: Snapshot) {
        if self.past.len() == self.capacity {
            self.past.pop_front();
        }
        self.past.push_back(before);
        self.future.clear();
    }

    /// Step back. `current` becomes the redo target.
    pub fn undo(&mut self, current: Snapshot) -> Option<Snapshot> {
        let previous = self.past.pop_back()?;
        self.future.push(current);
        Some(previous)
    }

    /// Step forward again. `current` goes back onto the undo stack.
    pub fn redo(&mut self, current: Snapshot) -> Option<Snapshot> {
        let next = self.future.pop()?;
        if self.past.len() == self.capacity {
            self.past.pop_front();
        }
        self.past.push_back(current);
        Some(next)
    }

    #[must_use]
    pub fn can_undo(&self) -> bool {
        !self.past.is_empty()
    }

    #[must_use]
    pub fn can_redo(&self) -> bool {
        !self.future.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.past.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.past.is_empty()
    }

    pub fn clear(&mut self) {
        self.past.clear();
        self.future.clear();
    }
}
