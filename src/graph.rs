//! Dependency graph validation and repair.
//!
//! The graph has one node per task and subtask and an edge `A -> B` for every
//! "A depends on B". A cycle exists when following those edges from some
//! entity leads back to it.
//!
//! [`validate`] reports missing references, self references and cycles.
//! [`repair`] removes duplicate, missing and self references but never
//! breaks cycles; those are reported for the user to resolve.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;

use crate::task::{DependencyRef, EntityId, Task, TaskId};

// ============================================================================
// Issues
// ============================================================================

/// Category of a dependency problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    MissingDependency,
    SelfDependency,
    CircularDependency,
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            IssueKind::MissingDependency => "missing_dependency",
            IssueKind::SelfDependency => "self_dependency",
            IssueKind::CircularDependency => "circular_dependency",
        };
        f.write_str(label)
    }
}

/// A single problem found by [`validate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyIssue {
    pub entity_id: EntityId,
    pub kind: IssueKind,
    pub message: String,
    /// For cycles, the participating entities starting at the smallest id
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cycle: Vec<EntityId>,
}

/// Result of validating a task set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub issues: Vec<DependencyIssue>,
}

impl ValidationReport {
    /// Issues of a given kind.
    pub fn of_kind(&self, kind: IssueKind) -> impl Iterator<Item = &DependencyIssue> {
        self.issues.iter().filter(move |i| i.kind == kind)
    }

    #[must_use]
    pub fn count(&self, kind: IssueKind) -> usize {
        self.of_kind(kind).count()
    }
}

// ============================================================================
// Graph
// ============================================================================

/// Adjacency view of the "depends on" relation.
///
/// Self edges and edges to missing entities are left out so cycle detection
/// only sees well-formed references.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    edges: BTreeMap<EntityId, Vec<EntityId>>,
}

/// Iterate every dependency list in the task set with its owner.
///
/// Yields `(owner, parent_for_resolution, deps)`.
fn dependency_lists(
    tasks: &[Task],
) -> impl Iterator<Item = (EntityId, Option<TaskId>, &[DependencyRef])> {
    tasks.iter().flat_map(|task| {
        std::iter::once((task.entity_id(), None, task.dependencies.as_slice())).chain(
            task.subtasks.iter().map(move |sub| {
                (
                    EntityId::subtask(task.id, sub.id),
                    Some(task.id),
                    sub.dependencies.as_slice(),
                )
            }),
        )
    })
}

fn all_entities(tasks: &[Task]) -> HashSet<EntityId> {
    dependency_lists(tasks).map(|(id, _, _)| id).collect()
}

impl DependencyGraph {
    /// Build the graph for a task set.
    #[must_use]
    pub fn from_tasks(tasks: &[Task]) -> Self {
        let nodes = all_entities(tasks);
        let mut edges: BTreeMap<EntityId, Vec<EntityId>> =
            nodes.iter().map(|id| (*id, Vec::new())).collect();

        for (owner, parent, deps) in dependency_lists(tasks) {
            for dep in deps {
                let Some(target) = dep.resolve(parent) else {
                    continue;
                };
                if target == owner || !nodes.contains(&target) {
                    continue;
                }
                let out = edges.entry(owner).or_default();
                if !out.contains(&target) {
                    out.push(target);
                }
            }
        }

        Self { edges }
    }

    #[must_use]
    pub fn contains(&self, id: EntityId) -> bool {
        self.edges.contains_key(&id)
    }

    /// Entities `id` depends on directly.
    #[must_use]
    pub fn dependencies_of(&self, id: EntityId) -> &[EntityId] {
        self.edges.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Return a copy of the graph with an extra `from -> to` edge.
    #[must_use]
    pub fn with_edge(&self, from: EntityId, to: EntityId) -> Self {
        let mut next = self.clone();
        let out = next.edges.entry(from).or_default();
        if !out.contains(&to) {
            out.push(to);
        }
        next.edges.entry(to).or_default();
        next
    }

    /// Shortest dependency path `from -> ... -> to`, if `from` depends on
    /// `to` directly or transitively.
    #[must_use]
    pub fn path(&self, from: EntityId, to: EntityId) -> Option<Vec<EntityId>> {
        let mut came_from: HashMap<EntityId, EntityId> = HashMap::new();
        let mut visited: HashSet<EntityId> = HashSet::new();
        let mut queue: VecDeque<EntityId> = VecDeque::new();
        queue.push_back(from);
        visited.insert(from);

        while let Some(current) = queue.pop_front() {
            for &next in self.dependencies_of(current) {
                if next == to {
                    let mut path = vec![to, current];
                    let mut cursor = current;
                    while let Some(&prev) = came_from.get(&cursor) {
                        path.push(prev);
                        cursor = prev;
                    }
                    path.reverse();
                    return Some(path);
                }
                if visited.insert(next) {
                    came_from.insert(next, current);
                    queue.push_back(next);
                }
            }
        }
        None
    }

    /// Whether `from` depends on `to`, directly or transitively.
    #[must_use]
    pub fn depends_transitively(&self, from: EntityId, to: EntityId) -> bool {
        self.path(from, to).is_some()
    }

    /// Find every distinct cycle reachable by depth-first search.
    ///
    /// Each cycle is reported once, rotated to start at its smallest id.
    /// Rotations of the same cycle collapse onto one entry.
    #[must_use]
    pub fn find_cycles(&self) -> Vec<Vec<EntityId>> {
        let mut seen: BTreeSet<Vec<EntityId>> = BTreeSet::new();
        let mut cycles = Vec::new();
        let mut done: HashSet<EntityId> = HashSet::new();

        for &start in self.edges.keys() {
            if done.contains(&start) {
                continue;
            }
            // (node, index of the next edge to explore)
            let mut stack: Vec<(EntityId, usize)> = vec![(start, 0)];
            let mut path: Vec<EntityId> = vec![start];
            let mut on_path: HashSet<EntityId> = HashSet::from([start]);

            while let Some((node, idx)) = stack.last_mut() {
                let node = *node;
                let deps = self.dependencies_of(node);
                if *idx >= deps.len() {
                    stack.pop();
                    path.pop();
                    on_path.remove(&node);
                    done.insert(node);
                    continue;
                }
                let next = deps[*idx];
                *idx += 1;

                if on_path.contains(&next) {
                    if let Some(pos) = path.iter().position(|n| *n == next) {
                        let cycle = normalize_cycle(&path[pos..]);
                        let mut key = cycle.clone();
                        key.sort();
                        if seen.insert(key) {
                            cycles.push(cycle);
                        }
                    }
                } else if !done.contains(&next) {
                    stack.push((next, 0));
                    path.push(next);
                    on_path.insert(next);
                }
            }
        }

        cycles
    }
}

fn normalize_cycle(nodes: &[EntityId]) -> Vec<EntityId> {
    let Some(min_pos) = nodes
        .iter()
        .enumerate()
        .min_by_key(|(_, id)| **id)
        .map(|(pos, _)| pos)
    else {
        return Vec::new();
    };
    let mut rotated = nodes[min_pos..].to_vec();
    rotated.extend_from_slice(&nodes[..min_pos]);
    rotated
}

fn describe_cycle(cycle: &[EntityId]) -> String {
    let mut parts: Vec<String> = cycle.iter().map(ToString::to_string).collect();
    if let Some(first) = cycle.first() {
        parts.push(first.to_string());
    }
    parts.join(" -> ")
}

/// Close a cycle for display: `[1, 2]` becomes `[1, 2, 1]`.
#[must_use]
pub fn closed_cycle(cycle: &[EntityId]) -> Vec<EntityId> {
    let mut closed = cycle.to_vec();
    if let Some(first) = cycle.first() {
        closed.push(*first);
    }
    closed
}

// ============================================================================
// Validation
// ============================================================================

/// Validate every dependency in the task set.
///
/// `valid` is true iff no dependency is missing, self-referential, or part of
/// a cycle.
#[must_use]
pub fn validate(tasks: &[Task]) -> ValidationReport {
    let nodes = all_entities(tasks);
    let mut issues = Vec::new();

    for (owner, parent, deps) in dependency_lists(tasks) {
        for dep in deps {
            match dep.resolve(parent) {
                Some(target) if target == owner => issues.push(DependencyIssue {
                    entity_id: owner,
                    kind: IssueKind::SelfDependency,
                    message: format!("{owner} depends on itself"),
                    cycle: Vec::new(),
                }),
                Some(target) if !nodes.contains(&target) => issues.push(DependencyIssue {
                    entity_id: owner,
                    kind: IssueKind::MissingDependency,
                    message: format!("{owner} depends on {target}, which does not exist"),
                    cycle: Vec::new(),
                }),
                Some(_) => {}
                None => issues.push(DependencyIssue {
                    entity_id: owner,
                    kind: IssueKind::MissingDependency,
                    message: format!("{owner} has a sibling reference outside any subtask"),
                    cycle: Vec::new(),
                }),
            }
        }
    }

    for cycle in DependencyGraph::from_tasks(tasks).find_cycles() {
        issues.push(DependencyIssue {
            entity_id: cycle[0],
            kind: IssueKind::CircularDependency,
            message: format!("Circular dependency: {}", describe_cycle(&cycle)),
            cycle,
        });
    }

    ValidationReport {
        valid: issues.is_empty(),
        issues,
    }
}

/// Would adding `from -> to` close a cycle?
///
/// Returns the cycle that would be created, as a closed path
/// `from -> to -> ... -> from`.
#[must_use]
pub fn would_create_cycle(tasks: &[Task], from: EntityId, to: EntityId) -> Option<Vec<EntityId>> {
    let graph = DependencyGraph::from_tasks(tasks);
    let mut path = graph.path(to, from)?;
    path.insert(0, from);
    Some(path)
}

// ============================================================================
// Repair
// ============================================================================

/// What [`repair_with_summary`] removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairSummary {
    pub duplicates_removed: usize,
    pub missing_removed: usize,
    pub self_references_removed: usize,
}

impl RepairSummary {
    #[must_use]
    pub fn total(&self) -> usize {
        self.duplicates_removed + self.missing_removed + self.self_references_removed
    }
}

/// Remove duplicate, missing, and self references. Cycles are kept.
#[must_use]
pub fn repair(tasks: &[Task]) -> Vec<Task> {
    repair_with_summary(tasks).0
}

/// Like [`repair`], also counting what was removed.
#[must_use]
pub fn repair_with_summary(tasks: &[Task]) -> (Vec<Task>, RepairSummary) {
    let nodes = all_entities(tasks);
    let mut summary = RepairSummary::default();

    let mut clean = |owner: EntityId, parent: Option<TaskId>, deps: &mut Vec<DependencyRef>| {
        let mut seen: HashSet<EntityId> = HashSet::new();
        deps.retain(|dep| match dep.resolve(parent) {
            None => {
                summary.missing_removed += 1;
                false
            }
            Some(target) if target == owner => {
                summary.self_references_removed += 1;
                false
            }
            Some(target) if !nodes.contains(&target) => {
                summary.missing_removed += 1;
                false
            }
            Some(target) => {
                if seen.insert(target) {
                    true
                } else {
                    summary.duplicates_removed += 1;
                    false
                }
            }
        });
    };

    let mut repaired = tasks.to_vec();
    for task in &mut repaired {
        clean(task.entity_id(), None, &mut task.dependencies);
        let parent = task.id;
        for sub in &mut task.subtasks {
            clean(
                EntityId::subtask(parent, sub.id),
                Some(parent),
                &mut sub.dependencies,
            );
        }
    }

    (repaired, summary)
}
