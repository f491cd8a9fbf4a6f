//! DAG construction and validation — run once when an engine is built.
//!
//! Rules enforced:
//! 1. Task IDs must be non-empty and unique within the workflow.
//! 2. Every `inputFrom` / `depends` entry must name a task in the workflow.
//! 3. The dependency relation must be acyclic.
//!
//! The resulting [`Graph`] carries a topological order in which ties between
//! independent tasks are broken by authoring order, so the same document
//! always yields the same order.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use indexmap::IndexMap;

use crate::{models::WorkflowSpec, EngineError};

/// One task's position in the graph. Derived from the workflow; read-only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DagNode {
    pub id: String,
    /// Tasks this one waits for (`inputFrom` ∪ `depends`), declaration order.
    pub dependencies: Vec<String>,
    /// Tasks that wait for this one, authoring order.
    pub dependents: Vec<String>,
}

/// Validated dependency graph plus its execution order.
#[derive(Debug, Clone)]
pub struct Graph {
    nodes: IndexMap<String, DagNode>,
    order: Vec<String>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    Visiting,
    Done,
}

impl Graph {
    /// Validate `spec` and build its graph.
    ///
    /// # Errors
    /// - [`EngineError::EmptyTaskId`] / [`EngineError::DuplicateTaskId`] for bad IDs.
    /// - [`EngineError::UnknownDependency`] if a reference names a missing task.
    /// - [`EngineError::CycleDetected`] if the graph is not acyclic.
    pub fn build(spec: &WorkflowSpec) -> Result<Self, EngineError> {
        spec.validate_ids()?;

        let mut nodes: IndexMap<String, DagNode> = spec
            .agents
            .iter()
            .map(|task| {
                (
                    task.id.clone(),
                    DagNode {
                        id: task.id.clone(),
                        dependencies: Vec::new(),
                        dependents: Vec::new(),
                    },
                )
            })
            .collect();

        for task in &spec.agents {
            for dep in task.all_dependencies() {
                if !nodes.contains_key(dep) {
                    return Err(EngineError::UnknownDependency {
                        task: task.id.clone(),
                        dependency: dep.to_owned(),
                    });
                }
            }
        }

        // Edges run dependency → task. Dependents are filled in authoring
        // order because we walk the tasks in that order.
        for task in &spec.agents {
            let deps: Vec<String> = task.all_dependencies().into_iter().map(str::to_owned).collect();
            for dep in &deps {
                if let Some(node) = nodes.get_mut(dep) {
                    node.dependents.push(task.id.clone());
                }
            }
            if let Some(node) = nodes.get_mut(&task.id) {
                node.dependencies = deps;
            }
        }

        detect_cycle(&nodes)?;
        let order = kahn_order(&nodes)?;
        Ok(Self { nodes, order })
    }

    /// The execution order computed at build time.
    pub fn order(&self) -> &[String] {
        &self.order
    }

    /// Recompute the topological order.
    ///
    /// Ties among independent tasks go to the one authored first.
    pub fn topological_sort(&self) -> Result<Vec<String>, EngineError> {
        kahn_order(&self.nodes)
    }

    /// Tasks with no dependencies, authoring order.
    pub fn roots(&self) -> Vec<&str> {
        self.nodes
            .values()
            .filter(|n| n.dependencies.is_empty())
            .map(|n| n.id.as_str())
            .collect()
    }

    /// Tasks nothing depends on, authoring order.
    pub fn leaves(&self) -> Vec<&str> {
        self.nodes
            .values()
            .filter(|n| n.dependents.is_empty())
            .map(|n| n.id.as_str())
            .collect()
    }

    pub fn node(&self, id: &str) -> Option<&DagNode> {
        self.nodes.get(id)
    }

    pub fn dependencies(&self, id: &str) -> &[String] {
        self.nodes.get(id).map(|n| n.dependencies.as_slice()).unwrap_or(&[])
    }

    pub fn dependents(&self, id: &str) -> &[String] {
        self.nodes.get(id).map(|n| n.dependents.as_slice()).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Group the execution order into waves.
    ///
    /// Every task in wave `n` depends only on tasks in waves `0..n`, so the
    /// members of one wave can run concurrently. Within a wave tasks keep
    /// their relative execution order.
    pub fn ready_sets(&self) -> Vec<Vec<String>> {
        let mut depth: HashMap<&str, usize> = HashMap::with_capacity(self.nodes.len());
        let mut waves: Vec<Vec<String>> = Vec::new();

        for id in &self.order {
            let level = self
                .dependencies(id)
                .iter()
                .filter_map(|dep| depth.get(dep.as_str()))
                .map(|d| d + 1)
                .max()
                .unwrap_or(0);
            depth.insert(id.as_str(), level);
            if waves.len() <= level {
                waves.resize_with(level + 1, Vec::new);
            }
            waves[level].push(id.clone());
        }

        waves
    }
}

/// Convenience wrapper: validate the workflow and return its execution order.
pub fn validate_dag(spec: &WorkflowSpec) -> Result<Vec<String>, EngineError> {
    Ok(Graph::build(spec)?.order)
}

// ---------------------------------------------------------------------------
// Internals
// ---------------------------------------------------------------------------

/// Depth-first search with a "visiting" marker. Reaching a node that is
/// still being visited means we walked a back edge, and that node is on a
/// cycle.
fn detect_cycle(nodes: &IndexMap<String, DagNode>) -> Result<(), EngineError> {
    let mut marks = vec![Mark::Unvisited; nodes.len()];

    for start in 0..nodes.len() {
        if marks[start] != Mark::Unvisited {
            continue;
        }
        // Explicit stack of (node index, next dependency to look at) so deep
        // chains do not exhaust the thread stack.
        let mut stack: Vec<(usize, usize)> = vec![(start, 0)];
        marks[start] = Mark::Visiting;

        while let Some((index, cursor)) = stack.last_mut() {
            let node = &nodes[*index];
            if let Some(dep) = node.dependencies.get(*cursor) {
                *cursor += 1;
                let Some(dep_index) = nodes.get_index_of(dep) else {
                    continue;
                };
                match marks[dep_index] {
                    Mark::Visiting => {
                        return Err(EngineError::CycleDetected {
                            task: dep.clone(),
                        })
                    }
                    Mark::Unvisited => {
                        marks[dep_index] = Mark::Visiting;
                        stack.push((dep_index, 0));
                    }
                    Mark::Done => {}
                }
            } else {
                marks[*index] = Mark::Done;
                stack.pop();
            }
        }
    }

    Ok(())
}

/// Kahn's algorithm with a min-heap on authoring position for stable ties.
fn kahn_order(nodes: &IndexMap<String, DagNode>) -> Result<Vec<String>, EngineError> {
    let mut in_degree: Vec<usize> = nodes.values().map(|n| n.dependencies.len()).collect();

    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, &d)| d == 0)
        .map(|(i, _)| Reverse(i))
        .collect();

    let mut sorted: Vec<String> = Vec::with_capacity(nodes.len());

    while let Some(Reverse(index)) = ready.pop() {
        let node = &nodes[index];
        sorted.push(node.id.clone());

        for dependent in &node.dependents {
            if let Some(dep_index) = nodes.get_index_of(dependent) {
                in_degree[dep_index] -= 1;
                if in_degree[dep_index] == 0 {
                    ready.push(Reverse(dep_index));
                }
            }
        }
    }

    if sorted.len() != nodes.len() {
        let task = in_degree
            .iter()
            .position(|&d| d > 0)
            .map(|i| nodes[i].id.clone())
            .unwrap_or_default();
        return Err(EngineError::CycleDetected { task });
    }

    Ok(sorted)
}
