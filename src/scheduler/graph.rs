//! Dependency graph over tasks.
//!
//! Building the graph validates the task set: unknown dependencies, duplicate
//! IDs and cycles are rejected up front so the scheduler never spins on an
//! unsatisfiable set.

use std::collections::{BTreeSet, HashMap, VecDeque};

use thiserror::Error;

use crate::domain::Task;

/// Cyclic or unresolvable dependencies. Fatal to a run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("Cyclic dependency among tasks: {}", stuck.join(", "))]
    Cycle { stuck: Vec<String> },

    #[error("Task {task} depends on unknown task {dependency}")]
    MissingDependency { task: String, dependency: String },

    #[error("Duplicate task id: {0}")]
    DuplicateTask(String),
}

/// Validated dependency graph. Node order follows declaration order.
#[derive(Debug, Clone)]
pub struct TaskGraph {
    ids: Vec<String>,
    index: HashMap<String, usize>,
    /// deps[i] = indices task i depends on
    deps: Vec<Vec<usize>>,
    /// dependents[i] = indices that depend on task i
    dependents: Vec<Vec<usize>>,
}

impl TaskGraph {
    /// Build and validate a graph over `tasks`.
    pub fn build(tasks: &[Task]) -> Result<Self, GraphError> {
        let mut index = HashMap::with_capacity(tasks.len());
        for (i, task) in tasks.iter().enumerate() {
            if index.insert(task.id.clone(), i).is_some() {
                return Err(GraphError::DuplicateTask(task.id.clone()));
            }
        }

        let mut deps = vec![Vec::new(); tasks.len()];
        let mut dependents = vec![Vec::new(); tasks.len()];
        for (i, task) in tasks.iter().enumerate() {
            for dep in &task.dependencies {
                let j = *index.get(dep).ok_or_else(|| GraphError::MissingDependency {
                    task: task.id.clone(),
                    dependency: dep.clone(),
                })?;
                deps[i].push(j);
                dependents[j].push(i);
            }
        }

        let graph = Self {
            ids: tasks.iter().map(|t| t.id.clone()).collect(),
            index,
            deps,
            dependents,
        };
        graph.layers()?;
        Ok(graph)
    }

    /// Kahn-style layering of every task, ignoring status.
    ///
    /// Fails with the set of tasks that never reach in-degree zero.
    pub fn layers(&self) -> Result<Vec<Vec<String>>, GraphError> {
        let mut in_degree: Vec<usize> = self.deps.iter().map(Vec::len).collect();
        let mut current: Vec<usize> = (0..self.ids.len()).filter(|&i| in_degree[i] == 0).collect();
        let mut layers = Vec::new();
        let mut placed = 0;

        while !current.is_empty() {
            placed += current.len();
            let mut next = Vec::new();
            for &i in &current {
                for &d in &self.dependents[i] {
                    in_degree[d] -= 1;
                    if in_degree[d] == 0 {
                        next.push(d);
                    }
                }
            }
            next.sort_unstable();
            layers.push(current.iter().map(|&i| self.ids[i].clone()).collect());
            current = next;
        }

        if placed < self.ids.len() {
            let stuck: BTreeSet<String> = (0..self.ids.len())
                .filter(|&i| in_degree[i] > 0)
                .map(|i| self.ids[i].clone())
                .collect();
            return Err(GraphError::Cycle {
                stuck: stuck.into_iter().collect(),
            });
        }

        Ok(layers)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Tasks that directly depend on `id`.
    pub fn dependents(&self, id: &str) -> Vec<&str> {
        self.index
            .get(id)
            .map(|&i| self.dependents[i].iter().map(|&d| self.ids[d].as_str()).collect())
            .unwrap_or_default()
    }

    /// Every task reachable through dependency edges from `id` (its ancestors).
    pub fn transitive_dependencies(&self, id: &str) -> BTreeSet<&str> {
        let mut seen = BTreeSet::new();
        let Some(&start) = self.index.get(id) else {
            return seen;
        };

        let mut queue: VecDeque<usize> = self.deps[start].iter().copied().collect();
        while let Some(i) = queue.pop_front() {
            if seen.insert(self.ids[i].as_str()) {
                queue.extend(self.deps[i].iter().copied());
            }
        }
        seen
    }

    /// Length of the longest dependency chain below `id` (roots are 0).
    pub fn depth(&self, id: &str) -> usize {
        fn walk(graph: &TaskGraph, i: usize, memo: &mut HashMap<usize, usize>) -> usize {
            if let Some(&d) = memo.get(&i) {
                return d;
            }
            let d = graph.deps[i]
                .iter()
                .map(|&j| walk(graph, j, memo) + 1)
                .max()
                .unwrap_or(0);
            memo.insert(i, d);
            d
        }

        self.index
            .get(id)
            .map(|&i| walk(self, i, &mut HashMap::new()))
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
