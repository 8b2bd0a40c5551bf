//! Dependency graph over a task set.

use std::collections::HashMap;

use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};

use super::TaskSet;
use crate::error::{Error, Result};
use crate::model::TaskKey;

/// Edges point from a dependency to its dependent.
#[derive(Debug)]
pub struct TaskGraph {
    graph: DiGraph<TaskKey, ()>,
    indices: HashMap<TaskKey, NodeIndex>,
}

impl TaskGraph {
    /// Build the graph, rejecting references to tasks that are not in the set.
    pub fn build(tasks: &TaskSet) -> Result<Self> {
        let mut graph = DiGraph::new();
        let mut indices = HashMap::new();
        for key in tasks.keys() {
            let index = graph.add_node(key.clone());
            indices.insert(key.clone(), index);
        }

        for (key, task) in tasks.iter() {
            let to = indices[key];
            for dependency in task.dependencies() {
                let from = *indices
                    .get(&dependency)
                    .ok_or_else(|| Error::UnknownDependency {
                        key: key.clone(),
                        dependency: dependency.clone(),
                    })?;
                graph.add_edge(from, to, ());
            }
        }

        Ok(Self { graph, indices })
    }

    /// Dependencies first. Fails with the members of a cycle if there is one.
    pub fn order(&self) -> Result<Vec<TaskKey>> {
        match toposort(&self.graph, None) {
            Ok(order) => Ok(order.into_iter().map(|i| self.graph[i].clone()).collect()),
            Err(_) => Err(Error::DependencyCycle(self.cycle())),
        }
    }

    /// Keys of the first strongly connected component with more than one
    /// member (or a self-loop), sorted.
    fn cycle(&self) -> Vec<TaskKey> {
        let mut members = tarjan_scc(&self.graph)
            .into_iter()
            .find(|scc| {
                scc.len() > 1 || scc.iter().any(|&n| self.graph.contains_edge(n, n))
            })
            .map(|scc| scc.into_iter().map(|i| self.graph[i].clone()).collect::<Vec<_>>())
            .unwrap_or_default();
        members.sort();
        members
    }

    /// Direct dependencies of `key`.
    pub fn dependencies_of(&self, key: &TaskKey) -> Vec<TaskKey> {
        let Some(&index) = self.indices.get(key) else {
            return Vec::new();
        };
        let mut keys: Vec<TaskKey> = self
            .graph
            .neighbors_directed(index, petgraph::Direction::Incoming)
            .map(|i| self.graph[i].clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }
}
