// src/dag/graph.rs

use std::collections::HashMap;
use std::fmt;

use petgraph::algo::{has_path_connecting, toposort};
use petgraph::graphmap::DiGraphMap;
use petgraph::Direction;

use crate::op::OpId;

/// Queue-local dependency graph over submitted operations.
///
/// Edge direction: dep -> dependent. For "B must run after A" we add edge
/// A -> B. Alongside the adjacency the graph keeps a pending-dependency
/// count per operation; readiness recomputes incrementally by decrementing
/// dependents' counts whenever an operation finishes.
///
/// Finished operations are removed, so the graph only ever holds the live
/// portion of the DAG.
pub struct DepGraph {
    edges: DiGraphMap<OpId, ()>,
    pending_deps: HashMap<OpId, usize>,
}

impl DepGraph {
    pub fn new() -> Self {
        Self {
            edges: DiGraphMap::new(),
            pending_deps: HashMap::new(),
        }
    }

    pub fn add_node(&mut self, id: OpId) {
        self.edges.add_node(id);
    }

    /// Whether adding `dep -> dependent` would close a cycle.
    pub fn would_cycle(&self, dep: OpId, dependent: OpId) -> bool {
        dep == dependent || has_path_connecting(&self.edges, dependent, dep, None)
    }

    /// Record `dep -> dependent` and bump the dependent's pending count.
    ///
    /// The caller is responsible for cycle checking (`would_cycle`, or
    /// `validate_with` for batches) and for only passing unfinished deps.
    pub fn add_edge(&mut self, dep: OpId, dependent: OpId) {
        if self.edges.add_edge(dep, dependent, ()).is_none() {
            *self.pending_deps.entry(dependent).or_insert(0) += 1;
        }
    }

    /// Number of unfinished dependencies of `id`.
    pub fn pending_count(&self, id: OpId) -> usize {
        self.pending_deps.get(&id).copied().unwrap_or(0)
    }

    /// Direct dependents of `id` (operations that must run after it).
    pub fn dependents_of(&self, id: OpId) -> Vec<OpId> {
        self.edges.neighbors_directed(id, Direction::Outgoing).collect()
    }

    /// Record that `id` finished: decrement every dependent's pending count
    /// and drop the node. Returns the dependents whose count reached zero.
    pub fn mark_finished(&mut self, id: OpId) -> Vec<OpId> {
        let dependents = self.dependents_of(id);
        let mut newly_satisfied = Vec::new();

        for dependent in dependents {
            if let Some(count) = self.pending_deps.get_mut(&dependent) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    self.pending_deps.remove(&dependent);
                    newly_satisfied.push(dependent);
                }
            }
        }

        self.edges.remove_node(id);
        self.pending_deps.remove(&id);
        newly_satisfied
    }

    /// Check that the graph stays acyclic with the given nodes and edges
    /// added. A topological sort over a scratch copy will fail if there is
    /// a cycle; the offending node is returned.
    pub fn validate_with(
        &self,
        extra_nodes: &[OpId],
        extra_edges: &[(OpId, OpId)],
    ) -> std::result::Result<(), OpId> {
        let mut scratch = self.edges.clone();
        for &node in extra_nodes {
            scratch.add_node(node);
        }
        for &(dep, dependent) in extra_edges {
            scratch.add_edge(dep, dependent, ());
        }

        match toposort(&scratch, None) {
            Ok(_order) => Ok(()),
            Err(cycle) => Err(cycle.node_id()),
        }
    }
}

impl Default for DepGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DepGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DepGraph")
            .field("nodes", &self.edges.node_count())
            .field("edges", &self.edges.edge_count())
            .field("waiting", &self.pending_deps.len())
            .finish()
    }
}
