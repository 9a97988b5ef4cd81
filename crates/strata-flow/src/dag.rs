//! Directed acyclic graph used for asset ordering.
//!
//! Ordering is deterministic: wherever several nodes are eligible, the one
//! inserted first wins. Asset graphs insert nodes in declaration order, so
//! that order breaks every tie.
//!
//! **Note:** This module is internal to `strata-flow`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Display;
use std::hash::Hash;

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Bfs, EdgeRef, Reversed};

use crate::error::{Error, Result};

/// A directed graph with insertion-ordered topological sorting.
#[derive(Debug, Clone)]
pub(crate) struct Dag<T>
where
    T: Clone + Eq + Hash + Display,
{
    graph: DiGraph<T, ()>,
    index_map: HashMap<T, NodeIndex>,
    /// Position of each node in insertion order, by node index.
    insertion_rank: Vec<usize>,
}

impl<T> Dag<T>
where
    T: Clone + Eq + Hash + Display,
{
    /// Creates an empty graph.
    pub(crate) fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            index_map: HashMap::new(),
            insertion_rank: Vec::new(),
        }
    }

    /// Returns the number of nodes.
    pub(crate) fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Adds a node, or returns the index of an equal node already present.
    pub(crate) fn add_node(&mut self, value: T) -> NodeIndex {
        if let Some(&idx) = self.index_map.get(&value) {
            return idx;
        }
        let idx = self.graph.add_node(value.clone());
        self.index_map.insert(value, idx);
        self.insertion_rank.push(idx.index());
        idx
    }

    /// Adds an edge `from -> to` (from must run before to).
    pub(crate) fn add_edge(&mut self, from: NodeIndex, to: NodeIndex) -> Result<()> {
        self.weight(from)?;
        self.weight(to)?;
        self.graph.add_edge(from, to, ());
        Ok(())
    }

    /// Returns the index of a node.
    pub(crate) fn index_of(&self, value: &T) -> Option<NodeIndex> {
        self.index_map.get(value).copied()
    }

    /// Returns the nodes in topological order.
    ///
    /// Kahn's algorithm; ready nodes are released in insertion order.
    ///
    /// # Errors
    ///
    /// Returns `Error::CycleDetected` naming one cycle if the graph has any.
    pub(crate) fn toposort(&self) -> Result<Vec<T>> {
        let node_count = self.graph.node_count();
        let mut in_degree: Vec<usize> = vec![0; node_count];
        for edge in self.graph.edge_references() {
            in_degree[edge.target().index()] += 1;
        }

        // Node indices are assigned in insertion order, so index order is
        // insertion order.
        let mut ready: VecDeque<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|idx| in_degree[idx.index()] == 0)
            .collect();

        let mut sorted = Vec::with_capacity(node_count);
        while let Some(idx) = ready.pop_front() {
            sorted.push(self.weight(idx)?.clone());
            for next in self.sorted_neighbors(idx, Direction::Outgoing) {
                let degree = &mut in_degree[next.index()];
                *degree -= 1;
                if *degree == 0 {
                    ready.push_back(next);
                }
            }
        }

        if sorted.len() != node_count {
            return Err(Error::CycleDetected {
                cycle: self.find_cycle(&in_degree),
            });
        }
        Ok(sorted)
    }

    /// Returns the direct predecessors of a node in insertion order.
    pub(crate) fn upstream(&self, node: NodeIndex) -> Result<Vec<T>> {
        self.weight(node)?;
        self.sorted_neighbors(node, Direction::Incoming)
            .into_iter()
            .map(|idx| self.weight(idx).cloned())
            .collect()
    }

    /// Returns the direct successors of a node in insertion order.
    pub(crate) fn downstream(&self, node: NodeIndex) -> Result<Vec<T>> {
        self.weight(node)?;
        self.sorted_neighbors(node, Direction::Outgoing)
            .into_iter()
            .map(|idx| self.weight(idx).cloned())
            .collect()
    }

    /// Returns every node reachable against edge direction, excluding `node`.
    pub(crate) fn ancestors(&self, node: NodeIndex) -> Result<HashSet<T>> {
        self.weight(node)?;
        let reversed = Reversed(&self.graph);
        let mut bfs = Bfs::new(reversed, node);
        let mut found = HashSet::new();
        while let Some(idx) = bfs.next(reversed) {
            if idx != node {
                found.insert(self.weight(idx)?.clone());
            }
        }
        Ok(found)
    }

    /// Returns every node reachable along edge direction, excluding `node`.
    pub(crate) fn descendants(&self, node: NodeIndex) -> Result<HashSet<T>> {
        self.weight(node)?;
        let mut bfs = Bfs::new(&self.graph, node);
        let mut found = HashSet::new();
        while let Some(idx) = bfs.next(&self.graph) {
            if idx != node {
                found.insert(self.weight(idx)?.clone());
            }
        }
        Ok(found)
    }

    fn weight(&self, idx: NodeIndex) -> Result<&T> {
        self.graph
            .node_weight(idx)
            .ok_or_else(|| Error::DagNodeNotFound {
                node: format!("index {}", idx.index()),
            })
    }

    fn sorted_neighbors(&self, idx: NodeIndex, direction: Direction) -> Vec<NodeIndex> {
        let mut neighbors: Vec<NodeIndex> = self.graph.neighbors_directed(idx, direction).collect();
        neighbors.sort_by_key(|n| self.insertion_rank.get(n.index()).copied());
        neighbors
    }

    /// Names one cycle among the nodes Kahn's algorithm could not release.
    ///
    /// Every unreleased node has an unreleased predecessor, so walking
    /// predecessors from any of them must revisit a node.
    fn find_cycle(&self, in_degree: &[usize]) -> Vec<String> {
        let stuck = |idx: &NodeIndex| in_degree[idx.index()] > 0;
        let Some(start) = self.graph.node_indices().find(stuck) else {
            return Vec::new();
        };

        let mut path = vec![start];
        let mut seen: HashMap<NodeIndex, usize> = HashMap::from([(start, 0)]);
        let mut cursor = start;
        loop {
            let Some(prev) = self
                .sorted_neighbors(cursor, Direction::Incoming)
                .into_iter()
                .find(stuck)
            else {
                break;
            };
            if let Some(&at) = seen.get(&prev) {
                let mut cycle: Vec<String> = path[at..]
                    .iter()
                    .rev()
                    .filter_map(|idx| self.graph.node_weight(*idx))
                    .map(ToString::to_string)
                    .collect();
                if let Some(first) = cycle.first().cloned() {
                    cycle.push(first);
                }
                return cycle;
            }
            seen.insert(prev, path.len());
            path.push(prev);
            cursor = prev;
        }
        vec![self.graph[start].to_string()]
    }
}

impl<T> Default for Dag<T>
where
    T: Clone + Eq + Hash + Display,
{
    fn default() -> Self {
        Self::new()
    }
}
