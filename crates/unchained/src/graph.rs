//! Dependency ordering for named pipeline steps
//!
//! Hooks and extensions both declare "run me after X" constraints by name.
//! [`DependencyGraph`] turns those declarations into an execution order:
//! a topological sort that keeps the original insertion order wherever the
//! constraints leave a choice, so that two boots with the same inputs
//! always run steps in the same sequence.
//!
//! Edges point from a dependency to its dependent (if A must run after B,
//! the graph holds B -> A), which makes "ready" nodes the ones with no
//! incoming edges.

use std::{cmp::Reverse, collections::BinaryHeap};

use indexmap::IndexMap;
use log::trace;
use petgraph::{
    Direction,
    graph::{DiGraph, NodeIndex},
};
use rustc_hash::FxHashMap;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// A graph of named nodes with "runs after" edges
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    /// What the nodes are, used in error messages ("hook", "extension")
    kind: &'static str,
    graph: DiGraph<String, ()>,
    /// Name to node, in insertion order
    nodes: IndexMap<String, NodeIndex>,
}

impl DependencyGraph {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            graph: DiGraph::new(),
            nodes: IndexMap::new(),
        }
    }

    /// Add a node, returning the existing one if the name is already known
    pub fn add_node(&mut self, name: &str) -> NodeIndex {
        if let Some(&idx) = self.nodes.get(name) {
            return idx;
        }
        let idx = self.graph.add_node(name.to_owned());
        self.nodes.insert(name.to_owned(), idx);
        idx
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Record that `dependent` must run after `dependency`.
    ///
    /// Both nodes must already exist; naming an unknown dependency is an error.
    pub fn add_dependency(&mut self, dependent: &str, dependency: &str) -> Result<()> {
        let unknown = |name: &str, dependency: &str| Error::UnknownDependency {
            kind: self.kind,
            name: name.to_owned(),
            dependency: dependency.to_owned(),
        };
        let Some(&from) = self.nodes.get(dependency) else {
            return Err(unknown(dependent, dependency));
        };
        let Some(&to) = self.nodes.get(dependent) else {
            return Err(unknown(dependency, dependent));
        };
        if !self.graph.contains_edge(from, to) {
            self.graph.add_edge(from, to, ());
        }
        Ok(())
    }

    /// Record that `name` must run before `dependent`.
    ///
    /// The mirror of [`add_dependency`](Self::add_dependency), reporting an
    /// unknown `dependent` as such.
    pub fn add_dependent(&mut self, name: &str, dependent: &str) -> Result<()> {
        if self.contains(name) && !self.contains(dependent) {
            return Err(Error::UnknownDependent {
                kind: self.kind,
                name: name.to_owned(),
                dependent: dependent.to_owned(),
            });
        }
        self.add_dependency(dependent, name)
    }

    /// Names this node must run after
    pub fn dependencies(&self, name: &str) -> Vec<&str> {
        self.neighbors(name, Direction::Incoming)
    }

    /// Names that must run after this node
    pub fn dependents(&self, name: &str) -> Vec<&str> {
        self.neighbors(name, Direction::Outgoing)
    }

    fn neighbors(&self, name: &str, direction: Direction) -> Vec<&str> {
        let Some(&idx) = self.nodes.get(name) else {
            return Vec::new();
        };
        let mut found: Vec<_> = self.graph.neighbors_directed(idx, direction).collect();
        found.sort_unstable();
        found.into_iter().map(|n| self.graph[n].as_str()).collect()
    }

    /// Topologically sorted node names, ties broken by insertion order.
    ///
    /// Fails with the cycle path when the constraints cannot be satisfied.
    pub fn topological_sort(&self) -> Result<Vec<String>> {
        let mut in_degree: FxHashMap<NodeIndex, usize> = FxHashMap::default();
        let mut ready = BinaryHeap::new();
        for idx in self.graph.node_indices() {
            let degree = self
                .graph
                .neighbors_directed(idx, Direction::Incoming)
                .count();
            if degree == 0 {
                ready.push(Reverse(idx.index()));
            }
            in_degree.insert(idx, degree);
        }

        let mut order = Vec::with_capacity(self.graph.node_count());
        while let Some(Reverse(index)) = ready.pop() {
            let idx = NodeIndex::new(index);
            order.push(self.graph[idx].clone());
            for next in self.graph.neighbors_directed(idx, Direction::Outgoing) {
                if let Some(degree) = in_degree.get_mut(&next) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push(Reverse(next.index()));
                    }
                }
            }
        }

        if order.len() < self.graph.node_count() {
            let path = self.find_cycle_path().unwrap_or_default();
            return Err(Error::DependencyCycle {
                kind: self.kind,
                path,
            });
        }

        trace!("{} order: {}", self.kind, order.join(", "));
        Ok(order)
    }

    /// Find one cycle using DFS with three-color marking.
    ///
    /// The returned path starts and ends with the same name and follows
    /// "must run before" edges, e.g. `["a", "b", "a"]`.
    pub fn find_cycle_path(&self) -> Option<Vec<String>> {
        let mut colors: FxHashMap<NodeIndex, Color> = self
            .graph
            .node_indices()
            .map(|idx| (idx, Color::White))
            .collect();
        let mut path = Vec::new();

        for &start in self.nodes.values() {
            if colors[&start] == Color::White
                && let Some(cycle) = self.dfs_find_cycle(start, &mut colors, &mut path)
            {
                return Some(
                    cycle
                        .into_iter()
                        .map(|idx| self.graph[idx].clone())
                        .collect(),
                );
            }
        }
        None
    }

    fn dfs_find_cycle(
        &self,
        node: NodeIndex,
        colors: &mut FxHashMap<NodeIndex, Color>,
        path: &mut Vec<NodeIndex>,
    ) -> Option<Vec<NodeIndex>> {
        colors.insert(node, Color::Gray);
        path.push(node);

        let mut neighbors: Vec<_> = self
            .graph
            .neighbors_directed(node, Direction::Outgoing)
            .collect();
        neighbors.sort_unstable();

        for neighbor in neighbors {
            match colors.get(&neighbor).copied().unwrap_or(Color::White) {
                Color::White => {
                    if let Some(cycle) = self.dfs_find_cycle(neighbor, colors, path) {
                        return Some(cycle);
                    }
                }
                Color::Gray => {
                    if let Some(start) = path.iter().position(|&n| n == neighbor) {
                        let mut cycle = path[start..].to_vec();
                        cycle.push(neighbor);
                        return Some(cycle);
                    }
                }
                Color::Black => {}
            }
        }

        path.pop();
        colors.insert(node, Color::Black);
        None
    }
}
