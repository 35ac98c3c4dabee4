//! Folder/file containment graph derived from fetched [`FileRecord`]s.
//!
//! Nodes are unique `file_path` strings (a row's own path and, if present, its
//! `parent_folder`). Edges point from parent folder to child and are deduplicated by
//! `(parent, child)` pair.

use crate::record::FileRecord;
use petgraph::{
    algo::toposort,
    graph::NodeIndex,
    Direction,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HierarchyGraph {
    graph: petgraph::Graph<String, ()>,
    index: BTreeMap<String, NodeIndex>,
}

impl Default for HierarchyGraph {
    fn default() -> Self {
        HierarchyGraph {
            graph: petgraph::Graph::new(),
            index: BTreeMap::new(),
        }
    }
}

impl HierarchyGraph {
    pub fn from_records<'a, I>(records: I) -> Self
    where
        I: IntoIterator<Item = &'a FileRecord>,
    {
        let mut hierarchy = HierarchyGraph::default();
        let mut edges = BTreeSet::new();
        for record in records {
            hierarchy.add_node(&record.file_path);
            if let Some(parent) = record.parent() {
                hierarchy.add_node(parent);
                edges.insert((parent.to_string(), record.file_path.clone()));
            }
        }
        for (parent, child) in edges.iter() {
            hierarchy.add_edge(parent, child);
        }
        tracing::debug!(
            "Built hierarchy graph: {} nodes, {} edges",
            hierarchy.node_count(),
            hierarchy.edge_count()
        );
        hierarchy
    }

    /// Returns the node index, inserting the node if it has not been seen yet.
    pub fn add_node(&mut self, path: &str) -> NodeIndex {
        if let Some(idx) = self.index.get(path) {
            return *idx;
        }
        let idx = self.graph.add_node(path.to_string());
        self.index.insert(path.to_string(), idx);
        idx
    }

    /// Adds `parent -> child`, creating missing endpoints. Returns false if the edge
    /// already existed.
    pub fn add_edge(&mut self, parent: &str, child: &str) -> bool {
        let parent_idx = self.add_node(parent);
        let child_idx = self.add_node(child);
        if self.graph.contains_edge(parent_idx, child_idx) {
            return false;
        }
        self.graph.add_edge(parent_idx, child_idx, ());
        true
    }

    pub fn contains(&self, path: &str) -> bool {
        self.index.contains_key(path)
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Node names in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &str> + '_ {
        self.graph.node_indices().map(move |idx| self.graph[idx].as_str())
    }

    pub fn edges(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.graph.raw_edges().iter().map(move |edge| {
            (
                self.graph[edge.source()].as_str(),
                self.graph[edge.target()].as_str(),
            )
        })
    }

    pub fn parents(&self, path: &str) -> BTreeSet<&str> {
        self.neighbors(path, Direction::Incoming)
    }

    pub fn children(&self, path: &str) -> BTreeSet<&str> {
        self.neighbors(path, Direction::Outgoing)
    }

    fn neighbors(&self, path: &str, dir: Direction) -> BTreeSet<&str> {
        match self.index.get(path) {
            Some(idx) => self
                .graph
                .neighbors_directed(*idx, dir)
                .map(|n| self.graph[n].as_str())
                .collect(),
            None => BTreeSet::new(),
        }
    }

    /// Parents-before-children ordering, or the name of a node on a cycle.
    pub fn topological_order(&self) -> Result<Vec<&str>, &str> {
        toposort(&self.graph, None)
            .map(|order| order.into_iter().map(|idx| self.graph[idx].as_str()).collect())
            .map_err(|cycle| self.graph[cycle.node_id()].as_str())
    }
}
