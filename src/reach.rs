//! Directed graph over node identities, for passes that need traversal
//! orders or cycle structure rather than the type model itself.

use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::hash::Hash;

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::internal_error;

pub struct DependencyGraph<T> {
    graph: DiGraph<T, ()>,
    indices: HashMap<T, NodeIndex>,
}

impl<T> DependencyGraph<T>
where
    T: Copy + Eq + Hash + Debug,
{
    /// Build from `nodes`, with an edge from each node to its successors.
    ///
    /// With `invert_direction` every edge points the other way. Successors
    /// must be among `nodes`.
    pub fn new<I, F>(nodes: I, invert_direction: bool, mut successors: F) -> Self
    where
        I: IntoIterator<Item = T>,
        F: FnMut(T) -> Vec<T>,
    {
        let mut graph = DiGraph::new();
        let mut indices = HashMap::new();
        let mut order = Vec::new();
        for node in nodes {
            if indices.contains_key(&node) {
                continue;
            }
            let index = graph.add_node(node);
            indices.insert(node, index);
            order.push(node);
        }
        for node in order {
            let from = indices[&node];
            for succ in successors(node) {
                let Some(&to) = indices.get(&succ) else {
                    internal_error!("successor {succ:?} of {node:?} is not a graph node");
                };
                if invert_direction {
                    graph.update_edge(to, from, ());
                } else {
                    graph.update_edge(from, to, ());
                }
            }
        }
        Self { graph, indices }
    }

    pub fn size(&self) -> usize {
        self.graph.node_count()
    }

    pub fn nodes(&self) -> impl Iterator<Item = T> + '_ {
        self.graph.node_indices().map(|i| self.graph[i])
    }

    fn index_of(&self, node: T) -> NodeIndex {
        match self.indices.get(&node) {
            Some(&index) => index,
            None => internal_error!("{node:?} is not a graph node"),
        }
    }

    fn successor_indices(&self, index: NodeIndex) -> Vec<NodeIndex> {
        // petgraph yields the most recently added edge first
        let mut out: Vec<NodeIndex> = self.graph.neighbors_directed(index, Direction::Outgoing).collect();
        out.reverse();
        out
    }

    /// Successors in the order their edges were added.
    pub fn successors(&self, node: T) -> Vec<T> {
        self.successor_indices(self.index_of(node))
            .into_iter()
            .map(|i| self.graph[i])
            .collect()
    }

    /// Nodes without incoming edges.
    pub fn find_roots(&self) -> Vec<T> {
        self.graph
            .node_indices()
            .filter(|&i| {
                self.graph
                    .neighbors_directed(i, Direction::Incoming)
                    .next()
                    .is_none()
            })
            .map(|i| self.graph[i])
            .collect()
    }

    /// Every node reachable from `root`, in pre- or post-order.
    pub fn dfs_traversal(&self, root: T, pre_order: bool) -> Vec<T> {
        let mut visited = HashSet::new();
        let mut out = Vec::new();
        self.dfs_visit(self.index_of(root), pre_order, &mut visited, &mut out);
        out
    }

    fn dfs_visit(
        &self,
        index: NodeIndex,
        pre_order: bool,
        visited: &mut HashSet<NodeIndex>,
        out: &mut Vec<T>,
    ) {
        if !visited.insert(index) {
            return;
        }
        if pre_order {
            out.push(self.graph[index]);
        }
        for succ in self.successor_indices(index) {
            self.dfs_visit(succ, pre_order, visited, out);
        }
        if !pre_order {
            out.push(self.graph[index]);
        }
    }

    /// Strongly connected components, dependencies before dependents.
    ///
    /// Nodes within a component keep their insertion order.
    pub fn strongly_connected_components(&self) -> Vec<Vec<T>> {
        petgraph::algo::tarjan_scc(&self.graph)
            .into_iter()
            .map(|mut component| {
                component.sort();
                component.into_iter().map(|i| self.graph[i]).collect()
            })
            .collect()
    }

    pub fn is_cyclic(&self) -> bool {
        petgraph::algo::is_cyclic_directed(&self.graph)
    }
}
