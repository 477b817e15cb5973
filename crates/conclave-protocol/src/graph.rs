//! Small directed graph over peer ids.
//!
//! Shared by the broadcast routing table (membership graph) and the
//! ack-to-graph conversion used by the commit driver.

use std::collections::{BTreeMap, BTreeSet};

use crate::types::PeerId;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Graph {
    pub nodes: BTreeSet<PeerId>,
    edges: BTreeMap<PeerId, BTreeSet<PeerId>>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// The trivial graph of a lone peer, used at genesis.
    pub fn single_node(id: PeerId) -> Self {
        let mut g = Self::new();
        g.nodes.insert(id);
        g
    }

    pub fn add_node(&mut self, id: PeerId) {
        self.nodes.insert(id);
    }

    pub fn add_edge(&mut self, from: PeerId, to: PeerId) {
        self.edges.entry(from).or_default().insert(to);
    }

    /// Successors of `id` that are themselves nodes of the graph.
    pub fn neighbors(&self, id: PeerId) -> impl Iterator<Item = PeerId> + '_ {
        self.edges
            .get(&id)
            .into_iter()
            .flatten()
            .copied()
            .filter(|n| self.nodes.contains(n))
    }

    pub fn has_edge(&self, from: PeerId, to: PeerId) -> bool {
        self.edges.get(&from).is_some_and(|set| set.contains(&to))
    }
}
