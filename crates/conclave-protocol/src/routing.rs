//! Broadcast routing table for the best-effort relay path.
//!
//! For every possible source the table precomputes which peers the local
//! node must forward to so that one traversal of the membership graph
//! reaches every peer exactly once: the local node forwards to exactly its
//! children in the breadth-first tree rooted at the source. Parent ties
//! between equal-depth candidates go to the lowest peer id, so all peers
//! agree on the same tree without coordination.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::graph::Graph;
use crate::types::PeerId;

#[derive(Debug)]
pub struct BroadcastRoutingTable {
    local: PeerId,
    targets: BTreeMap<PeerId, BTreeSet<PeerId>>,
}

impl BroadcastRoutingTable {
    pub fn new(local: PeerId) -> Self {
        Self {
            local,
            targets: BTreeMap::new(),
        }
    }

    /// Rebuild all forwarding sets from a new membership graph.
    /// Called on every committed membership change.
    pub fn recalculate(&mut self, graph: &Graph) {
        self.targets.clear();
        for &source in &graph.nodes {
            self.targets
                .insert(source, forward_set(graph, source, self.local));
        }
    }

    /// Peers the local node must forward a message from `source` to.
    /// Empty for sources outside the last recalculated graph.
    pub fn targets(&self, source: PeerId) -> impl Iterator<Item = PeerId> + '_ {
        self.targets.get(&source).into_iter().flatten().copied()
    }
}

/// Children of `local` in the BFS tree rooted at `source`.
fn forward_set(graph: &Graph, source: PeerId, local: PeerId) -> BTreeSet<PeerId> {
    let depths = bfs_depths(graph, source);

    let Some(&local_depth) = depths.get(&local) else {
        return BTreeSet::new();
    };

    graph
        .neighbors(local)
        .filter(|&n| {
            depths.get(&n) == Some(&(local_depth + 1)) && parent_of(graph, &depths, n) == Some(local)
        })
        .collect()
}

fn bfs_depths(graph: &Graph, source: PeerId) -> BTreeMap<PeerId, usize> {
    let mut depths = BTreeMap::new();
    if !graph.nodes.contains(&source) {
        return depths;
    }

    depths.insert(source, 0);
    let mut queue = VecDeque::from([source]);

    while let Some(current) = queue.pop_front() {
        let next_depth = depths[&current] + 1;
        for neighbor in graph.neighbors(current) {
            if !depths.contains_key(&neighbor) {
                depths.insert(neighbor, next_depth);
                queue.push_back(neighbor);
            }
        }
    }

    depths
}

/// The BFS parent of `node`: the lowest-id peer one level up with an edge
/// down to `node`.
fn parent_of(graph: &Graph, depths: &BTreeMap<PeerId, usize>, node: PeerId) -> Option<PeerId> {
    let depth = *depths.get(&node)?;
    if depth == 0 {
        return None;
    }

    graph
        .nodes
        .iter()
        .copied()
        .filter(|m| depths.get(m) == Some(&(depth - 1)) && graph.has_edge(*m, node))
        .min()
}
