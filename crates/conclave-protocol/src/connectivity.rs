//! Ad-hoc connection graph.
//!
//! Assembled on demand from the peer table's advertised peer-of-peer
//! edges, then queried for an address to reach a peer we are not directly
//! connected to (the direct-connect path).

use std::collections::{BTreeMap, VecDeque};
use std::net::IpAddr;

use crate::types::PeerId;

#[derive(Debug, Default)]
pub struct ConnectionGraph {
    edges: BTreeMap<PeerId, BTreeMap<PeerId, IpAddr>>,
}

impl ConnectionGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `from` can reach `to` at `addr`.
    pub fn add_connection(&mut self, from: PeerId, to: PeerId, addr: IpAddr) {
        self.edges.entry(from).or_default().insert(to, addr);
    }

    /// The address recorded on the first edge of a shortest path from
    /// `src` to `dst`, or `None` when `dst` is unreachable.
    pub fn find_address(&self, src: PeerId, dst: PeerId) -> Option<IpAddr> {
        if src == dst {
            return None;
        }

        let mut first_hop: BTreeMap<PeerId, PeerId> = BTreeMap::new();
        let mut queue = VecDeque::from([src]);

        while let Some(current) = queue.pop_front() {
            for (&next, _) in self.edges.get(&current).into_iter().flatten() {
                if next == src || first_hop.contains_key(&next) {
                    continue;
                }
                // The first hop toward `next` is inherited along the path.
                let hop = if current == src {
                    next
                } else {
                    first_hop[&current]
                };
                first_hop.insert(next, hop);

                if next == dst {
                    return self.edges.get(&src).and_then(|m| m.get(&hop)).copied();
                }
                queue.push_back(next);
            }
        }

        None
    }
}
