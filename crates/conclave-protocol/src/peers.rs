//! Peer table: everything the local node knows about each peer.
//!
//! The table always contains the local peer itself; its `links` record the
//! addresses of every peer it fused with and feed the connection graph.
//! Transport handles live on the other side of the effect boundary, so a
//! peer here is just identity, connectivity and addressing state.

use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

use crate::connectivity::ConnectionGraph;
use crate::types::PeerId;

/// Ports a peer offered for a direct connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OfferedPorts {
    pub internal: u16,
    pub external: u16,
}

#[derive(Debug)]
pub struct Peer {
    pub id: PeerId,
    connected: bool,
    address: Option<IpAddr>,
    offered_ports: Option<OfferedPorts>,
    /// Peer-of-peer edges this peer advertises: who it can reach, where.
    pub links: BTreeMap<PeerId, IpAddr>,
}

impl Peer {
    fn new(id: PeerId) -> Self {
        Self {
            id,
            connected: false,
            address: None,
            offered_ports: None,
            links: BTreeMap::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn address(&self) -> Option<IpAddr> {
        self.address
    }

    pub fn offered_ports(&self) -> Option<OfferedPorts> {
        self.offered_ports
    }

    /// Bind (or rebind) this peer to a live transport link.
    pub fn connect(&mut self, address: Option<IpAddr>) {
        self.connected = true;
        if address.is_some() {
            self.address = address;
        }
    }

    pub fn disconnect(&mut self) {
        self.connected = false;
    }

    pub fn set_offered_ports(&mut self, internal: u16, external: u16) {
        self.offered_ports = Some(OfferedPorts { internal, external });
    }
}

#[derive(Debug)]
pub struct PeerTable {
    local: PeerId,
    peers: BTreeMap<PeerId, Peer>,
}

impl PeerTable {
    pub fn new(local: PeerId) -> Self {
        let mut peers = BTreeMap::new();
        peers.insert(local, Peer::new(local));
        Self { local, peers }
    }

    pub fn local_id(&self) -> PeerId {
        self.local
    }

    pub fn contains(&self, id: PeerId) -> bool {
        self.peers.contains_key(&id)
    }

    pub fn get(&self, id: PeerId) -> Option<&Peer> {
        self.peers.get(&id)
    }

    pub fn get_mut(&mut self, id: PeerId) -> Option<&mut Peer> {
        self.peers.get_mut(&id)
    }

    /// The record for `id`, created disconnected if unknown.
    pub fn ensure(&mut self, id: PeerId) -> &mut Peer {
        self.peers.entry(id).or_insert_with(|| Peer::new(id))
    }

    pub fn remove(&mut self, id: PeerId) {
        self.peers.remove(&id);
    }

    pub fn local_mut(&mut self) -> &mut Peer {
        self.peers
            .entry(self.local)
            .or_insert_with(|| Peer::new(self.local))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Peer> {
        self.peers.values()
    }

    /// Connected peers, the local peer excluded.
    pub fn connected_ids(&self) -> impl Iterator<Item = PeerId> + '_ {
        self.peers
            .values()
            .filter(|p| p.id != self.local && p.is_connected())
            .map(|p| p.id)
    }

    /// The local peer plus everything currently connected.
    pub fn neighbors(&self) -> BTreeSet<PeerId> {
        let mut set: BTreeSet<PeerId> = self.connected_ids().collect();
        set.insert(self.local);
        set
    }

    /// Assemble the ad-hoc connection graph: our own live links plus every
    /// edge our peers advertise.
    pub fn connection_graph(&self) -> ConnectionGraph {
        let mut graph = ConnectionGraph::new();

        for peer in self.peers.values() {
            if peer.id != self.local {
                if let Some(addr) = peer.address() {
                    graph.add_connection(self.local, peer.id, addr);
                }
            }
            for (&to, &addr) in &peer.links {
                graph.add_connection(peer.id, to, addr);
            }
        }

        graph
    }
}
