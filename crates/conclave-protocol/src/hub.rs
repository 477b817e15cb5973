//! The replication engine.
//!
//! A hub owns the pending log, the seen filter, the peer table, the
//! broadcast routing table and the configuration history, and drives the
//! quorum commit rule over them. It is a pure state machine: every
//! inbound frame or local operation returns the batch of [`HubEffect`]s
//! the caller must execute. All mutation happens on the caller's single
//! thread; there is nothing to lock.

use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

use bytes::Bytes;
use tracing::{debug, trace, warn};

use crate::effect::{HubEffect, HubEvent};
use crate::error::HubError;
use crate::graph::Graph;
use crate::log::{Log, LogEntry};
use crate::message::{
    Ack, AckData, Fuse, Handshake, Header, LogMessage, Message, PortOffer, UnreliableFrame,
    UserData,
};
use crate::peers::PeerTable;
use crate::routing::BroadcastRoutingTable;
use crate::seen::SeenMessages;
use crate::types::{ConfigId, MessageId, PeerId, Timestamp, PROTOCOL_VERSION};

pub struct Hub {
    id: PeerId,
    timestamp: Timestamp,
    log: Log,
    seen: SeenMessages,
    peers: PeerTable,
    routing: BroadcastRoutingTable,
    /// Committed membership history; the greatest key is current.
    configs: BTreeMap<ConfigId, BTreeSet<PeerId>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::with_id(PeerId::random())
    }

    pub fn with_id(id: PeerId) -> Self {
        let mut routing = BroadcastRoutingTable::new(id);
        routing.recalculate(&Graph::single_node(id));

        let mut configs = BTreeMap::new();
        configs.insert(MessageId::new(0, id), BTreeSet::from([id]));

        Self {
            id,
            timestamp: 0,
            log: Log::new(id),
            seen: SeenMessages::new(),
            peers: PeerTable::new(id),
            routing,
            configs,
        }
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    /// The committed membership: the quorum of the current configuration.
    pub fn members(&self) -> &BTreeSet<PeerId> {
        self.latest_quorum()
    }

    pub fn config_id(&self) -> ConfigId {
        *self
            .configs
            .keys()
            .next_back()
            .expect("at least one configuration")
    }

    pub fn log(&self) -> &Log {
        &self.log
    }

    pub fn peers(&self) -> &PeerTable {
        &self.peers
    }

    /// An address that should reach `target`, learned from our own links
    /// and the edges our peers advertise.
    pub fn find_address_to(&self, target: PeerId) -> Option<IpAddr> {
        self.peers.connection_graph().find_address(self.id, target)
    }

    // ── Fusing ───────────────────────────────────────────────────────────

    /// Our half of the handshake, sent on every freshly connected socket.
    pub fn greeting(&self) -> Handshake {
        Handshake::new(self.id)
    }

    /// Finish fusing a socket given the remote handshake frame.
    ///
    /// On success the remote peer is bound (or rebound) to the link, a
    /// fuse for it is broadcast and logged, and the returned effects carry
    /// the broadcast plus whatever the commit pass produced.
    pub fn complete_fuse(
        &mut self,
        remote_hello: &[u8],
        address: Option<IpAddr>,
    ) -> Result<(PeerId, Vec<HubEffect>), HubError> {
        let hello = Handshake::from_bytes(remote_hello).map_err(|e| {
            HubError::ConnectionRefused {
                reason: e.to_string(),
            }
        })?;

        if hello.version != PROTOCOL_VERSION {
            return Err(HubError::ProtocolMismatch {
                local: PROTOCOL_VERSION,
                remote: hello.version,
            });
        }
        if hello.peer_id == self.id {
            return Err(HubError::AlreadyConnected {
                peer: hello.peer_id,
            });
        }

        let remote = hello.peer_id;
        debug!(hub = %self.id, peer = %remote, "fusing");

        self.peers.ensure(remote).connect(address);

        let mut effects = Vec::new();
        let fuse = self.construct_fuse(remote);
        self.broadcast(&Message::Fuse(fuse.clone()), &mut effects);
        self.add_log_entry(LogMessage::Fuse(fuse));

        if let Some(addr) = address {
            self.peers.local_mut().links.insert(remote, addr);
        }

        self.commit_pending(&mut effects);
        Ok((remote, effects))
    }

    // ── Outbound ─────────────────────────────────────────────────────────

    /// Broadcast an application payload with total-order delivery.
    pub fn total_order_broadcast(&mut self, payload: Vec<u8>) -> Vec<HubEffect> {
        let msg = self.construct_user_data(payload);
        let mut effects = Vec::new();
        self.broadcast(&Message::UserData(msg.clone()), &mut effects);
        self.add_log_entry(LogMessage::UserData(msg));
        self.commit_pending(&mut effects);
        effects
    }

    /// Best-effort broadcast: one datagram to every connected peer, no
    /// acks, no ordering. Receivers relay along the routing table.
    pub fn unreliable_broadcast(&mut self, payload: Vec<u8>) -> Vec<HubEffect> {
        let frame = UnreliableFrame {
            source: self.id,
            payload,
        };
        let bytes = Bytes::from(frame.to_bytes().expect("frame serialization cannot fail"));

        self.peers
            .connected_ids()
            .map(|to| HubEffect::SendUnreliable {
                to,
                frame: bytes.clone(),
            })
            .collect()
    }

    // ── Inbound ──────────────────────────────────────────────────────────

    /// A reliable frame arrived from the directly connected peer `proxy`.
    pub fn handle_frame(&mut self, proxy: PeerId, bytes: &[u8]) -> Vec<HubEffect> {
        match Message::from_bytes(bytes) {
            Ok(msg) => self.on_recv(msg),
            Err(e) => {
                warn!(hub = %self.id, peer = %proxy, error = %e, "undecodable frame, dropping peer");
                let mut effects = vec![HubEffect::Disconnect { peer: proxy }];
                effects.extend(self.peer_disconnected(proxy));
                effects
            }
        }
    }

    /// A best-effort datagram arrived.
    pub fn handle_unreliable_frame(&mut self, bytes: &[u8]) -> Vec<HubEffect> {
        let Ok(frame) = UnreliableFrame::from_bytes(bytes) else {
            return Vec::new();
        };
        if !self.peers.contains(frame.source) {
            return Vec::new();
        }

        // Forward the original bytes along our branch of the source's
        // spanning tree.
        let raw = Bytes::copy_from_slice(bytes);
        let targets: Vec<PeerId> = self.routing.targets(frame.source).collect();

        let mut effects = Vec::new();
        for to in targets {
            if self.peers.get(to).is_some_and(|p| p.is_connected()) {
                effects.push(HubEffect::SendUnreliable {
                    to,
                    frame: raw.clone(),
                });
            }
        }
        effects.push(HubEffect::Emit(HubEvent::ReceivedUnreliable {
            from: frame.source,
            payload: frame.payload,
        }));
        effects
    }

    /// The transport lost the link to `peer`. Injects a locally originated
    /// fuse naming it; the quorum that forms from the survivors' acks
    /// excludes the dead peer.
    pub fn peer_disconnected(&mut self, peer: PeerId) -> Vec<HubEffect> {
        debug!(hub = %self.id, %peer, "peer disconnected");
        if let Some(p) = self.peers.get_mut(peer) {
            p.disconnect();
        }

        let mut effects = Vec::new();
        let fuse = self.construct_fuse(peer);
        self.broadcast(&Message::Fuse(fuse.clone()), &mut effects);
        self.add_log_entry(LogMessage::Fuse(fuse));
        self.commit_pending(&mut effects);
        effects
    }

    fn on_recv(&mut self, mut msg: Message) -> Vec<HubEffect> {
        let mut effects = Vec::new();

        msg.header_mut().visited.insert(self.id);

        let originator = msg.originator();
        if originator == self.id {
            // A peer must never return our own message.
            debug_assert!(false, "received our own message back");
            return effects;
        }

        let id = msg.id();
        if self.seen.is_in(id) {
            trace!(hub = %self.id, %id, "duplicate, ignored");
            return effects;
        }
        self.seen.insert(id);

        self.timestamp = self.timestamp.max(msg.header().timestamp);
        self.peers.ensure(originator);

        trace!(hub = %self.id, %id, kind = msg.kind(), "received");
        self.broadcast(&msg, &mut effects);

        match msg {
            Message::Fuse(m) => self.process_fuse(m, &mut effects),
            Message::UserData(m) => self.process_user_data(m, &mut effects),
            Message::PortOffer(m) => self.process_port_offer(m, &mut effects),
            Message::Ack(m) => self.process_ack(m),
        }

        self.commit_pending(&mut effects);
        effects
    }

    // ── Kind processors ──────────────────────────────────────────────────

    fn process_fuse(&mut self, msg: Fuse, effects: &mut Vec<HubEffect>) {
        let id = msg.header.message_id();
        self.add_log_entry(LogMessage::Fuse(msg));

        // Only the highest pending fuse gets our ack; lower ones wait
        // until the higher one resolves them.
        let highest = self.log.find_highest_fuse_entry().map(|(hid, _)| hid);
        if highest.map_or(true, |hid| id >= hid) {
            let ack = self.construct_ack(id);
            self.broadcast(&Message::Ack(ack), effects);
        }
    }

    fn process_user_data(&mut self, msg: UserData, effects: &mut Vec<HubEffect>) {
        let ack = self.construct_ack(msg.header.message_id());
        self.broadcast(&Message::Ack(ack), effects);
        self.add_log_entry(LogMessage::UserData(msg));
    }

    fn process_port_offer(&mut self, msg: PortOffer, effects: &mut Vec<HubEffect>) {
        if msg.addressee != self.id {
            return;
        }

        let originator = msg.header.originator;
        let (connected, ports) = {
            let peer = self.peers.ensure(originator);
            peer.set_offered_ports(msg.internal_port, msg.external_port);
            (peer.is_connected(), peer.offered_ports())
        };

        if let (false, Some(ports)) = (connected, ports) {
            let address = self.find_address_to(originator);
            effects.push(HubEffect::Emit(HubEvent::DirectConnect {
                peer: originator,
                address,
                ports,
            }));
        }
    }

    fn process_ack(&mut self, msg: Ack) {
        self.log.apply_ack(msg.header.originator, msg.ack_data);
    }

    // ── Construction ─────────────────────────────────────────────────────

    fn next_header(&mut self) -> Header {
        self.timestamp += 1;
        Header::new(self.id, self.timestamp, self.config_id())
    }

    fn ack_data_for(&self, message_id: MessageId) -> AckData {
        AckData {
            message_id,
            predecessor_id: self.log.get_predecessor_time(message_id),
            neighbors: self.peers.neighbors(),
        }
    }

    fn construct_fuse(&mut self, target: PeerId) -> Fuse {
        let header = self.next_header();
        let ack_data = self.ack_data_for(header.message_id());
        Fuse {
            header,
            ack_data,
            target,
        }
    }

    fn construct_user_data(&mut self, payload: Vec<u8>) -> UserData {
        let header = self.next_header();
        let ack_data = self.ack_data_for(header.message_id());
        UserData {
            header,
            ack_data,
            payload,
        }
    }

    /// Build an ack for `acked` and apply it to our own log right away:
    /// we never receive our own broadcast back.
    fn construct_ack(&mut self, acked: MessageId) -> Ack {
        let ack_data = self.ack_data_for(acked);
        let header = self.next_header();
        let ack = Ack { header, ack_data };
        self.log.apply_ack(self.id, ack.ack_data.clone());
        ack
    }

    fn add_log_entry(&mut self, message: LogMessage) {
        if message.id() <= self.log.last_committed && !message.is_fuse() {
            debug_assert!(false, "entry at or below the commit line");
            warn!(hub = %self.id, id = %message.id(), "refusing entry behind the commit line");
            return;
        }
        self.log.insert(message);
    }

    /// Encode once, queue toward every connected peer that has not yet
    /// forwarded the message. The reliable relay suppresses loops with the
    /// `visited` set; the routing table is for the unreliable path only.
    fn broadcast(&self, msg: &Message, effects: &mut Vec<HubEffect>) {
        debug_assert!(!msg.header().visited.is_empty());

        let frame = Bytes::from(msg.to_bytes().expect("message serialization cannot fail"));
        let visited = &msg.header().visited;
        let originator = msg.originator();

        for peer in self.peers.connected_ids() {
            if visited.contains(&peer) || peer == originator {
                continue;
            }
            effects.push(HubEffect::SendReliable {
                to: peer,
                frame: frame.clone(),
            });
        }
    }

    // ── Commit driver ────────────────────────────────────────────────────

    fn latest_quorum(&self) -> &BTreeSet<PeerId> {
        self.configs
            .values()
            .next_back()
            .expect("at least one configuration")
    }

    /// Walk the log head-first and commit everything the quorum has seen.
    ///
    /// The newest pending fuse whose ackers form a clique fixes the `live`
    /// node set; entries older than it that `live` did not fully ack were
    /// outrun by the membership change and are discarded without delivery.
    /// A fuse that causally preceded the committable one can be discarded
    /// with them; distinguishing the two cases is an open problem upstream
    /// and the behavior is kept as is.
    fn commit_pending(&mut self, effects: &mut Vec<HubEffect>) {
        let mut committable_fuse: Option<MessageId> = None;
        let mut live_nodes = self.latest_quorum().clone();

        for (id, entry) in self.log.iter().rev() {
            if entry.is_fuse() && entry.acked_by_quorum() {
                committable_fuse = Some(id);
                live_nodes = entry.quorum();
                break;
            }
        }

        enum Step {
            Stop,
            Drop(MessageId, PeerId),
            Commit(MessageId),
        }

        loop {
            let step = {
                let Some((id, entry)) = self.log.iter().next() else {
                    break;
                };
                let Some(message) = entry.message() else {
                    // Acks outran their message; wait for the body.
                    break;
                };

                let mut decision = None;

                match committable_fuse {
                    Some(f_id) if id < f_id => {
                        if !entry.acked_by_quorum_of(&live_nodes) {
                            decision = Some(Step::Drop(id, message.originator()));
                        }
                    }
                    Some(f_id) if id > f_id => decision = Some(Step::Stop),
                    Some(_) => {} // the committable fuse itself
                    None => {
                        if entry.is_fuse() || !entry.acked_by_quorum_of(&live_nodes) {
                            decision = Some(Step::Stop);
                        }
                    }
                }

                // Causal gap check: the best predecessor candidate must be
                // the last committed id, or at most the last fuse commit.
                if decision.is_none() && !entry.predecessors().is_empty() {
                    let config_known = self.configs.contains_key(&message.config_id());
                    let mut candidate = None;
                    for (&p, _) in entry.predecessors().iter().rev() {
                        if p == self.log.last_committed {
                            candidate = Some(p);
                            break;
                        }
                        if !config_known {
                            continue;
                        }
                        candidate = Some(p);
                        break;
                    }
                    if let Some(p) = candidate {
                        if p != self.log.last_committed && p > self.log.last_fuse_commit {
                            decision = Some(Step::Stop);
                        }
                    }
                }

                decision.unwrap_or(Step::Commit(id))
            };

            match step {
                Step::Stop => break,
                Step::Drop(id, originator) => {
                    debug!(hub = %self.id, %id, "entry outrun by membership change, discarded");
                    self.log.last_committed = id;
                    self.log.last_commit_op = originator;
                    self.log.remove(id);
                }
                Step::Commit(id) => {
                    if committable_fuse == Some(id) {
                        committable_fuse = None;
                    }
                    let Some(entry) = self.log.remove(id) else {
                        break;
                    };

                    self.seen.seen_everything_up_to(id);
                    if entry.is_fuse() {
                        self.log.last_fuse_commit = id;
                    }
                    let Some(originator) = entry.message().map(|m| m.originator()) else {
                        break;
                    };
                    self.log.last_committed = id;
                    self.log.last_commit_op = originator;

                    debug!(hub = %self.id, %id, "committed");

                    if entry.is_fuse() {
                        self.commit_fuse(id, &entry, effects);
                    } else if let Some(LogMessage::UserData(msg)) = entry.into_message() {
                        if self.peers.contains(originator) {
                            effects.push(HubEffect::Emit(HubEvent::Received {
                                from: originator,
                                payload: msg.payload,
                            }));
                        }
                    }
                    // PortOffer delivery is reserved.
                }
            }
        }
    }

    fn commit_fuse(&mut self, id: MessageId, entry: &LogEntry, effects: &mut Vec<HubEffect>) {
        if !entry.acked_by_quorum() {
            return;
        }

        let graph = acks_to_graph(entry.acks());
        self.routing.recalculate(&graph);

        let quorum = entry.quorum();
        debug_assert!(quorum.contains(&self.id), "local peer outside its own quorum");

        let previous = self.latest_quorum().clone();
        let added: BTreeSet<PeerId> = quorum.difference(&previous).copied().collect();
        let removed: BTreeSet<PeerId> = previous.difference(&quorum).copied().collect();

        debug!(hub = %self.id, config = %id, members = quorum.len(), "installed configuration");
        self.configs.insert(id, quorum);

        for &peer in &removed {
            self.seen.forget_messages_from(peer);
            self.peers.remove(peer);
        }

        if !added.is_empty() {
            effects.push(HubEffect::Emit(HubEvent::Inserted(added)));
        }
        if !removed.is_empty() {
            effects.push(HubEffect::Emit(HubEvent::Removed(removed)));
        }
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

/// Ackers become nodes; each acker points at everything it claims to see.
fn acks_to_graph(acks: &BTreeMap<PeerId, AckData>) -> Graph {
    let mut graph = Graph::new();
    for (acker, ack) in acks {
        graph.add_node(*acker);
        for &neighbor in &ack.neighbors {
            graph.add_edge(*acker, neighbor);
        }
    }
    graph
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(seed: u8) -> PeerId {
        PeerId::from_bytes([seed; 16])
    }

    fn addr(last: u8) -> IpAddr {
        IpAddr::from([10, 0, 0, last])
    }

    /// Fuse two hubs both ways and shuttle reliable frames between them
    /// until the pair goes quiet. Returns every event either side emitted.
    fn fuse_pair(a: &mut Hub, b: &mut Hub) -> Vec<(PeerId, HubEvent)> {
        let hello_a = a.greeting().to_bytes().unwrap();
        let hello_b = b.greeting().to_bytes().unwrap();

        let (_, fx_a) = a.complete_fuse(&hello_b, Some(addr(2))).unwrap();
        let (_, fx_b) = b.complete_fuse(&hello_a, Some(addr(1))).unwrap();

        let mut events = Vec::new();
        pump(&mut [(a, fx_a), (b, fx_b)], &mut events);
        events
    }

    /// Deliver queued reliable sends between hubs until nothing is left.
    fn pump(hubs: &mut [(&mut Hub, Vec<HubEffect>)], events: &mut Vec<(PeerId, HubEvent)>) {
        loop {
            let mut inflight: Vec<(PeerId, PeerId, Bytes)> = Vec::new();

            for (hub, effects) in hubs.iter_mut() {
                for effect in effects.drain(..) {
                    match effect {
                        HubEffect::SendReliable { to, frame } => {
                            inflight.push((hub.id(), to, frame));
                        }
                        HubEffect::Emit(event) => events.push((hub.id(), event)),
                        _ => {}
                    }
                }
            }

            if inflight.is_empty() {
                break;
            }

            for (from, to, frame) in inflight {
                if let Some((hub, effects)) = hubs.iter_mut().find(|(h, _)| h.id() == to) {
                    effects.extend(hub.handle_frame(from, &frame));
                }
            }
        }
    }

    #[test]
    fn new_hub_is_its_own_quorum() {
        let hub = Hub::with_id(peer(1));
        assert_eq!(*hub.members(), BTreeSet::from([peer(1)]));
        assert_eq!(hub.config_id(), MessageId::new(0, peer(1)));
        assert!(hub.log().is_empty());
    }

    #[test]
    fn handshake_version_mismatch_refused() {
        let mut hub = Hub::with_id(peer(1));
        let bad = Handshake {
            version: PROTOCOL_VERSION + 1,
            peer_id: peer(2),
        };
        let err = hub
            .complete_fuse(&bad.to_bytes().unwrap(), None)
            .unwrap_err();
        assert!(matches!(err, HubError::ProtocolMismatch { .. }));
    }

    #[test]
    fn handshake_self_id_refused() {
        let mut hub = Hub::with_id(peer(1));
        let own = hub.greeting().to_bytes().unwrap();
        let err = hub.complete_fuse(&own, None).unwrap_err();
        assert!(matches!(err, HubError::AlreadyConnected { .. }));
    }

    #[test]
    fn handshake_garbage_refused() {
        let mut hub = Hub::with_id(peer(1));
        let err = hub.complete_fuse(b"definitely not a handshake", None).unwrap_err();
        assert!(matches!(err, HubError::ConnectionRefused { .. }));
    }

    #[test]
    fn fuse_pair_commits_membership() {
        let mut a = Hub::with_id(peer(1));
        let mut b = Hub::with_id(peer(2));

        let events = fuse_pair(&mut a, &mut b);

        let expected = BTreeSet::from([peer(1), peer(2)]);
        assert_eq!(*a.members(), expected);
        assert_eq!(*b.members(), expected);

        // Each side sees exactly one insertion, naming the other peer.
        let inserted_at_a: Vec<_> = events
            .iter()
            .filter(|(h, e)| *h == peer(1) && matches!(e, HubEvent::Inserted(_)))
            .collect();
        assert_eq!(inserted_at_a.len(), 1);
        assert!(
            matches!(&inserted_at_a[0].1, HubEvent::Inserted(set) if set == &BTreeSet::from([peer(2)]))
        );
    }

    #[test]
    fn solo_broadcast_delivers_to_self() {
        let mut hub = Hub::with_id(peer(1));
        let effects = hub.total_order_broadcast(b"note to self".to_vec());

        let events: Vec<_> = effects.iter().filter_map(|e| e.as_event()).collect();
        assert!(matches!(
            events.as_slice(),
            [HubEvent::Received { from, payload }] if *from == peer(1) && payload == b"note to self"
        ));
        assert!(hub.log().is_empty());
    }

    #[test]
    fn pair_broadcast_delivers_on_both_sides() {
        let mut a = Hub::with_id(peer(1));
        let mut b = Hub::with_id(peer(2));
        fuse_pair(&mut a, &mut b);

        let fx_a = a.total_order_broadcast(b"x".to_vec());
        let mut events = Vec::new();
        pump(&mut [(&mut a, fx_a), (&mut b, Vec::new())], &mut events);

        for id in [peer(1), peer(2)] {
            let delivered: Vec<_> = events
                .iter()
                .filter(|(h, e)| *h == id && matches!(e, HubEvent::Received { .. }))
                .collect();
            assert_eq!(delivered.len(), 1, "exactly one delivery at {id}");
            assert!(matches!(
                &delivered[0].1,
                HubEvent::Received { from, payload } if *from == peer(1) && payload == b"x"
            ));
        }

        assert_eq!(a.log().last_committed, b.log().last_committed);
    }

    #[test]
    fn duplicate_frame_is_ignored() {
        let mut a = Hub::with_id(peer(1));
        let mut b = Hub::with_id(peer(2));
        fuse_pair(&mut a, &mut b);

        let fx_a = a.total_order_broadcast(b"once".to_vec());
        let frame = fx_a
            .iter()
            .find_map(|e| match e {
                HubEffect::SendReliable { frame, .. } => Some(frame.clone()),
                _ => None,
            })
            .expect("a queued a send toward b");

        let first = b.handle_frame(peer(1), &frame);
        assert!(!first.is_empty());

        // Redelivery: no events, no rebroadcast.
        let second = b.handle_frame(peer(1), &frame);
        assert!(second.is_empty());
    }

    #[test]
    fn disconnect_shrinks_quorum() {
        let mut a = Hub::with_id(peer(1));
        let mut b = Hub::with_id(peer(2));
        fuse_pair(&mut a, &mut b);

        let effects = a.peer_disconnected(peer(2));
        let events: Vec<_> = effects.iter().filter_map(|e| e.as_event()).collect();

        assert!(events
            .iter()
            .any(|e| matches!(e, HubEvent::Removed(set) if set == &BTreeSet::from([peer(2)]))));
        assert_eq!(*a.members(), BTreeSet::from([peer(1)]));
        assert!(!a.peers().contains(peer(2)));
    }

    #[test]
    fn last_committed_is_monotone() {
        let mut a = Hub::with_id(peer(1));
        let mut b = Hub::with_id(peer(2));
        fuse_pair(&mut a, &mut b);

        let mut previous = a.log().last_committed;
        for round in 0..5u8 {
            let fx = a.total_order_broadcast(vec![round]);
            let mut events = Vec::new();
            pump(&mut [(&mut a, fx), (&mut b, Vec::new())], &mut events);
            assert!(a.log().last_committed > previous);
            previous = a.log().last_committed;
        }
    }

    #[test]
    fn undecodable_frame_drops_the_proxy() {
        let mut a = Hub::with_id(peer(1));
        let mut b = Hub::with_id(peer(2));
        fuse_pair(&mut a, &mut b);

        let effects = a.handle_frame(peer(2), b"corrupted");
        assert!(effects
            .iter()
            .any(|e| matches!(e, HubEffect::Disconnect { peer: p } if *p == peer(2))));
        assert_eq!(*a.members(), BTreeSet::from([peer(1)]));
    }

    #[test]
    fn port_offer_to_us_records_ports_and_hints() {
        let mut a = Hub::with_id(peer(1));
        let mut b = Hub::with_id(peer(2));
        fuse_pair(&mut a, &mut b);

        // A port offer originated by a third peer we have heard of but
        // never connected to, relayed to us by b.
        let offer = PortOffer {
            header: Header::new(peer(3), 50, MessageId::new(0, peer(3))),
            ack_data: AckData {
                message_id: MessageId::new(50, peer(3)),
                predecessor_id: MessageId::ZERO,
                neighbors: BTreeSet::from([peer(3)]),
            },
            addressee: peer(1),
            internal_port: 4000,
            external_port: 52744,
        };
        let frame = Message::PortOffer(offer).to_bytes().unwrap();
        let effects = a.handle_frame(peer(2), &frame);

        let hint = effects.iter().find_map(|e| match e.as_event() {
            Some(HubEvent::DirectConnect { peer, ports, .. }) => Some((*peer, *ports)),
            _ => None,
        });
        let (hinted, ports) = hint.expect("direct connect hint emitted");
        assert_eq!(hinted, peer(3));
        assert_eq!(ports.internal, 4000);
        assert_eq!(ports.external, 52744);

        let recorded = a.peers().get(peer(3)).unwrap().offered_ports().unwrap();
        assert_eq!(recorded.external, 52744);
    }

    #[test]
    fn port_offer_to_someone_else_ignored() {
        let mut a = Hub::with_id(peer(1));
        let mut b = Hub::with_id(peer(2));
        fuse_pair(&mut a, &mut b);

        let offer = PortOffer {
            header: Header::new(peer(3), 50, MessageId::new(0, peer(3))),
            ack_data: AckData {
                message_id: MessageId::new(50, peer(3)),
                predecessor_id: MessageId::ZERO,
                neighbors: BTreeSet::from([peer(3)]),
            },
            addressee: peer(9),
            internal_port: 1,
            external_port: 2,
        };
        let frame = Message::PortOffer(offer).to_bytes().unwrap();
        let effects = a.handle_frame(peer(2), &frame);
        assert!(effects.iter().all(|e| e.as_event().is_none()));
    }

    #[test]
    fn unreliable_broadcast_hits_every_connected_peer() {
        let mut a = Hub::with_id(peer(1));
        let mut b = Hub::with_id(peer(2));
        fuse_pair(&mut a, &mut b);

        let effects = a.unreliable_broadcast(b"datagram".to_vec());
        assert_eq!(effects.len(), 1);
        assert!(matches!(
            &effects[0],
            HubEffect::SendUnreliable { to, .. } if *to == peer(2)
        ));

        // Receiver surfaces the payload; with a two-peer clique there is
        // nobody to relay to.
        let HubEffect::SendUnreliable { frame, .. } = &effects[0] else {
            unreachable!()
        };
        let received = b.handle_unreliable_frame(frame);
        assert!(matches!(
            received.as_slice(),
            [HubEffect::Emit(HubEvent::ReceivedUnreliable { from, payload })]
                if *from == peer(1) && payload == b"datagram"
        ));
    }

    #[test]
    fn unreliable_frame_from_unknown_source_dropped() {
        let mut hub = Hub::with_id(peer(1));
        let frame = UnreliableFrame {
            source: peer(9),
            payload: b"?".to_vec(),
        }
        .to_bytes()
        .unwrap();
        assert!(hub.handle_unreliable_frame(&frame).is_empty());
    }
}
