//! In-memory network of hubs for scenario runs.
//!
//! Executes every effect a hub returns: sends go into a delivery queue
//! drained in seeded random order, events are recorded per hub.

use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::Rng;

use conclave_protocol::{Hub, HubEffect, HubEvent, PeerId};

fn peer(index: u8) -> PeerId {
    PeerId::from_bytes([index; 16])
}

enum Wire {
    Reliable { from: PeerId, frame: Bytes },
    Unreliable { frame: Bytes },
}

pub struct Mesh {
    hubs: BTreeMap<PeerId, Hub>,
    queue: Vec<(PeerId, Wire)>,
    events: Vec<(PeerId, HubEvent)>,
    pub frames_delivered: u64,
}

impl Mesh {
    pub fn new(count: u8) -> Self {
        Self {
            hubs: (1..=count)
                .map(|i| (peer(i), Hub::with_id(peer(i))))
                .collect(),
            queue: Vec::new(),
            events: Vec::new(),
            frames_delivered: 0,
        }
    }

    pub fn ids(&self) -> Vec<PeerId> {
        self.hubs.keys().copied().collect()
    }

    pub fn hub_mut(&mut self, id: PeerId) -> &mut Hub {
        self.hubs.get_mut(&id).expect("hub exists")
    }

    pub fn absorb(&mut self, at: PeerId, effects: Vec<HubEffect>) {
        for effect in effects {
            match effect {
                HubEffect::SendReliable { to, frame } => {
                    self.queue.push((to, Wire::Reliable { from: at, frame }));
                }
                HubEffect::SendUnreliable { to, frame } => {
                    self.queue.push((to, Wire::Unreliable { frame }));
                }
                HubEffect::Emit(event) => self.events.push((at, event)),
                HubEffect::Disconnect { .. } => {}
            }
        }
    }

    /// Fuse two hubs both ways, like a connected socket pair would.
    pub fn fuse(&mut self, a: PeerId, b: PeerId) {
        let hello_a = self.hub_mut(a).greeting().to_bytes().expect("encode");
        let hello_b = self.hub_mut(b).greeting().to_bytes().expect("encode");
        let addr_a = IpAddr::from([10, 0, 0, a.as_bytes()[0]]);
        let addr_b = IpAddr::from([10, 0, 0, b.as_bytes()[0]]);

        let (_, fx) = self
            .hub_mut(a)
            .complete_fuse(&hello_b, Some(addr_b))
            .expect("fuse");
        self.absorb(a, fx);
        let (_, fx) = self
            .hub_mut(b)
            .complete_fuse(&hello_a, Some(addr_a))
            .expect("fuse");
        self.absorb(b, fx);
    }

    /// Drop a hub; in-flight frames toward it vanish and every survivor
    /// observes the transport loss.
    pub fn kill(&mut self, dead: PeerId) {
        self.hubs.remove(&dead);
        self.queue.retain(|(to, _)| *to != dead);

        let survivors: Vec<PeerId> = self.hubs.keys().copied().collect();
        for id in survivors {
            if self.hubs[&id].peers().contains(dead) {
                let fx = self.hubs.get_mut(&id).unwrap().peer_disconnected(dead);
                self.absorb(id, fx);
            }
        }
    }

    /// Deliver all queued frames in seeded random order.
    pub fn deliver(&mut self, rng: &mut StdRng) {
        while !self.queue.is_empty() {
            let index = rng.gen_range(0..self.queue.len());
            let (to, wire) = self.queue.remove(index);
            let Some(hub) = self.hubs.get_mut(&to) else {
                continue;
            };
            self.frames_delivered += 1;
            let effects = match wire {
                Wire::Reliable { from, frame } => hub.handle_frame(from, &frame),
                Wire::Unreliable { frame } => hub.handle_unreliable_frame(&frame),
            };
            self.absorb(to, effects);
        }
    }

    pub fn members(&self, id: PeerId) -> &BTreeSet<PeerId> {
        self.hubs[&id].members()
    }

    /// Ordered totally-ordered deliveries observed at one hub.
    pub fn deliveries(&self, id: PeerId) -> Vec<(PeerId, Vec<u8>)> {
        self.events
            .iter()
            .filter(|(at, _)| *at == id)
            .filter_map(|(_, e)| match e {
                HubEvent::Received { from, payload } => Some((*from, payload.clone())),
                _ => None,
            })
            .collect()
    }
}
