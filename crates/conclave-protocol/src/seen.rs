//! Seen-message suppression filter.
//!
//! The reliable gossip relay floods every message to every peer, so each
//! message is usually observed several times. The filter remembers, per
//! originator, which timestamps have been seen, and keeps a collapse floor
//! below which everything counts as seen. The floor rises on every commit
//! (a committed entry was acked by the whole quorum, so everything at or
//! below it has been outrun) and keeps duplicates rejected even after the
//! originator itself has been forgotten.

use std::collections::{BTreeMap, BTreeSet};

use crate::types::{MessageId, PeerId, Timestamp};

#[derive(Debug)]
pub struct SeenMessages {
    /// Ids at or below this are treated as seen.
    floor: MessageId,
    /// Individually observed timestamps per originator, above the floor.
    seen: BTreeMap<PeerId, BTreeSet<Timestamp>>,
}

impl Default for SeenMessages {
    fn default() -> Self {
        Self::new()
    }
}

impl SeenMessages {
    pub fn new() -> Self {
        Self {
            floor: MessageId::ZERO,
            seen: BTreeMap::new(),
        }
    }

    /// Has this message id been observed (or collapsed past)?
    pub fn is_in(&self, id: MessageId) -> bool {
        id <= self.floor
            || self
                .seen
                .get(&id.originator)
                .is_some_and(|stamps| stamps.contains(&id.timestamp))
    }

    /// Record an observed message id.
    pub fn insert(&mut self, id: MessageId) {
        if id <= self.floor {
            return;
        }
        self.seen.entry(id.originator).or_default().insert(id.timestamp);
    }

    /// Collapse history: everything at or below `id` counts as seen from
    /// now on, and the per-originator records below it are dropped.
    pub fn seen_everything_up_to(&mut self, id: MessageId) {
        if id <= self.floor {
            return;
        }
        self.floor = id;
        self.seen.retain(|originator, stamps| {
            stamps.retain(|ts| MessageId::new(*ts, *originator) > id);
            !stamps.is_empty()
        });
    }

    /// Drop an originator's record when a committed fuse removes it.
    pub fn forget_messages_from(&mut self, peer: PeerId) {
        self.seen.remove(&peer);
    }
}
