//! Pending message log and acknowledgement aggregation.
//!
//! Entries are keyed and ordered by [`MessageId`]. Each entry aggregates
//! the acknowledgements received for it; a set of ackers whose `neighbors`
//! declarations all equal the ack set itself (a clique on what everyone
//! claims to see) forms the entry's quorum. The commit driver walks this
//! log head-first and erases what it commits or supersedes.

use std::collections::{BTreeMap, BTreeSet};

use crate::message::{AckData, LogMessage};
use crate::types::{MessageId, PeerId};

// ── LogEntry ─────────────────────────────────────────────────────────────

/// One pending message plus everything acked about it so far.
///
/// An entry can exist before its message body arrives: acks travel on
/// independent gossip paths and may outrun the message they acknowledge.
/// Such a placeholder carries only the acks until the body shows up.
#[derive(Debug, Clone)]
pub struct LogEntry {
    message: Option<LogMessage>,
    acks: BTreeMap<PeerId, AckData>,
    predecessors: BTreeMap<MessageId, PeerId>,
}

impl LogEntry {
    pub fn new(message: LogMessage) -> Self {
        let originator = message.originator();
        let ack = message.ack_data().clone();
        let mut entry = Self {
            message: Some(message),
            acks: BTreeMap::new(),
            predecessors: BTreeMap::new(),
        };
        entry.insert_ack(originator, ack);
        entry
    }

    fn placeholder() -> Self {
        Self {
            message: None,
            acks: BTreeMap::new(),
            predecessors: BTreeMap::new(),
        }
    }

    pub fn message(&self) -> Option<&LogMessage> {
        self.message.as_ref()
    }

    pub fn into_message(self) -> Option<LogMessage> {
        self.message
    }

    pub fn is_fuse(&self) -> bool {
        self.message.as_ref().is_some_and(|m| m.is_fuse())
    }

    pub fn insert_ack(&mut self, acker: PeerId, ack: AckData) {
        self.predecessors.insert(ack.predecessor_id, acker);
        self.acks.insert(acker, ack);
    }

    /// Merge another view of the same entry (a placeholder meeting its
    /// body, or a redelivered message carrying the originator's ack).
    fn fold(&mut self, other: LogEntry) {
        if self.message.is_none() {
            self.message = other.message;
        }
        for (acker, ack) in other.acks {
            self.insert_ack(acker, ack);
        }
    }

    pub fn acks(&self) -> &BTreeMap<PeerId, AckData> {
        &self.acks
    }

    /// Predecessor ids reported by ackers, mapped to the reporting acker.
    pub fn predecessors(&self) -> &BTreeMap<MessageId, PeerId> {
        &self.predecessors
    }

    /// The set of peers that have acked this entry.
    pub fn quorum(&self) -> BTreeSet<PeerId> {
        self.acks.keys().copied().collect()
    }

    /// True when the ackers form a clique: every ack's `neighbors` set is
    /// exactly the ack set, i.e. all ackers agree they see each other and
    /// nobody else.
    pub fn acked_by_quorum(&self) -> bool {
        if self.acks.is_empty() {
            return false;
        }
        let quorum = self.quorum();
        self.acks.values().all(|ack| ack.neighbors == quorum)
    }

    /// [`Self::acked_by_quorum`], additionally requiring the quorum to be
    /// exactly `live`.
    pub fn acked_by_quorum_of(&self, live: &BTreeSet<PeerId>) -> bool {
        self.acked_by_quorum() && self.quorum() == *live
    }
}

// ── Log ──────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct Log {
    pub(crate) entries: BTreeMap<MessageId, LogEntry>,
    /// Id of the most recently committed (or superseded) entry.
    pub last_committed: MessageId,
    /// Originator of the entry behind `last_committed`.
    pub last_commit_op: PeerId,
    /// Id of the most recently committed fuse.
    pub last_fuse_commit: MessageId,
}

impl Log {
    pub fn new(local: PeerId) -> Self {
        Self {
            entries: BTreeMap::new(),
            last_committed: MessageId::ZERO,
            last_commit_op: local,
            last_fuse_commit: MessageId::ZERO,
        }
    }

    /// Insert a message, folding into an existing entry (or placeholder)
    /// with the same id. Idempotent on message id.
    pub fn insert(&mut self, message: LogMessage) {
        let id = message.id();
        let entry = LogEntry::new(message);
        match self.entries.get_mut(&id) {
            Some(existing) => existing.fold(entry),
            None => {
                self.entries.insert(id, entry);
            }
        }
    }

    /// Fold an acknowledgement into the entry it addresses, creating a
    /// placeholder when the body has not arrived yet.
    ///
    /// Acks at or below the commit line are ignored: an id never reappears
    /// in the log after being committed or erased.
    pub fn apply_ack(&mut self, acker: PeerId, ack: AckData) {
        if ack.message_id <= self.last_committed {
            return;
        }
        self.entries
            .entry(ack.message_id)
            .or_insert_with(LogEntry::placeholder)
            .insert_ack(acker, ack);
    }

    pub fn remove(&mut self, id: MessageId) -> Option<LogEntry> {
        self.entries.remove(&id)
    }

    pub fn get(&self, id: MessageId) -> Option<&LogEntry> {
        self.entries.get(&id)
    }

    /// Entries in id order, head first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (MessageId, &LogEntry)> {
        self.entries.iter().map(|(id, e)| (*id, e))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The pending fuse entry with the greatest id, if any.
    pub fn find_highest_fuse_entry(&self) -> Option<(MessageId, &LogEntry)> {
        self.entries
            .iter()
            .rev()
            .find(|(_, e)| e.is_fuse())
            .map(|(id, e)| (*id, e))
    }

    /// The greatest id strictly below `id` among current entries, falling
    /// back to the last committed id.
    pub fn get_predecessor_time(&self, id: MessageId) -> MessageId {
        self.entries
            .range(..id)
            .next_back()
            .map(|(prev, _)| *prev)
            .unwrap_or(self.last_committed)
    }
}
