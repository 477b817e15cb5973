use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Wire protocol version exchanged during the fuse handshake.
///
/// Both halves must present the same version or the connection is refused.
pub const PROTOCOL_VERSION: u32 = 1;

/// Lamport-style logical clock value.
///
/// Monotonically non-decreasing at each peer; advanced to
/// `max(local, received)` on receive and incremented on send.
pub type Timestamp = u64;

// ── PeerId ───────────────────────────────────────────────────────────────

/// Globally unique 128-bit peer identity with total order.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId(Uuid);

impl PeerId {
    /// The all-zero sentinel, used as the originator of [`MessageId::ZERO`].
    pub const NIL: PeerId = PeerId(Uuid::nil());

    /// Generate a fresh random identity.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Build an identity from raw bytes (fixed ids in tests, decoded ids
    /// on the wire path).
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short prefix is enough to tell peers apart in logs.
        let s = self.0.simple().to_string();
        f.write_str(&s[..8])
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({self})")
    }
}

// ── MessageId ────────────────────────────────────────────────────────────

/// Globally unique, totally ordered message identity.
///
/// Ordered lexicographically: timestamp first, the originator id breaking
/// ties between messages stamped in the same Lamport instant.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId {
    pub timestamp: Timestamp,
    pub originator: PeerId,
}

impl MessageId {
    /// The origin of time: smaller than every id a live peer can produce.
    pub const ZERO: MessageId = MessageId {
        timestamp: 0,
        originator: PeerId::NIL,
    };

    pub fn new(timestamp: Timestamp, originator: PeerId) -> Self {
        Self {
            timestamp,
            originator,
        }
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.originator, self.timestamp)
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageId({self})")
    }
}

/// Identity of a membership configuration: the id of the fuse message that
/// introduced it, or `(0, local id)` at genesis.
pub type ConfigId = MessageId;

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(seed: u8) -> PeerId {
        PeerId::from_bytes([seed; 16])
    }

    #[test]
    fn message_id_orders_by_timestamp_first() {
        let a = MessageId::new(1, peer(9));
        let b = MessageId::new(2, peer(1));
        assert!(a < b);
    }

    #[test]
    fn message_id_breaks_ties_by_originator() {
        let a = MessageId::new(5, peer(1));
        let b = MessageId::new(5, peer(2));
        assert!(a < b);
        assert!(a == MessageId::new(5, peer(1)));
    }

    #[test]
    fn zero_is_smallest() {
        let id = MessageId::new(0, peer(1));
        assert!(MessageId::ZERO < id);
        assert!(MessageId::ZERO < MessageId::new(1, PeerId::NIL));
    }

    #[test]
    fn peer_id_roundtrip_msgpack() {
        let id = peer(42);
        let bytes = rmp_serde::to_vec(&id).expect("serialize");
        let decoded: PeerId = rmp_serde::from_slice(&bytes).expect("deserialize");
        assert_eq!(id, decoded);
    }

    #[test]
    fn display_is_short() {
        let id = peer(0xAB);
        assert_eq!(id.to_string().len(), 8);
    }
}
