//! Wire model of the replication protocol.
//!
//! Four message kinds travel over the reliable gossip channel: `Fuse`
//! (membership change), `UserData` (application payload), `PortOffer`
//! (transport hint) and `Ack`. The first three are *ackable*: they carry
//! the originator's own acknowledgement piggybacked as [`AckData`].
//!
//! Everything serializes as MessagePack; the payload of `UserData` stays
//! opaque bytes.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::HubError;
use crate::types::{ConfigId, MessageId, PeerId, Timestamp, PROTOCOL_VERSION};

// ── Header ───────────────────────────────────────────────────────────────

/// Common prefix of every reliable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// The peer that created the message.
    pub originator: PeerId,
    /// The originator's Lamport clock at send time.
    pub timestamp: Timestamp,
    /// The originator's current configuration at send time.
    pub config_id: ConfigId,
    /// Peers that have already forwarded this message. Suppresses
    /// rebroadcast loops. The originator's own id is redundant with
    /// `originator` but stays on the wire for compatibility.
    pub visited: BTreeSet<PeerId>,
}

impl Header {
    pub fn new(originator: PeerId, timestamp: Timestamp, config_id: ConfigId) -> Self {
        Self {
            originator,
            timestamp,
            config_id,
            visited: BTreeSet::from([originator]),
        }
    }

    /// The globally unique id of the message this header belongs to.
    pub fn message_id(&self) -> MessageId {
        MessageId::new(self.timestamp, self.originator)
    }
}

// ── AckData ──────────────────────────────────────────────────────────────

/// A single acknowledgement: who the acker thinks it can see, and where
/// the acked message sits in the acker's log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckData {
    /// The entry being acknowledged.
    pub message_id: MessageId,
    /// The id immediately preceding `message_id` in the acker's log, or
    /// its last committed id when nothing precedes it.
    pub predecessor_id: MessageId,
    /// The acker's connected peers, itself included.
    pub neighbors: BTreeSet<PeerId>,
}

// ── Message kinds ────────────────────────────────────────────────────────

/// Membership change: fuses `target` toward the group. Whether the commit
/// inserts or removes peers is decided by the quorum that forms from the
/// acks, not by the message itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fuse {
    pub header: Header,
    pub ack_data: AckData,
    pub target: PeerId,
}

/// Totally ordered application payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserData {
    pub header: Header,
    pub ack_data: AckData,
    pub payload: Vec<u8>,
}

/// Transport hint addressed to a single peer: the ports the originator
/// can be reached on for a direct connection attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortOffer {
    pub header: Header,
    pub ack_data: AckData,
    pub addressee: PeerId,
    pub internal_port: u16,
    pub external_port: u16,
}

/// Pure acknowledgement of somebody else's entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub header: Header,
    pub ack_data: AckData,
}

// ── Wire enum ────────────────────────────────────────────────────────────

/// Any reliable message, as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    Fuse(Fuse),
    UserData(UserData),
    PortOffer(PortOffer),
    Ack(Ack),
}

impl Message {
    pub fn header(&self) -> &Header {
        match self {
            Message::Fuse(m) => &m.header,
            Message::UserData(m) => &m.header,
            Message::PortOffer(m) => &m.header,
            Message::Ack(m) => &m.header,
        }
    }

    pub fn header_mut(&mut self) -> &mut Header {
        match self {
            Message::Fuse(m) => &mut m.header,
            Message::UserData(m) => &mut m.header,
            Message::PortOffer(m) => &mut m.header,
            Message::Ack(m) => &mut m.header,
        }
    }

    pub fn id(&self) -> MessageId {
        self.header().message_id()
    }

    pub fn originator(&self) -> PeerId {
        self.header().originator
    }

    /// Short kind tag for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Fuse(_) => "fuse",
            Message::UserData(_) => "user_data",
            Message::PortOffer(_) => "port_offer",
            Message::Ack(_) => "ack",
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, HubError> {
        rmp_serde::to_vec(self).map_err(Into::into)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, HubError> {
        rmp_serde::from_slice(data).map_err(Into::into)
    }
}

// ── Log subset ───────────────────────────────────────────────────────────

/// The message kinds that enter the pending log. `Ack` never does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogMessage {
    Fuse(Fuse),
    UserData(UserData),
    PortOffer(PortOffer),
}

impl LogMessage {
    pub fn header(&self) -> &Header {
        match self {
            LogMessage::Fuse(m) => &m.header,
            LogMessage::UserData(m) => &m.header,
            LogMessage::PortOffer(m) => &m.header,
        }
    }

    pub fn id(&self) -> MessageId {
        self.header().message_id()
    }

    pub fn originator(&self) -> PeerId {
        self.header().originator
    }

    pub fn config_id(&self) -> ConfigId {
        self.header().config_id
    }

    /// The originator's piggybacked self-acknowledgement.
    pub fn ack_data(&self) -> &AckData {
        match self {
            LogMessage::Fuse(m) => &m.ack_data,
            LogMessage::UserData(m) => &m.ack_data,
            LogMessage::PortOffer(m) => &m.ack_data,
        }
    }

    pub fn is_fuse(&self) -> bool {
        matches!(self, LogMessage::Fuse(_))
    }
}

impl From<LogMessage> for Message {
    fn from(m: LogMessage) -> Self {
        match m {
            LogMessage::Fuse(m) => Message::Fuse(m),
            LogMessage::UserData(m) => Message::UserData(m),
            LogMessage::PortOffer(m) => Message::PortOffer(m),
        }
    }
}

// ── Handshake ────────────────────────────────────────────────────────────

/// First frame exchanged (both directions) on a freshly fused socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handshake {
    pub version: u32,
    pub peer_id: PeerId,
}

impl Handshake {
    pub fn new(peer_id: PeerId) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            peer_id,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, HubError> {
        rmp_serde::to_vec(self).map_err(Into::into)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, HubError> {
        rmp_serde::from_slice(data).map_err(Into::into)
    }
}

// ── Unreliable frame ─────────────────────────────────────────────────────

/// Best-effort broadcast frame. No acks, no log entry, no ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnreliableFrame {
    pub source: PeerId,
    pub payload: Vec<u8>,
}

impl UnreliableFrame {
    pub fn to_bytes(&self) -> Result<Vec<u8>, HubError> {
        rmp_serde::to_vec(self).map_err(Into::into)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, HubError> {
        rmp_serde::from_slice(data).map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(seed: u8) -> PeerId {
        PeerId::from_bytes([seed; 16])
    }

    fn header(seed: u8, ts: Timestamp) -> Header {
        Header::new(peer(seed), ts, MessageId::ZERO)
    }

    fn ack_data(seed: u8, ts: Timestamp) -> AckData {
        AckData {
            message_id: MessageId::new(ts, peer(seed)),
            predecessor_id: MessageId::ZERO,
            neighbors: BTreeSet::from([peer(seed)]),
        }
    }

    #[test]
    fn header_seeds_visited_with_originator() {
        let h = header(1, 7);
        assert!(h.visited.contains(&peer(1)));
        assert_eq!(h.visited.len(), 1);
    }

    #[test]
    fn roundtrip_all_kinds() {
        let msgs = [
            Message::Fuse(Fuse {
                header: header(1, 1),
                ack_data: ack_data(1, 1),
                target: peer(2),
            }),
            Message::UserData(UserData {
                header: header(1, 2),
                ack_data: ack_data(1, 2),
                payload: b"hello group".to_vec(),
            }),
            Message::PortOffer(PortOffer {
                header: header(1, 3),
                ack_data: ack_data(1, 3),
                addressee: peer(2),
                internal_port: 4000,
                external_port: 52744,
            }),
            Message::Ack(Ack {
                header: header(1, 4),
                ack_data: ack_data(2, 2),
            }),
        ];

        for msg in &msgs {
            let bytes = msg.to_bytes().expect("serialize");
            let decoded = Message::from_bytes(&bytes).expect("deserialize");
            assert_eq!(*msg, decoded, "roundtrip failed for {}", msg.kind());
        }
    }

    #[test]
    fn roundtrip_empty_payload() {
        let msg = Message::UserData(UserData {
            header: header(1, 1),
            ack_data: ack_data(1, 1),
            payload: Vec::new(),
        });
        let decoded = Message::from_bytes(&msg.to_bytes().unwrap()).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn roundtrip_wide_visited_and_neighbors() {
        let mut h = header(1, 9);
        let mut a = ack_data(1, 9);
        for seed in 0..64 {
            h.visited.insert(peer(seed));
            a.neighbors.insert(peer(seed));
        }
        let msg = Message::Fuse(Fuse {
            header: h,
            ack_data: a,
            target: peer(200),
        });
        let decoded = Message::from_bytes(&msg.to_bytes().unwrap()).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn invalid_bytes_rejected() {
        assert!(Message::from_bytes(b"not msgpack at all").is_err());
    }

    #[test]
    fn handshake_roundtrip() {
        let hs = Handshake::new(peer(3));
        assert_eq!(hs.version, PROTOCOL_VERSION);
        let decoded = Handshake::from_bytes(&hs.to_bytes().unwrap()).unwrap();
        assert_eq!(hs, decoded);
    }

    #[test]
    fn unreliable_frame_roundtrip() {
        let frame = UnreliableFrame {
            source: peer(5),
            payload: vec![0xAB; 1024],
        };
        let decoded = UnreliableFrame::from_bytes(&frame.to_bytes().unwrap()).unwrap();
        assert_eq!(frame, decoded);
    }

    #[test]
    fn message_id_comes_from_header() {
        let msg = Message::Ack(Ack {
            header: header(7, 42),
            ack_data: ack_data(1, 1),
        });
        assert_eq!(msg.id(), MessageId::new(42, peer(7)));
        assert_eq!(msg.originator(), peer(7));
    }
}
