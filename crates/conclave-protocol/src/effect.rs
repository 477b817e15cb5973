//! Effects and events produced by the engine.
//!
//! The hub is a pure state machine: every stimulus returns a batch of
//! effects for the caller to execute. Sends carry [`Bytes`] so one encode
//! serves every recipient; the buffer is released when the last
//! outstanding send drops its clone.

use std::collections::BTreeSet;
use std::net::IpAddr;

use bytes::Bytes;

use crate::peers::OfferedPorts;
use crate::types::PeerId;

/// An instruction to the layer driving the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubEffect {
    /// Queue `frame` on the reliable transport toward `to`.
    SendReliable { to: PeerId, frame: Bytes },
    /// Fire `frame` at `to` on the best-effort datagram path.
    SendUnreliable { to: PeerId, frame: Bytes },
    /// Tear down the transport link to `peer`.
    Disconnect { peer: PeerId },
    /// Surface an event to the application.
    Emit(HubEvent),
}

/// What the application observes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubEvent {
    /// Peers entered the committed membership.
    Inserted(BTreeSet<PeerId>),
    /// Peers left the committed membership.
    Removed(BTreeSet<PeerId>),
    /// A totally ordered application payload was delivered.
    Received { from: PeerId, payload: Vec<u8> },
    /// A best-effort payload arrived.
    ReceivedUnreliable { from: PeerId, payload: Vec<u8> },
    /// A not-yet-connected peer offered ports for a direct connection.
    DirectConnect {
        peer: PeerId,
        address: Option<IpAddr>,
        ports: OfferedPorts,
    },
}

impl HubEffect {
    /// Convenience for filtering event effects in tests and executors.
    pub fn as_event(&self) -> Option<&HubEvent> {
        match self {
            HubEffect::Emit(event) => Some(event),
            _ => None,
        }
    }
}
