//! Conclave protocol layer.
//!
//! Decentralized membership and total-order broadcast for a dynamic set
//! of peers over unreliable transports. Every peer participates
//! symmetrically: any peer may fuse another into the group, and the group
//! agrees on a single order over application messages and membership
//! changes.
//!
//! The engine ([`Hub`]) is a pure state machine returning [`HubEffect`]
//! batches; the [`runtime`] module adapts it to an async transport.
//!
//! Wire format: MessagePack (compact binary).

pub mod connectivity;
pub mod effect;
pub mod error;
pub mod graph;
pub mod hub;
pub mod log;
pub mod message;
pub mod peers;
pub mod routing;
pub mod runtime;
pub mod seen;
pub mod types;

pub use effect::{HubEffect, HubEvent};
pub use error::HubError;
pub use hub::Hub;
pub use message::{
    Ack, AckData, Fuse, Handshake, Header, LogMessage, Message, PortOffer, UnreliableFrame,
    UserData,
};
pub use runtime::{HubHandle, HubRuntime, Inbound, RuntimeChannels, RuntimeConfig, Transport};
pub use types::{ConfigId, MessageId, PeerId, Timestamp, PROTOCOL_VERSION};
