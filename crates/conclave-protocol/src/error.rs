use crate::types::PeerId;

/// Errors surfaced by the replication engine and its runtime adapter.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// The remote half of a fuse handshake speaks a different protocol
    /// version.
    #[error("protocol version mismatch: local {local}, remote {remote}")]
    ProtocolMismatch { local: u32, remote: u32 },

    /// The remote half of a fuse handshake presented our own identity.
    #[error("already connected: handshake peer id {peer} is ourselves")]
    AlreadyConnected { peer: PeerId },

    /// The handshake frame could not be decoded.
    #[error("connection refused: {reason}")]
    ConnectionRefused { reason: String },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// The runtime task is gone; the command was not processed.
    #[error("hub runtime is shut down")]
    Shutdown,
}

impl From<rmp_serde::encode::Error> for HubError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        HubError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for HubError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        HubError::Deserialization(e.to_string())
    }
}
