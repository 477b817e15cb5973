//! Async adapter around the engine — thin orchestrator.
//!
//! Owns a [`Hub`] plus a [`Transport`], multiplexes application commands
//! and inbound frames on one task, executes the effects the engine
//! returns, and surfaces [`HubEvent`]s on a channel. All engine mutation
//! happens on this single task; shutting the task down is the
//! cancellation point for everything in flight.

use std::collections::BTreeSet;
use std::net::IpAddr;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

use crate::effect::{HubEffect, HubEvent};
use crate::error::HubError;
use crate::hub::Hub;
use crate::types::PeerId;

// ── Transport seam ───────────────────────────────────────────────────────

/// The datagram transport, as the engine sees it.
///
/// Sends are fire-and-forget; a failed link comes back as
/// [`Inbound::Disconnected`] rather than an error return.
pub trait Transport: Send + 'static {
    fn send_reliable(&mut self, to: PeerId, frame: Bytes);
    fn send_unreliable(&mut self, to: PeerId, frame: Bytes);
    fn disconnect(&mut self, peer: PeerId);
}

// ── Configuration ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub command_capacity: usize,
    pub event_capacity: usize,
    pub inbound_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            command_capacity: 64,
            event_capacity: 64,
            inbound_capacity: 64,
        }
    }
}

// ── Transport → runtime ──────────────────────────────────────────────────

/// What the transport feeds into the runtime.
#[derive(Debug)]
pub enum Inbound {
    /// A reliable frame from the directly connected peer `from`.
    Frame { from: PeerId, bytes: Bytes },
    /// A best-effort datagram.
    Unreliable { bytes: Bytes },
    /// The link to `peer` is gone.
    Disconnected { peer: PeerId },
}

// ── Commands (app → runtime) ─────────────────────────────────────────────

enum Command {
    Fuse {
        remote_hello: Bytes,
        address: Option<IpAddr>,
        reply: oneshot::Sender<Result<PeerId, HubError>>,
    },
    Broadcast {
        payload: Vec<u8>,
    },
    UnreliableBroadcast {
        payload: Vec<u8>,
        done: oneshot::Sender<()>,
    },
    Members {
        reply: oneshot::Sender<BTreeSet<PeerId>>,
    },
    Shutdown,
}

// ── Handle (app-facing API) ──────────────────────────────────────────────

/// Handle to a running hub. Cheap to clone; all methods are channel sends.
#[derive(Clone)]
pub struct HubHandle {
    cmd_tx: mpsc::Sender<Command>,
    local_id: PeerId,
}

impl HubHandle {
    pub fn local_id(&self) -> PeerId {
        self.local_id
    }

    /// Complete a fuse over a freshly connected socket: the transport has
    /// already exchanged handshake frames, ours being
    /// `Hub::greeting().to_bytes()`; pass the remote's here.
    pub async fn fuse(
        &self,
        remote_hello: Bytes,
        address: Option<IpAddr>,
    ) -> Result<PeerId, HubError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Fuse {
                remote_hello,
                address,
                reply,
            })
            .await
            .map_err(|_| HubError::Shutdown)?;
        rx.await.map_err(|_| HubError::Shutdown)?
    }

    /// Broadcast an application payload with total-order delivery.
    pub async fn broadcast(&self, payload: Vec<u8>) -> Result<(), HubError> {
        self.cmd_tx
            .send(Command::Broadcast { payload })
            .await
            .map_err(|_| HubError::Shutdown)
    }

    /// Best-effort broadcast. Resolves once every datagram has been handed
    /// to the transport.
    pub async fn unreliable_broadcast(&self, payload: Vec<u8>) -> Result<(), HubError> {
        let (done, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::UnreliableBroadcast { payload, done })
            .await
            .map_err(|_| HubError::Shutdown)?;
        rx.await.map_err(|_| HubError::Shutdown)
    }

    /// The committed membership as the hub currently sees it.
    pub async fn members(&self) -> Result<BTreeSet<PeerId>, HubError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Members { reply })
            .await
            .map_err(|_| HubError::Shutdown)?;
        rx.await.map_err(|_| HubError::Shutdown)
    }

    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(Command::Shutdown).await;
    }
}

// ── Runtime ──────────────────────────────────────────────────────────────

/// Channels returned to the application when the runtime starts.
pub struct RuntimeChannels {
    pub handle: HubHandle,
    /// The callback surface: membership changes and deliveries.
    pub events: mpsc::Receiver<HubEvent>,
    /// Feed for the transport's receive side.
    pub inbound: mpsc::Sender<Inbound>,
}

pub struct HubRuntime;

impl HubRuntime {
    /// Spawn the event loop as a tokio task, taking ownership of the hub
    /// and its transport.
    pub fn spawn<T: Transport>(hub: Hub, transport: T, config: RuntimeConfig) -> RuntimeChannels {
        let local_id = hub.id();

        let (cmd_tx, cmd_rx) = mpsc::channel(config.command_capacity);
        let (event_tx, event_rx) = mpsc::channel(config.event_capacity);
        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_capacity);

        tokio::spawn(runtime_loop(hub, transport, cmd_rx, inbound_rx, event_tx));

        RuntimeChannels {
            handle: HubHandle { cmd_tx, local_id },
            events: event_rx,
            inbound: inbound_tx,
        }
    }
}

async fn runtime_loop<T: Transport>(
    mut hub: Hub,
    mut transport: T,
    mut cmd_rx: mpsc::Receiver<Command>,
    mut inbound_rx: mpsc::Receiver<Inbound>,
    event_tx: mpsc::Sender<HubEvent>,
) {
    loop {
        let effects = tokio::select! {
            Some(cmd) = cmd_rx.recv() => match cmd {
                Command::Fuse { remote_hello, address, reply } => {
                    match hub.complete_fuse(&remote_hello, address) {
                        Ok((peer, effects)) => {
                            let _ = reply.send(Ok(peer));
                            effects
                        }
                        Err(e) => {
                            let _ = reply.send(Err(e));
                            Vec::new()
                        }
                    }
                }
                Command::Broadcast { payload } => hub.total_order_broadcast(payload),
                Command::UnreliableBroadcast { payload, done } => {
                    let effects = hub.unreliable_broadcast(payload);
                    // Sends are handed over below, synchronously, before
                    // the loop can observe anything else.
                    let _ = done.send(());
                    effects
                }
                Command::Members { reply } => {
                    let _ = reply.send(hub.members().clone());
                    Vec::new()
                }
                Command::Shutdown => break,
            },

            Some(inbound) = inbound_rx.recv() => match inbound {
                Inbound::Frame { from, bytes } => hub.handle_frame(from, &bytes),
                Inbound::Unreliable { bytes } => hub.handle_unreliable_frame(&bytes),
                Inbound::Disconnected { peer } => hub.peer_disconnected(peer),
            },

            else => break,
        };

        execute(effects, &mut transport, &event_tx).await;
    }

    debug!(hub = %hub.id(), "runtime loop stopped");
}

async fn execute<T: Transport>(
    effects: Vec<HubEffect>,
    transport: &mut T,
    event_tx: &mpsc::Sender<HubEvent>,
) {
    for effect in effects {
        match effect {
            HubEffect::SendReliable { to, frame } => transport.send_reliable(to, frame),
            HubEffect::SendUnreliable { to, frame } => transport.send_unreliable(to, frame),
            HubEffect::Disconnect { peer } => transport.disconnect(peer),
            HubEffect::Emit(event) => {
                // A dropped event receiver means the application is gone;
                // keep replicating regardless.
                if event_tx.send(event).await.is_err() {
                    trace!("event receiver dropped");
                }
            }
        }
    }
}
