//! WebSocket endpoint for the browser peer.
//!
//! The bridge listens on a fixed local address and holds at most one
//! authoritative peer at a time. A second handshake does not get refused;
//! the newer connection wins, the older one is dropped and its in-flight
//! calls fail with `PeerSuperseded`. Frames are one JSON object per text
//! message; anything that does not parse is logged and dropped without
//! touching the connection.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use webmcp_protocol::PeerMessage;

use crate::config::BridgeConfig;
use crate::correlator::{CancelReason, Correlator};
use crate::error::{Error, Result};

struct PeerSlot {
    sender: Option<mpsc::UnboundedSender<PeerMessage>>,
    /// Bumped on every install so a finished connection can tell whether it
    /// is still the current one before clearing the slot.
    generation: u64,
}

/// Shared handle to the currently connected peer, if any.
#[derive(Clone)]
pub struct PeerHandle {
    slot: Arc<Mutex<PeerSlot>>,
}

impl Default for PeerHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerHandle {
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Mutex::new(PeerSlot { sender: None, generation: 0 })),
        }
    }

    /// Outbound channel to the current peer, or `None` when disconnected.
    pub fn sender(&self) -> Option<mpsc::UnboundedSender<PeerMessage>> {
        self.slot.lock().sender.clone()
    }

    /// Current sender together with the generation it belongs to, read
    /// atomically. Callers that track in-flight work per connection must use
    /// this rather than [`PeerHandle::sender`] so a concurrent supersede
    /// cannot split the pair.
    pub(crate) fn sender_with_generation(
        &self,
    ) -> Option<(mpsc::UnboundedSender<PeerMessage>, u64)> {
        let slot = self.slot.lock();
        slot.sender.clone().map(|sender| (sender, slot.generation))
    }

    pub(crate) fn generation(&self) -> u64 {
        self.slot.lock().generation
    }

    pub fn is_connected(&self) -> bool {
        self.slot.lock().sender.is_some()
    }

    /// Make `sender` the authoritative peer. Returns the displaced sender
    /// (if a peer was connected) and the generation of the new one.
    pub(crate) fn install(
        &self,
        sender: mpsc::UnboundedSender<PeerMessage>,
    ) -> (Option<mpsc::UnboundedSender<PeerMessage>>, u64) {
        let mut slot = self.slot.lock();
        slot.generation += 1;
        (slot.sender.replace(sender), slot.generation)
    }

    /// Clear the slot only if `generation` is still current. A superseded
    /// connection finishing late must not evict its successor.
    pub(crate) fn clear_if(&self, generation: u64) -> bool {
        let mut slot = self.slot.lock();
        if slot.generation == generation {
            slot.sender = None;
            true
        } else {
            false
        }
    }
}

/// Accept loop owning the listening socket.
pub struct PeerListener {
    listener: TcpListener,
    local_addr: SocketAddr,
    peer: PeerHandle,
    correlator: Arc<Correlator>,
    inbound: mpsc::UnboundedSender<PeerMessage>,
    heartbeat_interval: Duration,
    accept_retry_delay: Duration,
}

impl PeerListener {
    /// Bind the peer endpoint. This is the only fatal failure in the bridge;
    /// everything after a successful bind is retried or degraded.
    pub async fn bind(
        config: &BridgeConfig,
        peer: PeerHandle,
        correlator: Arc<Correlator>,
        inbound: mpsc::UnboundedSender<PeerMessage>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(config.listen_addr)
            .await
            .map_err(|source| Error::Bind { addr: config.listen_addr, source })?;
        let local_addr = listener.local_addr()?;
        info!(target: "webmcp.transport", %local_addr, "listening for peer");
        Ok(Self {
            listener,
            local_addr,
            peer,
            correlator,
            inbound,
            heartbeat_interval: config.heartbeat_interval(),
            accept_retry_delay: config.accept_retry_delay(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept peers until the process exits. Handshake failures and accept
    /// errors are logged; accept errors back off briefly before retrying so
    /// a transiently broken socket cannot spin the loop.
    pub async fn run(self) {
        loop {
            let (stream, remote) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(error) => {
                    warn!(target: "webmcp.transport", %error, "accept failed, retrying");
                    tokio::time::sleep(self.accept_retry_delay).await;
                    continue;
                }
            };
            let ws = match tokio_tungstenite::accept_async(stream).await {
                Ok(ws) => ws,
                Err(error) => {
                    warn!(target: "webmcp.transport", %remote, %error, "websocket handshake failed");
                    continue;
                }
            };

            let (tx, rx) = mpsc::unbounded_channel();
            let (displaced, generation) = self.peer.install(tx);
            if displaced.is_some() {
                info!(target: "webmcp.transport", %remote, "new peer supersedes existing connection");
                // Fail the old connection's in-flight calls right away rather
                // than letting them ride out their timeouts. Calls already
                // dispatched against the new connection keep their pending
                // entries; only older generations are failed. Dropping
                // `displaced` closes the old writer and ends its task.
                self.correlator
                    .cancel_generation(generation - 1, CancelReason::Superseded);
            } else {
                info!(target: "webmcp.transport", %remote, "peer connected");
            }

            let peer = self.peer.clone();
            let correlator = Arc::clone(&self.correlator);
            let inbound = self.inbound.clone();
            let heartbeat_interval = self.heartbeat_interval;
            tokio::spawn(async move {
                run_connection(ws, rx, &inbound, heartbeat_interval).await;
                // Cancel this connection's calls in both exits: a dispatch
                // that grabbed this sender just before a supersede may have
                // registered its call after the accept task's cancel pass.
                if peer.clear_if(generation) {
                    info!(target: "webmcp.transport", %remote, "peer disconnected");
                    correlator.cancel_generation(generation, CancelReason::Disconnected);
                } else {
                    debug!(target: "webmcp.transport", %remote, "superseded connection closed");
                    correlator.cancel_generation(generation, CancelReason::Superseded);
                }
            });
        }
    }
}

/// Drive one peer connection: pump outbound messages, keep the link alive
/// with pings, and forward parsed inbound frames. Returns when the socket
/// closes, errors, or the outbound channel is dropped (supersede).
async fn run_connection(
    mut ws: WebSocketStream<TcpStream>,
    mut outbound: mpsc::UnboundedReceiver<PeerMessage>,
    inbound: &mpsc::UnboundedSender<PeerMessage>,
    heartbeat_interval: Duration,
) {
    let mut heartbeat = tokio::time::interval_at(
        tokio::time::Instant::now() + heartbeat_interval,
        heartbeat_interval,
    );
    loop {
        tokio::select! {
            queued = outbound.recv() => {
                let Some(message) = queued else { break };
                let text = match serde_json::to_string(&message) {
                    Ok(text) => text,
                    Err(error) => {
                        warn!(target: "webmcp.transport", %error, "failed to encode outbound frame");
                        continue;
                    }
                };
                if let Err(error) = ws.send(Message::Text(text)).await {
                    warn!(target: "webmcp.transport", %error, "peer write failed");
                    break;
                }
            }
            _ = heartbeat.tick() => {
                if ws.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
            frame = ws.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<PeerMessage>(&text) {
                            Ok(message) => {
                                if inbound.send(message).is_err() {
                                    break;
                                }
                            }
                            Err(error) => {
                                warn!(target: "webmcp.transport", %error, "malformed frame dropped");
                            }
                        }
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(other)) => {
                        warn!(target: "webmcp.transport", kind = ?other, "unexpected frame dropped");
                    }
                    Some(Err(error)) => {
                        warn!(target: "webmcp.transport", %error, "peer read failed");
                        break;
                    }
                }
            }
        }
    }
}
