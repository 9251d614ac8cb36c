//! The bridge core: registry, correlator, and peer transport wired together.
//!
//! [`Bridge::start`] binds the peer endpoint and spawns the background tasks;
//! everything after a successful start is fallible per call, not fatal.
//! Callers (the MCP surface, the control socket) only see this type.

use std::net::SocketAddr;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tracing::warn;
use webmcp_protocol::{PeerMessage, QueryKind};

use crate::config::BridgeConfig;
use crate::correlator::{CancelReason, Correlator};
use crate::error::{Error, Result};
use crate::registry::{CatalogEntry, Registry};
use crate::transport::{PeerHandle, PeerListener};

pub struct Bridge {
    config: BridgeConfig,
    registry: Registry,
    correlator: Arc<Correlator>,
    peer: PeerHandle,
    local_addr: SocketAddr,
}

impl Bridge {
    /// Bind the peer endpoint and spawn the listener, the call expiry task,
    /// and the inbound message pump. Binding is the only fatal failure.
    pub async fn start(config: BridgeConfig) -> Result<Arc<Self>> {
        let peer = PeerHandle::new();
        let correlator = Arc::new(Correlator::new());
        let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel();

        let listener = PeerListener::bind(
            &config,
            peer.clone(),
            Arc::clone(&correlator),
            inbound_tx,
        )
        .await?;
        let local_addr = listener.local_addr();

        let bridge = Arc::new(Self {
            config,
            registry: Registry::new(),
            correlator,
            peer,
            local_addr,
        });

        tokio::spawn(listener.run());
        tokio::spawn(Arc::clone(&bridge.correlator).run_expiry());
        tokio::spawn({
            let bridge = Arc::clone(&bridge);
            async move {
                while let Some(message) = inbound_rx.recv().await {
                    bridge.handle_peer_message(message);
                }
            }
        });

        Ok(bridge)
    }

    /// Address the peer listener actually bound (relevant with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn peer_connected(&self) -> bool {
        self.peer.is_connected()
    }

    /// Flattened snapshot of every published operation.
    pub fn catalog(&self) -> Vec<CatalogEntry> {
        self.registry.list()
    }

    pub fn site_count(&self) -> usize {
        self.registry.site_count()
    }

    /// Subscribe to catalog change signals; each value is the affected site.
    pub fn subscribe_catalog(&self) -> broadcast::Receiver<String> {
        self.registry.subscribe()
    }

    /// Invoke `operation` on the peer and wait for its result.
    ///
    /// With `target_site` set the name is routed there directly; otherwise
    /// the registry must resolve it to exactly one site, and an ambiguous
    /// name comes back as [`Error::AmbiguousOperation`] for the caller to
    /// retry with a target.
    pub async fn invoke(
        &self,
        operation: &str,
        args: Value,
        target_site: Option<&str>,
    ) -> Result<Value> {
        let site_id = match target_site {
            Some(site) => site.to_string(),
            None => self.registry.resolve_site(operation)?,
        };
        let operation = operation.to_string();
        self.correlator
            .dispatch(&self.peer, &operation, self.config.call_timeout(), |id| {
                PeerMessage::Invoke {
                    id,
                    operation_name: operation.clone(),
                    args,
                    site_id,
                }
            })
            .await
    }

    /// Ask the browser which site the focused page serves. `None` when the
    /// focused page publishes nothing.
    pub async fn query_active_site(&self) -> Result<Option<String>> {
        let result = self.query(QueryKind::ActiveSite).await?;
        Ok(result.as_str().map(str::to_string))
    }

    /// Open `url` in the browser (a new tab when it is already running).
    pub async fn open_url(&self, url: &str) -> Result<Value> {
        self.query(QueryKind::Navigate { url: url.to_string() }).await
    }

    async fn query(&self, kind: QueryKind) -> Result<Value> {
        let label = match &kind {
            QueryKind::ActiveSite => "query:active_site",
            QueryKind::Navigate { .. } => "query:navigate",
        };
        self.correlator
            .dispatch(&self.peer, label, self.config.call_timeout(), |id| {
                PeerMessage::Query { id, kind }
            })
            .await
    }

    /// Fire-and-forget: ask the extension to re-inject its adapters.
    pub fn reload(&self) -> Result<()> {
        self.send_control(PeerMessage::Reload)
    }

    /// Fire-and-forget: ask the extension to re-fetch the adapter catalog.
    pub fn refresh_catalog(&self) -> Result<()> {
        self.send_control(PeerMessage::RefreshCatalog)
    }

    fn send_control(&self, message: PeerMessage) -> Result<()> {
        let sender = self.peer.sender().ok_or(Error::PeerUnavailable)?;
        sender.send(message).map_err(|_| Error::PeerUnavailable)
    }

    /// Fail all in-flight calls and stop the expiry task. The listener and
    /// pump tasks die with the runtime.
    pub fn shutdown(&self) {
        self.correlator.cancel_all(CancelReason::ShuttingDown);
    }

    fn handle_peer_message(&self, message: PeerMessage) {
        match message {
            PeerMessage::CatalogAnnounce { site_id, operations, page_ref } => {
                self.registry.announce(site_id, operations, page_ref);
            }
            PeerMessage::CatalogWithdraw { page_ref } => {
                self.registry.withdraw(&page_ref);
            }
            PeerMessage::InvokeResult { id, result } | PeerMessage::QueryResult { id, result } => {
                self.correlator.resolve(id, Ok(result));
            }
            PeerMessage::InvokeError { id, message } | PeerMessage::QueryError { id, message } => {
                self.correlator.resolve(id, Err(Error::Peer(message)));
            }
            // Bridge-to-peer messages echoed back make no sense here.
            other @ (PeerMessage::Invoke { .. }
            | PeerMessage::Query { .. }
            | PeerMessage::Reload
            | PeerMessage::RefreshCatalog) => {
                warn!(target: "webmcp.bridge", ?other, "unexpected message direction, dropped");
            }
        }
    }
}
