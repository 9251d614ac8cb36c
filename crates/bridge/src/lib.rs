//! Core of the WebMCP bridge: the local process sitting between an MCP
//! client and a browser extension that publishes per-site operation
//! catalogs over a single WebSocket.
//!
//! Layering, bottom up:
//! - [`registry`]: which operations exist, for which site, backed by how
//!   many live pages.
//! - [`correlator`]: id-matched request/response over a message channel,
//!   with one shared timer for all deadlines.
//! - [`transport`]: the WebSocket endpoint; exactly one authoritative peer,
//!   newest connection wins.
//! - [`bridge`]: the composition callers actually use.
//!
//! Process surfaces (MCP over stdio, the control socket, the CLI) live in
//! `webmcp-cli`; this crate has no opinion about how it is driven.

pub mod bridge;
pub mod config;
pub mod correlator;
pub mod error;
pub mod registry;
pub mod transport;

pub use bridge::Bridge;
pub use config::{BridgeConfig, DEFAULT_PEER_PORT};
pub use correlator::{CancelReason, Correlator};
pub use error::{Error, Result};
pub use registry::{CatalogEntry, Registry};
pub use transport::{PeerHandle, PeerListener};
