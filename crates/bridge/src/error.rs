//! Error types for the bridge core.

use std::net::SocketAddr;

use thiserror::Error;

/// Result type alias for bridge operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the bridge core.
///
/// Every variant except [`Error::Bind`] is recovered at the bridge boundary
/// and turned into an error reply for the caller; a bind failure at startup
/// is the one fatal condition.
#[derive(Debug, Error)]
pub enum Error {
    /// No authoritative browser peer connected at dispatch time.
    #[error("no browser peer connected")]
    PeerUnavailable,

    /// A dispatched call's reply never arrived within its timeout.
    #[error("call '{operation}' timed out after {timeout_ms}ms")]
    DeadlineExceeded { operation: String, timeout_ms: u64 },

    /// No site currently publishes an operation with this name.
    #[error("unknown operation '{0}'")]
    UnknownOperation(String),

    /// More than one site publishes this name and no target site was given.
    #[error("operation '{0}' is published by more than one site; specify a target site")]
    AmbiguousOperation(String),

    /// The peer connection serving this call was replaced by a newer one.
    #[error("peer connection superseded by a newer one")]
    PeerSuperseded,

    /// The peer connection serving this call dropped.
    #[error("peer disconnected")]
    PeerDisconnected,

    /// Failure reported by the peer for a specific call.
    #[error("{0}")]
    Peer(String),

    /// The bridge is shutting down.
    #[error("bridge shutting down")]
    ShuttingDown,

    /// The peer listener could not bind its local address.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Returns true if this call failed because its deadline passed.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::DeadlineExceeded { .. })
    }

    /// Returns true if this call failed because the peer session ended.
    pub fn is_peer_loss(&self) -> bool {
        matches!(self, Error::PeerDisconnected | Error::PeerSuperseded)
    }
}
