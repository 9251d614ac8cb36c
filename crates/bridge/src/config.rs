//! Bridge runtime settings.

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Port the browser extension connects to.
pub const DEFAULT_PEER_PORT: u16 = 3711;

/// Runtime settings for one bridge instance.
///
/// All fields have working defaults; the CLI overrides individual values from
/// flags. Durations are carried as milliseconds so the struct round-trips
/// through JSON config without custom serde.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Local address the peer WebSocket listener binds to.
    pub listen_addr: SocketAddr,
    /// How long an `invoke`/`query` waits for the peer before failing.
    pub call_timeout_ms: u64,
    /// Interval between keep-alive pings to the peer.
    pub heartbeat_interval_ms: u64,
    /// Delay before retrying after an accept failure.
    pub accept_retry_delay_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PEER_PORT)),
            call_timeout_ms: 10_000,
            heartbeat_interval_ms: 30_000,
            accept_retry_delay_ms: 1_000,
        }
    }
}

impl BridgeConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn accept_retry_delay(&self) -> Duration {
        Duration::from_millis(self.accept_retry_delay_ms)
    }
}
