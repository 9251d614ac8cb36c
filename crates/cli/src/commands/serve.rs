//! The long-running bridge process: MCP over stdio, the peer WebSocket
//! listener, and the control socket, all in one tokio runtime.

use std::sync::Arc;

use anyhow::{Context, Result};
use rmcp::ServiceExt;
use rmcp::transport::stdio;
use tokio::sync::broadcast;
use tracing::{debug, error, info};
use webmcp_bridge::{Bridge, BridgeConfig};

use crate::cli::ServeArgs;
use crate::control::ControlServer;
use crate::mcp::WebMcpServer;

pub async fn run(args: ServeArgs) -> Result<()> {
	let mut config = BridgeConfig::default();
	if let Some(listen) = args.listen {
		config.listen_addr = listen;
	}
	if let Some(timeout_ms) = args.timeout_ms {
		config.call_timeout_ms = timeout_ms;
	}

	// The only fatal failure; everything past this point degrades per call.
	let bridge = Bridge::start(config).await.context("Failed to start bridge")?;
	info!(target: "webmcp.serve", addr = %bridge.local_addr(), "peer listener up");

	let control = ControlServer::start().await?;
	let mut shutdown_rx = control.subscribe_shutdown();
	tokio::spawn({
		let bridge = Arc::clone(&bridge);
		async move {
			if let Err(err) = control.run(bridge).await {
				error!(target: "webmcp.serve", error = %err, "control socket failed");
			}
		}
	});

	let service = WebMcpServer::new(Arc::clone(&bridge))
		.serve(stdio())
		.await
		.context("Failed to start MCP server")?;
	info!(target: "webmcp.serve", "MCP handshake complete");

	// Catalog changes become tools/list_changed notifications. Subscribing
	// only after the handshake means pre-handshake churn is dropped, not
	// queued up for the client.
	let pump = tokio::spawn({
		let client = service.peer().clone();
		let mut changes = bridge.subscribe_catalog();
		async move {
			loop {
				match changes.recv().await {
					Ok(site) => {
						debug!(target: "webmcp.serve", %site, "notifying tool list change");
						if client.notify_tool_list_changed().await.is_err() {
							break;
						}
					}
					Err(broadcast::error::RecvError::Lagged(_)) => {
						// Missed signals collapse into one notification.
						if client.notify_tool_list_changed().await.is_err() {
							break;
						}
					}
					Err(broadcast::error::RecvError::Closed) => break,
				}
			}
		}
	});

	tokio::select! {
		result = service.waiting() => {
			result.context("MCP server error")?;
			info!(target: "webmcp.serve", "MCP client disconnected");
		}
		_ = shutdown_rx.changed() => {
			info!(target: "webmcp.serve", "stopping on control socket request");
		}
		_ = tokio::signal::ctrl_c() => {
			info!(target: "webmcp.serve", "interrupted");
		}
	}

	pump.abort();
	bridge.shutdown();
	Ok(())
}
