//! One-shot commands against a running bridge.

use anyhow::{Result, bail};
use colored::Colorize;

use crate::control::{self, ControlRequest, ControlResponse};

pub async fn status() -> Result<()> {
	match control::send_request(ControlRequest::Status).await {
		Ok(ControlResponse::Status { peer_connected, sites, operations }) => {
			println!("{} bridge running", "●".green());
			let peer = if peer_connected {
				"connected".green()
			} else {
				"not connected".yellow()
			};
			println!("  extension: {peer}");
			println!("  sites: {sites}");
			println!("  operations: {operations}");
			Ok(())
		}
		Ok(other) => bail!("unexpected control response: {other:?}"),
		Err(err) if control::is_not_running(&err) => {
			println!("{} bridge not running", "○".yellow());
			Ok(())
		}
		Err(err) => Err(err),
	}
}

pub async fn stop() -> Result<()> {
	match control::send_request(ControlRequest::Shutdown).await {
		Ok(ControlResponse::Ok) => {
			println!("{} bridge stopped", "✓".green());
			Ok(())
		}
		Ok(other) => bail!("unexpected control response: {other:?}"),
		Err(err) if control::is_not_running(&err) => {
			println!("{} bridge not running", "○".yellow());
			Ok(())
		}
		Err(err) => Err(err),
	}
}

pub async fn reload() -> Result<()> {
	forward(ControlRequest::Reload, "reload sent to extension").await
}

pub async fn refresh_catalog() -> Result<()> {
	forward(ControlRequest::RefreshCatalog, "catalog refresh sent to extension").await
}

async fn forward(request: ControlRequest, done: &str) -> Result<()> {
	match control::send_request(request).await {
		Ok(ControlResponse::Ok) => {
			println!("{} {done}", "✓".green());
			Ok(())
		}
		Ok(ControlResponse::Error { code, message }) => {
			bail!("bridge error ({code}): {message}")
		}
		Ok(other) => bail!("unexpected control response: {other:?}"),
		Err(err) if control::is_not_running(&err) => {
			bail!("bridge not running; start it with `webmcp serve`")
		}
		Err(err) => Err(err),
	}
}
