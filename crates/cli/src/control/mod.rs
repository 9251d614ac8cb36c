//! One-shot control channel to a running bridge.
//!
//! Line-delimited JSON over a unix socket (TCP loopback on Windows). Every
//! CLI command except `serve` is a client of this channel; the server side
//! runs inside the bridge process next to the MCP transport.

mod protocol;
mod server;

use std::path::PathBuf;

use anyhow::{Context, Result};
pub use protocol::{ControlRequest, ControlResponse};
pub use server::ControlServer;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
#[cfg(windows)]
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;

#[cfg(windows)]
pub const CONTROL_TCP_PORT: u16 = 3712;

/// Control socket path for the current user.
///
/// `WEBMCP_CONTROL_SOCKET` overrides everything (used by tests); otherwise
/// the socket lives in the user runtime dir, falling back to the temp dir.
#[cfg(unix)]
pub fn control_socket_path() -> PathBuf {
	if let Ok(path) = std::env::var("WEBMCP_CONTROL_SOCKET") {
		return PathBuf::from(path);
	}
	dirs::runtime_dir()
		.unwrap_or_else(std::env::temp_dir)
		.join("webmcp-control.sock")
}

/// Send one request to a running bridge and read its reply.
pub async fn send_request(request: ControlRequest) -> Result<ControlResponse> {
	let stream = connect()
		.await
		.context("Failed to connect to the bridge control socket")?;
	send_request_stream(stream, request).await
}

/// True when the connection failure means no bridge is running, as opposed
/// to a bridge that is running but unhealthy.
pub fn is_not_running(err: &anyhow::Error) -> bool {
	err.chain().any(|cause| {
		cause
			.downcast_ref::<std::io::Error>()
			.is_some_and(|io| {
				matches!(
					io.kind(),
					std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused
				)
			})
	})
}

#[cfg(unix)]
async fn connect() -> std::io::Result<UnixStream> {
	UnixStream::connect(control_socket_path()).await
}

#[cfg(windows)]
async fn connect() -> std::io::Result<TcpStream> {
	TcpStream::connect(("127.0.0.1", CONTROL_TCP_PORT)).await
}

async fn send_request_stream<S>(mut stream: S, request: ControlRequest) -> Result<ControlResponse>
where
	S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
	let payload = serde_json::to_string(&request).context("Failed to serialize control request")?;
	stream
		.write_all(format!("{payload}\n").as_bytes())
		.await
		.context("Failed writing control request")?;
	stream
		.flush()
		.await
		.context("Failed flushing control request")?;

	let mut reader = BufReader::new(stream);
	let mut line = String::new();
	reader
		.read_line(&mut line)
		.await
		.context("Failed reading control response")?;
	let response = serde_json::from_str(&line).context("Failed parsing control response")?;
	Ok(response)
}
