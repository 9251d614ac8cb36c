use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
#[cfg(windows)]
use tokio::net::TcpListener;
#[cfg(unix)]
use tokio::net::UnixListener;
use tokio::sync::watch;
use tracing::{info, warn};
use webmcp_bridge::{Bridge, Error as BridgeError};

#[cfg(windows)]
use super::CONTROL_TCP_PORT;
#[cfg(unix)]
use super::control_socket_path;
use super::protocol::{ControlRequest, ControlResponse};

/// Control socket server running inside the bridge process.
#[derive(Debug)]
pub struct ControlServer {
	shutdown_tx: watch::Sender<bool>,
	shutdown_rx: watch::Receiver<bool>,
	#[cfg(unix)]
	listener: UnixListener,
	#[cfg(unix)]
	socket_path: std::path::PathBuf,
	#[cfg(windows)]
	listener: TcpListener,
}

impl ControlServer {
	pub async fn start() -> Result<Self> {
		#[cfg(unix)]
		{
			Self::start_at(control_socket_path()).await
		}

		#[cfg(windows)]
		{
			Self::start_tcp().await
		}
	}

	#[cfg(unix)]
	pub async fn start_at(socket_path: std::path::PathBuf) -> Result<Self> {
		let (shutdown_tx, shutdown_rx) = watch::channel(false);

		if socket_path.exists() {
			// Distinguish a crashed bridge's leftover socket from a live one;
			// only a dead socket may be swept aside.
			if tokio::net::UnixStream::connect(&socket_path).await.is_ok() {
				anyhow::bail!(
					"A bridge is already running (control socket {} answered)",
					socket_path.display()
				);
			}
			std::fs::remove_file(&socket_path).with_context(|| {
				format!("Failed to remove stale socket: {}", socket_path.display())
			})?;
		}
		if let Some(parent) = socket_path.parent() {
			if !parent.exists() {
				std::fs::create_dir_all(parent).with_context(|| {
					format!("Failed to create socket directory: {}", parent.display())
				})?;
			}
		}
		let listener = UnixListener::bind(&socket_path).with_context(|| {
			format!("Failed to bind control socket: {}", socket_path.display())
		})?;
		info!(target: "webmcp.control", socket = %socket_path.display(), "control socket listening");
		Ok(Self { shutdown_tx, shutdown_rx, listener, socket_path })
	}

	#[cfg(windows)]
	async fn start_tcp() -> Result<Self> {
		let (shutdown_tx, shutdown_rx) = watch::channel(false);
		{
			let addr = format!("127.0.0.1:{CONTROL_TCP_PORT}");
			let listener = TcpListener::bind(&addr)
				.await
				.with_context(|| format!("Failed to bind control TCP socket: {addr}"))?;
			info!(target: "webmcp.control", addr, "control socket listening");
			Ok(Self { shutdown_tx, shutdown_rx, listener })
		}
	}

	/// Flips to `true` when a client sent `shutdown`.
	pub fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
		self.shutdown_rx.clone()
	}

	pub async fn run(mut self, bridge: Arc<Bridge>) -> Result<()> {
		loop {
			tokio::select! {
				_ = self.shutdown_rx.changed() => {
					if *self.shutdown_rx.borrow() {
						info!(target: "webmcp.control", "shutdown requested via control socket");
						break;
					}
				}
				accept = self.listener.accept() => {
					let (stream, _) = accept.context("Control socket accept failed")?;
					let bridge = Arc::clone(&bridge);
					let shutdown_tx = self.shutdown_tx.clone();
					tokio::spawn(async move {
						if let Err(err) = handle_client(stream, bridge, shutdown_tx).await {
							warn!(target: "webmcp.control", error = %err, "control connection error");
						}
					});
				}
			}
		}

		#[cfg(unix)]
		{
			let _ = std::fs::remove_file(&self.socket_path);
		}
		Ok(())
	}
}

async fn handle_client<S>(
	stream: S,
	bridge: Arc<Bridge>,
	shutdown_tx: watch::Sender<bool>,
) -> Result<()>
where
	S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
	let (read_half, mut write_half) = tokio::io::split(stream);
	let mut reader = BufReader::new(read_half);
	let mut line = String::new();

	loop {
		line.clear();
		let bytes = reader
			.read_line(&mut line)
			.await
			.context("Failed reading control request")?;
		if bytes == 0 {
			break;
		}

		let request = match serde_json::from_str::<ControlRequest>(line.trim_end()) {
			Ok(req) => req,
			Err(err) => {
				let response = ControlResponse::Error {
					code: "invalid_request".to_string(),
					message: err.to_string(),
				};
				write_response(&mut write_half, &response).await?;
				continue;
			}
		};

		let response = handle_request(&bridge, &shutdown_tx, request);
		write_response(&mut write_half, &response).await?;
	}

	Ok(())
}

fn handle_request(
	bridge: &Bridge,
	shutdown_tx: &watch::Sender<bool>,
	request: ControlRequest,
) -> ControlResponse {
	match request {
		ControlRequest::Ping => ControlResponse::Pong,
		ControlRequest::Status => ControlResponse::Status {
			peer_connected: bridge.peer_connected(),
			sites: bridge.site_count(),
			operations: bridge.catalog().len(),
		},
		ControlRequest::Reload => forward(bridge.reload()),
		ControlRequest::RefreshCatalog => forward(bridge.refresh_catalog()),
		ControlRequest::Shutdown => {
			let _ = shutdown_tx.send(true);
			ControlResponse::Ok
		}
	}
}

fn forward(result: webmcp_bridge::Result<()>) -> ControlResponse {
	match result {
		Ok(()) => ControlResponse::Ok,
		Err(err) => ControlResponse::Error {
			code: error_code(&err).to_string(),
			message: err.to_string(),
		},
	}
}

fn error_code(err: &BridgeError) -> &'static str {
	match err {
		BridgeError::PeerUnavailable => "peer_unavailable",
		BridgeError::DeadlineExceeded { .. } => "deadline_exceeded",
		BridgeError::UnknownOperation(_) => "unknown_operation",
		BridgeError::AmbiguousOperation(_) => "ambiguous_operation",
		BridgeError::PeerSuperseded | BridgeError::PeerDisconnected => "peer_lost",
		_ => "internal",
	}
}

async fn write_response<W>(writer: &mut W, response: &ControlResponse) -> Result<()>
where
	W: tokio::io::AsyncWrite + Unpin,
{
	let payload = serde_json::to_string(response).context("Failed to serialize control response")?;
	writer
		.write_all(format!("{payload}\n").as_bytes())
		.await
		.context("Failed writing control response")?;
	writer.flush().await.context("Failed flushing control response")?;
	Ok(())
}
