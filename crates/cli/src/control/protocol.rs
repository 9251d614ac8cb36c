use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlRequest {
	Ping,
	Status,
	/// Forward a reload to the browser peer.
	Reload,
	/// Forward a catalog refresh to the browser peer.
	RefreshCatalog,
	Shutdown,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlResponse {
	Pong,
	Status {
		peer_connected: bool,
		sites: usize,
		operations: usize,
	},
	Ok,
	Error { code: String, message: String },
}
