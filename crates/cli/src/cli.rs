use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "webmcp")]
#[command(about = "WebMCP bridge - expose browser page operations as MCP tools")]
#[command(version)]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	#[command(subcommand)]
	pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
	/// Run the bridge: MCP server on stdio, peer WebSocket listener, control socket
	Serve(ServeArgs),
	/// Show whether a bridge is running and what it currently publishes
	Status,
	/// Stop a running bridge
	Stop,
	/// Ask the browser extension to re-inject its installed adapters
	Reload,
	/// Ask the browser extension to re-fetch the remote adapter catalog
	RefreshCatalog,
	/// Manage site adapters
	#[command(subcommand)]
	Adapter(AdapterCommand),
}

#[derive(Args, Debug)]
pub struct ServeArgs {
	/// Address the peer WebSocket listener binds to
	#[arg(long, value_name = "ADDR")]
	pub listen: Option<SocketAddr>,

	/// Per-call timeout in milliseconds
	#[arg(long, value_name = "MS")]
	pub timeout_ms: Option<u64>,
}

#[derive(Subcommand, Debug)]
pub enum AdapterCommand {
	/// Install an adapter from the hub, a URL, or a local file
	Install {
		/// Adapter id (hub install); omit when using --url or --file
		id: Option<String>,

		/// Fetch the adapter from this URL
		#[arg(long, value_name = "URL", conflicts_with = "file")]
		url: Option<String>,

		/// Copy the adapter from this local file
		#[arg(long, value_name = "PATH")]
		file: Option<PathBuf>,

		/// Id to install under (defaults to the hub id or the file stem)
		#[arg(long, value_name = "ID")]
		name: Option<String>,

		/// Tell a running bridge to re-inject adapters afterwards
		#[arg(long)]
		reload: bool,
	},
	/// List installed adapters
	List,
	/// Remove an installed adapter
	Remove {
		id: String,

		/// Tell a running bridge to re-inject adapters afterwards
		#[arg(long)]
		reload: bool,
	},
}
