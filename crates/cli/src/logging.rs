use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

pub fn init_logging(verbosity: u8) {
	// 0 = errors only (stdout belongs to the MCP transport, keep stderr quiet)
	// 1 (-v) = info for the cli, warn for the bridge core
	// 2+ (-vv) = debug/trace for everything
	let filter = match verbosity {
		0 => "error",
		1 => "info,webmcp_bridge=warn",
		_ => "debug",
	};

	let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

	let stderr = std::io::stderr.with_max_level(tracing::Level::TRACE);

	tracing_subscriber::fmt()
		.with_env_filter(env_filter)
		.with_writer(stderr)
		.with_target(true)
		.with_level(true)
		.compact()
		.init();
}
