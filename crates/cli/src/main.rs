use clap::Parser;
use colored::Colorize;
use webmcp_cli::{cli::Cli, commands, logging};

#[tokio::main]
async fn main() {
	let cli = Cli::parse();
	logging::init_logging(cli.verbose);

	if let Err(err) = commands::dispatch(cli).await {
		eprintln!("{} {err:#}", "error:".red().bold());
		std::process::exit(1);
	}
}
