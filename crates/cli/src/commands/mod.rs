mod adapter;
mod control;
mod serve;

use anyhow::Result;

use crate::cli::{Cli, Command};

pub async fn dispatch(cli: Cli) -> Result<()> {
	match cli.command {
		Command::Serve(args) => serve::run(args).await,
		Command::Status => control::status().await,
		Command::Stop => control::stop().await,
		Command::Reload => control::reload().await,
		Command::RefreshCatalog => control::refresh_catalog().await,
		Command::Adapter(command) => adapter::run(command).await,
	}
}
