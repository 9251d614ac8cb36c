//! Adapter management: install from the hub, a URL, or a local file.

use anyhow::{Context, Result};
use colored::Colorize;

use crate::adapters::{AdapterStore, infer_id};
use crate::cli::AdapterCommand;
use crate::control::{self, ControlRequest, ControlResponse};

pub async fn run(command: AdapterCommand) -> Result<()> {
	let store = AdapterStore::open_default()?;
	match command {
		AdapterCommand::Install { id, url, file, name, reload } => {
			let path = if let Some(file) = file {
				let id = name
					.or_else(|| infer_id(&file.to_string_lossy()))
					.context("Cannot infer adapter id from filename; use --name <id>")?;
				println!("Installing from local file: {}", file.display());
				store.install_from_file(&id, &file)?
			} else if let Some(url) = url {
				let id = name
					.or_else(|| infer_id(&url))
					.with_context(|| {
						format!("Cannot infer adapter id from URL \"{url}\"; use --name <id>")
					})?;
				println!("Installing from URL: {url}");
				store.install_from_url(&id, &url).await?
			} else {
				let id = id.or(name).context(
					"Adapter id required.\nUsage: webmcp adapter install <id>",
				)?;
				println!("Installing \"{id}\" from hub...");
				store.install_from_hub(&id).await?
			};
			println!("{} Adapter installed: {}", "✓".green(), path.display());
			finish(reload).await;
		}
		AdapterCommand::List => {
			let adapters = store.list()?;
			if adapters.is_empty() {
				println!("No adapters installed.");
			} else {
				println!("Installed adapters ({}):", store.dir().display());
				for adapter in adapters {
					println!("  - {} ({} bytes)", adapter.id, adapter.size);
				}
			}
		}
		AdapterCommand::Remove { id, reload } => {
			store.remove(&id)?;
			println!("{} Adapter removed: {id}", "✓".green());
			finish(reload).await;
		}
	}
	Ok(())
}

/// After a store change either push a reload to a running bridge or tell
/// the user to reload the extension by hand.
async fn finish(reload: bool) {
	if !reload {
		println!("→ Reload the extension (or run `webmcp reload`) to apply");
		return;
	}
	match control::send_request(ControlRequest::Reload).await {
		Ok(ControlResponse::Ok) => println!("{} reload sent to extension", "✓".green()),
		Ok(ControlResponse::Error { message, .. }) => {
			println!("{} {message}; reload the extension manually", "!".yellow());
		}
		Ok(_) | Err(_) => {
			println!(
				"{} bridge not running; reload the extension manually",
				"!".yellow()
			);
		}
	}
}
