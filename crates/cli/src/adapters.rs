//! Local store of site adapters.
//!
//! Adapters are single JavaScript files the browser extension injects into
//! matching pages. The bridge only manages the files on disk; after a change
//! the extension picks them up on its next reload (the `--reload` flag asks
//! a running bridge to trigger that).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;
use tracing::warn;

const DEFAULT_HUB_BASE_URL: &str =
	"https://raw.githubusercontent.com/HeGaoYuan/webmcp-adapter/main/hub";

#[derive(Debug, Deserialize)]
struct HubRegistry {
	#[serde(default)]
	adapters: Vec<HubAdapter>,
}

#[derive(Debug, Deserialize)]
struct HubAdapter {
	id: String,
	#[serde(default)]
	name: String,
}

#[derive(Debug, Clone)]
pub struct AdapterInfo {
	pub id: String,
	pub path: PathBuf,
	pub size: u64,
}

/// Filesystem store at `~/.webmcp/adapters/<id>.js`.
pub struct AdapterStore {
	dir: PathBuf,
}

impl AdapterStore {
	pub fn new(dir: PathBuf) -> Self {
		Self { dir }
	}

	pub fn open_default() -> Result<Self> {
		let home = dirs::home_dir().ok_or_else(|| anyhow!("Cannot determine home directory"))?;
		Ok(Self::new(home.join(".webmcp").join("adapters")))
	}

	pub fn dir(&self) -> &Path {
		&self.dir
	}

	/// Write adapter `code` under `id`. Overwrites an existing adapter with
	/// the same id.
	pub fn install(&self, id: &str, code: &str) -> Result<PathBuf> {
		validate_id(id)?;
		std::fs::create_dir_all(&self.dir)
			.with_context(|| format!("Failed to create {}", self.dir.display()))?;
		let path = self.dir.join(format!("{id}.js"));
		std::fs::write(&path, code)
			.with_context(|| format!("Failed to write {}", path.display()))?;
		Ok(path)
	}

	pub fn install_from_file(&self, id: &str, source: &Path) -> Result<PathBuf> {
		let code = std::fs::read_to_string(source)
			.with_context(|| format!("Failed to read {}", source.display()))?;
		self.install(id, &code)
	}

	pub async fn install_from_url(&self, id: &str, url: &str) -> Result<PathBuf> {
		let code = fetch_text(url).await?;
		self.install(id, &code)
	}

	/// Fetch `<hub>/adapters/<id>/index.js`, checking the hub registry first.
	/// A registry fetch failure is only a warning; the adapter fetch itself
	/// decides whether the id exists.
	pub async fn install_from_hub(&self, id: &str) -> Result<PathBuf> {
		validate_id(id)?;
		let base = hub_base_url();
		match fetch_registry(&base).await {
			Ok(registry) => {
				if !registry.adapters.iter().any(|a| a.id == id) {
					let available = registry
						.adapters
						.iter()
						.map(|a| format!("  - {} ({})", a.id, a.name))
						.collect::<Vec<_>>()
						.join("\n");
					bail!("Adapter \"{id}\" not found in hub registry.\n\nAvailable adapters:\n{available}");
				}
			}
			Err(err) => {
				warn!(target: "webmcp.adapters", error = %err, "could not fetch hub registry, proceeding anyway");
			}
		}
		let url = format!("{base}/adapters/{id}/index.js");
		self.install_from_url(id, &url).await
	}

	pub fn list(&self) -> Result<Vec<AdapterInfo>> {
		if !self.dir.exists() {
			return Ok(Vec::new());
		}
		let mut adapters = Vec::new();
		for entry in std::fs::read_dir(&self.dir)
			.with_context(|| format!("Failed to read {}", self.dir.display()))?
		{
			let entry = entry?;
			let path = entry.path();
			let Some(id) = path
				.file_name()
				.and_then(|n| n.to_str())
				.and_then(|n| n.strip_suffix(".js"))
			else {
				continue;
			};
			adapters.push(AdapterInfo {
				id: id.to_string(),
				size: entry.metadata()?.len(),
				path,
			});
		}
		adapters.sort_by(|a, b| a.id.cmp(&b.id));
		Ok(adapters)
	}

	pub fn remove(&self, id: &str) -> Result<()> {
		validate_id(id)?;
		let path = self.dir.join(format!("{id}.js"));
		if !path.exists() {
			bail!("Adapter \"{id}\" is not installed");
		}
		std::fs::remove_file(&path)
			.with_context(|| format!("Failed to remove {}", path.display()))?;
		Ok(())
	}
}

/// Adapter ids are hostnames in practice; reject anything that could escape
/// the store directory.
fn validate_id(id: &str) -> Result<()> {
	if id.is_empty() {
		bail!("Adapter id cannot be empty");
	}
	let valid = id
		.chars()
		.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));
	if !valid || id.starts_with('.') {
		bail!("Invalid adapter id \"{id}\": use hostname characters only");
	}
	Ok(())
}

/// Adapter id from a file or URL path: the `.js` file stem, when there is
/// one. `None` means the caller must pass `--name`.
pub fn infer_id(path: &str) -> Option<String> {
	let filename = path.rsplit('/').next()?;
	filename.strip_suffix(".js").map(str::to_string)
}

fn hub_base_url() -> String {
	std::env::var("WEBMCP_HUB_URL").unwrap_or_else(|_| DEFAULT_HUB_BASE_URL.to_string())
}

async fn fetch_registry(base: &str) -> Result<HubRegistry> {
	let url = format!("{base}/registry.json");
	let response = reqwest::get(&url)
		.await
		.with_context(|| format!("Failed to fetch {url}"))?
		.error_for_status()
		.with_context(|| format!("Hub registry request failed: {url}"))?;
	response
		.json()
		.await
		.context("Failed to parse hub registry")
}

async fn fetch_text(url: &str) -> Result<String> {
	let response = reqwest::get(url)
		.await
		.with_context(|| format!("Failed to fetch {url}"))?
		.error_for_status()
		.with_context(|| format!("Request failed: {url}"))?;
	response.text().await.context("Failed to read response body")
}

#[cfg(test)]
mod tests {
	use super::*;

	fn store() -> (tempfile::TempDir, AdapterStore) {
		let dir = tempfile::tempdir().unwrap();
		let store = AdapterStore::new(dir.path().join("adapters"));
		(dir, store)
	}

	#[test]
	fn install_list_remove_cycle() {
		let (_dir, store) = store();

		store.install("mail.163.com", "export default {};").unwrap();
		store.install("mail.google.com", "export default {};").unwrap();

		let listed = store.list().unwrap();
		assert_eq!(
			listed.iter().map(|a| a.id.as_str()).collect::<Vec<_>>(),
			["mail.163.com", "mail.google.com"]
		);

		store.remove("mail.163.com").unwrap();
		assert_eq!(store.list().unwrap().len(), 1);
	}

	#[test]
	fn install_overwrites_same_id() {
		let (_dir, store) = store();
		store.install("a.example", "v1").unwrap();
		let path = store.install("a.example", "v2").unwrap();
		assert_eq!(std::fs::read_to_string(path).unwrap(), "v2");
		assert_eq!(store.list().unwrap().len(), 1);
	}

	#[test]
	fn removing_a_missing_adapter_fails() {
		let (_dir, store) = store();
		assert!(store.remove("nope.example").is_err());
	}

	#[test]
	fn path_escaping_ids_are_rejected() {
		let (_dir, store) = store();
		assert!(store.install("../evil", "x").is_err());
		assert!(store.install("a/b", "x").is_err());
		assert!(store.install(".hidden", "x").is_err());
		assert!(store.install("", "x").is_err());
	}

	#[test]
	fn list_on_missing_directory_is_empty() {
		let (_dir, store) = store();
		assert!(store.list().unwrap().is_empty());
	}

	#[test]
	fn id_inference_takes_the_file_stem() {
		assert_eq!(infer_id("~/adapters/mail.163.com.js").as_deref(), Some("mail.163.com"));
		assert_eq!(
			infer_id("https://cdn.example.com/mail.163.com.js").as_deref(),
			Some("mail.163.com")
		);
		assert_eq!(infer_id("https://example.com/adapters/"), None);
		assert_eq!(infer_id("no-extension"), None);
	}
}
