//! MCP server surface over the bridge.
//!
//! Tools are not statically routed; the list is rebuilt from the live site
//! catalog on every `tools/list`, and `tools/call` resolves the name through
//! the registry at call time. The one built-in tool is `open_browser`, which
//! works before any page has announced a catalog.

use std::sync::Arc;

use rmcp::{ErrorData as McpError, RoleServer, ServerHandler, model::*, service::RequestContext};
use serde_json::{Value, json};
use tracing::debug;
use webmcp_bridge::{Bridge, CatalogEntry, Error as BridgeError};

const OPEN_BROWSER_TOOL: &str = "open_browser";

const INSTRUCTIONS: &str = "Exposes operations published by web pages through the WebMCP \
browser extension. The tool list follows whatever pages are currently open; use open_browser \
to navigate somewhere first when it is empty.";

#[derive(Clone)]
pub struct WebMcpServer {
	bridge: Arc<Bridge>,
}

impl WebMcpServer {
	pub fn new(bridge: Arc<Bridge>) -> Self {
		Self { bridge }
	}

	async fn open_browser(&self, args: &Value) -> Result<CallToolResult, McpError> {
		let Some(url) = args.get("url").and_then(Value::as_str) else {
			return Ok(CallToolResult::error(vec![Content::text(
				"Error: open_browser requires a \"url\" string argument",
			)]));
		};
		match self.bridge.open_url(url).await {
			Ok(_) => Ok(CallToolResult::success(vec![Content::text(format!(
				"Opened {url}"
			))])),
			Err(err) => Ok(CallToolResult::error(vec![Content::text(format!(
				"Error: {err}"
			))])),
		}
	}

	/// Invoke by name, retrying against the focused page's site when the
	/// bare name is published by more than one site.
	async fn invoke(&self, name: &str, args: Value) -> webmcp_bridge::Result<Value> {
		match self.bridge.invoke(name, args.clone(), None).await {
			Err(BridgeError::AmbiguousOperation(_)) => {
				let active = self.bridge.query_active_site().await?;
				match active {
					Some(site) if site_publishes(&self.bridge.catalog(), &site, name) => {
						debug!(target: "webmcp.mcp", name, %site, "ambiguous name resolved via active site");
						self.bridge.invoke(name, args, Some(&site)).await
					}
					_ => Err(BridgeError::AmbiguousOperation(name.to_string())),
				}
			}
			other => other,
		}
	}
}

impl ServerHandler for WebMcpServer {
	fn get_info(&self) -> ServerInfo {
		ServerInfo {
			protocol_version: ProtocolVersion::V_2024_11_05,
			capabilities: ServerCapabilities::builder()
				.enable_tools()
				.enable_tool_list_changed()
				.build(),
			server_info: Implementation {
				name: "webmcp-bridge".to_string(),
				version: env!("CARGO_PKG_VERSION").to_string(),
				title: Some("WebMCP Bridge".to_string()),
				website_url: None,
				icons: None,
			},
			instructions: Some(INSTRUCTIONS.to_string()),
		}
	}

	async fn list_tools(
		&self,
		_request: Option<PaginatedRequestParam>,
		_context: RequestContext<RoleServer>,
	) -> Result<ListToolsResult, McpError> {
		Ok(ListToolsResult {
			next_cursor: None,
			tools: build_tools(&self.bridge.catalog()),
		})
	}

	async fn call_tool(
		&self,
		request: CallToolRequestParam,
		_context: RequestContext<RoleServer>,
	) -> Result<CallToolResult, McpError> {
		let args = request
			.arguments
			.map(Value::Object)
			.unwrap_or_else(|| json!({}));

		if request.name == OPEN_BROWSER_TOOL {
			return self.open_browser(&args).await;
		}

		match self.invoke(&request.name, args).await {
			Ok(value) => Ok(CallToolResult::success(vec![Content::text(render(value))])),
			Err(err) => Ok(CallToolResult::error(vec![Content::text(format!(
				"Error: {err}"
			))])),
		}
	}
}

/// Current tool list: `open_browser` plus the flattened catalog. A name
/// published by several sites appears once, keeping its first position and
/// the latest-announced descriptor; call-time resolution handles the
/// ambiguity. A page operation cannot shadow the built-in name.
fn build_tools(entries: &[CatalogEntry]) -> Vec<Tool> {
	let mut tools = vec![Tool::new(
		OPEN_BROWSER_TOOL,
		"Open a URL in the browser (a new tab when it is already running).",
		Arc::new(object_schema(&json!({
			"type": "object",
			"properties": {
				"url": { "type": "string", "description": "The URL to open" }
			},
			"required": ["url"]
		}))),
	)];

	for entry in entries {
		if entry.operation.name == OPEN_BROWSER_TOOL {
			continue;
		}
		let description = if entry.operation.description.is_empty() {
			format!("Operation published by {}", entry.site_id)
		} else {
			format!("[{}] {}", entry.site_id, entry.operation.description)
		};
		let tool = Tool::new(
			entry.operation.name.clone(),
			description,
			Arc::new(object_schema(&entry.operation.parameter_schema)),
		);
		match tools.iter().position(|t| t.name == entry.operation.name) {
			Some(slot) => tools[slot] = tool,
			None => tools.push(tool),
		}
	}
	tools
}

fn site_publishes(catalog: &[CatalogEntry], site: &str, name: &str) -> bool {
	catalog
		.iter()
		.any(|e| e.site_id == site && e.operation.name == name)
}

/// Announced schemas arrive as arbitrary JSON; anything that is not an
/// object gets the empty-object schema.
fn object_schema(value: &Value) -> JsonObject {
	match value.as_object() {
		Some(map) => map.clone(),
		None => {
			let mut map = JsonObject::new();
			map.insert("type".to_string(), json!("object"));
			map.insert("properties".to_string(), json!({}));
			map
		}
	}
}

/// Page operations mostly return strings meant for the model; pass those
/// through untouched and pretty-print everything else.
fn render(value: Value) -> String {
	match value {
		Value::String(text) => text,
		Value::Null => "ok".to_string(),
		other => serde_json::to_string_pretty(&other)
			.unwrap_or_else(|_| other.to_string()),
	}
}
