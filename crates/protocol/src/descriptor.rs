//! Operation descriptors published by pages.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A named, described, schema-bearing callable unit exposed by a page.
///
/// Descriptors are immutable once published; a site replaces its whole
/// operation list rather than editing entries in place. `name` is unique
/// within one site's catalog but not across sites.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON-schema-like object describing the operation's arguments.
    #[serde(default = "empty_object_schema")]
    pub parameter_schema: Value,
}

/// Schema used when a page announces an operation without one.
pub fn empty_object_schema() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}
