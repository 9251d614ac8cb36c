//! Peer protocol messages.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::descriptor::OperationDescriptor;

/// Correlation id pairing a dispatched call with its eventual reply.
///
/// Ids are assigned from a monotone counter and never reused while a call
/// with that id could still be in flight.
pub type CallId = u64;

/// One frame of the peer protocol, in either direction.
///
/// `catalog_*`, `invoke_result`/`invoke_error`, and `query_result`/`query_error`
/// flow peer→bridge; `invoke`, `query`, `reload`, and `refresh_catalog` flow
/// bridge→peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PeerMessage {
    /// Publish or replace the operation list a page exposes for a site.
    #[serde(rename_all = "camelCase")]
    CatalogAnnounce {
        site_id: String,
        operations: Vec<OperationDescriptor>,
        page_ref: String,
    },
    /// A page is gone; drop its association with whatever site it backed.
    #[serde(rename_all = "camelCase")]
    CatalogWithdraw { page_ref: String },
    /// Request execution of a named operation on the page serving `site_id`.
    #[serde(rename_all = "camelCase")]
    Invoke {
        id: CallId,
        operation_name: String,
        args: Value,
        site_id: String,
    },
    InvokeResult {
        id: CallId,
        #[serde(default)]
        result: Value,
    },
    InvokeError { id: CallId, message: String },
    /// Browser-host side channel (active site lookup, navigation).
    Query {
        id: CallId,
        #[serde(flatten)]
        kind: QueryKind,
    },
    QueryResult {
        id: CallId,
        #[serde(default)]
        result: Value,
    },
    QueryError { id: CallId, message: String },
    /// Ask the extension to re-inject its installed adapters.
    Reload,
    /// Ask the extension to re-fetch the remote adapter catalog.
    RefreshCatalog,
}

/// What a `query` message asks the browser host for.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueryKind {
    /// Which site does the currently focused page serve.
    ActiveSite,
    /// Open a URL (new tab when the browser is already running).
    Navigate { url: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn announce_wire_shape() {
        let message = PeerMessage::CatalogAnnounce {
            site_id: "mail.google.com".to_string(),
            operations: vec![OperationDescriptor {
                name: "search".to_string(),
                description: "Search mail".to_string(),
                parameter_schema: json!({ "type": "object", "properties": {} }),
            }],
            page_ref: "tab:17".to_string(),
        };

        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["type"], "catalog_announce");
        assert_eq!(value["siteId"], "mail.google.com");
        assert_eq!(value["pageRef"], "tab:17");
        assert_eq!(value["operations"][0]["name"], "search");
    }

    #[test]
    fn invoke_wire_shape() {
        let message = PeerMessage::Invoke {
            id: 7,
            operation_name: "search".to_string(),
            args: json!({ "q": "invoices" }),
            site_id: "mail.google.com".to_string(),
        };

        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["type"], "invoke");
        assert_eq!(value["id"], 7);
        assert_eq!(value["operationName"], "search");
        assert_eq!(value["siteId"], "mail.google.com");
    }

    #[test]
    fn query_kind_is_flattened() {
        let message = PeerMessage::Query {
            id: 3,
            kind: QueryKind::Navigate {
                url: "https://mail.google.com".to_string(),
            },
        };

        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["type"], "query");
        assert_eq!(value["kind"], "navigate");
        assert_eq!(value["url"], "https://mail.google.com");
    }

    #[test]
    fn parses_replies_from_peer() {
        let result: PeerMessage =
            serde_json::from_str(r#"{"type": "invoke_result", "id": 7, "result": {"ok": true}}"#)
                .unwrap();
        match result {
            PeerMessage::InvokeResult { id, result } => {
                assert_eq!(id, 7);
                assert_eq!(result["ok"], true);
            }
            other => panic!("expected invoke_result, got {other:?}"),
        }

        let error: PeerMessage =
            serde_json::from_str(r#"{"type": "invoke_error", "id": 8, "message": "boom"}"#)
                .unwrap();
        match error {
            PeerMessage::InvokeError { id, message } => {
                assert_eq!(id, 8);
                assert_eq!(message, "boom");
            }
            other => panic!("expected invoke_error, got {other:?}"),
        }
    }

    #[test]
    fn result_defaults_to_null_when_absent() {
        let message: PeerMessage =
            serde_json::from_str(r#"{"type": "invoke_result", "id": 9}"#).unwrap();
        match message {
            PeerMessage::InvokeResult { result, .. } => assert!(result.is_null()),
            other => panic!("expected invoke_result, got {other:?}"),
        }
    }

    #[test]
    fn control_messages_are_bare() {
        let value = serde_json::to_value(PeerMessage::Reload).unwrap();
        assert_eq!(value, json!({ "type": "reload" }));

        let value = serde_json::to_value(PeerMessage::RefreshCatalog).unwrap();
        assert_eq!(value, json!({ "type": "refresh_catalog" }));
    }
}
