//! Wire types for the WebMCP peer protocol.
//!
//! This crate contains the serde-serializable types exchanged between the
//! bridge and the browser extension over the peer WebSocket. Each logical
//! message is one JSON object per text frame, tagged by a `type` field.
//!
//! # Design Philosophy
//!
//! Types in this crate are:
//! - **Pure data**: No behavior beyond serialization/deserialization
//! - **1:1 with the wire**: Field names match what the extension sends
//! - **Stable**: Changes only when the wire protocol changes
//!
//! The correlation, catalog, and transport logic built on top of these types
//! lives in `webmcp-bridge`.

pub mod descriptor;
pub mod message;

pub use descriptor::*;
pub use message::*;
