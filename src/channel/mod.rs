//! Messaging Channel Pipeline — access control, inbound dedup/coalescing,
//! outbound chunking/retry, and the JSON-RPC bridge to the transport helper.

pub mod access;
pub mod bridge;
pub mod inbound;
pub mod outbound;

use serde::{Deserialize, Serialize};

/// Kind of chat a message arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatType {
    Direct,
    Group,
}

/// A point the sender attached to the message, if the transport carries one.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct GeoLocation {
    pub latitude: f64,
    pub longitude: f64,
}

/// Context for a reply-to-a-message.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ReplyContext {
    pub original_message_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quoted_body: Option<String>,
}

/// One inbound message as delivered by the transport bridge.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InboundMessage {
    pub message_id: String,
    pub chat_id: String,
    pub chat_type: ChatType,
    /// Canonical (digit-only) sender identifier.
    pub sender: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoLocation>,
    #[serde(default)]
    pub mentions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply: Option<ReplyContext>,
    pub server_timestamp_ms: i64,
}

/// Per-channel direct-message access policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DmPolicy {
    Disabled,
    Allowlist,
    Pairing,
    Open,
}

/// Per-channel group-message access policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupPolicy {
    Disabled,
    Allowlist,
    Open,
}

/// Configuration for one messaging channel (e.g. the WhatsApp bridge).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelConfig {
    pub dm_policy: DmPolicy,
    pub group_policy: GroupPolicy,
    /// Canonical identifiers permitted; `"*"` matches everything.
    #[serde(default)]
    pub allowlist: Vec<String>,
    /// Group ids permitted under `group_policy = allowlist`.
    #[serde(default)]
    pub group_allowlist: Vec<String>,
    #[serde(default)]
    pub group_require_mention: bool,
    pub media_max_mb: u32,
    pub debounce_ms: u64,
    #[serde(default)]
    pub read_receipts: bool,
    #[serde(default)]
    pub group_activation_commands: Vec<String>,
}
