//! Messages: the immutable, hash-chained units of a thread.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::hash::{canonical_timestamp, canonical_tool_calls, sha256_hex};

/// Who produced a message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Human,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Human => "human",
            Role::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single tool invocation recorded inside an assistant message.
///
/// `arguments` holds the tool input verbatim; serde's preserve_order keeps
/// object keys in their source-declared order so the canonical encoding is
/// stable across save/load cycles.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

/// One turn of a conversation. Immutable once sealed into a thread.
///
/// `id` chains onto `parent_message_id`, so any mutation upstream changes
/// every downstream id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Hex SHA-256 over parent id, role, content, timestamp and tool calls.
    pub id: String,

    pub role: Role,

    /// UTF-8 message text.
    pub content: String,

    /// When the message was produced (UTC, nanosecond precision).
    pub timestamp: DateTime<Utc>,

    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,

    /// SCM commit identifier captured after this turn's changes landed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_hash_after: Option<String>,

    /// Hash of the previous message in the thread; empty for the first.
    #[serde(default)]
    pub parent_message_id: String,
}

impl Message {
    /// Build a message and derive its id from the canonical fields.
    pub fn new(
        role: Role,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
        tool_calls: Vec<ToolCall>,
        parent_message_id: impl Into<String>,
    ) -> Self {
        let content = content.into();
        let parent_message_id = parent_message_id.into();
        let id = compute_message_id(&parent_message_id, role, &content, &timestamp, &tool_calls);
        Self {
            id,
            role,
            content,
            timestamp,
            tool_calls,
            git_hash_after: None,
            parent_message_id,
        }
    }

    /// Recompute the id from the stored fields (invariant check).
    pub fn recompute_id(&self) -> String {
        compute_message_id(
            &self.parent_message_id,
            self.role,
            &self.content,
            &self.timestamp,
            &self.tool_calls,
        )
    }
}

/// `SHA256(parent_message_id ‖ role ‖ content ‖ timestamp ‖ canonical(tool_calls))`
pub fn compute_message_id(
    parent_message_id: &str,
    role: Role,
    content: &str,
    timestamp: &DateTime<Utc>,
    tool_calls: &[ToolCall],
) -> String {
    let ts = canonical_timestamp(timestamp);
    let calls = canonical_tool_calls(tool_calls);
    sha256_hex(&[
        parent_message_id.as_bytes(),
        role.as_str().as_bytes(),
        content.as_bytes(),
        ts.as_bytes(),
        calls.as_bytes(),
    ])
}
