//! SHA-256 hashing over canonical byte streams.
//!
//! Every identifier in tin is a lowercase hex SHA-256 digest computed over a
//! concatenation of fields with no separator. The field sets and orders are
//! fixed by the message, thread and commit constructors in [`crate::model`];
//! this module supplies the primitive pieces they share.

use chrono::{DateTime, SecondsFormat, Utc};
use sha2::{Digest, Sha256};

use crate::model::ToolCall;

/// Hex-encode the SHA-256 of `parts` concatenated in order.
pub fn sha256_hex(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hex::encode(hasher.finalize())
}

/// Canonical timestamp encoding: RFC 3339, nanosecond precision, UTC offset.
///
/// Example: `2024-01-01T12:00:00.000000000+00:00`.
pub fn canonical_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, false)
}

/// Canonical tool-call encoding: the JSON serialization of the list, with
/// argument object keys in their source-declared order. Empty lists encode
/// as `[]`.
pub fn canonical_tool_calls(tool_calls: &[ToolCall]) -> String {
    serde_json::to_string(tool_calls).unwrap_or_else(|_| "[]".to_string())
}

/// First 8 hex characters of an id, used wherever humans read ids.
pub fn short_id(id: &str) -> &str {
    if id.len() >= 8 {
        &id[..8]
    } else {
        id
    }
}
