//! Normalized agent events.
//!
//! Vendor integrations translate their own payload shapes into these
//! unions; the handlers in [`crate::hook`] and [`crate::notify`] only see
//! the normalized form.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tin_core::ToolCall;

/// What happened in the agent session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HookEventKind {
    SessionStart,
    UserPrompt,
    AssistantStop,
    SessionEnd,
    FileEdit,
    ToolUse,
}

/// A normalized hook event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookEvent {
    pub kind: HookEventKind,

    /// Opaque vendor session key.
    pub session_id: String,

    /// Working directory the agent is operating in.
    pub cwd: PathBuf,

    pub timestamp: DateTime<Utc>,

    /// Human prompt text (user_prompt events).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,

    /// Assistant response text (assistant_stop events).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,

    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,

    /// Vendor transcript to fall back on when the stop payload is empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript_path: Option<PathBuf>,
}

impl HookEvent {
    pub fn new(kind: HookEventKind, session_id: impl Into<String>, cwd: PathBuf) -> Self {
        Self {
            kind,
            session_id: session_id.into(),
            cwd,
            timestamp: Utc::now(),
            prompt: None,
            response: None,
            tool_calls: Vec::new(),
            transcript_path: None,
        }
    }
}

/// A single "turn complete" notification from an agent that cannot hook
/// individual events. The payload re-sends the full input-message list
/// every turn; handlers append only the unseen suffix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyEvent {
    pub session_id: String,

    pub cwd: PathBuf,

    /// Every human input so far, oldest first.
    #[serde(default)]
    pub input_messages: Vec<String>,

    /// The assistant's latest reply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_assistant: Option<String>,

    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,

    pub timestamp: DateTime<Utc>,
}
