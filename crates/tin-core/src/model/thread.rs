//! Threads: conversation transcripts with Merkle-chained messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::hash::{canonical_tool_calls, sha256_hex};
use crate::model::message::{Message, Role, ToolCall};

/// Lifecycle state of a thread.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ThreadStatus {
    Active,
    Completed,
    Staged,
    Committed,
}

/// A conversation with an AI agent.
///
/// The id equals the first message's hash once a message exists; before
/// that it may hold an ephemeral placeholder assigned by the ingestion
/// layer. Appending the first real message promotes the id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Thread {
    /// First message hash, or an ingestion placeholder until then.
    pub id: String,

    /// Thread this one resumed from, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_thread_id: Option<String>,

    /// Fork point inside the parent thread.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_message_id: Option<String>,

    /// Short agent name, e.g. `claude-code`.
    pub agent: String,

    /// Opaque vendor session key.
    #[serde(default)]
    pub agent_session_id: String,

    pub started_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    pub status: ThreadStatus,

    #[serde(default)]
    pub messages: Vec<Message>,

    /// SCM commit captured when the thread was sealed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_commit_hash: Option<String>,

    /// Content hash at the most recent commit that included this thread.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub committed_content_hash: Option<String>,
}

impl Thread {
    /// Create an empty thread under a caller-chosen (possibly placeholder) id.
    pub fn new(
        id: impl Into<String>,
        agent: impl Into<String>,
        agent_session_id: impl Into<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            parent_thread_id: None,
            parent_message_id: None,
            agent: agent.into(),
            agent_session_id: agent_session_id.into(),
            started_at,
            completed_at: None,
            status: ThreadStatus::Active,
            messages: Vec::new(),
            git_commit_hash: None,
            committed_content_hash: None,
        }
    }

    /// Append a message, chaining it onto the last one.
    ///
    /// The first append promotes the thread id to the message hash and
    /// returns the old placeholder so the caller can delete its stale file.
    /// Appending to a staged, committed or completed thread reactivates it:
    /// its content hash no longer matches what was staged or committed.
    pub fn append(
        &mut self,
        role: Role,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
        tool_calls: Vec<ToolCall>,
    ) -> AppendOutcome {
        let parent = self
            .messages
            .last()
            .map(|m| m.id.clone())
            .unwrap_or_default();
        let message = Message::new(role, content, timestamp, tool_calls, parent);
        let message_id = message.id.clone();

        let previous_id = if self.messages.is_empty() && self.id != message.id {
            let old = std::mem::replace(&mut self.id, message.id.clone());
            Some(old)
        } else {
            None
        };

        self.messages.push(message);
        self.status = ThreadStatus::Active;
        self.completed_at = None;

        AppendOutcome {
            message_id,
            previous_id,
        }
    }

    /// Hash over role, content and tool calls of every message.
    ///
    /// Timestamps are deliberately excluded so equivalent re-ingestion of
    /// the same conversation produces the same hash.
    pub fn content_hash(&self) -> String {
        self.content_hash_at(self.messages.len())
    }

    /// Content hash over the first `count` messages.
    pub fn content_hash_at(&self, count: usize) -> String {
        let count = count.min(self.messages.len());
        let mut parts: Vec<Vec<u8>> = Vec::with_capacity(count * 3);
        for msg in &self.messages[..count] {
            parts.push(msg.role.as_str().as_bytes().to_vec());
            parts.push(msg.content.as_bytes().to_vec());
            parts.push(canonical_tool_calls(&msg.tool_calls).into_bytes());
        }
        let slices: Vec<&[u8]> = parts.iter().map(|p| p.as_slice()).collect();
        sha256_hex(&slices)
    }

    pub fn last_message_id(&self) -> Option<&str> {
        self.messages.last().map(|m| m.id.as_str())
    }

    /// A thread is fully committed when its status says so and nothing has
    /// been appended since the commit.
    pub fn is_fully_committed(&self) -> bool {
        self.status == ThreadStatus::Committed
            && self.committed_content_hash.as_deref() == Some(self.content_hash().as_str())
    }

    /// Count of human messages, used by the notification paradigm to append
    /// only the unseen suffix of a re-sent message list.
    pub fn human_message_count(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| m.role == Role::Human)
            .count()
    }

    /// First line of the first human message; feeds derived commit messages.
    pub fn first_human_line(&self) -> Option<&str> {
        self.messages
            .iter()
            .find(|m| m.role == Role::Human)
            .and_then(|m| m.content.lines().next())
    }

    /// Seal the thread at `now`.
    pub fn complete(&mut self, now: DateTime<Utc>) {
        self.status = ThreadStatus::Completed;
        self.completed_at = Some(now);
    }

    /// Verify the id and parent chain (invariants over the whole thread).
    pub fn verify_chain(&self) -> bool {
        if let Some(first) = self.messages.first() {
            if self.id != first.id {
                return false;
            }
        }
        let mut parent = String::new();
        for msg in &self.messages {
            if msg.parent_message_id != parent || msg.recompute_id() != msg.id {
                return false;
            }
            parent = msg.id.clone();
        }
        true
    }
}

/// Result of [`Thread::append`].
pub struct AppendOutcome {
    /// Id of the message just appended.
    pub message_id: String,
    /// Placeholder id the thread had before promotion, if this was the
    /// first message and the id changed.
    pub previous_id: Option<String>,
}
