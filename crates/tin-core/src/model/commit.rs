//! Tin commits: hash-identified groupings of thread versions paired with an
//! SCM commit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::hash::{canonical_timestamp, sha256_hex};

/// A pointer at a specific version of a thread: the first `message_count`
/// messages producing `content_hash`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ThreadRef {
    pub thread_id: String,
    pub message_count: usize,
    /// Empty on refs written by older clients; read as "latest" and
    /// upgraded on the next stage.
    #[serde(default)]
    pub content_hash: String,
}

impl ThreadRef {
    pub fn new(
        thread_id: impl Into<String>,
        message_count: usize,
        content_hash: impl Into<String>,
    ) -> Self {
        Self {
            thread_id: thread_id.into(),
            message_count,
            content_hash: content_hash.into(),
        }
    }

    /// Legacy refs carry no content hash and resolve to the latest snapshot.
    pub fn is_legacy(&self) -> bool {
        self.content_hash.is_empty()
    }
}

/// A commit in the thread history, parallel to one SCM commit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TinCommit {
    /// Hex SHA-256 over parents, message, git hash, timestamp and threads.
    pub id: String,

    /// Parent commit id; empty for the first commit on a branch.
    #[serde(default)]
    pub parent_commit_id: String,

    /// Second parent; non-empty only on merge commits.
    #[serde(default)]
    pub second_parent_id: String,

    pub message: String,

    /// Thread versions included in this commit, sorted by thread id so the
    /// canonical encoding is deterministic.
    pub threads: Vec<ThreadRef>,

    /// The SCM commit this tin commit is bound to.
    #[serde(default)]
    pub git_commit_hash: String,

    pub timestamp: DateTime<Utc>,

    pub author: String,
}

impl TinCommit {
    /// Build a commit; sorts `threads` by thread id and derives the id.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        parent_commit_id: impl Into<String>,
        second_parent_id: impl Into<String>,
        message: impl Into<String>,
        mut threads: Vec<ThreadRef>,
        git_commit_hash: impl Into<String>,
        timestamp: DateTime<Utc>,
        author: impl Into<String>,
    ) -> Self {
        threads.sort_by(|a, b| a.thread_id.cmp(&b.thread_id));
        let parent_commit_id = parent_commit_id.into();
        let second_parent_id = second_parent_id.into();
        let message = message.into();
        let git_commit_hash = git_commit_hash.into();
        let author = author.into();
        let id = compute_commit_id(
            &parent_commit_id,
            &second_parent_id,
            &message,
            &git_commit_hash,
            &timestamp,
            &threads,
        );
        Self {
            id,
            parent_commit_id,
            second_parent_id,
            message,
            threads,
            git_commit_hash,
            timestamp,
            author,
        }
    }

    /// Recompute the id from the stored fields (invariant check).
    pub fn recompute_id(&self) -> String {
        compute_commit_id(
            &self.parent_commit_id,
            &self.second_parent_id,
            &self.message,
            &self.git_commit_hash,
            &self.timestamp,
            &self.threads,
        )
    }

    pub fn is_merge(&self) -> bool {
        !self.second_parent_id.is_empty()
    }

    /// The ref for `thread_id` carried by this commit, if any.
    pub fn thread_ref(&self, thread_id: &str) -> Option<&ThreadRef> {
        self.threads.iter().find(|r| r.thread_id == thread_id)
    }
}

/// `SHA256(parent ‖ second_parent ‖ message ‖ git_hash ‖ timestamp ‖ canonical(threads))`
pub fn compute_commit_id(
    parent_commit_id: &str,
    second_parent_id: &str,
    message: &str,
    git_commit_hash: &str,
    timestamp: &DateTime<Utc>,
    threads: &[ThreadRef],
) -> String {
    let ts = canonical_timestamp(timestamp);
    let canonical_threads =
        serde_json::to_string(threads).unwrap_or_else(|_| "[]".to_string());
    sha256_hex(&[
        parent_commit_id.as_bytes(),
        second_parent_id.as_bytes(),
        message.as_bytes(),
        git_commit_hash.as_bytes(),
        ts.as_bytes(),
        canonical_threads.as_bytes(),
    ])
}
