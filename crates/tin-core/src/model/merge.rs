//! Merge bookkeeping persisted while a merge is paused.

use serde::{Deserialize, Serialize};

use crate::hash::sha256_hex;
use crate::model::commit::ThreadRef;

/// A thread that existed on both sides of a merge with different content;
/// the source version was preserved under a new id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RenamedThread {
    pub original_id: String,
    pub new_id: String,
    pub source_branch: String,
}

/// State of an in-progress merge, stored at `MERGE_HEAD` and removed when
/// the merge completes or aborts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MergeState {
    pub source_branch: String,
    pub target_branch: String,
    pub source_commit_id: String,
    pub target_commit_id: String,

    /// Whether the SCM-side merge completed without outstanding conflicts
    /// at the time the state was written. Re-checked on `--continue`.
    pub git_merge_complete: bool,

    /// The merged thread-ref set the completion step will commit.
    #[serde(default)]
    pub collected_threads: Vec<ThreadRef>,

    #[serde(default)]
    pub renamed_threads: Vec<RenamedThread>,
}

/// Id given to the preserved source-side copy of a conflicted thread:
/// `SHA256(original_id ‖ "_from_" ‖ source_branch)`.
pub fn renamed_thread_id(original_id: &str, source_branch: &str) -> String {
    sha256_hex(&[
        original_id.as_bytes(),
        b"_from_",
        source_branch.as_bytes(),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renamed_id_is_hash_of_joined_form() {
        // SHA256("T" ‖ "_from_" ‖ "B") must equal SHA256("T_from_B").
        assert_eq!(renamed_thread_id("T", "B"), sha256_hex(&[b"T_from_B"]));
    }

    #[test]
    fn serde_roundtrip() {
        let state = MergeState {
            source_branch: "feat".to_string(),
            target_branch: "main".to_string(),
            source_commit_id: "s".to_string(),
            target_commit_id: "t".to_string(),
            git_merge_complete: false,
            collected_threads: vec![ThreadRef::new("t1", 2, "h1")],
            renamed_threads: vec![RenamedThread {
                original_id: "t1".to_string(),
                new_id: renamed_thread_id("t1", "feat"),
                source_branch: "feat".to_string(),
            }],
        };
        let json = serde_json::to_string(&state).unwrap();
        let back: MergeState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }
}
