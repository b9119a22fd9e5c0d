//! Typed payloads for each frame.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tin_core::{Thread, TinCommit};

use crate::error::ErrCode;

/// The operation a connection performs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Push,
    Pull,
    Config,
}

/// `hello` — opens every conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hello {
    pub version: u32,
    pub operation: Operation,
    /// Repository the client addresses, relative to the server root.
    pub repo_path: String,
}

/// `refs` — the server's advertisement of what it already has.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RefsAd {
    pub head: String,
    /// Branch name → tip commit id (possibly empty).
    pub branches: BTreeMap<String, String>,
    pub commit_ids: Vec<String>,
    pub thread_ids: Vec<String>,
    /// Thread id → content hashes with persisted version snapshots.
    pub thread_versions: BTreeMap<String, Vec<String>>,
}

/// One thread version a peer asks for.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WantVersion {
    pub thread_id: String,
    pub content_hash: String,
}

/// `want` — the objects a puller is missing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Want {
    pub commit_ids: Vec<String>,
    pub thread_ids: Vec<String>,
    pub thread_versions: Vec<WantVersion>,
}

impl Want {
    pub fn is_empty(&self) -> bool {
        self.commit_ids.is_empty()
            && self.thread_ids.is_empty()
            && self.thread_versions.is_empty()
    }
}

/// `pack` — commits (oldest first) plus the thread versions they need.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Pack {
    pub commits: Vec<TinCommit>,
    pub threads: Vec<Thread>,
}

impl Pack {
    pub fn is_empty(&self) -> bool {
        self.commits.is_empty() && self.threads.is_empty()
    }
}

/// `update-refs` — the ref moves a pusher requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateRefs {
    /// Branch name → new tip commit id.
    pub updates: BTreeMap<String, String>,
    #[serde(default)]
    pub force: bool,
}

/// `get-config` — request a key subset (empty = everything exposed).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetConfig {
    #[serde(default)]
    pub keys: Vec<String>,
}

/// `config` / `set-config` — flat key/value view of the repo config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigValues {
    pub values: BTreeMap<String, String>,
}

/// `ok`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OkMsg {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// `error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMsg {
    pub code: ErrCode,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_wire_shape() {
        let hello = Hello {
            version: 1,
            operation: Operation::Push,
            repo_path: "team/project".to_string(),
        };
        let json = serde_json::to_string(&hello).unwrap();
        assert!(json.contains("\"operation\":\"push\""));
        let back: Hello = serde_json::from_str(&json).unwrap();
        assert_eq!(back.operation, Operation::Push);
        assert_eq!(back.repo_path, "team/project");
    }

    #[test]
    fn want_empty_check() {
        assert!(Want::default().is_empty());
        let want = Want {
            thread_versions: vec![WantVersion {
                thread_id: "t".into(),
                content_hash: "h".into(),
            }],
            ..Default::default()
        };
        assert!(!want.is_empty());
    }

    #[test]
    fn update_refs_force_defaults_off() {
        let upd: UpdateRefs =
            serde_json::from_str(r#"{"updates":{"main":"abc"}}"#).unwrap();
        assert!(!upd.force);
        assert_eq!(upd.updates["main"], "abc");
    }
}
