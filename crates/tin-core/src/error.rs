//! Error taxonomy for tin repository operations.

use std::path::PathBuf;

/// Errors surfaced by the object store, repository facade and pipelines.
#[derive(Debug, thiserror::Error)]
pub enum TinError {
    #[error("not a tin repository (searched up from {0})")]
    NotARepository(PathBuf),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("{kind} already exists: {id}")]
    AlreadyExists { kind: &'static str, id: String },

    #[error("corrupt {kind} {id}: {source}")]
    Corrupt {
        kind: &'static str,
        id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("tin branch {tin} does not match scm branch {scm}; run `tin sync` or pass --force")]
    BranchMismatch { tin: String, scm: String },

    #[error("nothing to commit (index is empty)")]
    NothingToCommit,

    #[error("ref update for {branch} is not a fast-forward")]
    NotFastForward { branch: String },

    #[error("a merge is already in progress; run `tin merge --continue` or `tin merge --abort`")]
    MergeInProgress,

    #[error("no merge in progress")]
    NoMergeInProgress,

    #[error("merge has unresolved conflicts; resolve them and run `tin merge --continue`")]
    MergeConflicts,

    #[error("invalid {kind}: {reason}")]
    Invalid { kind: &'static str, reason: String },

    #[error("scm error: {0}")]
    Scm(String),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl TinError {
    /// Convenience constructor for typed not-found errors.
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Convenience constructor for typed already-exists errors.
    pub fn already_exists(kind: &'static str, id: impl Into<String>) -> Self {
        Self::AlreadyExists {
            kind,
            id: id.into(),
        }
    }
}

/// Result type for tin core operations.
pub type Result<T> = std::result::Result<T, TinError>;
