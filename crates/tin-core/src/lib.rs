//! tin core library
//!
//! The object model, content-addressed store, repository facade and SCM
//! interop behind the `tin` tool: conversation threads recorded alongside
//! an external SCM's history, bound commit-to-commit.

pub mod credentials;
pub mod error;
pub mod hash;
pub mod model;
pub mod repo;
pub mod scm;
pub mod store;
pub mod telemetry;

pub use error::{Result, TinError};

pub use hash::{canonical_timestamp, canonical_tool_calls, sha256_hex, short_id};

pub use model::{
    compute_commit_id, compute_message_id, renamed_thread_id, Config, Index, MergeState, Message,
    Remote, RenamedThread, Role, Thread, ThreadRef, ThreadStatus, TinCommit, ToolCall,
    CONFIG_VERSION,
};

pub use repo::{
    commit::{commit, derived_scm_message, CommitOptions, CommitOutcome},
    merge::{merge, merge_abort, merge_continue, MergeOptions, MergeOutcome},
    sync::{check_branch_sync, get_branch_state, sync, BranchState, SyncDirection, SyncOutcome},
    Repository,
};

pub use scm::{GitScm, ScmAdapter};

pub use store::{lock::LockGuard, ObjectStore, DEFAULT_BRANCH, STORE_DIR};

pub use credentials::{resolve as resolve_credentials, CredentialStore, Credentials};

pub use telemetry::init_tracing;

/// tin version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
