//! Domain entities: messages, threads, commits, refs, index, config.

pub mod commit;
pub mod config;
pub mod index;
pub mod merge;
pub mod message;
pub mod thread;

pub use commit::{compute_commit_id, ThreadRef, TinCommit};
pub use config::{Config, Remote, CONFIG_VERSION};
pub use index::Index;
pub use merge::{renamed_thread_id, MergeState, RenamedThread};
pub use message::{compute_message_id, Message, Role, ToolCall};
pub use thread::{AppendOutcome, Thread, ThreadStatus};
