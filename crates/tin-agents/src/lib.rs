//! tin agent ingestion
//!
//! Three paradigms for getting agent conversations into a tin repository:
//! hooks (event-driven), notifications (one payload per completed turn)
//! and pull imports (reading vendor session logs). All three funnel into
//! the same session→thread mapping and deduplication rules.

pub mod claude;
pub mod codex;
pub mod error;
pub mod event;
pub mod hook;
pub mod notify;
pub mod pull;
pub mod registry;
pub mod session;
pub mod transcript;

pub use claude::{ClaudeCodeHook, ClaudeCodePull, CLAUDE_AGENT};
pub use codex::{CodexNotify, CODEX_AGENT};
pub use error::{AgentError, Result};
pub use event::{HookEvent, HookEventKind, NotifyEvent};
pub use hook::{handle_event, HookContext, HookIntegration};
pub use notify::{handle_notification, NotifyIntegration};
pub use pull::{save_pulled_thread, PullIntegration, PullOptions};
pub use registry::{IntegrationRegistry, RegistryBuilder};
pub use session::{
    delete_state, load_state, placeholder_thread_id, save_state, short_session_id, SessionState,
};
