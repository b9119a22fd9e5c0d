//! Notification ingestion: a single "turn complete" event per turn.
//!
//! The sender re-transmits its full input-message list every turn, so the
//! handler counts the human messages already stored and appends only the
//! suffix. Re-delivering the same payload is a no-op.

use std::path::Path;

use tracing::{debug, info};

use tin_core::repo::Repository;
use tin_core::scm::ScmAdapter;
use tin_core::{Role, Thread};

use crate::error::Result;
use crate::event::NotifyEvent;
use crate::session::{load_state, placeholder_thread_id, save_state, SessionState};

/// Vendor-side notification integration.
pub trait NotifyIntegration: Send + Sync {
    fn agent(&self) -> &str;

    /// Print the user-facing setup instructions for wiring the agent's
    /// notify command at `project_dir`.
    fn setup(&self, project_dir: &Path) -> Result<String>;

    fn parse_notification(&self, raw: &serde_json::Value) -> Result<NotifyEvent>;
}

/// Apply one notification payload. Returns the thread id.
pub fn handle_notification(
    repo: &Repository,
    scm: &dyn ScmAdapter,
    agent: &str,
    event: &NotifyEvent,
) -> Result<String> {
    let mut thread = find_session_thread(repo, agent, event)?;

    let known_humans = thread.human_message_count();
    let mut appended = 0usize;
    let mut promoted_from: Option<String> = None;
    for input in event.input_messages.iter().skip(known_humans) {
        let outcome = thread.append(Role::Human, input, event.timestamp, vec![]);
        if let Some(old) = outcome.previous_id {
            promoted_from = Some(old);
        }
        appended += 1;
    }

    // The assistant reply belongs after the newest human message. When the
    // payload is a duplicate (no new inputs and the thread already ends on
    // an assistant message), there is nothing to add.
    let ends_on_human = thread
        .messages
        .last()
        .map(|m| m.role == Role::Human)
        .unwrap_or(false);
    if let Some(reply) = event.last_assistant.as_deref().filter(|r| !r.is_empty()) {
        if appended > 0 || ends_on_human {
            let outcome = thread.append(
                Role::Assistant,
                reply,
                event.timestamp,
                event.tool_calls.clone(),
            );
            if let Some(last) = thread.messages.last_mut() {
                last.git_hash_after = scm.current_hash().ok();
            }
            if let Some(old) = outcome.previous_id {
                promoted_from = Some(old);
            }
            appended += 1;
        }
    }

    if appended == 0 {
        debug!(thread_id = %thread.id, "duplicate notification; no change");
        return Ok(thread.id);
    }

    repo.save_thread(&thread)?;

    if let Some(old_id) = promoted_from {
        if repo.thread_exists(&old_id) {
            repo.store().delete_thread(&old_id)?;
            repo.store().delete_thread_versions(&old_id)?;
        }
    }
    save_state(
        repo.store(),
        agent,
        &SessionState {
            session_id: event.session_id.clone(),
            thread_id: thread.id.clone(),
            started_at: thread.started_at,
        },
    )?;

    if repo.config()?.auto_stage {
        repo.stage_thread(&thread.id, thread.messages.len(), &thread.content_hash())?;
    }

    info!(
        event = "notify.applied",
        thread_id = %thread.id,
        appended,
    );
    Ok(thread.id)
}

/// Resolve the thread this notification belongs to: session state first,
/// then a store lookup by vendor session id, else a fresh thread.
fn find_session_thread(repo: &Repository, agent: &str, event: &NotifyEvent) -> Result<Thread> {
    if let Some(state) = load_state(repo.store(), agent, &event.session_id)? {
        if let Ok(thread) = repo.load_thread(&state.thread_id) {
            return Ok(thread);
        }
    }
    if let Some(existing) = repo
        .find_threads_by_session_id(&event.session_id)?
        .into_iter()
        .next()
    {
        return Ok(existing);
    }
    Ok(Thread::new(
        placeholder_thread_id(agent, &event.session_id),
        agent,
        &event.session_id,
        event.timestamp,
    ))
}
