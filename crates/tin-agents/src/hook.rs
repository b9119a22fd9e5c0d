//! Hook-event handlers: the session→thread state machine.

use std::path::Path;

use chrono::Utc;
use tracing::{debug, info, warn};

use tin_core::repo::Repository;
use tin_core::scm::ScmAdapter;
use tin_core::{derived_scm_message, Role, Thread};

use crate::error::{AgentError, Result};
use crate::event::{HookEvent, HookEventKind};
use crate::session::{
    delete_state, load_state, placeholder_thread_id, save_state, SessionState,
};
use crate::transcript;

/// Everything a hook handler needs.
pub struct HookContext<'a> {
    pub repo: &'a Repository,
    pub scm: &'a dyn ScmAdapter,
    /// Short agent name the events belong to, e.g. `claude-code`.
    pub agent: &'a str,
}

/// Vendor-side hook integration.
///
/// `parse_event` turns the vendor's raw payload into the normalized
/// [`HookEvent`]; install management edits the vendor's own config files.
pub trait HookIntegration: Send + Sync {
    fn agent(&self) -> &str;

    fn install(&self, project_dir: &Path, global: bool) -> Result<()>;

    fn uninstall(&self, project_dir: &Path, global: bool) -> Result<()>;

    fn is_installed(&self, project_dir: &Path, global: bool) -> Result<bool>;

    fn parse_event(&self, raw: &serde_json::Value) -> Result<HookEvent>;
}

/// Dispatch a normalized hook event. Returns the thread id the event
/// landed in, when one is involved.
pub fn handle_event(ctx: &HookContext<'_>, event: &HookEvent) -> Result<Option<String>> {
    match event.kind {
        HookEventKind::SessionStart => handle_session_start(ctx, event).map(Some),
        HookEventKind::UserPrompt => handle_user_prompt(ctx, event).map(Some),
        HookEventKind::AssistantStop => handle_assistant_stop(ctx, event).map(Some),
        HookEventKind::SessionEnd => handle_session_end(ctx, event),
        // Edits and tool uses arrive embedded in the stop payload; the
        // standalone events only confirm the session is alive.
        HookEventKind::FileEdit | HookEventKind::ToolUse => {
            Ok(load_state(ctx.repo.store(), ctx.agent, &event.session_id)?
                .map(|s| s.thread_id))
        }
    }
}

fn handle_session_start(ctx: &HookContext<'_>, event: &HookEvent) -> Result<String> {
    if let Some(state) = load_state(ctx.repo.store(), ctx.agent, &event.session_id)? {
        debug!(thread_id = %state.thread_id, "session already known");
        return Ok(state.thread_id);
    }

    let pruned = ctx.repo.prune_empty_threads()?;
    if !pruned.is_empty() {
        debug!(count = pruned.len(), "pruned empty threads");
    }

    let mut thread = Thread::new(
        placeholder_thread_id(ctx.agent, &event.session_id),
        ctx.agent,
        &event.session_id,
        event.timestamp,
    );

    // The same vendor session id resurfacing means a resumed session:
    // link the new thread to the one it continues.
    if let Some(prior) = ctx
        .repo
        .find_threads_by_session_id(&event.session_id)?
        .into_iter()
        .next()
    {
        thread.parent_thread_id = Some(prior.id.clone());
        thread.parent_message_id = prior.last_message_id().map(str::to_string);
        info!(
            event = "session.resumed",
            parent_thread = %prior.id,
            session = %event.session_id,
        );
    }

    ctx.repo.save_thread(&thread)?;
    save_state(
        ctx.repo.store(),
        ctx.agent,
        &SessionState {
            session_id: event.session_id.clone(),
            thread_id: thread.id.clone(),
            started_at: event.timestamp,
        },
    )?;
    info!(event = "session.started", thread_id = %thread.id);
    Ok(thread.id)
}

fn handle_user_prompt(ctx: &HookContext<'_>, event: &HookEvent) -> Result<String> {
    let prompt = event
        .prompt
        .as_deref()
        .ok_or_else(|| AgentError::InvalidPayload("user_prompt without prompt".to_string()))?;

    let mut thread = load_or_start_thread(ctx, event)?;
    let old_id = thread.id.clone();
    let outcome = thread.append(Role::Human, prompt, event.timestamp, vec![]);
    ctx.repo.save_thread(&thread)?;
    promote_session_thread(ctx, event, &thread, outcome.previous_id.as_deref())?;

    debug!(thread_id = %thread.id, from = %old_id, "human message appended");
    auto_stage(ctx, &thread)?;
    Ok(thread.id)
}

fn handle_assistant_stop(ctx: &HookContext<'_>, event: &HookEvent) -> Result<String> {
    let mut thread = load_or_start_thread(ctx, event)?;

    let mut response = event.response.clone().unwrap_or_default();
    let mut tool_calls = event.tool_calls.clone();
    if response.is_empty() && tool_calls.is_empty() {
        if let Some(path) = &event.transcript_path {
            let turn = transcript::last_assistant_turn(path)?;
            response = turn.text;
            tool_calls = turn.tool_calls;
        }
    }

    let outcome = thread.append(Role::Assistant, response, event.timestamp, tool_calls);

    // Record the SCM state after this turn's changes landed: commit them
    // first when configured, otherwise capture HEAD as it stands.
    let config = ctx.repo.config()?;
    let git_hash_after = if config.auto_commit_scm
        && ctx.scm.has_uncommitted_changes().unwrap_or(false)
    {
        let message = derived_scm_message(&thread.id, thread.first_human_line());
        match ctx
            .scm
            .add(&ctx.scm.changed_files()?)
            .and_then(|()| ctx.scm.commit(&message))
        {
            Ok(hash) => Some(hash),
            Err(e) => {
                warn!(error = %e, "auto scm commit failed; recording HEAD instead");
                ctx.scm.current_hash().ok()
            }
        }
    } else {
        ctx.scm.current_hash().ok()
    };
    if let Some(last) = thread.messages.last_mut() {
        last.git_hash_after = git_hash_after;
    }

    ctx.repo.save_thread(&thread)?;
    promote_session_thread(ctx, event, &thread, outcome.previous_id.as_deref())?;

    debug!(thread_id = %thread.id, "assistant message appended");
    auto_stage(ctx, &thread)?;
    Ok(thread.id)
}

fn handle_session_end(ctx: &HookContext<'_>, event: &HookEvent) -> Result<Option<String>> {
    let Some(state) = load_state(ctx.repo.store(), ctx.agent, &event.session_id)? else {
        return Ok(None);
    };

    match ctx.repo.load_thread(&state.thread_id) {
        Ok(mut thread) => {
            if !thread.is_fully_committed() {
                thread.complete(Utc::now());
                if thread.git_commit_hash.is_none() {
                    thread.git_commit_hash = ctx.scm.current_hash().ok();
                }
                ctx.repo.save_thread(&thread)?;
            }
            info!(event = "session.ended", thread_id = %thread.id);
        }
        Err(e) => warn!(thread_id = %state.thread_id, error = %e, "session thread missing at end"),
    }

    delete_state(ctx.repo.store(), ctx.agent, &event.session_id)?;
    Ok(Some(state.thread_id))
}

/// Load the session's thread, creating thread and state on demand so a
/// dropped earlier event never loses a turn.
fn load_or_start_thread(ctx: &HookContext<'_>, event: &HookEvent) -> Result<Thread> {
    if let Some(state) = load_state(ctx.repo.store(), ctx.agent, &event.session_id)? {
        match ctx.repo.load_thread(&state.thread_id) {
            Ok(thread) => return Ok(thread),
            Err(e) => {
                warn!(thread_id = %state.thread_id, error = %e, "state points at missing thread");
            }
        }
    }
    let thread_id = handle_session_start(ctx, event)?;
    Ok(ctx.repo.load_thread(&thread_id)?)
}

/// After an append changed the thread id, drop the stale placeholder file
/// and point the session state at the new id.
fn promote_session_thread(
    ctx: &HookContext<'_>,
    event: &HookEvent,
    thread: &Thread,
    previous_id: Option<&str>,
) -> Result<()> {
    if let Some(old_id) = previous_id {
        if ctx.repo.thread_exists(old_id) {
            ctx.repo.store().delete_thread(old_id)?;
            ctx.repo.store().delete_thread_versions(old_id)?;
        }
        save_state(
            ctx.repo.store(),
            ctx.agent,
            &SessionState {
                session_id: event.session_id.clone(),
                thread_id: thread.id.clone(),
                started_at: thread.started_at,
            },
        )?;
        debug!(old_id = %old_id, new_id = %thread.id, "thread id promoted");
    }
    Ok(())
}

fn auto_stage(ctx: &HookContext<'_>, thread: &Thread) -> Result<()> {
    if ctx.repo.config()?.auto_stage {
        ctx.repo.stage_thread(
            &thread.id,
            thread.messages.len(),
            &thread.content_hash(),
        )?;
    }
    Ok(())
}
