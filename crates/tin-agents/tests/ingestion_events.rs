//! Ingestion scenarios: notification append/dedup, placeholder id
//! promotion, and the hook session lifecycle.

use std::path::PathBuf;

use chrono::{TimeZone, Utc};
use tin_agents::{
    handle_event, handle_notification, load_state, HookContext, HookEvent, HookEventKind,
    NotifyEvent,
};
use tin_core::{sha256_hex, Repository, Role, ScmAdapter, ThreadStatus};

/// SCM stand-in: a clean tree on `main` with a fixed HEAD.
struct StubScm;

impl ScmAdapter for StubScm {
    fn current_branch(&self) -> tin_core::Result<String> {
        Ok("main".to_string())
    }
    fn current_hash(&self) -> tin_core::Result<String> {
        Ok("0123456789abcdef0123456789abcdef01234567".to_string())
    }
    fn has_uncommitted_changes(&self) -> tin_core::Result<bool> {
        Ok(false)
    }
    fn has_staged_changes(&self) -> tin_core::Result<bool> {
        Ok(false)
    }
    fn changed_files(&self) -> tin_core::Result<Vec<String>> {
        Ok(Vec::new())
    }
    fn add(&self, _files: &[String]) -> tin_core::Result<()> {
        Ok(())
    }
    fn commit(&self, _message: &str) -> tin_core::Result<String> {
        self.current_hash()
    }
    fn commit_empty(&self, _message: &str) -> tin_core::Result<String> {
        self.current_hash()
    }
    fn create_branch(&self, _name: &str) -> tin_core::Result<()> {
        Ok(())
    }
    fn checkout(&self, _reference: &str) -> tin_core::Result<()> {
        Ok(())
    }
    fn branch_exists(&self, _name: &str) -> tin_core::Result<bool> {
        Ok(true)
    }
    fn delete_branch(&self, _name: &str) -> tin_core::Result<()> {
        Ok(())
    }
    fn merge_begin(&self, _branch: &str) -> tin_core::Result<bool> {
        Ok(false)
    }
    fn merge_abort(&self) -> tin_core::Result<()> {
        Ok(())
    }
    fn merge_commit(&self, _message: &str) -> tin_core::Result<String> {
        self.current_hash()
    }
    fn merge_ff(&self, _branch: &str) -> tin_core::Result<()> {
        Ok(())
    }
    fn is_in_merge_state(&self) -> tin_core::Result<bool> {
        Ok(false)
    }
    fn has_merge_conflicts(&self) -> tin_core::Result<bool> {
        Ok(false)
    }
    fn push(&self, _remote: &str, _branch: &str, _force: bool) -> tin_core::Result<()> {
        Ok(())
    }
    fn pull(&self, _remote: &str, _branch: &str) -> tin_core::Result<()> {
        Ok(())
    }
    fn remote_url(&self, _name: &str) -> tin_core::Result<Option<String>> {
        Ok(None)
    }
    fn author(&self) -> tin_core::Result<String> {
        Ok("test-user <test@example.com>".to_string())
    }
}

fn make_repo() -> (tempfile::TempDir, Repository) {
    let dir = tempfile::tempdir().unwrap();
    let repo = Repository::init(dir.path()).unwrap();
    (dir, repo)
}

fn ts(sec: u32) -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, sec).unwrap()
}

fn notify(session: &str, inputs: &[&str], last: &str, sec: u32) -> NotifyEvent {
    NotifyEvent {
        session_id: session.to_string(),
        cwd: PathBuf::from("."),
        input_messages: inputs.iter().map(|s| s.to_string()).collect(),
        last_assistant: Some(last.to_string()),
        tool_calls: Vec::new(),
        timestamp: ts(sec),
    }
}

#[test]
fn notification_appends_suffix_and_dedups() {
    let (_dir, repo) = make_repo();
    let scm = StubScm;

    let id1 = handle_notification(&repo, &scm, "codex", &notify("c1", &["testing"], "Got it", 1))
        .unwrap();
    let id2 = handle_notification(
        &repo,
        &scm,
        "codex",
        &notify("c1", &["testing", "wow"], "Nice", 2),
    )
    .unwrap();
    let id3 = handle_notification(
        &repo,
        &scm,
        "codex",
        &notify("c1", &["testing", "wow", "story"], "Once", 3),
    )
    .unwrap();
    assert_eq!(id1, id2);
    assert_eq!(id2, id3);

    let thread = repo.load_thread(&id3).unwrap();
    assert_eq!(thread.messages.len(), 6);
    let expected = [
        (Role::Human, "testing"),
        (Role::Assistant, "Got it"),
        (Role::Human, "wow"),
        (Role::Assistant, "Nice"),
        (Role::Human, "story"),
        (Role::Assistant, "Once"),
    ];
    for (message, (role, content)) in thread.messages.iter().zip(expected.iter()) {
        assert_eq!(message.role, *role);
        assert_eq!(message.content, *content);
    }
    let hash_before = thread.content_hash();

    // Re-sending the last payload changes nothing.
    let id4 = handle_notification(
        &repo,
        &scm,
        "codex",
        &notify("c1", &["testing", "wow", "story"], "Once", 9),
    )
    .unwrap();
    assert_eq!(id4, id3);
    let rethread = repo.load_thread(&id3).unwrap();
    assert_eq!(rethread.messages.len(), 6);
    assert_eq!(rethread.content_hash(), hash_before);
}

#[test]
fn first_message_promotes_placeholder_id() {
    let (_dir, repo) = make_repo();
    let scm = StubScm;
    let ctx = HookContext {
        repo: &repo,
        scm: &scm,
        agent: "claude-code",
    };

    let mut start = HookEvent::new(
        HookEventKind::SessionStart,
        "AAAAAAAAAAAA",
        PathBuf::from("."),
    );
    start.timestamp = ts(0);
    let placeholder = handle_event(&ctx, &start).unwrap().unwrap();
    assert_eq!(placeholder, "claude-code-AAAAAAAA");
    assert!(repo.thread_exists(&placeholder));

    let mut prompt = HookEvent::new(
        HookEventKind::UserPrompt,
        "AAAAAAAAAAAA",
        PathBuf::from("."),
    );
    prompt.timestamp = ts(0);
    prompt.prompt = Some("Hello".to_string());
    let thread_id = handle_event(&ctx, &prompt).unwrap().unwrap();

    let expected = sha256_hex(&[
        b"",
        b"human",
        b"Hello",
        b"2024-01-01T12:00:00.000000000+00:00",
        b"[]",
    ]);
    assert_eq!(thread_id, expected);
    assert!(!repo.thread_exists(&placeholder), "stale placeholder file");
    let thread = repo.load_thread(&thread_id).unwrap();
    assert_eq!(thread.messages[0].content, "Hello");

    // Session state follows the promoted id.
    let state = load_state(repo.store(), "claude-code", "AAAAAAAAAAAA")
        .unwrap()
        .unwrap();
    assert_eq!(state.thread_id, thread_id);
}

#[test]
fn hook_lifecycle_builds_and_seals_thread() {
    let (dir, repo) = make_repo();
    let scm = StubScm;
    let ctx = HookContext {
        repo: &repo,
        scm: &scm,
        agent: "claude-code",
    };
    let session = "sess-lifecycle";

    let start = HookEvent::new(HookEventKind::SessionStart, session, PathBuf::from("."));
    handle_event(&ctx, &start).unwrap();

    let mut prompt = HookEvent::new(HookEventKind::UserPrompt, session, PathBuf::from("."));
    prompt.prompt = Some("write a haiku".to_string());
    let thread_id = handle_event(&ctx, &prompt).unwrap().unwrap();

    // Stop with an empty payload falls back to the transcript.
    let transcript = dir.path().join("t.jsonl");
    std::fs::write(
        &transcript,
        concat!(
            r#"{"type":"user","message":{"content":"write a haiku"}}"#,
            "\n",
            r#"{"type":"assistant","message":{"content":[{"type":"text","text":"Old pond, frog jumps in"}]}}"#,
            "\n",
        ),
    )
    .unwrap();
    let mut stop = HookEvent::new(HookEventKind::AssistantStop, session, PathBuf::from("."));
    stop.transcript_path = Some(transcript);
    let stop_id = handle_event(&ctx, &stop).unwrap().unwrap();
    assert_eq!(stop_id, thread_id);

    let thread = repo.load_thread(&thread_id).unwrap();
    assert_eq!(thread.messages.len(), 2);
    assert_eq!(thread.messages[1].role, Role::Assistant);
    assert_eq!(thread.messages[1].content, "Old pond, frog jumps in");
    // The stop records the SCM state at turn end.
    assert_eq!(
        thread.messages[1].git_hash_after.as_deref(),
        Some("0123456789abcdef0123456789abcdef01234567")
    );

    // Auto-stage (on by default) put the thread in the index.
    assert!(repo.get_staged().unwrap().contains(&thread_id));

    let end = HookEvent::new(HookEventKind::SessionEnd, session, PathBuf::from("."));
    handle_event(&ctx, &end).unwrap();
    let sealed = repo.load_thread(&thread_id).unwrap();
    assert_eq!(sealed.status, ThreadStatus::Completed);
    assert!(sealed.completed_at.is_some());
    assert!(load_state(repo.store(), "claude-code", session)
        .unwrap()
        .is_none());
}

#[test]
fn resumed_session_links_parent_thread() {
    let (_dir, repo) = make_repo();
    let scm = StubScm;
    let ctx = HookContext {
        repo: &repo,
        scm: &scm,
        agent: "claude-code",
    };
    let session = "sess-resume";

    // First life of the session.
    let start = HookEvent::new(HookEventKind::SessionStart, session, PathBuf::from("."));
    handle_event(&ctx, &start).unwrap();
    let mut prompt = HookEvent::new(HookEventKind::UserPrompt, session, PathBuf::from("."));
    prompt.prompt = Some("first question".to_string());
    let first_id = handle_event(&ctx, &prompt).unwrap().unwrap();
    let end = HookEvent::new(HookEventKind::SessionEnd, session, PathBuf::from("."));
    handle_event(&ctx, &end).unwrap();

    // Resume: same vendor session id, fresh state.
    let restart = HookEvent::new(HookEventKind::SessionStart, session, PathBuf::from("."));
    let resumed_placeholder = handle_event(&ctx, &restart).unwrap().unwrap();
    let resumed = repo.load_thread(&resumed_placeholder).unwrap();
    assert_eq!(resumed.parent_thread_id.as_deref(), Some(first_id.as_str()));
    let parent = repo.load_thread(&first_id).unwrap();
    assert_eq!(
        resumed.parent_message_id.as_deref(),
        parent.last_message_id()
    );
}

#[test]
fn session_start_is_idempotent_and_prunes_empties() {
    let (_dir, repo) = make_repo();
    let scm = StubScm;
    let ctx = HookContext {
        repo: &repo,
        scm: &scm,
        agent: "claude-code",
    };

    let start = HookEvent::new(HookEventKind::SessionStart, "sess-a", PathBuf::from("."));
    let first = handle_event(&ctx, &start).unwrap().unwrap();
    let again = handle_event(&ctx, &start).unwrap().unwrap();
    assert_eq!(first, again);
    assert_eq!(repo.list_threads().unwrap().len(), 1);
}
