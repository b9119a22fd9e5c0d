//! End-to-end merge scenarios over a real git working tree.

use std::path::Path;
use std::process::Command;

use chrono::{TimeZone, Utc};
use tin_core::{
    merge, merge_abort, merge_continue, renamed_thread_id, GitScm, MergeOptions, MergeOutcome,
    Repository, Role, ScmAdapter, Thread, TinError,
};

fn run_git(repo_dir: &Path, args: &[&str]) {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo_dir)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
}

fn make_workspace() -> (tempfile::TempDir, Repository, GitScm) {
    let dir = tempfile::tempdir().unwrap();
    run_git(dir.path(), &["init", "-b", "main"]);
    run_git(dir.path(), &["config", "user.name", "test-user"]);
    run_git(dir.path(), &["config", "user.email", "test@example.com"]);
    run_git(dir.path(), &["commit", "--allow-empty", "-m", "initial"]);
    let repo = Repository::init(dir.path()).unwrap();
    let scm = GitScm::new(dir.path());
    (dir, repo, scm)
}

fn ts(sec: u32) -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, sec).unwrap()
}

fn commit_thread(repo: &Repository, scm: &GitScm, content: &str, sec: u32) -> (Thread, String) {
    let mut thread = Thread::new(format!("ph-{sec}"), "claude-code", format!("s{sec}"), ts(sec));
    thread.append(Role::Human, content, ts(sec), vec![]);
    repo.save_thread(&thread).unwrap();
    repo.stage_thread(&thread.id, thread.messages.len(), &thread.content_hash())
        .unwrap();
    let outcome = tin_core::commit(
        repo,
        scm,
        &format!("commit {sec}"),
        tin_core::CommitOptions::default(),
    )
    .unwrap();
    (thread, outcome.commit.id)
}

#[test]
fn fast_forward_moves_target_to_source_tip() {
    let (dir, repo, scm) = make_workspace();

    // One commit on main, then more work on feat only.
    commit_thread(&repo, &scm, "base work", 1);

    scm.create_branch("feat").unwrap();
    scm.checkout("feat").unwrap();
    repo.write_branch("feat", &repo.read_branch("main").unwrap())
        .unwrap();
    repo.set_head("feat").unwrap();
    std::fs::write(dir.path().join("feat.txt"), "feature").unwrap();
    let (_thread, feat_tip) = commit_thread(&repo, &scm, "feature work", 2);

    scm.checkout("main").unwrap();
    repo.set_head("main").unwrap();

    match merge(&repo, &scm, "feat", MergeOptions::default()).unwrap() {
        MergeOutcome::FastForward { tip } => assert_eq!(tip, feat_tip),
        _ => panic!("expected fast-forward"),
    }
    assert_eq!(repo.read_branch("main").unwrap(), feat_tip);
    assert!(repo.merge_state().unwrap().is_none());
    // No merge commit: the tip commit has a single parent.
    assert!(!repo.load_commit(&feat_tip).unwrap().is_merge());
}

#[test]
fn merge_into_itself_and_unknown_branch_are_refused() {
    let (_dir, repo, scm) = make_workspace();
    assert!(matches!(
        merge(&repo, &scm, "main", MergeOptions::default()),
        Err(TinError::Invalid { .. })
    ));
    assert!(matches!(
        merge(&repo, &scm, "ghost", MergeOptions::default()),
        Err(TinError::NotFound { .. })
    ));
}

#[test]
fn already_up_to_date_when_source_is_ancestor() {
    let (_dir, repo, scm) = make_workspace();
    commit_thread(&repo, &scm, "base", 1);
    scm.create_branch("old").unwrap();
    repo.write_branch("old", &repo.read_branch("main").unwrap())
        .unwrap();
    commit_thread(&repo, &scm, "newer", 2);

    assert!(matches!(
        merge(&repo, &scm, "old", MergeOptions::default()).unwrap(),
        MergeOutcome::AlreadyUpToDate
    ));
}

/// Set up divergent branches where both sides extended the same thread.
/// Returns the original thread id. When `conflict_files` is set, both git
/// branches edit the same file so the SCM merge pauses on a conflict.
fn diverge_same_thread(
    dir: &tempfile::TempDir,
    repo: &Repository,
    scm: &GitScm,
    conflict_files: bool,
) -> String {
    // Shared base: thread with one message, committed on main.
    if conflict_files {
        std::fs::write(dir.path().join("shared.txt"), "base\n").unwrap();
        run_git(dir.path(), &["add", "shared.txt"]);
        run_git(dir.path(), &["commit", "-m", "base file"]);
    }
    let (thread, base_commit) = commit_thread(repo, scm, "shared question", 1);
    let thread_id = thread.id.clone();
    let base_hash = thread.content_hash();

    scm.create_branch("B").unwrap();
    repo.write_branch("B", &base_commit).unwrap();

    // main side: extend the thread one way.
    if conflict_files {
        std::fs::write(dir.path().join("shared.txt"), "main side\n").unwrap();
        run_git(dir.path(), &["add", "shared.txt"]);
        run_git(dir.path(), &["commit", "-m", "main file edit"]);
    }
    let mut main_thread = repo.load_thread(&thread_id).unwrap();
    main_thread.append(Role::Assistant, "answer from main", ts(10), vec![]);
    repo.save_thread(&main_thread).unwrap();
    repo.stage_thread(&thread_id, 2, &main_thread.content_hash())
        .unwrap();
    tin_core::commit(repo, scm, "main extension", tin_core::CommitOptions::default()).unwrap();

    // B side: extend the same base version differently.
    scm.checkout("B").unwrap();
    repo.set_head("B").unwrap();
    if conflict_files {
        std::fs::write(dir.path().join("shared.txt"), "B side\n").unwrap();
        run_git(dir.path(), &["add", "shared.txt"]);
        run_git(dir.path(), &["commit", "-m", "B file edit"]);
    }
    let mut b_thread = repo.load_thread_version(&thread_id, &base_hash).unwrap();
    b_thread.append(Role::Assistant, "answer from B", ts(20), vec![]);
    repo.save_thread(&b_thread).unwrap();
    repo.stage_thread(&thread_id, 2, &b_thread.content_hash())
        .unwrap();
    tin_core::commit(repo, scm, "B extension", tin_core::CommitOptions::default()).unwrap();

    scm.checkout("main").unwrap();
    repo.set_head("main").unwrap();
    thread_id
}

#[test]
fn conflicting_thread_preserved_under_renamed_id() {
    let (dir, repo, scm) = make_workspace();
    let thread_id = diverge_same_thread(&dir, &repo, &scm, false);

    let outcome = merge(&repo, &scm, "B", MergeOptions::default()).unwrap();
    let (commit, renamed) = match outcome {
        MergeOutcome::Completed { commit, renamed } => (commit, renamed),
        _ => panic!("expected a completed merge"),
    };

    assert!(commit.is_merge());
    assert_eq!(renamed.len(), 1);
    assert_eq!(renamed[0].original_id, thread_id);
    assert_eq!(renamed[0].new_id, renamed_thread_id(&thread_id, "B"));
    assert_eq!(renamed[0].source_branch, "B");

    // Both versions live in the store and the merge commit references both.
    let preserved = repo.load_thread(&renamed[0].new_id).unwrap();
    assert_eq!(preserved.messages.len(), 2);
    assert!(commit.thread_ref(&thread_id).is_some());
    assert!(commit.thread_ref(&renamed[0].new_id).is_some());

    assert_eq!(repo.read_branch("main").unwrap(), commit.id);
    assert!(repo.merge_state().unwrap().is_none());
}

#[test]
fn paused_merge_continues_after_resolution() {
    let (dir, repo, scm) = make_workspace();
    diverge_same_thread(&dir, &repo, &scm, true);

    let outcome = merge(&repo, &scm, "B", MergeOptions::default()).unwrap();
    assert!(matches!(outcome, MergeOutcome::Conflicted { .. }));
    assert!(repo.merge_state().unwrap().is_some());

    // Unresolved conflicts refuse to continue.
    assert!(matches!(
        merge_continue(&repo, &scm, MergeOptions::default()),
        Err(TinError::MergeConflicts)
    ));

    // Resolve and continue.
    std::fs::write(dir.path().join("shared.txt"), "resolved\n").unwrap();
    run_git(dir.path(), &["add", "shared.txt"]);
    let outcome = merge_continue(&repo, &scm, MergeOptions::default()).unwrap();
    let commit = match outcome {
        MergeOutcome::Completed { commit, .. } => commit,
        _ => panic!("expected completion"),
    };
    assert!(commit.is_merge());
    assert!(repo.merge_state().unwrap().is_none());
}

#[test]
fn aborted_merge_deletes_renamed_threads_and_state() {
    let (dir, repo, scm) = make_workspace();
    let thread_id = diverge_same_thread(&dir, &repo, &scm, true);
    let tip_before = repo.read_branch("main").unwrap();

    let outcome = merge(&repo, &scm, "B", MergeOptions::default()).unwrap();
    let renamed = match outcome {
        MergeOutcome::Conflicted { renamed } => renamed,
        _ => panic!("expected a paused merge"),
    };
    let new_id = renamed_thread_id(&thread_id, "B");
    assert_eq!(renamed[0].new_id, new_id);
    assert!(repo.thread_exists(&new_id));

    merge_abort(&repo, &scm).unwrap();

    assert!(!repo.thread_exists(&new_id));
    assert!(repo.merge_state().unwrap().is_none());
    assert!(!scm.is_in_merge_state().unwrap());
    assert_eq!(repo.read_branch("main").unwrap(), tip_before);

    // Nothing left to abort.
    assert!(matches!(
        merge_abort(&repo, &scm),
        Err(TinError::NoMergeInProgress)
    ));
}
