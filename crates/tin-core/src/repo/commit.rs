//! The staging/commit pipeline.

use chrono::Utc;
use tracing::{info, warn};

use crate::error::{Result, TinError};
use crate::hash::short_id;
use crate::model::{ThreadStatus, TinCommit};
use crate::repo::Repository;
use crate::scm::ScmAdapter;

/// Knobs for [`commit`].
#[derive(Debug, Default)]
pub struct CommitOptions {
    /// Skip the tin/SCM branch-parity check.
    pub force: bool,
    /// Override the SCM-configured author.
    pub author: Option<String>,
}

/// What a successful commit produced.
pub struct CommitOutcome {
    pub commit: TinCommit,
    /// Set when the post-commit parallel SCM commit failed; the tin commit
    /// itself stands.
    pub scm_warning: Option<String>,
}

/// Derived message for SCM commits made on behalf of a thread.
pub fn derived_scm_message(thread_id: &str, first_human_line: Option<&str>) -> String {
    let line = first_human_line.unwrap_or("agent session");
    format!("[tin {}] {}", short_id(thread_id), line)
}

/// Commit the staged thread versions.
///
/// Preconditions: a non-empty index, and (unless forced) the SCM checked
/// out on the same branch as tin HEAD. Threads staged without an SCM
/// commit get one from the working tree's changed files first. The new
/// commit, the committed thread markers and the branch tip are written in
/// that order under the repository lock, so a reader observing the new tip
/// also observes the committed threads; the index is cleared last.
pub fn commit(
    repo: &Repository,
    scm: &dyn ScmAdapter,
    message: &str,
    opts: CommitOptions,
) -> Result<CommitOutcome> {
    let index = repo.get_staged()?;
    if index.is_empty() {
        return Err(TinError::NothingToCommit);
    }

    let head = repo.head()?;
    if !opts.force {
        if let Ok(scm_branch) = scm.current_branch() {
            if scm_branch != head {
                return Err(TinError::BranchMismatch {
                    tin: head,
                    scm: scm_branch,
                });
            }
        }
    }

    // Give every staged thread an SCM commit binding before we snapshot.
    let mut staged_refs = index.entries.clone();
    let mut newest_git_hash = String::new();
    for thread_ref in &mut staged_refs {
        let mut thread = repo.load_thread(&thread_ref.thread_id)?;
        if thread.git_commit_hash.is_none() {
            let hash = if scm.has_uncommitted_changes()? {
                scm.add(&scm.changed_files()?)?;
                scm.commit(&derived_scm_message(&thread.id, thread.first_human_line()))?
            } else {
                scm.current_hash()?
            };
            thread.git_commit_hash = Some(hash);
            repo.save_thread(&thread)?;
        }
        if let Some(hash) = &thread.git_commit_hash {
            newest_git_hash = hash.clone();
        }
        // Legacy refs staged without a content hash resolve to the thread's
        // current content.
        if thread_ref.is_legacy() {
            thread_ref.content_hash = thread.content_hash_at(thread_ref.message_count);
        }
    }
    if newest_git_hash.is_empty() {
        newest_git_hash = scm.current_hash().unwrap_or_default();
    }

    let author = match opts.author {
        Some(author) => author,
        None => scm.author()?,
    };

    let parent = repo.current_tip()?;
    let tin_commit = TinCommit::new(
        parent,
        "",
        message,
        staged_refs.clone(),
        newest_git_hash,
        Utc::now(),
        author,
    );

    {
        let _lock = repo.store().lock_repo()?;
        repo.save_commit(&tin_commit)?;

        for thread_ref in &staged_refs {
            let mut thread = repo.load_thread(&thread_ref.thread_id)?;
            thread.status = ThreadStatus::Committed;
            thread.committed_content_hash = Some(thread_ref.content_hash.clone());
            let _thread_lock = repo.store().lock_thread(&thread.id)?;
            repo.store().save_thread_latest(&thread)?;
        }

        repo.store().write_ref(&head, &tin_commit.id)?;
        repo.store().write_index(&Default::default())?;
    }

    info!(
        event = "commit.created",
        commit_id = %tin_commit.id,
        branch = %head,
        threads = tin_commit.threads.len(),
    );

    // Parallel SCM commit carrying the tin tag and, when configured, a
    // link into the thread host. Failure here is a warning, not an error.
    let scm_warning = match parallel_scm_commit(repo, scm, &tin_commit, message) {
        Ok(()) => None,
        Err(e) => {
            warn!(error = %e, "scm commit after tin commit failed");
            Some(e.to_string())
        }
    };

    Ok(CommitOutcome {
        commit: tin_commit,
        scm_warning,
    })
}

fn parallel_scm_commit(
    repo: &Repository,
    scm: &dyn ScmAdapter,
    tin_commit: &TinCommit,
    message: &str,
) -> Result<()> {
    let config = repo.config()?;
    let Some(thread_host) = config.thread_host_url else {
        return Ok(());
    };

    let mut body = format!("[tin {}] {}", short_id(&tin_commit.id), message);
    for thread_ref in &tin_commit.threads {
        body.push_str(&format!(
            "\n\nThread: {}/thread/{}",
            thread_host.trim_end_matches('/'),
            thread_ref.thread_id
        ));
    }

    if scm.has_uncommitted_changes()? {
        scm.add(&scm.changed_files()?)?;
        scm.commit(&body)?;
    } else {
        scm.commit_empty(&body)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Role;
    use crate::model::Thread;
    use crate::scm::GitScm;
    use chrono::TimeZone;
    use std::path::Path;
    use std::process::Command;

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

    fn stage_thread(repo: &Repository, content: &str, sec: u32) -> Thread {
        let started = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, sec).unwrap();
        let mut thread = Thread::new(format!("ph-{sec}"), "claude-code", format!("s{sec}"), started);
        thread.append(Role::Human, content, started, vec![]);
        repo.save_thread(&thread).unwrap();
        repo.stage_thread(&thread.id, 1, &thread.content_hash()).unwrap();
        thread
    }

    #[test]
    fn empty_index_is_nothing_to_commit() {
        let (_dir, repo, scm) = make_workspace();
        assert!(matches!(
            commit(&repo, &scm, "msg", CommitOptions::default()),
            Err(TinError::NothingToCommit)
        ));
    }

    #[test]
    fn branch_mismatch_requires_force() {
        let (_dir, repo, scm) = make_workspace();
        stage_thread(&repo, "work", 1);
        scm.create_branch("other").unwrap();
        scm.checkout("other").unwrap();

        assert!(matches!(
            commit(&repo, &scm, "msg", CommitOptions::default()),
            Err(TinError::BranchMismatch { .. })
        ));

        let outcome = commit(
            &repo,
            &scm,
            "msg",
            CommitOptions {
                force: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert!(!outcome.commit.id.is_empty());
    }

    #[test]
    fn commit_advances_branch_and_clears_index() {
        let (_dir, repo, scm) = make_workspace();
        let thread = stage_thread(&repo, "add a feature", 1);

        let outcome = commit(&repo, &scm, "first commit", CommitOptions::default()).unwrap();

        assert!(repo.get_staged().unwrap().is_empty());
        assert_eq!(repo.read_branch("main").unwrap(), outcome.commit.id);

        let committed = repo.load_thread(&thread.id).unwrap();
        assert_eq!(committed.status, ThreadStatus::Committed);
        assert!(committed.is_fully_committed());
        assert!(committed.git_commit_hash.is_some());
    }

    #[test]
    fn dirty_tree_committed_under_derived_message() {
        let (dir, repo, scm) = make_workspace();
        let thread = stage_thread(&repo, "touch a file", 1);
        std::fs::write(dir.path().join("work.txt"), "changed").unwrap();

        let before = scm.current_hash().unwrap();
        commit(&repo, &scm, "msg", CommitOptions::default()).unwrap();

        let after = scm.current_hash().unwrap();
        assert_ne!(before, after);
        let committed = repo.load_thread(&thread.id).unwrap();
        assert_eq!(committed.git_commit_hash.as_deref(), Some(after.as_str()));
        assert!(!scm.has_uncommitted_changes().unwrap());
    }

    #[test]
    fn thread_host_url_yields_empty_scm_commit_with_link() {
        let (dir, repo, scm) = make_workspace();
        let thread = stage_thread(&repo, "link me", 1);
        let mut config = repo.config().unwrap();
        config.thread_host_url = Some("https://tin.example.com".to_string());
        repo.set_config(&config).unwrap();

        let before = scm.current_hash().unwrap();
        let outcome = commit(&repo, &scm, "linked commit", CommitOptions::default()).unwrap();
        assert!(outcome.scm_warning.is_none());

        let after = scm.current_hash().unwrap();
        assert_ne!(before, after, "an empty scm commit must still be created");

        let log = Command::new("git")
            .args(["log", "-1", "--format=%B"])
            .current_dir(dir.path())
            .output()
            .unwrap();
        let body = String::from_utf8_lossy(&log.stdout);
        assert!(body.contains(&format!("[tin {}]", short_id(&outcome.commit.id))));
        assert!(body.contains(&format!("https://tin.example.com/thread/{}", thread.id)));
    }

    #[test]
    fn second_commit_chains_parent() {
        let (_dir, repo, scm) = make_workspace();
        stage_thread(&repo, "one", 1);
        let first = commit(&repo, &scm, "c1", CommitOptions::default()).unwrap();
        stage_thread(&repo, "two", 2);
        let second = commit(&repo, &scm, "c2", CommitOptions::default()).unwrap();
        assert_eq!(second.commit.parent_commit_id, first.commit.id);
    }

    #[test]
    fn derived_message_format() {
        assert_eq!(
            derived_scm_message("abcdef0123456789", Some("fix the parser")),
            "[tin abcdef01] fix the parser"
        );
        assert_eq!(
            derived_scm_message("abcdef0123456789", None),
            "[tin abcdef01] agent session"
        );
    }
}
