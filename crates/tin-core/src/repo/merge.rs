//! Branch merges: fast-forward when possible, three-way with thread
//! conflict preservation otherwise.

use chrono::Utc;
use tracing::{info, warn};

use crate::error::{Result, TinError};
use crate::model::{
    renamed_thread_id, MergeState, RenamedThread, ThreadRef, ThreadStatus, TinCommit,
};
use crate::repo::Repository;
use crate::scm::ScmAdapter;

/// Knobs for [`merge`].
#[derive(Debug, Default)]
pub struct MergeOptions {
    /// Override the SCM-configured author on the merge commit.
    pub author: Option<String>,
}

/// How a merge concluded (or paused).
pub enum MergeOutcome {
    /// Source already reachable from target; nothing to do.
    AlreadyUpToDate,
    /// Target moved to the source tip without a merge commit.
    FastForward { tip: String },
    /// SCM conflicts outstanding; state persisted for `--continue`.
    Conflicted { renamed: Vec<RenamedThread> },
    /// Merge commit created.
    Completed {
        commit: TinCommit,
        renamed: Vec<RenamedThread>,
    },
}

/// Merge `source_branch` into the current branch.
pub fn merge(
    repo: &Repository,
    scm: &dyn ScmAdapter,
    source_branch: &str,
    opts: MergeOptions,
) -> Result<MergeOutcome> {
    if repo.merge_state()?.is_some() {
        return Err(TinError::MergeInProgress);
    }

    let target_branch = repo.head()?;
    if source_branch == target_branch {
        return Err(TinError::Invalid {
            kind: "merge",
            reason: format!("cannot merge {source_branch} into itself"),
        });
    }
    if !repo.branch_exists(source_branch) {
        return Err(TinError::not_found("branch", source_branch));
    }
    if scm.has_uncommitted_changes()? {
        return Err(TinError::Invalid {
            kind: "merge",
            reason: "scm working tree has uncommitted changes".to_string(),
        });
    }

    let source_tip = repo.read_branch(source_branch)?;
    let target_tip = repo.read_branch(&target_branch)?;

    if source_tip == target_tip || repo.is_ancestor(&source_tip, &target_tip)? {
        return Ok(MergeOutcome::AlreadyUpToDate);
    }

    if target_tip.is_empty() || repo.is_ancestor(&target_tip, &source_tip)? {
        scm.merge_ff(source_branch)?;
        repo.write_branch(&target_branch, &source_tip)?;
        info!(
            event = "merge.fast_forward",
            source = %source_branch,
            target = %target_branch,
            tip = %source_tip,
        );
        return Ok(MergeOutcome::FastForward { tip: source_tip });
    }

    // Three-way merge.
    let conflicts = scm.merge_begin(source_branch)?;

    let target_threads = repo.collect_threads_from_history(&target_tip)?;
    let source_threads = repo.collect_threads_from_history(&source_tip)?;

    let mut merged = target_threads.clone();
    let mut renamed = Vec::new();
    for source_ref in &source_threads {
        match target_threads
            .iter()
            .find(|t| t.thread_id == source_ref.thread_id)
        {
            None => merged.push(source_ref.clone()),
            Some(target_ref) if target_ref.content_hash == source_ref.content_hash => {
                // Same content on both sides; the target ref already stands.
            }
            Some(_) => {
                // Both sides changed the thread: preserve the source version
                // as a separate thread under a derived id.
                let new_id = renamed_thread_id(&source_ref.thread_id, source_branch);
                let mut preserved = repo
                    .load_thread_version(&source_ref.thread_id, &source_ref.content_hash)
                    .or_else(|_| repo.load_thread(&source_ref.thread_id))?;
                preserved.id = new_id.clone();
                repo.save_thread(&preserved)?;

                merged.push(ThreadRef::new(
                    &new_id,
                    source_ref.message_count,
                    &source_ref.content_hash,
                ));
                renamed.push(RenamedThread {
                    original_id: source_ref.thread_id.clone(),
                    new_id,
                    source_branch: source_branch.to_string(),
                });
            }
        }
    }

    let state = MergeState {
        source_branch: source_branch.to_string(),
        target_branch: target_branch.clone(),
        source_commit_id: source_tip,
        target_commit_id: target_tip,
        git_merge_complete: !conflicts,
        collected_threads: merged,
        renamed_threads: renamed.clone(),
    };
    repo.store().write_merge_state(&state)?;

    if conflicts {
        info!(
            event = "merge.paused",
            source = %source_branch,
            target = %target_branch,
            renamed = renamed.len(),
        );
        return Ok(MergeOutcome::Conflicted { renamed });
    }

    complete_merge(repo, scm, state, opts)
}

/// Resume a paused merge after conflict resolution.
pub fn merge_continue(
    repo: &Repository,
    scm: &dyn ScmAdapter,
    opts: MergeOptions,
) -> Result<MergeOutcome> {
    let state = repo.merge_state()?.ok_or(TinError::NoMergeInProgress)?;
    if scm.has_merge_conflicts()? {
        return Err(TinError::MergeConflicts);
    }
    complete_merge(repo, scm, state, opts)
}

/// Abandon a paused merge: aborts the SCM merge, deletes the preserved
/// source-side threads and removes the merge state.
pub fn merge_abort(repo: &Repository, scm: &dyn ScmAdapter) -> Result<()> {
    let state = repo.merge_state()?.ok_or(TinError::NoMergeInProgress)?;

    if scm.is_in_merge_state()? {
        scm.merge_abort()?;
    }

    for rename in &state.renamed_threads {
        if let Err(e) = repo.delete_thread(&rename.new_id, true) {
            warn!(thread_id = %rename.new_id, error = %e, "failed to delete renamed thread");
        }
    }

    repo.store().clear_merge_state()?;
    info!(
        event = "merge.aborted",
        source = %state.source_branch,
        target = %state.target_branch,
    );
    Ok(())
}

fn complete_merge(
    repo: &Repository,
    scm: &dyn ScmAdapter,
    state: MergeState,
    opts: MergeOptions,
) -> Result<MergeOutcome> {
    let message = format!(
        "Merge branch '{}' into {}",
        state.source_branch, state.target_branch
    );

    // The persisted flag is advisory; what matters is the SCM state now.
    let git_hash = if scm.is_in_merge_state()? {
        scm.merge_commit(&message)?
    } else {
        scm.current_hash()?
    };

    let author = match opts.author {
        Some(author) => author,
        None => scm.author()?,
    };

    let commit = TinCommit::new(
        state.target_commit_id.clone(),
        state.source_commit_id.clone(),
        &message,
        state.collected_threads.clone(),
        git_hash,
        Utc::now(),
        author,
    );

    {
        let _lock = repo.store().lock_repo()?;
        repo.save_commit(&commit)?;

        for thread_ref in &state.collected_threads {
            if let Ok(mut thread) = repo.load_thread(&thread_ref.thread_id) {
                if thread.content_hash() == thread_ref.content_hash {
                    thread.status = ThreadStatus::Committed;
                    thread.committed_content_hash = Some(thread_ref.content_hash.clone());
                    let _thread_lock = repo.store().lock_thread(&thread.id)?;
                    repo.store().save_thread_latest(&thread)?;
                }
            }
        }

        repo.store().write_ref(&state.target_branch, &commit.id)?;
        repo.store().clear_merge_state()?;
    }

    info!(
        event = "merge.completed",
        commit_id = %commit.id,
        source = %state.source_branch,
        target = %state.target_branch,
        renamed = state.renamed_threads.len(),
    );

    Ok(MergeOutcome::Completed {
        commit,
        renamed: state.renamed_threads,
    })
}
