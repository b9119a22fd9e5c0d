//! Branch parity between the tin repository and the SCM.

use tracing::info;

use crate::error::{Result, TinError};
use crate::repo::Repository;
use crate::scm::ScmAdapter;

/// Snapshot of both sides' current branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchState {
    pub tin_branch: String,
    /// `None` when the working tree is not under the SCM at all.
    pub scm_branch: Option<String>,
    pub in_sync: bool,
}

/// Which side follows the other during [`sync`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncDirection {
    /// Check the SCM out on tin's current branch (default).
    #[default]
    ScmFollowsTin,
    /// Point tin HEAD at the SCM's current branch.
    TinFollowsScm,
}

/// What [`sync`] did (or would do, under `dry_run`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    InSync { branch: String },
    ScmCheckedOut { branch: String, created: bool },
    TinSwitched { branch: String, created: bool },
    DryRun { description: String },
}

/// Read both branches without mutating anything.
pub fn get_branch_state(repo: &Repository, scm: &dyn ScmAdapter) -> Result<BranchState> {
    let tin_branch = repo.head()?;
    let scm_branch = scm.current_branch().ok();
    let in_sync = match &scm_branch {
        Some(branch) => *branch == tin_branch,
        None => true,
    };
    Ok(BranchState {
        tin_branch,
        scm_branch,
        in_sync,
    })
}

/// Error when both branches are known and differ.
pub fn check_branch_sync(repo: &Repository, scm: &dyn ScmAdapter) -> Result<()> {
    let state = get_branch_state(repo, scm)?;
    match state.scm_branch {
        Some(scm_branch) if !state.in_sync => Err(TinError::BranchMismatch {
            tin: state.tin_branch,
            scm: scm_branch,
        }),
        _ => Ok(()),
    }
}

/// Align the two branches, creating the missing side if needed.
pub fn sync(
    repo: &Repository,
    scm: &dyn ScmAdapter,
    direction: SyncDirection,
    dry_run: bool,
) -> Result<SyncOutcome> {
    let state = get_branch_state(repo, scm)?;
    if state.in_sync {
        return Ok(SyncOutcome::InSync {
            branch: state.tin_branch,
        });
    }

    match direction {
        SyncDirection::ScmFollowsTin => {
            let branch = state.tin_branch;
            let created = !scm.branch_exists(&branch)?;
            if dry_run {
                return Ok(SyncOutcome::DryRun {
                    description: if created {
                        format!("would create and check out scm branch {branch}")
                    } else {
                        format!("would check out scm branch {branch}")
                    },
                });
            }
            if created {
                scm.create_branch(&branch)?;
            }
            scm.checkout(&branch)?;
            info!(event = "sync.scm_checkout", branch = %branch, created);
            Ok(SyncOutcome::ScmCheckedOut { branch, created })
        }
        SyncDirection::TinFollowsScm => {
            let branch = state.scm_branch.ok_or_else(|| TinError::Scm(
                "scm branch is unknown; cannot follow it".to_string(),
            ))?;
            let created = !repo.branch_exists(&branch);
            if dry_run {
                return Ok(SyncOutcome::DryRun {
                    description: if created {
                        format!("would create tin branch {branch} and point HEAD at it")
                    } else {
                        format!("would point tin HEAD at {branch}")
                    },
                });
            }
            if created {
                repo.write_branch(&branch, "")?;
            }
            repo.set_head(&branch)?;
            info!(event = "sync.tin_switch", branch = %branch, created);
            Ok(SyncOutcome::TinSwitched { branch, created })
        }
    }
}
