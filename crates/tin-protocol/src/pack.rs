//! Pack assembly and application.
//!
//! A pack carries commits in oldest-first order plus every thread version
//! the receiver lacks. Application validates object hashes before any
//! write and never advances a ref it did not fully receive objects for.

use std::collections::HashSet;

use tracing::{info, warn};

use tin_core::repo::Repository;
use tin_core::{Thread, TinCommit};

use crate::error::{ProtocolError, Result};
use crate::messages::{Pack, RefsAd, UpdateRefs, Want, WantVersion};

/// Counts from a pack application.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PackStats {
    pub commits: usize,
    pub threads: usize,
}

/// Everything a repository advertises to a peer.
pub fn advertise(repo: &Repository) -> Result<RefsAd> {
    let mut branches = std::collections::BTreeMap::new();
    for name in repo.list_branches()? {
        let tip = repo.read_branch(&name)?;
        branches.insert(name, tip);
    }
    Ok(RefsAd {
        head: repo.head()?,
        branches,
        commit_ids: repo.store().list_commit_ids()?,
        thread_ids: repo.store().list_thread_ids()?,
        thread_versions: repo.store().list_all_thread_versions()?,
    })
}

/// Commits reachable from `tip` that the peer does not have, oldest first.
/// The walk follows first parents and stops at the first known commit.
pub fn missing_commits(
    repo: &Repository,
    tip: &str,
    have: &HashSet<&str>,
) -> Result<Vec<TinCommit>> {
    let mut commits = Vec::new();
    let mut cursor = tip.to_string();
    while !cursor.is_empty() && !have.contains(cursor.as_str()) {
        let commit = repo.load_commit(&cursor)?;
        cursor = commit.parent_commit_id.clone();
        commits.push(commit);
    }
    commits.reverse();
    Ok(commits)
}

/// Assemble the push pack: new commits plus the thread versions the
/// remote lacks, preferring exact versioned snapshots over latest.
pub fn build_push_pack(repo: &Repository, tip: &str, remote: &RefsAd) -> Result<Pack> {
    let have: HashSet<&str> = remote.commit_ids.iter().map(String::as_str).collect();
    let commits = missing_commits(repo, tip, &have)?;

    let mut threads = Vec::new();
    let mut included: HashSet<(String, String)> = HashSet::new();
    for commit in &commits {
        for thread_ref in &commit.threads {
            let remote_has = remote
                .thread_versions
                .get(&thread_ref.thread_id)
                .map(|hashes| hashes.contains(&thread_ref.content_hash))
                .unwrap_or(false);
            if remote_has && !thread_ref.is_legacy() {
                continue;
            }

            let snapshot = if thread_ref.is_legacy() {
                repo.load_thread(&thread_ref.thread_id)?
            } else {
                repo.load_thread_version(&thread_ref.thread_id, &thread_ref.content_hash)
                    .or_else(|_| repo.load_thread(&thread_ref.thread_id))?
            };
            let key = (snapshot.id.clone(), snapshot.content_hash());
            if included.insert(key) {
                threads.push(snapshot);
            }
        }
    }

    Ok(Pack { commits, threads })
}

/// What this repository lacks out of a peer's advertisement.
pub fn diff_wants(repo: &Repository, remote: &RefsAd) -> Result<Want> {
    let mut want = Want::default();

    for commit_id in &remote.commit_ids {
        if !repo.commit_exists(commit_id) {
            want.commit_ids.push(commit_id.clone());
        }
    }
    for thread_id in &remote.thread_ids {
        if !repo.thread_exists(thread_id) {
            want.thread_ids.push(thread_id.clone());
        }
    }
    for (thread_id, hashes) in &remote.thread_versions {
        for hash in hashes {
            if !repo.store().thread_version_exists(thread_id, hash) {
                want.thread_versions.push(WantVersion {
                    thread_id: thread_id.clone(),
                    content_hash: hash.clone(),
                });
            }
        }
    }
    Ok(want)
}

/// Serve a `want`: load the requested objects. Unknown ids are skipped
/// with a warning rather than failing the whole transfer.
pub fn build_want_pack(repo: &Repository, want: &Want) -> Result<Pack> {
    let mut pack = Pack::default();
    let mut included: HashSet<(String, String)> = HashSet::new();

    for commit_id in &want.commit_ids {
        match repo.load_commit(commit_id) {
            Ok(commit) => pack.commits.push(commit),
            Err(e) => warn!(commit_id = %commit_id, error = %e, "wanted commit unavailable"),
        }
    }
    // Oldest first, so receivers can apply as they read.
    pack.commits.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));

    for version in &want.thread_versions {
        match repo
            .load_thread_version(&version.thread_id, &version.content_hash)
            .or_else(|_| repo.load_thread(&version.thread_id))
        {
            Ok(thread) => {
                let key = (thread.id.clone(), thread.content_hash());
                if included.insert(key) {
                    pack.threads.push(thread);
                }
            }
            Err(e) => {
                warn!(thread_id = %version.thread_id, error = %e, "wanted version unavailable")
            }
        }
    }
    for thread_id in &want.thread_ids {
        match repo.load_thread(thread_id) {
            Ok(thread) => {
                let key = (thread.id.clone(), thread.content_hash());
                if included.insert(key) {
                    pack.threads.push(thread);
                }
            }
            Err(e) => warn!(thread_id = %thread_id, error = %e, "wanted thread unavailable"),
        }
    }

    Ok(pack)
}

/// Message chain validity without binding the thread id (preserved merge
/// copies legitimately carry a derived id).
fn messages_valid(thread: &Thread) -> bool {
    let mut parent = String::new();
    for message in &thread.messages {
        if message.parent_message_id != parent || message.recompute_id() != message.id {
            return false;
        }
        parent = message.id.clone();
    }
    true
}

/// Persist a pack's objects. Hashes are re-derived and checked before any
/// write; one bad object rejects the whole pack.
pub fn apply_pack(repo: &Repository, pack: &Pack) -> Result<PackStats> {
    for commit in &pack.commits {
        if commit.recompute_id() != commit.id {
            return Err(ProtocolError::InvalidRequest(format!(
                "commit {} does not match its content",
                commit.id
            )));
        }
    }
    for thread in &pack.threads {
        if !messages_valid(thread) {
            return Err(ProtocolError::InvalidRequest(format!(
                "thread {} has a broken message chain",
                thread.id
            )));
        }
    }

    let mut stats = PackStats::default();

    // Threads land before the commits that reference them.
    for thread in &pack.threads {
        let content_hash = thread.content_hash();
        if !repo.store().thread_version_exists(&thread.id, &content_hash) {
            repo.store().save_thread_version(thread, &content_hash)?;
            stats.threads += 1;
        }
        let update_latest = match repo.load_thread(&thread.id) {
            Ok(existing) => thread.messages.len() > existing.messages.len(),
            Err(_) => true,
        };
        if update_latest {
            repo.store().save_thread_latest(thread)?;
        }
    }

    for commit in &pack.commits {
        if !repo.commit_exists(&commit.id) {
            repo.save_commit(commit)?;
            stats.commits += 1;
        }
    }

    info!(
        event = "pack.applied",
        commits = stats.commits,
        threads = stats.threads,
    );
    Ok(stats)
}

/// Apply a pusher's ref updates: validate every move first, then write
/// them all under the repository lock. Unless forced, each new tip must
/// descend from the current one.
pub fn apply_ref_updates(repo: &Repository, update: &UpdateRefs) -> Result<()> {
    let _lock = repo.store().lock_repo()?;

    for (branch, new_tip) in &update.updates {
        if !repo.commit_exists(new_tip) {
            return Err(ProtocolError::InvalidRequest(format!(
                "ref update for {branch} names unknown commit {new_tip}"
            )));
        }
        if !update.force {
            let current = repo.read_branch(branch)?;
            if !current.is_empty() && !repo.is_ancestor(&current, new_tip)? {
                return Err(ProtocolError::Core(tin_core::TinError::NotFastForward {
                    branch: branch.clone(),
                }));
            }
        }
    }

    for (branch, new_tip) in &update.updates {
        repo.store().write_ref(branch, new_tip)?;
        info!(event = "ref.updated", branch = %branch, tip = %new_tip);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tin_core::{Role, ThreadRef};

    fn make_repo() -> (tempfile::TempDir, Repository) {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        (dir, repo)
    }

    fn ts(sec: u32) -> chrono::DateTime<chrono::Utc> {
        use chrono::TimeZone;
        chrono::Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, sec).unwrap()
    }

    fn thread_with(repo: &Repository, content: &str, sec: u32) -> Thread {
        let mut thread = Thread::new(format!("ph-{sec}"), "claude-code", format!("s{sec}"), ts(sec));
        thread.append(Role::Human, content, ts(sec), vec![]);
        repo.save_thread(&thread).unwrap();
        thread
    }

    fn commit_with(repo: &Repository, parent: &str, refs: Vec<ThreadRef>, sec: u32) -> TinCommit {
        let commit = TinCommit::new(parent, "", format!("c{sec}"), refs, "git", ts(sec), "me");
        repo.save_commit(&commit).unwrap();
        commit
    }

    #[test]
    fn missing_commits_stop_at_known_and_order_oldest_first() {
        let (_dir, repo) = make_repo();
        let c1 = commit_with(&repo, "", vec![], 1);
        let c2 = commit_with(&repo, &c1.id, vec![], 2);
        let c3 = commit_with(&repo, &c2.id, vec![], 3);

        let mut have = HashSet::new();
        have.insert(c1.id.as_str());
        let missing = missing_commits(&repo, &c3.id, &have).unwrap();
        assert_eq!(
            missing.iter().map(|c| c.id.clone()).collect::<Vec<_>>(),
            vec![c2.id.clone(), c3.id.clone()]
        );
    }

    #[test]
    fn push_pack_includes_versions_remote_lacks() {
        let (_dir, repo) = make_repo();
        let thread = thread_with(&repo, "hello", 1);
        let hash = thread.content_hash();
        let c1 = commit_with(
            &repo,
            "",
            vec![ThreadRef::new(&thread.id, 1, &hash)],
            1,
        );

        let empty_remote = RefsAd::default();
        let pack = build_push_pack(&repo, &c1.id, &empty_remote).unwrap();
        assert_eq!(pack.commits.len(), 1);
        assert_eq!(pack.threads.len(), 1);
        assert_eq!(pack.threads[0].content_hash(), hash);

        // A remote that already has the version gets no thread.
        let mut knowing = RefsAd::default();
        knowing
            .thread_versions
            .insert(thread.id.clone(), vec![hash.clone()]);
        let pack = build_push_pack(&repo, &c1.id, &knowing).unwrap();
        assert!(pack.threads.is_empty());
    }

    #[test]
    fn wants_cover_commits_threads_and_versions() {
        let (_dir, repo) = make_repo();
        let mut remote = RefsAd::default();
        remote.commit_ids.push("c-unknown".to_string());
        remote.thread_ids.push("t-unknown".to_string());
        remote
            .thread_versions
            .insert("t-unknown".to_string(), vec!["h1".to_string()]);

        let want = diff_wants(&repo, &remote).unwrap();
        assert_eq!(want.commit_ids, vec!["c-unknown"]);
        assert_eq!(want.thread_ids, vec!["t-unknown"]);
        assert_eq!(
            want.thread_versions,
            vec![WantVersion {
                thread_id: "t-unknown".to_string(),
                content_hash: "h1".to_string(),
            }]
        );
    }

    #[test]
    fn apply_pack_rejects_tampered_commit() {
        let (_dir, repo) = make_repo();
        let mut commit = TinCommit::new("", "", "good", vec![], "git", ts(1), "me");
        commit.message = "tampered".to_string();
        let pack = Pack {
            commits: vec![commit],
            threads: vec![],
        };
        assert!(matches!(
            apply_pack(&repo, &pack),
            Err(ProtocolError::InvalidRequest(_))
        ));
        assert!(repo.store().list_commit_ids().unwrap().is_empty());
    }

    #[test]
    fn apply_pack_keeps_longer_local_latest() {
        let (_dir, repo) = make_repo();
        let mut long = thread_with(&repo, "one", 1);
        long.append(Role::Assistant, "two", ts(2), vec![]);
        repo.save_thread(&long).unwrap();

        // Incoming pack carries the one-message version of the same thread.
        let mut short = repo
            .load_thread_version(&long.id, &long.content_hash_at(1))
            .unwrap();
        short.status = tin_core::ThreadStatus::Active;
        let pack = Pack {
            commits: vec![],
            threads: vec![short],
        };
        apply_pack(&repo, &pack).unwrap();

        assert_eq!(repo.load_thread(&long.id).unwrap().messages.len(), 2);
    }

    #[test]
    fn ref_updates_require_fast_forward() {
        let (_dir, repo) = make_repo();
        let c1 = commit_with(&repo, "", vec![], 1);
        let c2 = commit_with(&repo, &c1.id, vec![], 2);
        let divergent = commit_with(&repo, "", vec![], 3);
        repo.write_branch("main", &c2.id).unwrap();

        let mut updates = std::collections::BTreeMap::new();
        updates.insert("main".to_string(), divergent.id.clone());
        let req = UpdateRefs {
            updates: updates.clone(),
            force: false,
        };
        assert!(matches!(
            apply_ref_updates(&repo, &req),
            Err(ProtocolError::Core(tin_core::TinError::NotFastForward { .. }))
        ));
        assert_eq!(repo.read_branch("main").unwrap(), c2.id, "refs unchanged");

        let forced = UpdateRefs {
            updates,
            force: true,
        };
        apply_ref_updates(&repo, &forced).unwrap();
        assert_eq!(repo.read_branch("main").unwrap(), divergent.id);
    }

    #[test]
    fn ref_update_to_unknown_commit_is_invalid() {
        let (_dir, repo) = make_repo();
        let mut updates = std::collections::BTreeMap::new();
        updates.insert("main".to_string(), "does-not-exist".to_string());
        let req = UpdateRefs {
            updates,
            force: true,
        };
        assert!(matches!(
            apply_ref_updates(&repo, &req),
            Err(ProtocolError::InvalidRequest(_))
        ));
    }

    #[test]
    fn advertisement_covers_store_contents() {
        let (_dir, repo) = make_repo();
        let thread = thread_with(&repo, "hello", 1);
        let c1 = commit_with(&repo, "", vec![], 1);
        repo.write_branch("main", &c1.id).unwrap();

        let ad = advertise(&repo).unwrap();
        assert_eq!(ad.head, "main");
        assert_eq!(ad.branches["main"], c1.id);
        assert_eq!(ad.commit_ids, vec![c1.id.clone()]);
        assert_eq!(ad.thread_ids, vec![thread.id.clone()]);
        assert_eq!(
            ad.thread_versions[&thread.id],
            vec![thread.content_hash()]
        );
    }
}
