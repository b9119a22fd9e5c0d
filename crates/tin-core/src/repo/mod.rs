//! Repository facade: invariant-enforcing operations over the object store.
//!
//! The facade owns single-object and listing semantics. The multi-step
//! pipelines live next door: [`commit`] for staging/commit, [`merge`] for
//! branch merges and [`sync`] for SCM branch parity.

pub mod commit;
pub mod merge;
pub mod sync;

use std::path::Path;

use tracing::{debug, warn};

use crate::error::{Result, TinError};
use crate::model::{Config, Index, MergeState, Thread, ThreadRef, ThreadStatus, TinCommit};
use crate::store::ObjectStore;

pub use commit::{CommitOptions, CommitOutcome};
pub use merge::{MergeOptions, MergeOutcome};
pub use sync::{BranchState, SyncDirection, SyncOutcome};

/// Branch names that can never be deleted.
const PROTECTED_BRANCHES: &[&str] = &["main", "master"];

/// Ensure `.tin/` is listed in the working tree's `.gitignore`.
fn ignore_store_dir(dir: &Path) -> Result<()> {
    let entry = format!("{}/", crate::store::STORE_DIR);
    let path = dir.join(".gitignore");
    let existing = std::fs::read_to_string(&path).unwrap_or_default();
    if existing
        .lines()
        .any(|line| line.trim() == entry || line.trim() == crate::store::STORE_DIR)
    {
        return Ok(());
    }
    let mut content = existing;
    if !content.is_empty() && !content.ends_with('\n') {
        content.push('\n');
    }
    content.push_str(&entry);
    content.push('\n');
    std::fs::write(path, content)?;
    Ok(())
}

/// A tin repository: the object store plus the operations of §4.3.
pub struct Repository {
    store: ObjectStore,
}

impl Repository {
    /// Create a `.tin/` store under `dir` and open it. Adds the store to
    /// `.gitignore` so `git add .` never captures it.
    pub fn init(dir: impl AsRef<Path>) -> Result<Self> {
        let store = ObjectStore::init(&dir)?;
        ignore_store_dir(dir.as_ref())?;
        Ok(Self { store })
    }

    /// Create a bare store at `dir` and open it.
    pub fn init_bare(dir: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            store: ObjectStore::init_bare(dir)?,
        })
    }

    /// Open the repository containing `start`, searching upward.
    pub fn discover(start: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            store: ObjectStore::discover(start)?,
        })
    }

    /// Open a bare repository at exactly `dir`.
    pub fn open_bare(dir: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            store: ObjectStore::open_bare(dir)?,
        })
    }

    pub fn store(&self) -> &ObjectStore {
        &self.store
    }

    pub fn work_dir(&self) -> Option<&Path> {
        self.store.work_dir()
    }

    pub fn is_bare(&self) -> bool {
        self.store.is_bare()
    }

    // ---- threads ----

    /// Persist `thread`: a versioned snapshot for its current content hash
    /// (if not already present) followed by the latest snapshot.
    ///
    /// Idempotent for identical content. If the stored latest is fully
    /// committed and `thread` carries fewer messages under a different
    /// hash, the latest snapshot is left alone (the version snapshot is
    /// still written) — a committed thread file is never overwritten with
    /// stale content.
    pub fn save_thread(&self, thread: &Thread) -> Result<String> {
        let content_hash = thread.content_hash();
        let _lock = self.store.lock_thread(&thread.id)?;

        if !self.store.thread_version_exists(&thread.id, &content_hash) {
            self.store.save_thread_version(thread, &content_hash)?;
        }

        if let Ok(existing) = self.store.load_thread(&thread.id) {
            let existing_hash = existing.content_hash();
            if existing.is_fully_committed()
                && existing_hash != content_hash
                && thread.messages.len() < existing.messages.len()
            {
                warn!(
                    thread_id = %thread.id,
                    "refusing to overwrite committed thread with stale content"
                );
                return Ok(content_hash);
            }
        }

        self.store.save_thread_latest(thread)?;
        debug!(thread_id = %thread.id, content_hash = %content_hash, "thread saved");
        Ok(content_hash)
    }

    pub fn load_thread(&self, id: &str) -> Result<Thread> {
        self.store.load_thread(id)
    }

    pub fn load_thread_version(&self, id: &str, content_hash: &str) -> Result<Thread> {
        self.store.load_thread_version(id, content_hash)
    }

    pub fn thread_exists(&self, id: &str) -> bool {
        self.store.thread_exists(id)
    }

    /// All threads, newest `started_at` first. Unreadable entries are
    /// skipped with a warning.
    pub fn list_threads(&self) -> Result<Vec<Thread>> {
        let mut threads = Vec::new();
        for id in self.store.list_thread_ids()? {
            match self.store.load_thread(&id) {
                Ok(thread) => threads.push(thread),
                Err(e) => warn!(thread_id = %id, error = %e, "skipping unreadable thread"),
            }
        }
        threads.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(threads)
    }

    pub fn find_threads_by_session_id(&self, session_id: &str) -> Result<Vec<Thread>> {
        Ok(self
            .list_threads()?
            .into_iter()
            .filter(|t| t.agent_session_id == session_id)
            .collect())
    }

    pub fn find_child_threads(&self, parent_thread_id: &str) -> Result<Vec<Thread>> {
        Ok(self
            .list_threads()?
            .into_iter()
            .filter(|t| t.parent_thread_id.as_deref() == Some(parent_thread_id))
            .collect())
    }

    /// Delete a thread. Refused while the thread is active or referenced
    /// by any commit, unless `force` is set. Unstages it either way.
    pub fn delete_thread(&self, id: &str, force: bool) -> Result<()> {
        let thread = self.store.load_thread(id)?;
        if !force {
            if thread.status == ThreadStatus::Active && !thread.messages.is_empty() {
                return Err(TinError::Invalid {
                    kind: "thread",
                    reason: format!("{id} is active; complete it or pass --force"),
                });
            }
            if self.is_thread_referenced(id)? {
                return Err(TinError::Invalid {
                    kind: "thread",
                    reason: format!("{id} is referenced by a commit; pass --force"),
                });
            }
        }
        self.unstage_thread(id)?;
        let _lock = self.store.lock_thread(id)?;
        self.store.delete_thread(id)?;
        self.store.delete_thread_versions(id)?;
        Ok(())
    }

    fn is_thread_referenced(&self, thread_id: &str) -> Result<bool> {
        for commit_id in self.store.list_commit_ids()? {
            match self.store.load_commit(&commit_id) {
                Ok(c) if c.thread_ref(thread_id).is_some() => return Ok(true),
                Ok(_) => {}
                Err(e) => warn!(commit_id = %commit_id, error = %e, "skipping unreadable commit"),
            }
        }
        Ok(false)
    }

    /// Delete threads with zero messages; unstages them first. Returns the
    /// ids removed.
    pub fn prune_empty_threads(&self) -> Result<Vec<String>> {
        let mut pruned = Vec::new();
        for thread in self.list_threads()? {
            if thread.messages.is_empty() {
                self.unstage_thread(&thread.id)?;
                let _lock = self.store.lock_thread(&thread.id)?;
                self.store.delete_thread(&thread.id)?;
                self.store.delete_thread_versions(&thread.id)?;
                pruned.push(thread.id);
            }
        }
        Ok(pruned)
    }

    // ---- staging ----

    /// Insert-or-update the index entry for `thread_id` and mark the
    /// thread staged. The content hash is mandatory at every callsite.
    pub fn stage_thread(
        &self,
        thread_id: &str,
        message_count: usize,
        content_hash: &str,
    ) -> Result<()> {
        let mut thread = self.store.load_thread(thread_id)?;

        {
            let _lock = self.store.lock_repo()?;
            let mut index = self.store.read_index()?;
            index.stage(ThreadRef::new(thread_id, message_count, content_hash));
            self.store.write_index(&index)?;
        }

        if thread.status != ThreadStatus::Committed {
            thread.status = ThreadStatus::Staged;
            let _lock = self.store.lock_thread(thread_id)?;
            self.store.save_thread_latest(&thread)?;
        }
        debug!(thread_id = %thread_id, message_count, "thread staged");
        Ok(())
    }

    /// Remove `thread_id` from the index, reverting its status.
    pub fn unstage_thread(&self, thread_id: &str) -> Result<()> {
        {
            let _lock = self.store.lock_repo()?;
            let mut index = self.store.read_index()?;
            if !index.unstage(thread_id) {
                return Ok(());
            }
            self.store.write_index(&index)?;
        }

        if let Ok(mut thread) = self.store.load_thread(thread_id) {
            if thread.status == ThreadStatus::Staged {
                thread.status = if thread.completed_at.is_some() {
                    ThreadStatus::Completed
                } else {
                    ThreadStatus::Active
                };
                let _lock = self.store.lock_thread(thread_id)?;
                self.store.save_thread_latest(&thread)?;
            }
        }
        Ok(())
    }

    pub fn clear_index(&self) -> Result<()> {
        let _lock = self.store.lock_repo()?;
        self.store.write_index(&Index::new())
    }

    pub fn get_staged(&self) -> Result<Index> {
        self.store.read_index()
    }

    /// Threads that are neither staged nor fully committed.
    pub fn get_unstaged_threads(&self) -> Result<Vec<Thread>> {
        let index = self.store.read_index()?;
        Ok(self
            .list_threads()?
            .into_iter()
            .filter(|t| !index.contains(&t.id) && !t.is_fully_committed())
            .collect())
    }

    // ---- commits ----

    pub fn save_commit(&self, commit: &TinCommit) -> Result<()> {
        self.store.save_commit(commit)
    }

    pub fn load_commit(&self, id: &str) -> Result<TinCommit> {
        self.store.load_commit(id)
    }

    pub fn commit_exists(&self, id: &str) -> bool {
        self.store.commit_exists(id)
    }

    /// All commits, newest timestamp first. Unreadable entries skipped.
    pub fn list_commits(&self) -> Result<Vec<TinCommit>> {
        let mut commits = Vec::new();
        for id in self.store.list_commit_ids()? {
            match self.store.load_commit(&id) {
                Ok(commit) => commits.push(commit),
                Err(e) => warn!(commit_id = %id, error = %e, "skipping unreadable commit"),
            }
        }
        commits.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(commits)
    }

    /// Walk the first-parent chain from `from`. `limit` of 0 means no
    /// limit. Merge second parents are not traversed.
    pub fn get_commit_history(&self, from: &str, limit: usize) -> Result<Vec<TinCommit>> {
        let mut history = Vec::new();
        let mut cursor = from.to_string();
        while !cursor.is_empty() {
            if limit != 0 && history.len() >= limit {
                break;
            }
            let commit = self.store.load_commit(&cursor)?;
            cursor = commit.parent_commit_id.clone();
            history.push(commit);
        }
        Ok(history)
    }

    /// Latest `ThreadRef` per thread id along the linear history of `from`
    /// (first occurrence wins, i.e. the newest version of each thread).
    pub fn collect_threads_from_history(&self, from: &str) -> Result<Vec<ThreadRef>> {
        let mut seen = std::collections::HashSet::new();
        let mut refs = Vec::new();
        for commit in self.get_commit_history(from, 0)? {
            for thread_ref in &commit.threads {
                if seen.insert(thread_ref.thread_id.clone()) {
                    refs.push(thread_ref.clone());
                }
            }
        }
        Ok(refs)
    }

    /// Linear ancestor check: walks first parents from `b` looking for `a`.
    /// Every commit is its own ancestor; the empty id is an ancestor of
    /// everything.
    pub fn is_ancestor(&self, a: &str, b: &str) -> Result<bool> {
        if a.is_empty() {
            return Ok(true);
        }
        let mut cursor = b.to_string();
        while !cursor.is_empty() {
            if cursor == a {
                return Ok(true);
            }
            cursor = self.store.load_commit(&cursor)?.parent_commit_id;
        }
        Ok(false)
    }

    // ---- branches ----

    pub fn write_branch(&self, name: &str, commit_id: &str) -> Result<()> {
        let _lock = self.store.lock_repo()?;
        self.store.write_ref(name, commit_id)
    }

    /// Commit id at the tip of `name`; empty string when the branch does
    /// not exist (not an error).
    pub fn read_branch(&self, name: &str) -> Result<String> {
        Ok(self.store.read_ref(name)?.unwrap_or_default())
    }

    pub fn branch_exists(&self, name: &str) -> bool {
        self.store.ref_exists(name)
    }

    /// Delete a branch. The current branch and `main`/`master` are refused.
    pub fn delete_branch(&self, name: &str) -> Result<()> {
        if name == self.head()? {
            return Err(TinError::Invalid {
                kind: "branch",
                reason: format!("cannot delete the current branch {name}"),
            });
        }
        if PROTECTED_BRANCHES.contains(&name) {
            return Err(TinError::Invalid {
                kind: "branch",
                reason: format!("cannot delete protected branch {name}"),
            });
        }
        let _lock = self.store.lock_repo()?;
        self.store.delete_ref(name)
    }

    pub fn list_branches(&self) -> Result<Vec<String>> {
        self.store.list_refs()
    }

    pub fn head(&self) -> Result<String> {
        self.store.read_head()
    }

    pub fn set_head(&self, branch: &str) -> Result<()> {
        self.store.write_head(branch)
    }

    /// Tip of the current branch (empty when it has no commits).
    pub fn current_tip(&self) -> Result<String> {
        let head = self.head()?;
        self.read_branch(&head)
    }

    // ---- config / merge state ----

    pub fn config(&self) -> Result<Config> {
        self.store.read_config()
    }

    pub fn set_config(&self, config: &Config) -> Result<()> {
        self.store.write_config(config)
    }

    pub fn merge_state(&self) -> Result<Option<MergeState>> {
        self.store.read_merge_state()
    }
}
