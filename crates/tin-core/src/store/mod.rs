//! Filesystem-backed object store.
//!
//! Layout, rooted at `.tin/` (or the directory itself for a bare store):
//!
//! ```text
//! config                          JSON
//! HEAD                            text: current branch name
//! index                           JSON
//! MERGE_HEAD                      JSON, present only mid-merge
//! threads/<id>.json
//! thread-versions/<thread_id>/<content_hash>.json
//! commits/<id>.json
//! refs/heads/<branch>             text: commit id (nested dirs for slashes)
//! locks/                          advisory lock files, never synced
//! ```
//!
//! Every write lands in a temporary sibling and renames into place, so
//! readers always observe a complete JSON document.

pub mod lock;

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::warn;

use crate::error::{Result, TinError};
use crate::model::{Config, Index, MergeState, Thread, TinCommit};
use lock::LockGuard;

/// Directory name of a non-bare store.
pub const STORE_DIR: &str = ".tin";

/// Default branch name written by `init`.
pub const DEFAULT_BRANCH: &str = "main";

const THREADS_DIR: &str = "threads";
const VERSIONS_DIR: &str = "thread-versions";
const COMMITS_DIR: &str = "commits";
const REFS_DIR: &str = "refs/heads";
const LOCKS_DIR: &str = "locks";

/// Persistent maps for threads, versions, commits and refs, plus the
/// HEAD/index/config/MERGE_HEAD singletons.
pub struct ObjectStore {
    root: PathBuf,
    work_dir: Option<PathBuf>,
}

impl ObjectStore {
    /// Initialize a fresh `.tin/` store under `dir`.
    pub fn init(dir: impl AsRef<Path>) -> Result<Self> {
        let work_dir = dir.as_ref().to_path_buf();
        let root = work_dir.join(STORE_DIR);
        if root.exists() {
            return Err(TinError::already_exists(
                "repository",
                root.display().to_string(),
            ));
        }
        let store = Self {
            root,
            work_dir: Some(work_dir),
        };
        store.create_layout()?;
        Ok(store)
    }

    /// Initialize a bare store whose layout begins at `dir` itself.
    pub fn init_bare(dir: impl AsRef<Path>) -> Result<Self> {
        let root = dir.as_ref().to_path_buf();
        if root.join("HEAD").exists() {
            return Err(TinError::already_exists(
                "repository",
                root.display().to_string(),
            ));
        }
        let store = Self {
            root,
            work_dir: None,
        };
        store.create_layout()?;
        Ok(store)
    }

    /// Search upward from `start` for a `.tin/` directory.
    pub fn discover(start: impl AsRef<Path>) -> Result<Self> {
        let start = start.as_ref();
        let mut dir = if start.is_absolute() {
            start.to_path_buf()
        } else {
            std::env::current_dir()?.join(start)
        };
        loop {
            let candidate = dir.join(STORE_DIR);
            if candidate.is_dir() {
                return Ok(Self {
                    root: candidate,
                    work_dir: Some(dir),
                });
            }
            if !dir.pop() {
                return Err(TinError::NotARepository(start.to_path_buf()));
            }
        }
    }

    /// Open a bare store at exactly `dir`.
    pub fn open_bare(dir: impl AsRef<Path>) -> Result<Self> {
        let root = dir.as_ref().to_path_buf();
        if !root.join("HEAD").is_file() {
            return Err(TinError::NotARepository(root));
        }
        Ok(Self {
            root,
            work_dir: None,
        })
    }

    fn create_layout(&self) -> Result<()> {
        fs::create_dir_all(self.root.join(THREADS_DIR))?;
        fs::create_dir_all(self.root.join(VERSIONS_DIR))?;
        fs::create_dir_all(self.root.join(COMMITS_DIR))?;
        fs::create_dir_all(self.root.join(REFS_DIR))?;
        fs::create_dir_all(self.root.join(LOCKS_DIR))?;
        self.write_head(DEFAULT_BRANCH)?;
        self.write_ref(DEFAULT_BRANCH, "")?;
        self.write_config(&Config::default())?;
        self.write_index(&Index::new())?;
        Ok(())
    }

    /// The store root (`.tin/`, or the bare directory).
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The working tree containing `.tin/`; absent for bare stores.
    pub fn work_dir(&self) -> Option<&Path> {
        self.work_dir.as_deref()
    }

    pub fn is_bare(&self) -> bool {
        self.work_dir.is_none()
    }

    // ---- primitives ----

    /// Write to a temporary sibling, then rename into place.
    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let dir = path
            .parent()
            .ok_or_else(|| TinError::Invalid {
                kind: "path",
                reason: format!("{} has no parent", path.display()),
            })?;
        fs::create_dir_all(dir)?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(bytes)?;
        tmp.persist(path).map_err(|e| TinError::Io(e.error))?;
        Ok(())
    }

    fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.write_atomic(path, &bytes)
    }

    fn read_json<T: DeserializeOwned>(
        &self,
        path: &Path,
        kind: &'static str,
        id: &str,
    ) -> Result<T> {
        let bytes = fs::read(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                TinError::not_found(kind, id)
            } else {
                TinError::Io(e)
            }
        })?;
        serde_json::from_slice(&bytes).map_err(|source| TinError::Corrupt {
            kind,
            id: id.to_string(),
            source,
        })
    }

    /// Reject ids that would escape their space on disk.
    fn checked_id<'a>(&self, kind: &'static str, id: &'a str) -> Result<&'a str> {
        if id.is_empty()
            || id.contains('/')
            || id.contains('\\')
            || id.contains("..")
        {
            return Err(TinError::Invalid {
                kind,
                reason: format!("unusable id {id:?}"),
            });
        }
        Ok(id)
    }

    fn checked_branch<'a>(&self, name: &'a str) -> Result<&'a str> {
        let ok = !name.is_empty()
            && !name.starts_with('/')
            && !name.ends_with('/')
            && !name.contains('\\')
            && name.split('/').all(|seg| {
                !seg.is_empty() && seg != "." && seg != ".." && !seg.starts_with('.')
            });
        if ok {
            Ok(name)
        } else {
            Err(TinError::Invalid {
                kind: "branch",
                reason: format!("unusable branch name {name:?}"),
            })
        }
    }

    // ---- threads (latest snapshots) ----

    fn thread_path(&self, id: &str) -> PathBuf {
        self.root.join(THREADS_DIR).join(format!("{id}.json"))
    }

    pub fn save_thread_latest(&self, thread: &Thread) -> Result<()> {
        let id = self.checked_id("thread", &thread.id)?;
        self.write_json(&self.thread_path(id), thread)
    }

    pub fn load_thread(&self, id: &str) -> Result<Thread> {
        let id = self.checked_id("thread", id)?;
        self.read_json(&self.thread_path(id), "thread", id)
    }

    pub fn thread_exists(&self, id: &str) -> bool {
        self.checked_id("thread", id)
            .map(|id| self.thread_path(id).is_file())
            .unwrap_or(false)
    }

    pub fn delete_thread(&self, id: &str) -> Result<()> {
        let id = self.checked_id("thread", id)?;
        match fs::remove_file(self.thread_path(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(TinError::not_found("thread", id))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn list_thread_ids(&self) -> Result<Vec<String>> {
        self.list_json_ids(&self.root.join(THREADS_DIR))
    }

    // ---- thread versions ----

    fn version_path(&self, thread_id: &str, content_hash: &str) -> PathBuf {
        self.root
            .join(VERSIONS_DIR)
            .join(thread_id)
            .join(format!("{content_hash}.json"))
    }

    pub fn save_thread_version(&self, thread: &Thread, content_hash: &str) -> Result<()> {
        let id = self.checked_id("thread", &thread.id)?;
        let hash = self.checked_id("thread version", content_hash)?;
        self.write_json(&self.version_path(id, hash), thread)
    }

    pub fn load_thread_version(&self, thread_id: &str, content_hash: &str) -> Result<Thread> {
        let id = self.checked_id("thread", thread_id)?;
        let hash = self.checked_id("thread version", content_hash)?;
        self.read_json(
            &self.version_path(id, hash),
            "thread version",
            &format!("{id}@{hash}"),
        )
    }

    pub fn thread_version_exists(&self, thread_id: &str, content_hash: &str) -> bool {
        match (
            self.checked_id("thread", thread_id),
            self.checked_id("thread version", content_hash),
        ) {
            (Ok(id), Ok(hash)) => self.version_path(id, hash).is_file(),
            _ => false,
        }
    }

    /// Content hashes with a persisted snapshot for `thread_id`.
    pub fn list_thread_versions(&self, thread_id: &str) -> Result<Vec<String>> {
        let id = self.checked_id("thread", thread_id)?;
        let dir = self.root.join(VERSIONS_DIR).join(id);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        self.list_json_ids(&dir)
    }

    /// Map of thread id to its persisted version hashes, across the store.
    pub fn list_all_thread_versions(&self) -> Result<BTreeMap<String, Vec<String>>> {
        let mut out = BTreeMap::new();
        let dir = self.root.join(VERSIONS_DIR);
        if !dir.is_dir() {
            return Ok(out);
        }
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }
            let thread_id = entry.file_name().to_string_lossy().into_owned();
            let versions = self.list_json_ids(&entry.path())?;
            if !versions.is_empty() {
                out.insert(thread_id, versions);
            }
        }
        Ok(out)
    }

    /// Remove every versioned snapshot of `thread_id`.
    pub fn delete_thread_versions(&self, thread_id: &str) -> Result<()> {
        let id = self.checked_id("thread", thread_id)?;
        let dir = self.root.join(VERSIONS_DIR).join(id);
        if dir.is_dir() {
            fs::remove_dir_all(dir)?;
        }
        Ok(())
    }

    // ---- commits ----

    fn commit_path(&self, id: &str) -> PathBuf {
        self.root.join(COMMITS_DIR).join(format!("{id}.json"))
    }

    pub fn save_commit(&self, commit: &TinCommit) -> Result<()> {
        let id = self.checked_id("commit", &commit.id)?;
        self.write_json(&self.commit_path(id), commit)
    }

    pub fn load_commit(&self, id: &str) -> Result<TinCommit> {
        let id = self.checked_id("commit", id)?;
        self.read_json(&self.commit_path(id), "commit", id)
    }

    pub fn commit_exists(&self, id: &str) -> bool {
        self.checked_id("commit", id)
            .map(|id| self.commit_path(id).is_file())
            .unwrap_or(false)
    }

    pub fn list_commit_ids(&self) -> Result<Vec<String>> {
        self.list_json_ids(&self.root.join(COMMITS_DIR))
    }

    // ---- refs ----

    fn ref_path(&self, branch: &str) -> PathBuf {
        self.root.join(REFS_DIR).join(branch)
    }

    /// Point `branch` at `commit_id` (empty for a branch with no commits).
    pub fn write_ref(&self, branch: &str, commit_id: &str) -> Result<()> {
        let branch = self.checked_branch(branch)?;
        self.write_atomic(&self.ref_path(branch), commit_id.as_bytes())
    }

    /// Commit id for `branch`, or `None` when the branch does not exist.
    pub fn read_ref(&self, branch: &str) -> Result<Option<String>> {
        let branch = self.checked_branch(branch)?;
        match fs::read_to_string(self.ref_path(branch)) {
            Ok(text) => Ok(Some(text.trim().to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn ref_exists(&self, branch: &str) -> bool {
        self.checked_branch(branch)
            .map(|b| self.ref_path(b).is_file())
            .unwrap_or(false)
    }

    pub fn delete_ref(&self, branch: &str) -> Result<()> {
        let branch = self.checked_branch(branch)?;
        match fs::remove_file(self.ref_path(branch)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(TinError::not_found("branch", branch))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Branch names in lexicographic order; nested names keep their slashes.
    pub fn list_refs(&self) -> Result<Vec<String>> {
        let base = self.root.join(REFS_DIR);
        let mut names = Vec::new();
        if base.is_dir() {
            collect_ref_names(&base, &base, &mut names)?;
        }
        names.sort();
        Ok(names)
    }

    // ---- singletons ----

    pub fn write_head(&self, branch: &str) -> Result<()> {
        let branch = self.checked_branch(branch)?;
        self.write_atomic(&self.root.join("HEAD"), branch.as_bytes())
    }

    pub fn read_head(&self) -> Result<String> {
        fs::read_to_string(self.root.join("HEAD"))
            .map(|s| s.trim().to_string())
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    TinError::not_found("HEAD", self.root.display().to_string())
                } else {
                    TinError::Io(e)
                }
            })
    }

    pub fn write_index(&self, index: &Index) -> Result<()> {
        self.write_json(&self.root.join("index"), index)
    }

    pub fn read_index(&self) -> Result<Index> {
        let path = self.root.join("index");
        if !path.is_file() {
            return Ok(Index::new());
        }
        self.read_json(&path, "index", "index")
    }

    pub fn write_config(&self, config: &Config) -> Result<()> {
        self.write_json(&self.root.join("config"), config)
    }

    pub fn read_config(&self) -> Result<Config> {
        let path = self.root.join("config");
        if !path.is_file() {
            return Ok(Config::default());
        }
        self.read_json(&path, "config", "config")
    }

    pub fn write_merge_state(&self, state: &MergeState) -> Result<()> {
        self.write_json(&self.root.join("MERGE_HEAD"), state)
    }

    pub fn read_merge_state(&self) -> Result<Option<MergeState>> {
        let path = self.root.join("MERGE_HEAD");
        if !path.is_file() {
            return Ok(None);
        }
        self.read_json(&path, "merge state", "MERGE_HEAD").map(Some)
    }

    pub fn clear_merge_state(&self) -> Result<()> {
        let path = self.root.join("MERGE_HEAD");
        if path.is_file() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    // ---- session state files ----

    /// Path of the per-agent, per-session state file
    /// (`.<agent>-session-<short>` at the store root).
    pub fn session_state_path(&self, agent: &str, short_session: &str) -> PathBuf {
        self.root
            .join(format!(".{agent}-session-{short_session}"))
    }

    // ---- locks ----

    /// Repository-wide writer lock (index, refs, merge state).
    pub fn lock_repo(&self) -> Result<LockGuard> {
        LockGuard::acquire(self.root.join(LOCKS_DIR).join("repo.lock"))
    }

    /// Per-thread writer lock.
    pub fn lock_thread(&self, thread_id: &str) -> Result<LockGuard> {
        let id = self.checked_id("thread", thread_id)?;
        LockGuard::acquire(self.root.join(LOCKS_DIR).join(format!("{id}.lock")))
    }

    // ---- helpers ----

    /// Ids of `.json` entries in `dir`, skipping anything unreadable.
    fn list_json_ids(&self, dir: &Path) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        if !dir.is_dir() {
            return Ok(ids);
        }
        for entry in fs::read_dir(dir)? {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!(error = %e, dir = %dir.display(), "skipping unreadable entry");
                    continue;
                }
            };
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(id) = name.strip_suffix(".json") {
                ids.push(id.to_string());
            }
        }
        Ok(ids)
    }
}

fn collect_ref_names(base: &Path, dir: &Path, out: &mut Vec<String>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_ref_names(base, &path, out)?;
        } else if let Ok(rel) = path.strip_prefix(base) {
            out.push(rel.to_string_lossy().replace('\\', "/"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Role, ThreadRef};
    use chrono::{TimeZone, Utc};

    fn make_store() -> (tempfile::TempDir, ObjectStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::init(dir.path()).unwrap();
        (dir, store)
    }

    fn make_thread(content: &str) -> Thread {
        let mut t = Thread::new(
            "placeholder",
            "claude-code",
            "sess",
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        );
        t.append(
            Role::Human,
            content,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 1).unwrap(),
            vec![],
        );
        t
    }

    #[test]
    fn init_writes_head_and_default_branch() {
        let (_dir, store) = make_store();
        assert_eq!(store.read_head().unwrap(), "main");
        assert_eq!(store.read_ref("main").unwrap().as_deref(), Some(""));
        assert!(!store.is_bare());
    }

    #[test]
    fn init_twice_fails() {
        let dir = tempfile::tempdir().unwrap();
        ObjectStore::init(dir.path()).unwrap();
        assert!(matches!(
            ObjectStore::init(dir.path()),
            Err(TinError::AlreadyExists { .. })
        ));
    }

    #[test]
    fn discover_walks_upward() {
        let dir = tempfile::tempdir().unwrap();
        ObjectStore::init(dir.path()).unwrap();
        let nested = dir.path().join("a").join("b");
        fs::create_dir_all(&nested).unwrap();
        let store = ObjectStore::discover(&nested).unwrap();
        assert_eq!(store.work_dir().unwrap(), dir.path());
    }

    #[test]
    fn discover_fails_outside_any_repo() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ObjectStore::discover(dir.path()),
            Err(TinError::NotARepository(_))
        ));
    }

    #[test]
    fn bare_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::init_bare(dir.path()).unwrap();
        assert!(store.is_bare());
        assert!(dir.path().join("HEAD").is_file());
        let reopened = ObjectStore::open_bare(dir.path()).unwrap();
        assert_eq!(reopened.read_head().unwrap(), "main");
    }

    #[test]
    fn thread_save_load_delete() {
        let (_dir, store) = make_store();
        let thread = make_thread("hello");
        store.save_thread_latest(&thread).unwrap();
        let loaded = store.load_thread(&thread.id).unwrap();
        assert_eq!(loaded, thread);
        store.delete_thread(&thread.id).unwrap();
        assert!(matches!(
            store.load_thread(&thread.id),
            Err(TinError::NotFound { .. })
        ));
    }

    #[test]
    fn corrupt_thread_surfaces_typed_error() {
        let (_dir, store) = make_store();
        let path = store.root().join(THREADS_DIR).join("bad.json");
        fs::write(&path, b"{not json").unwrap();
        assert!(matches!(
            store.load_thread("bad"),
            Err(TinError::Corrupt { .. })
        ));
    }

    #[test]
    fn versions_listed_per_thread_and_globally() {
        let (_dir, store) = make_store();
        let thread = make_thread("hello");
        let hash = thread.content_hash();
        store.save_thread_version(&thread, &hash).unwrap();
        assert!(store.thread_version_exists(&thread.id, &hash));
        assert_eq!(store.list_thread_versions(&thread.id).unwrap(), vec![hash.clone()]);
        let all = store.list_all_thread_versions().unwrap();
        assert_eq!(all.get(&thread.id).unwrap(), &vec![hash]);
    }

    #[test]
    fn nested_branch_names_map_to_nested_dirs() {
        let (_dir, store) = make_store();
        store.write_ref("feat/login/v2", "abc").unwrap();
        assert_eq!(
            store.read_ref("feat/login/v2").unwrap().as_deref(),
            Some("abc")
        );
        let refs = store.list_refs().unwrap();
        assert_eq!(refs, vec!["feat/login/v2".to_string(), "main".to_string()]);
    }

    #[test]
    fn missing_ref_reads_as_none() {
        let (_dir, store) = make_store();
        assert_eq!(store.read_ref("nope").unwrap(), None);
    }

    #[test]
    fn traversal_ids_rejected() {
        let (_dir, store) = make_store();
        assert!(store.load_thread("../etc/passwd").is_err());
        assert!(store.write_ref("../evil", "x").is_err());
        assert!(store.write_ref(".hidden", "x").is_err());
        assert!(!store.thread_exists("a/b"));
    }

    #[test]
    fn index_and_merge_state_singletons() {
        let (_dir, store) = make_store();
        let mut index = Index::new();
        index.stage(ThreadRef::new("t1", 1, "h1"));
        store.write_index(&index).unwrap();
        assert_eq!(store.read_index().unwrap(), index);

        assert!(store.read_merge_state().unwrap().is_none());
        let state = MergeState {
            source_branch: "feat".into(),
            target_branch: "main".into(),
            source_commit_id: "s".into(),
            target_commit_id: "t".into(),
            git_merge_complete: true,
            collected_threads: vec![],
            renamed_threads: vec![],
        };
        store.write_merge_state(&state).unwrap();
        assert_eq!(store.read_merge_state().unwrap(), Some(state));
        store.clear_merge_state().unwrap();
        assert!(store.read_merge_state().unwrap().is_none());
    }

    #[test]
    fn atomic_write_replaces_existing_content() {
        let (_dir, store) = make_store();
        store.write_ref("main", "first").unwrap();
        store.write_ref("main", "second").unwrap();
        assert_eq!(store.read_ref("main").unwrap().as_deref(), Some("second"));
    }
}
