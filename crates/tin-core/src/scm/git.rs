//! Git implementation of the SCM adapter.
//!
//! Every operation is a `git` subprocess in the repository directory with
//! stderr folded into the error. Git serializes its own index operations;
//! callers that touch tin refs around these calls hold the repository lock.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{Result, TinError};
use crate::scm::ScmAdapter;

/// Shell-out git adapter rooted at a working tree.
pub struct GitScm {
    work_dir: PathBuf,
}

impl GitScm {
    pub fn new(work_dir: impl AsRef<Path>) -> Self {
        Self {
            work_dir: work_dir.as_ref().to_path_buf(),
        }
    }

    /// Whether `dir` is inside a git work tree.
    pub fn is_repo(dir: &Path) -> bool {
        Command::new("git")
            .args(["rev-parse", "--is-inside-work-tree"])
            .current_dir(dir)
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn run(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.work_dir)
            .output()
            .map_err(|e| TinError::Scm(format!("failed to run git: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TinError::Scm(format!(
                "git {} failed: {}",
                args.join(" "),
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Like `run`, but a non-zero exit is a `false` rather than an error.
    fn check(&self, args: &[&str]) -> Result<bool> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.work_dir)
            .output()
            .map_err(|e| TinError::Scm(format!("failed to run git: {e}")))?;
        Ok(output.status.success())
    }

    fn git_dir(&self) -> Result<PathBuf> {
        let dir = self.run(&["rev-parse", "--git-dir"])?;
        let path = PathBuf::from(&dir);
        if path.is_absolute() {
            Ok(path)
        } else {
            Ok(self.work_dir.join(path))
        }
    }

    /// `status --porcelain` lines, with the thread store filtered out.
    /// The store tracks the source history; it is never part of it.
    fn status_lines(&self) -> Result<Vec<String>> {
        let status = self.run(&["status", "--porcelain"])?;
        Ok(status
            .lines()
            .filter(|line| {
                let path = line.get(3..).unwrap_or("");
                !path.starts_with(crate::store::STORE_DIR)
            })
            .map(str::to_string)
            .collect())
    }
}

impl ScmAdapter for GitScm {
    fn current_branch(&self) -> Result<String> {
        self.run(&["rev-parse", "--abbrev-ref", "HEAD"])
    }

    fn current_hash(&self) -> Result<String> {
        self.run(&["rev-parse", "HEAD"])
    }

    fn has_uncommitted_changes(&self) -> Result<bool> {
        Ok(!self.status_lines()?.is_empty())
    }

    fn has_staged_changes(&self) -> Result<bool> {
        Ok(!self.check(&["diff", "--cached", "--quiet"])?)
    }

    fn changed_files(&self) -> Result<Vec<String>> {
        Ok(self
            .status_lines()?
            .iter()
            .filter_map(|line| line.get(3..))
            .map(|path| {
                // Renames are reported as `old -> new`; keep the new path.
                match path.split_once(" -> ") {
                    Some((_, new)) => new.to_string(),
                    None => path.to_string(),
                }
            })
            .collect())
    }

    fn add(&self, files: &[String]) -> Result<()> {
        if files.is_empty() {
            return Ok(());
        }
        let mut args = vec!["add", "--"];
        args.extend(files.iter().map(String::as_str));
        self.run(&args)?;
        Ok(())
    }

    fn commit(&self, message: &str) -> Result<String> {
        self.run(&["commit", "-m", message])?;
        self.current_hash()
    }

    fn commit_empty(&self, message: &str) -> Result<String> {
        self.run(&["commit", "--allow-empty", "-m", message])?;
        self.current_hash()
    }

    fn create_branch(&self, name: &str) -> Result<()> {
        self.run(&["branch", name])?;
        Ok(())
    }

    fn checkout(&self, reference: &str) -> Result<()> {
        self.run(&["checkout", reference])?;
        Ok(())
    }

    fn branch_exists(&self, name: &str) -> Result<bool> {
        self.check(&[
            "show-ref",
            "--verify",
            "--quiet",
            &format!("refs/heads/{name}"),
        ])
    }

    fn delete_branch(&self, name: &str) -> Result<()> {
        self.run(&["branch", "-D", name])?;
        Ok(())
    }

    fn merge_begin(&self, branch: &str) -> Result<bool> {
        let output = Command::new("git")
            .args(["merge", "--no-commit", "--no-ff", branch])
            .current_dir(&self.work_dir)
            .output()
            .map_err(|e| TinError::Scm(format!("failed to run git: {e}")))?;
        if output.status.success() {
            return Ok(false);
        }
        // A failed merge with conflict markers is a paused merge, not an
        // error; anything else is.
        if self.has_merge_conflicts()? {
            Ok(true)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(TinError::Scm(format!(
                "git merge {branch} failed: {}",
                stderr.trim()
            )))
        }
    }

    fn merge_abort(&self) -> Result<()> {
        self.run(&["merge", "--abort"])?;
        Ok(())
    }

    fn merge_commit(&self, message: &str) -> Result<String> {
        self.run(&["commit", "--no-edit", "-m", message])?;
        self.current_hash()
    }

    fn merge_ff(&self, branch: &str) -> Result<()> {
        self.run(&["merge", "--ff-only", branch])?;
        Ok(())
    }

    fn is_in_merge_state(&self) -> Result<bool> {
        Ok(self.git_dir()?.join("MERGE_HEAD").exists())
    }

    fn has_merge_conflicts(&self) -> Result<bool> {
        let conflicts = self.run(&["diff", "--name-only", "--diff-filter=U"])?;
        Ok(!conflicts.is_empty())
    }

    fn push(&self, remote: &str, branch: &str, force: bool) -> Result<()> {
        if force {
            self.run(&["push", "--force", remote, branch])?;
        } else {
            self.run(&["push", remote, branch])?;
        }
        Ok(())
    }

    fn pull(&self, remote: &str, branch: &str) -> Result<()> {
        self.run(&["pull", remote, branch])?;
        Ok(())
    }

    fn remote_url(&self, name: &str) -> Result<Option<String>> {
        let output = Command::new("git")
            .args(["remote", "get-url", name])
            .current_dir(&self.work_dir)
            .output()
            .map_err(|e| TinError::Scm(format!("failed to run git: {e}")))?;
        if output.status.success() {
            Ok(Some(
                String::from_utf8_lossy(&output.stdout).trim().to_string(),
            ))
        } else {
            Ok(None)
        }
    }

    fn author(&self) -> Result<String> {
        let name = self.run(&["config", "user.name"]).unwrap_or_default();
        let email = self.run(&["config", "user.email"]).unwrap_or_default();
        if name.is_empty() && email.is_empty() {
            return Ok("unknown".to_string());
        }
        Ok(format!("{name} <{email}>"))
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::{make_git_repo, run_git};
    use super::*;

    #[test]
    fn current_branch_and_hash() {
        let repo = make_git_repo();
        let scm = GitScm::new(repo.path());
        assert_eq!(scm.current_branch().unwrap(), "main");
        let hash = scm.current_hash().unwrap();
        assert_eq!(hash.len(), 40);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn uncommitted_and_staged_detection() {
        let repo = make_git_repo();
        let scm = GitScm::new(repo.path());
        assert!(!scm.has_uncommitted_changes().unwrap());

        std::fs::write(repo.path().join("a.txt"), "one").unwrap();
        assert!(scm.has_uncommitted_changes().unwrap());
        assert!(!scm.has_staged_changes().unwrap());
        assert_eq!(scm.changed_files().unwrap(), vec!["a.txt".to_string()]);

        scm.add(&["a.txt".to_string()]).unwrap();
        assert!(scm.has_staged_changes().unwrap());
    }

    #[test]
    fn commit_returns_new_hash() {
        let repo = make_git_repo();
        let scm = GitScm::new(repo.path());
        let before = scm.current_hash().unwrap();
        std::fs::write(repo.path().join("a.txt"), "one").unwrap();
        scm.add(&["a.txt".to_string()]).unwrap();
        let after = scm.commit("add a.txt").unwrap();
        assert_ne!(before, after);
        assert_eq!(scm.current_hash().unwrap(), after);
    }

    #[test]
    fn empty_commit_succeeds() {
        let repo = make_git_repo();
        let scm = GitScm::new(repo.path());
        let hash = scm.commit_empty("empty marker").unwrap();
        assert_eq!(scm.current_hash().unwrap(), hash);
    }

    #[test]
    fn branch_lifecycle() {
        let repo = make_git_repo();
        let scm = GitScm::new(repo.path());
        assert!(!scm.branch_exists("feat").unwrap());
        scm.create_branch("feat").unwrap();
        assert!(scm.branch_exists("feat").unwrap());
        scm.checkout("feat").unwrap();
        assert_eq!(scm.current_branch().unwrap(), "feat");
        scm.checkout("main").unwrap();
        scm.delete_branch("feat").unwrap();
        assert!(!scm.branch_exists("feat").unwrap());
    }

    #[test]
    fn fast_forward_merge() {
        let repo = make_git_repo();
        let scm = GitScm::new(repo.path());
        scm.create_branch("feat").unwrap();
        scm.checkout("feat").unwrap();
        std::fs::write(repo.path().join("f.txt"), "feature").unwrap();
        scm.add(&["f.txt".to_string()]).unwrap();
        let tip = scm.commit("feature work").unwrap();
        scm.checkout("main").unwrap();
        scm.merge_ff("feat").unwrap();
        assert_eq!(scm.current_hash().unwrap(), tip);
    }

    #[test]
    fn conflicted_merge_pauses_then_aborts() {
        let repo = make_git_repo();
        let scm = GitScm::new(repo.path());
        std::fs::write(repo.path().join("c.txt"), "base\n").unwrap();
        scm.add(&["c.txt".to_string()]).unwrap();
        scm.commit("base").unwrap();

        scm.create_branch("feat").unwrap();
        std::fs::write(repo.path().join("c.txt"), "main side\n").unwrap();
        scm.add(&["c.txt".to_string()]).unwrap();
        scm.commit("main side").unwrap();

        scm.checkout("feat").unwrap();
        std::fs::write(repo.path().join("c.txt"), "feat side\n").unwrap();
        scm.add(&["c.txt".to_string()]).unwrap();
        scm.commit("feat side").unwrap();
        scm.checkout("main").unwrap();

        let conflicts = scm.merge_begin("feat").unwrap();
        assert!(conflicts);
        assert!(scm.is_in_merge_state().unwrap());
        assert!(scm.has_merge_conflicts().unwrap());

        scm.merge_abort().unwrap();
        assert!(!scm.is_in_merge_state().unwrap());
    }

    #[test]
    fn remote_url_absent_is_none() {
        let repo = make_git_repo();
        let scm = GitScm::new(repo.path());
        assert_eq!(scm.remote_url("origin").unwrap(), None);
        run_git(
            repo.path(),
            &["remote", "add", "origin", "https://example.com/r.git"],
        );
        assert_eq!(
            scm.remote_url("origin").unwrap().as_deref(),
            Some("https://example.com/r.git")
        );
    }

    #[test]
    fn author_formats_name_and_email() {
        let repo = make_git_repo();
        let scm = GitScm::new(repo.path());
        assert_eq!(scm.author().unwrap(), "test-user <test@example.com>");
    }
}
