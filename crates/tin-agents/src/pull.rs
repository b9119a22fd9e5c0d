//! Pull-based import: synchronous fetch of vendor session logs into
//! threads, with content-hash dedup against prior imports.

use tracing::{debug, info};

use tin_core::repo::Repository;
use tin_core::Thread;

use crate::error::Result;

/// Knobs for pull imports.
#[derive(Debug, Clone, Default)]
pub struct PullOptions {
    /// Stage the imported thread after saving.
    pub stage: bool,
}

/// Vendor-side pull integration.
pub trait PullIntegration: Send + Sync {
    fn agent(&self) -> &str;

    /// Vendor session ids available for import, newest first.
    fn list(&self, limit: usize) -> Result<Vec<String>>;

    /// Import one session into the repository.
    fn pull(&self, repo: &Repository, id: &str, opts: &PullOptions) -> Result<Thread>;

    /// Import the `count` most recent sessions.
    fn pull_recent(
        &self,
        repo: &Repository,
        count: usize,
        opts: &PullOptions,
    ) -> Result<Vec<Thread>> {
        let mut threads = Vec::new();
        for id in self.list(count)? {
            threads.push(self.pull(repo, &id, opts)?);
        }
        Ok(threads)
    }
}

/// Persist a freshly parsed thread unless an identical import already
/// exists for the same vendor session. Returns the surviving thread.
pub fn save_pulled_thread(
    repo: &Repository,
    thread: Thread,
    opts: &PullOptions,
) -> Result<Thread> {
    let content_hash = thread.content_hash();

    if let Some(existing) = repo
        .find_threads_by_session_id(&thread.agent_session_id)?
        .into_iter()
        .find(|t| t.content_hash() == content_hash)
    {
        debug!(
            thread_id = %existing.id,
            session = %thread.agent_session_id,
            "pull deduplicated against existing thread"
        );
        return Ok(existing);
    }

    repo.save_thread(&thread)?;
    if opts.stage {
        repo.stage_thread(&thread.id, thread.messages.len(), &content_hash)?;
    }
    info!(
        event = "pull.imported",
        thread_id = %thread.id,
        messages = thread.messages.len(),
    );
    Ok(thread)
}
