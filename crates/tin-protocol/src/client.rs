//! Client-side push, pull and config conversations.

use tracing::{debug, info};

use tin_core::repo::Repository;
use tin_core::TinError;

use crate::carrier::Carrier;
use crate::envelope::{Envelope, MessageType, PROTOCOL_VERSION};
use crate::error::{ProtocolError, Result};
use crate::http::HttpCarrier;
use crate::messages::{
    ConfigValues, GetConfig, Hello, OkMsg, Operation, Pack, RefsAd, UpdateRefs,
};
use crate::pack::{apply_pack, build_push_pack, diff_wants, PackStats};
use crate::tcp::TcpCarrier;

/// A parsed remote URL: `tcp://host:port/repo` or `http(s)://host/repo`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteUrl {
    pub scheme: String,
    pub authority: String,
    pub repo_path: String,
}

impl RemoteUrl {
    pub fn parse(url: &str) -> Result<Self> {
        let (scheme, rest) = url.split_once("://").ok_or_else(|| {
            ProtocolError::InvalidRequest(format!("remote url {url:?} has no scheme"))
        })?;
        if !matches!(scheme, "tcp" | "http" | "https") {
            return Err(ProtocolError::InvalidRequest(format!(
                "unsupported url scheme {scheme:?}"
            )));
        }
        let (authority, repo_path) = match rest.split_once('/') {
            Some((authority, path)) => (authority, path.trim_matches('/')),
            None => (rest, ""),
        };
        if authority.is_empty() {
            return Err(ProtocolError::InvalidRequest(format!(
                "remote url {url:?} has no host"
            )));
        }
        Ok(Self {
            scheme: scheme.to_string(),
            authority: authority.to_string(),
            repo_path: repo_path.to_string(),
        })
    }

    /// Host portion used for credential lookup.
    pub fn host(&self) -> &str {
        &self.authority
    }
}

/// Open a carrier appropriate for the remote's scheme.
pub async fn connect(url: &RemoteUrl) -> Result<Box<dyn Carrier>> {
    match url.scheme.as_str() {
        "tcp" => Ok(Box::new(TcpCarrier::connect(&url.authority).await?)),
        "http" | "https" => {
            let credentials = tin_core::resolve_credentials(url.host())?;
            Ok(Box::new(HttpCarrier::new(
                format!("{}://{}", url.scheme, url.authority),
                credentials,
            )))
        }
        _ => unreachable!("scheme validated at parse"),
    }
}

fn hello_frame(operation: Operation, repo_path: &str) -> Result<Envelope> {
    Envelope::new(
        MessageType::Hello,
        &Hello {
            version: PROTOCOL_VERSION,
            operation,
            repo_path: repo_path.to_string(),
        },
    )
}

/// Outcome of a push.
#[derive(Debug, Clone)]
pub struct PushOutcome {
    pub branch: String,
    pub tip: String,
    /// Whether anything left this side.
    pub updated: bool,
    pub message: Option<String>,
}

/// Push `branch` to the remote.
pub async fn push(
    repo: &Repository,
    carrier: &mut dyn Carrier,
    repo_path: &str,
    branch: &str,
    force: bool,
) -> Result<PushOutcome> {
    let tip = repo.read_branch(branch)?;
    if tip.is_empty() {
        return Err(ProtocolError::Core(TinError::not_found("branch", branch)));
    }

    let refs_frame = carrier
        .exchange(vec![hello_frame(Operation::Push, repo_path)?], true)
        .await?
        .ok_or(ProtocolError::Closed)?;
    let remote: RefsAd = refs_frame.expect(MessageType::Refs)?.decode()?;

    if remote.branches.get(branch).map(String::as_str) == Some(tip.as_str()) {
        debug!(branch = %branch, "remote already at local tip");
        return Ok(PushOutcome {
            branch: branch.to_string(),
            tip,
            updated: false,
            message: Some("up to date".to_string()),
        });
    }

    let outgoing = build_push_pack(repo, &tip, &remote)?;
    let mut updates = std::collections::BTreeMap::new();
    updates.insert(branch.to_string(), tip.clone());

    let reply = carrier
        .exchange(
            vec![
                Envelope::new(MessageType::Pack, &outgoing)?,
                Envelope::new(MessageType::UpdateRefs, &UpdateRefs { updates, force })?,
            ],
            true,
        )
        .await?
        .ok_or(ProtocolError::Closed)?;
    let ok: OkMsg = reply.expect(MessageType::Ok)?.decode()?;

    info!(
        event = "push.completed",
        branch = %branch,
        tip = %tip,
        commits = outgoing.commits.len(),
    );
    Ok(PushOutcome {
        branch: branch.to_string(),
        tip,
        updated: true,
        message: ok.message,
    })
}

/// Outcome of a pull.
#[derive(Debug, Clone)]
pub struct PullOutcome {
    pub stats: PackStats,
    pub branch: String,
    /// The remote tip the local branch now points at (empty when the
    /// remote branch had no commits).
    pub tip: String,
    pub updated: bool,
}

/// Pull `branch` from the remote: fetch missing objects, then fast-forward
/// the local ref. A diverged local branch is left alone with an error
/// telling the caller to merge.
pub async fn pull(
    repo: &Repository,
    carrier: &mut dyn Carrier,
    repo_path: &str,
    branch: &str,
) -> Result<PullOutcome> {
    let refs_frame = carrier
        .exchange(vec![hello_frame(Operation::Pull, repo_path)?], true)
        .await?
        .ok_or(ProtocolError::Closed)?;
    let remote: RefsAd = refs_frame.expect(MessageType::Refs)?.decode()?;

    let want = diff_wants(repo, &remote)?;
    let pack_frame = carrier
        .exchange(vec![Envelope::new(MessageType::Want, &want)?], true)
        .await?
        .ok_or(ProtocolError::Closed)?;
    let incoming: Pack = pack_frame.expect(MessageType::Pack)?.decode()?;
    let stats = apply_pack(repo, &incoming)?;

    carrier
        .exchange(
            vec![Envelope::new(MessageType::Ok, &OkMsg::default())?],
            false,
        )
        .await?;

    let remote_tip = remote.branches.get(branch).cloned().unwrap_or_default();
    let mut updated = false;
    if !remote_tip.is_empty() {
        let local_tip = repo.read_branch(branch)?;
        if local_tip != remote_tip {
            if local_tip.is_empty() || repo.is_ancestor(&local_tip, &remote_tip)? {
                repo.write_branch(branch, &remote_tip)?;
                updated = true;
            } else {
                return Err(ProtocolError::Core(TinError::NotFastForward {
                    branch: branch.to_string(),
                }));
            }
        }
    }

    info!(
        event = "pull.completed",
        branch = %branch,
        commits = stats.commits,
        threads = stats.threads,
        updated,
    );
    Ok(PullOutcome {
        stats,
        branch: branch.to_string(),
        tip: remote_tip,
        updated,
    })
}

/// Fetch the remote's exposed config keys.
pub async fn get_remote_config(
    carrier: &mut dyn Carrier,
    repo_path: &str,
    keys: Vec<String>,
) -> Result<ConfigValues> {
    let reply = carrier
        .exchange(
            vec![
                hello_frame(Operation::Config, repo_path)?,
                Envelope::new(MessageType::GetConfig, &GetConfig { keys })?,
            ],
            true,
        )
        .await?
        .ok_or(ProtocolError::Closed)?;
    reply.expect(MessageType::Config)?.decode()
}

/// Set config keys on the remote.
pub async fn set_remote_config(
    carrier: &mut dyn Carrier,
    repo_path: &str,
    values: ConfigValues,
) -> Result<()> {
    let reply = carrier
        .exchange(
            vec![
                hello_frame(Operation::Config, repo_path)?,
                Envelope::new(MessageType::SetConfig, &values)?,
            ],
            true,
        )
        .await?
        .ok_or(ProtocolError::Closed)?;
    reply.expect(MessageType::Ok)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_url_parsing() {
        let url = RemoteUrl::parse("tcp://tin.example.com:9418/team/project").unwrap();
        assert_eq!(url.scheme, "tcp");
        assert_eq!(url.authority, "tin.example.com:9418");
        assert_eq!(url.repo_path, "team/project");

        let url = RemoteUrl::parse("https://tin.example.com/solo").unwrap();
        assert_eq!(url.scheme, "https");
        assert_eq!(url.repo_path, "solo");

        assert!(RemoteUrl::parse("ssh://nope/x").is_err());
        assert!(RemoteUrl::parse("no-scheme").is_err());
        assert!(RemoteUrl::parse("tcp:///missing-host").is_err());
    }
}
