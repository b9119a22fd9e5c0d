//! Repository configuration.

use serde::{Deserialize, Serialize};

/// Current config schema version.
pub const CONFIG_VERSION: u32 = 1;

/// A named peer repository.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Remote {
    pub name: String,
    /// `tcp://host:port/path` or `http(s)://host/path`.
    pub url: String,
}

/// Per-repository configuration, stored at `<store>/config`.
///
/// Credentials are deliberately absent; they live in the per-user config
/// directory (see [`crate::credentials`]) so a repo push never carries
/// secrets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub version: u32,

    #[serde(default)]
    pub remotes: Vec<Remote>,

    /// Base URL for linking SCM commits, e.g. a code-host web UI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_host_url: Option<String>,

    /// Base URL for linking threads; when set, parallel SCM commits carry
    /// a `Thread:` link into it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_host_url: Option<String>,

    /// Stage threads automatically as ingestion grows them.
    #[serde(default = "default_true")]
    pub auto_stage: bool,

    /// Let the assistant-stop handler commit dirty SCM files under a
    /// derived thread message.
    #[serde(default)]
    pub auto_commit_scm: bool,
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            remotes: Vec::new(),
            code_host_url: None,
            thread_host_url: None,
            auto_stage: true,
            auto_commit_scm: false,
        }
    }
}

impl Config {
    pub fn remote(&self, name: &str) -> Option<&Remote> {
        self.remotes.iter().find(|r| r.name == name)
    }

    /// Add or replace a remote by name.
    pub fn set_remote(&mut self, name: impl Into<String>, url: impl Into<String>) {
        let name = name.into();
        let url = url.into();
        match self.remotes.iter_mut().find(|r| r.name == name) {
            Some(existing) => existing.url = url,
            None => self.remotes.push(Remote { name, url }),
        }
    }

    /// Remove a remote by name. Returns whether one was present.
    pub fn remove_remote(&mut self, name: &str) -> bool {
        let before = self.remotes.len();
        self.remotes.retain(|r| r.name != name);
        self.remotes.len() != before
    }

    /// Flat key/value view used by `tin config` and the wire protocol's
    /// config conversation.
    pub fn get_key(&self, key: &str) -> Option<String> {
        match key {
            "version" => Some(self.version.to_string()),
            "code_host_url" => self.code_host_url.clone(),
            "thread_host_url" => self.thread_host_url.clone(),
            "auto_stage" => Some(self.auto_stage.to_string()),
            "auto_commit_scm" => Some(self.auto_commit_scm.to_string()),
            _ => None,
        }
    }

    /// Set a flat key. Returns false for unknown keys or bad values.
    pub fn set_key(&mut self, key: &str, value: &str) -> bool {
        match key {
            "code_host_url" => {
                self.code_host_url = non_empty(value);
                true
            }
            "thread_host_url" => {
                self.thread_host_url = non_empty(value);
                true
            }
            "auto_stage" => match value.parse() {
                Ok(v) => {
                    self.auto_stage = v;
                    true
                }
                Err(_) => false,
            },
            "auto_commit_scm" => match value.parse() {
                Ok(v) => {
                    self.auto_commit_scm = v;
                    true
                }
                Err(_) => false,
            },
            _ => false,
        }
    }

    /// Keys exposed through `get_key` / `set_key`.
    pub fn keys() -> &'static [&'static str] {
        &[
            "version",
            "code_host_url",
            "thread_host_url",
            "auto_stage",
            "auto_commit_scm",
        ]
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = Config::default();
        assert_eq!(c.version, CONFIG_VERSION);
        assert!(c.auto_stage);
        assert!(!c.auto_commit_scm);
        assert!(c.remotes.is_empty());
    }

    #[test]
    fn set_remote_replaces_by_name() {
        let mut c = Config::default();
        c.set_remote("origin", "tcp://a:9418/repo");
        c.set_remote("origin", "tcp://b:9418/repo");
        assert_eq!(c.remotes.len(), 1);
        assert_eq!(c.remote("origin").unwrap().url, "tcp://b:9418/repo");
        assert!(c.remove_remote("origin"));
        assert!(!c.remove_remote("origin"));
    }

    #[test]
    fn key_view_round_trips() {
        let mut c = Config::default();
        assert!(c.set_key("thread_host_url", "https://tin.example.com"));
        assert_eq!(
            c.get_key("thread_host_url").as_deref(),
            Some("https://tin.example.com")
        );
        assert!(c.set_key("auto_commit_scm", "true"));
        assert_eq!(c.get_key("auto_commit_scm").as_deref(), Some("true"));
        assert!(!c.set_key("auto_commit_scm", "banana"));
        assert!(!c.set_key("no_such_key", "x"));
    }

    #[test]
    fn serde_roundtrip() {
        let mut c = Config::default();
        c.set_remote("origin", "https://tin.example.com/team/repo");
        c.thread_host_url = Some("https://tin.example.com".to_string());
        let json = serde_json::to_string(&c).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back, c);
    }
}
