//! Transport credentials, stored per user and outside any repository tree.
//!
//! Lookup order for a host: `TIN_AUTH` (then the legacy `TIN_AUTH_TOKEN`)
//! as `user:password`, then the per-user credential file at
//! `$XDG_CONFIG_HOME/tin/credentials.json` (or the platform config
//! directory when `XDG_CONFIG_HOME` is unset).

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TinError};

/// Environment override, `user:password`.
pub const AUTH_ENV: &str = "TIN_AUTH";
/// Legacy spelling of [`AUTH_ENV`].
pub const AUTH_ENV_LEGACY: &str = "TIN_AUTH_TOKEN";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    /// Parse `user:password`. The password may itself contain colons.
    pub fn parse(raw: &str) -> Option<Self> {
        let (username, password) = raw.split_once(':')?;
        if username.is_empty() {
            return None;
        }
        Some(Self {
            username: username.to_string(),
            password: password.to_string(),
        })
    }
}

/// Host → credentials map backed by the per-user config file.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CredentialStore {
    #[serde(default)]
    hosts: BTreeMap<String, Credentials>,
}

impl CredentialStore {
    /// Path of the credential file, honoring `XDG_CONFIG_HOME`.
    pub fn default_path() -> Result<PathBuf> {
        let base = match std::env::var_os("XDG_CONFIG_HOME") {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => dirs::config_dir().ok_or_else(|| TinError::Invalid {
                kind: "credentials",
                reason: "no per-user config directory available".to_string(),
            })?,
        };
        Ok(base.join("tin").join("credentials.json"))
    }

    pub fn load() -> Result<Self> {
        Self::load_from(Self::default_path()?)
    }

    pub fn load_from(path: PathBuf) -> Result<Self> {
        match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| TinError::Corrupt {
                kind: "credentials",
                id: path.display().to_string(),
                source,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(Self::default_path()?)
    }

    pub fn save_to(&self, path: PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let bytes = serde_json::to_vec_pretty(self)?;
        fs::write(path, bytes)?;
        Ok(())
    }

    pub fn get(&self, host: &str) -> Option<&Credentials> {
        self.hosts.get(host)
    }

    pub fn set(&mut self, host: impl Into<String>, credentials: Credentials) {
        self.hosts.insert(host.into(), credentials);
    }

    pub fn remove(&mut self, host: &str) -> bool {
        self.hosts.remove(host).is_some()
    }

    pub fn hosts(&self) -> impl Iterator<Item = &String> {
        self.hosts.keys()
    }
}

/// Credentials for `host`, with environment overrides applied.
pub fn resolve(host: &str) -> Result<Option<Credentials>> {
    for var in [AUTH_ENV, AUTH_ENV_LEGACY] {
        if let Ok(raw) = std::env::var(var) {
            if let Some(creds) = Credentials::parse(&raw) {
                return Ok(Some(creds));
            }
        }
    }
    Ok(CredentialStore::load()?.get(host).cloned())
}
