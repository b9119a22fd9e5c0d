//! HTTP Basic authentication for the server side.

use std::collections::BTreeMap;

use base64::prelude::*;

use tin_core::Credentials;

/// Environment variable holding comma-separated `user:pass` pairs the
/// server accepts.
pub const SERVER_AUTH_ENV: &str = "TIN_SERVER_AUTH";

/// Accepted users for an HTTP server. When empty, auth is disabled.
#[derive(Debug, Clone, Default)]
pub struct ServerAuth {
    users: BTreeMap<String, String>,
}

impl ServerAuth {
    /// Parse the `TIN_SERVER_AUTH` environment variable.
    pub fn from_env() -> Self {
        match std::env::var(SERVER_AUTH_ENV) {
            Ok(raw) => Self::parse(&raw),
            Err(_) => Self::default(),
        }
    }

    /// Parse comma-separated `user:pass` pairs.
    pub fn parse(raw: &str) -> Self {
        let mut users = BTreeMap::new();
        for pair in raw.split(',') {
            if let Some(creds) = Credentials::parse(pair.trim()) {
                users.insert(creds.username, creds.password);
            }
        }
        Self { users }
    }

    pub fn is_enabled(&self) -> bool {
        !self.users.is_empty()
    }

    /// Validate an `Authorization` header value. Always true when auth is
    /// disabled.
    pub fn check_header(&self, header: Option<&str>) -> bool {
        if !self.is_enabled() {
            return true;
        }
        let Some(header) = header else {
            return false;
        };
        let Some(encoded) = header.strip_prefix("Basic ") else {
            return false;
        };
        let Ok(decoded) = BASE64_STANDARD.decode(encoded.trim()) else {
            return false;
        };
        let Ok(pair) = String::from_utf8(decoded) else {
            return false;
        };
        let Some(creds) = Credentials::parse(&pair) else {
            return false;
        };
        self.users.get(&creds.username) == Some(&creds.password)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn basic(user: &str, pass: &str) -> String {
        format!("Basic {}", BASE64_STANDARD.encode(format!("{user}:{pass}")))
    }

    #[test]
    fn disabled_auth_accepts_everything() {
        let auth = ServerAuth::default();
        assert!(!auth.is_enabled());
        assert!(auth.check_header(None));
        assert!(auth.check_header(Some("garbage")));
    }

    #[test]
    fn parses_multiple_pairs() {
        let auth = ServerAuth::parse("alice:pw1, bob:pw2");
        assert!(auth.is_enabled());
        assert!(auth.check_header(Some(&basic("alice", "pw1"))));
        assert!(auth.check_header(Some(&basic("bob", "pw2"))));
        assert!(!auth.check_header(Some(&basic("alice", "wrong"))));
        assert!(!auth.check_header(Some(&basic("mallory", "pw1"))));
        assert!(!auth.check_header(None));
    }

    #[test]
    fn malformed_headers_rejected() {
        let auth = ServerAuth::parse("alice:pw1");
        assert!(!auth.check_header(Some("Bearer token")));
        assert!(!auth.check_header(Some("Basic not-base64!!!")));
    }
}
