//! Per-agent, per-session state files mapping vendor session ids to the
//! thread being built.
//!
//! One JSON file per live session at `.tin/.<agent>-session-<short>`.
//! Each file is owned by a single session's handler, so plain writes
//! suffice; deletion marks session end. Appends to the thread itself
//! serialize through the per-thread lock in the store.

use std::fs;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tin_core::store::ObjectStore;

use crate::error::Result;

/// Contents of a session state file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionState {
    pub session_id: String,
    pub thread_id: String,
    pub started_at: DateTime<Utc>,
}

/// Shortened session id used in state file names.
pub fn short_session_id(session_id: &str) -> String {
    session_id.chars().take(8).collect()
}

/// Placeholder thread id used before the first real message fixes the id.
pub fn placeholder_thread_id(agent: &str, session_id: &str) -> String {
    format!("{agent}-{}", short_session_id(session_id))
}

pub fn load_state(store: &ObjectStore, agent: &str, session_id: &str) -> Result<Option<SessionState>> {
    let path = store.session_state_path(agent, &short_session_id(session_id));
    match fs::read(&path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn save_state(store: &ObjectStore, agent: &str, state: &SessionState) -> Result<()> {
    let path = store.session_state_path(agent, &short_session_id(&state.session_id));
    fs::write(path, serde_json::to_vec_pretty(state)?)?;
    Ok(())
}

pub fn delete_state(store: &ObjectStore, agent: &str, session_id: &str) -> Result<()> {
    let path = store.session_state_path(agent, &short_session_id(session_id));
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn state_roundtrip_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::init(dir.path()).unwrap();
        let state = SessionState {
            session_id: "sess-0123456789".to_string(),
            thread_id: "t1".to_string(),
            started_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        };

        assert!(load_state(&store, "claude-code", &state.session_id)
            .unwrap()
            .is_none());
        save_state(&store, "claude-code", &state).unwrap();
        assert_eq!(
            load_state(&store, "claude-code", &state.session_id).unwrap(),
            Some(state.clone())
        );

        // The file name carries the shortened session id.
        assert!(store
            .session_state_path("claude-code", "sess-012")
            .to_string_lossy()
            .contains(".claude-code-session-sess-012"));

        delete_state(&store, "claude-code", &state.session_id).unwrap();
        assert!(load_state(&store, "claude-code", &state.session_id)
            .unwrap()
            .is_none());
        // Deleting again is fine.
        delete_state(&store, "claude-code", &state.session_id).unwrap();
    }

    #[test]
    fn placeholder_uses_short_session() {
        assert_eq!(
            placeholder_thread_id("claude-code", "abcdefghijkl"),
            "claude-code-abcdefgh"
        );
    }
}
