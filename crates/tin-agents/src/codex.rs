//! Codex integration: a notify-only agent that delivers one
//! "agent-turn-complete" payload per turn.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde_json::Value;

use tin_core::sha256_hex;

use crate::error::{AgentError, Result};
use crate::event::NotifyEvent;
use crate::notify::NotifyIntegration;

/// Short agent name for Codex.
pub const CODEX_AGENT: &str = "codex";

pub struct CodexNotify;

impl NotifyIntegration for CodexNotify {
    fn agent(&self) -> &str {
        CODEX_AGENT
    }

    fn setup(&self, project_dir: &Path) -> Result<String> {
        Ok(format!(
            "Add to ~/.codex/config.toml:\n\n  notify = [\"tin\", \"agent\", \"notify\", \"codex\"]\n\nThen run codex from {} so turn notifications reach this repository.",
            project_dir.display()
        ))
    }

    fn parse_notification(&self, raw: &Value) -> Result<NotifyEvent> {
        if let Some(kind) = raw["type"].as_str() {
            if kind != "agent-turn-complete" {
                return Err(AgentError::InvalidPayload(format!(
                    "unsupported notification type {kind}"
                )));
            }
        }

        let cwd = str_key(raw, &["cwd", "turn-cwd"])
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        // Older payloads carry no stable session key; fall back to a
        // directory-derived one so every turn in a workspace maps to the
        // same thread.
        let session_id = str_key(raw, &["session-id", "session_id", "conversation-id"])
            .map(str::to_string)
            .unwrap_or_else(|| {
                let digest = sha256_hex(&[cwd.to_string_lossy().as_bytes()]);
                format!("codex-{}", &digest[..8])
            });

        let input_messages = raw
            .get("input-messages")
            .or_else(|| raw.get("input_messages"))
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let last_assistant = str_key(raw, &["last-assistant-message", "last_assistant_message"])
            .map(str::to_string);

        Ok(NotifyEvent {
            session_id,
            cwd,
            input_messages,
            last_assistant,
            tool_calls: Vec::new(),
            timestamp: Utc::now(),
        })
    }
}

fn str_key<'a>(raw: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|key| raw[*key].as_str())
}
