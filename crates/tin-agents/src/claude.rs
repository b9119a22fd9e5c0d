//! Claude Code integration: hook normalization, settings management and
//! pull imports from the vendor's session logs.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::debug;

use tin_core::repo::Repository;
use tin_core::Thread;

use crate::error::{AgentError, Result};
use crate::event::{HookEvent, HookEventKind};
use crate::hook::HookIntegration;
use crate::pull::{save_pulled_thread, PullIntegration, PullOptions};
use crate::session::placeholder_thread_id;
use crate::transcript;

/// Short agent name for Claude Code.
pub const CLAUDE_AGENT: &str = "claude-code";

/// Command wired into the vendor's hook configuration.
const HOOK_COMMAND: &str = "tin agent hook claude-code";

/// Vendor hook names tin subscribes to.
const HOOKED_EVENTS: &[&str] = &["SessionStart", "UserPromptSubmit", "Stop", "SessionEnd"];

/// Claude Code hook integration.
pub struct ClaudeCodeHook;

impl HookIntegration for ClaudeCodeHook {
    fn agent(&self) -> &str {
        CLAUDE_AGENT
    }

    fn install(&self, project_dir: &Path, global: bool) -> Result<()> {
        let path = settings_path(project_dir, global)?;
        let mut settings = read_settings(&path)?;

        let hooks = settings
            .as_object_mut()
            .ok_or_else(|| AgentError::InvalidPayload("settings root is not an object".into()))?
            .entry("hooks")
            .or_insert_with(|| json!({}));

        for event in HOOKED_EVENTS {
            let entries = hooks
                .as_object_mut()
                .ok_or_else(|| AgentError::InvalidPayload("hooks is not an object".into()))?
                .entry(*event)
                .or_insert_with(|| json!([]));
            if !entries.is_array() {
                *entries = json!([]);
            }
            if !matcher_has_command(entries) {
                if let Some(array) = entries.as_array_mut() {
                    array.push(json!({
                        "hooks": [{"type": "command", "command": HOOK_COMMAND}]
                    }));
                }
            }
        }

        write_settings(&path, &settings)?;
        debug!(path = %path.display(), "claude hooks installed");
        Ok(())
    }

    fn uninstall(&self, project_dir: &Path, global: bool) -> Result<()> {
        let path = settings_path(project_dir, global)?;
        let mut settings = read_settings(&path)?;

        if let Some(hooks) = settings.get_mut("hooks").and_then(Value::as_object_mut) {
            for event in HOOKED_EVENTS {
                if let Some(entries) = hooks.get_mut(*event).and_then(Value::as_array_mut) {
                    for matcher in entries.iter_mut() {
                        if let Some(cmds) = matcher.get_mut("hooks").and_then(Value::as_array_mut) {
                            cmds.retain(|h| !is_tin_command(h));
                        }
                    }
                    entries.retain(|matcher| {
                        matcher["hooks"].as_array().map(|a| !a.is_empty()).unwrap_or(true)
                    });
                }
            }
        }

        write_settings(&path, &settings)?;
        Ok(())
    }

    fn is_installed(&self, project_dir: &Path, global: bool) -> Result<bool> {
        let path = settings_path(project_dir, global)?;
        let settings = read_settings(&path)?;
        let Some(hooks) = settings.get("hooks") else {
            return Ok(false);
        };
        Ok(HOOKED_EVENTS
            .iter()
            .all(|event| matcher_has_command(&hooks[*event])))
    }

    fn parse_event(&self, raw: &Value) -> Result<HookEvent> {
        let name = raw["hook_event_name"]
            .as_str()
            .ok_or_else(|| AgentError::InvalidPayload("missing hook_event_name".into()))?;
        let kind = match name {
            "SessionStart" => HookEventKind::SessionStart,
            "UserPromptSubmit" => HookEventKind::UserPrompt,
            "Stop" | "SubagentStop" => HookEventKind::AssistantStop,
            "SessionEnd" => HookEventKind::SessionEnd,
            "PostToolUse" | "PreToolUse" => HookEventKind::ToolUse,
            other => {
                return Err(AgentError::InvalidPayload(format!(
                    "unsupported hook event {other}"
                )))
            }
        };

        let session_id = raw["session_id"]
            .as_str()
            .ok_or_else(|| AgentError::InvalidPayload("missing session_id".into()))?;
        let cwd = raw["cwd"]
            .as_str()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        let mut event = HookEvent::new(kind, session_id, cwd);
        event.prompt = raw["prompt"].as_str().map(str::to_string);
        event.transcript_path = raw["transcript_path"].as_str().map(PathBuf::from);
        Ok(event)
    }
}

fn settings_path(project_dir: &Path, global: bool) -> Result<PathBuf> {
    if global {
        let home = dirs::home_dir().ok_or_else(|| {
            AgentError::InvalidPayload("no home directory for global install".into())
        })?;
        Ok(home.join(".claude").join("settings.json"))
    } else {
        Ok(project_dir.join(".claude").join("settings.json"))
    }
}

fn read_settings(path: &Path) -> Result<Value> {
    match fs::read(path) {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(json!({})),
        Err(e) => Err(e.into()),
    }
}

fn write_settings(path: &Path, settings: &Value) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_vec_pretty(settings)?)?;
    Ok(())
}

fn is_tin_command(hook: &Value) -> bool {
    hook["command"]
        .as_str()
        .map(|c| c.contains("tin agent hook"))
        .unwrap_or(false)
}

fn matcher_has_command(entries: &Value) -> bool {
    entries
        .as_array()
        .into_iter()
        .flatten()
        .flat_map(|m| m["hooks"].as_array().into_iter().flatten())
        .any(is_tin_command)
}

/// Pull imports from `~/.claude/projects/<munged-cwd>/<session>.jsonl`.
pub struct ClaudeCodePull {
    projects_dir: PathBuf,
}

impl ClaudeCodePull {
    pub fn new() -> Result<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| AgentError::Transcript("no home directory".into()))?;
        Ok(Self {
            projects_dir: home.join(".claude").join("projects"),
        })
    }

    pub fn with_dir(projects_dir: impl Into<PathBuf>) -> Self {
        Self {
            projects_dir: projects_dir.into(),
        }
    }

    /// Session log files across all projects, newest modification first.
    fn session_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        if !self.projects_dir.is_dir() {
            return Ok(files);
        }
        for project in fs::read_dir(&self.projects_dir)? {
            let project = project?;
            if !project.path().is_dir() {
                continue;
            }
            for entry in fs::read_dir(project.path())? {
                let path = entry?.path();
                if path.extension().and_then(|e| e.to_str()) == Some("jsonl") {
                    files.push(path);
                }
            }
        }
        files.sort_by_key(|path| {
            std::cmp::Reverse(
                fs::metadata(path)
                    .and_then(|m| m.modified())
                    .unwrap_or(std::time::UNIX_EPOCH),
            )
        });
        Ok(files)
    }

    fn find_session_file(&self, id: &str) -> Result<PathBuf> {
        self.session_files()?
            .into_iter()
            .find(|path| path.file_stem().and_then(|s| s.to_str()) == Some(id))
            .ok_or_else(|| AgentError::Transcript(format!("no session log for {id}")))
    }
}

impl PullIntegration for ClaudeCodePull {
    fn agent(&self) -> &str {
        CLAUDE_AGENT
    }

    fn list(&self, limit: usize) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self
            .session_files()?
            .into_iter()
            .filter_map(|path| {
                path.file_stem()
                    .and_then(|s| s.to_str())
                    .map(str::to_string)
            })
            .collect();
        if limit != 0 {
            ids.truncate(limit);
        }
        Ok(ids)
    }

    fn pull(&self, repo: &Repository, id: &str, opts: &PullOptions) -> Result<Thread> {
        let path = self.find_session_file(id)?;
        let messages = transcript::parse_session(&path)?;
        if messages.is_empty() {
            return Err(AgentError::Transcript(format!(
                "session {id} has no messages"
            )));
        }

        let started_at: DateTime<Utc> = messages[0].timestamp;
        let mut thread = Thread::new(
            placeholder_thread_id(CLAUDE_AGENT, id),
            CLAUDE_AGENT,
            id,
            started_at,
        );
        for message in messages {
            thread.append(
                message.role,
                message.content,
                message.timestamp,
                message.tool_calls,
            );
        }

        save_pulled_thread(repo, thread, opts)
    }
}
