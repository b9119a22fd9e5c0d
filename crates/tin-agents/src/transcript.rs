//! Claude Code JSONL transcript parsing.
//!
//! Session logs are newline-delimited JSON entries. User entries carry a
//! string `message.content` or an array of `text` / `tool_result` blocks;
//! assistant entries carry an array of `text` / `tool_use` blocks, often
//! split across several consecutive entries of the same turn.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tin_core::{Role, ToolCall};

use crate::error::{AgentError, Result};

/// One reconstructed message from a transcript.
#[derive(Debug, Clone)]
pub struct ParsedMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub tool_calls: Vec<ToolCall>,
}

/// The trailing assistant turn of a transcript.
#[derive(Debug, Clone, Default)]
pub struct AssistantTurn {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
}

/// Parse a whole session log into alternating messages. Consecutive
/// assistant entries merge into a single message; tool results are
/// attached to the tool call they answer.
pub fn parse_session(path: &Path) -> Result<Vec<ParsedMessage>> {
    let file = File::open(path)
        .map_err(|e| AgentError::Transcript(format!("{}: {e}", path.display())))?;
    let reader = BufReader::new(file);

    let mut messages: Vec<ParsedMessage> = Vec::new();
    let mut pending: Option<ParsedMessage> = None;

    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let Ok(entry) = serde_json::from_str::<Value>(&line) else {
            // Damaged lines are skipped; the rest of the log still parses.
            continue;
        };
        if entry["isMeta"].as_bool() == Some(true) {
            continue;
        }
        let timestamp = entry_timestamp(&entry);

        match entry["type"].as_str() {
            Some("user") => {
                let content = &entry["message"]["content"];

                // Tool results answer the pending assistant turn; they do
                // not end it.
                for block in iter_blocks(content) {
                    if block["type"].as_str() == Some("tool_result") {
                        attach_result(&mut pending, &mut messages, block);
                    }
                }

                let text = human_text(content);
                if text.is_empty() {
                    continue;
                }
                if let Some(assistant) = pending.take() {
                    messages.push(assistant);
                }
                messages.push(ParsedMessage {
                    role: Role::Human,
                    content: text,
                    timestamp,
                    tool_calls: Vec::new(),
                });
            }
            Some("assistant") => {
                let turn = pending.get_or_insert_with(|| ParsedMessage {
                    role: Role::Assistant,
                    content: String::new(),
                    timestamp,
                    tool_calls: Vec::new(),
                });
                for block in iter_blocks(&entry["message"]["content"]) {
                    match block["type"].as_str() {
                        Some("text") => {
                            if let Some(text) = block["text"].as_str() {
                                if !turn.content.is_empty() {
                                    turn.content.push_str("\n\n");
                                }
                                turn.content.push_str(text);
                            }
                        }
                        Some("tool_use") => {
                            turn.tool_calls.push(ToolCall {
                                id: block["id"].as_str().unwrap_or_default().to_string(),
                                name: block["name"].as_str().unwrap_or_default().to_string(),
                                arguments: block["input"].clone(),
                                result: None,
                            });
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }

    if let Some(assistant) = pending {
        messages.push(assistant);
    }
    Ok(messages)
}

/// The most recent assistant text and tool uses in a transcript.
pub fn last_assistant_turn(path: &Path) -> Result<AssistantTurn> {
    let messages = parse_session(path)?;
    Ok(messages
        .into_iter()
        .rev()
        .find(|m| m.role == Role::Assistant)
        .map(|m| AssistantTurn {
            text: m.content,
            tool_calls: m.tool_calls,
        })
        .unwrap_or_default())
}

fn entry_timestamp(entry: &Value) -> DateTime<Utc> {
    entry["timestamp"]
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
}

fn iter_blocks(content: &Value) -> impl Iterator<Item = &Value> {
    content.as_array().into_iter().flatten()
}

/// Human-visible text of a user entry: a bare string, or its text blocks.
fn human_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.trim().to_string(),
        Value::Array(blocks) => blocks
            .iter()
            .filter(|b| b["type"].as_str() == Some("text"))
            .filter_map(|b| b["text"].as_str())
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string(),
        _ => String::new(),
    }
}

/// Attach a tool_result block to the call it answers, searching the
/// pending turn first and earlier assistant messages after that.
fn attach_result(
    pending: &mut Option<ParsedMessage>,
    messages: &mut [ParsedMessage],
    block: &Value,
) {
    let Some(use_id) = block["tool_use_id"].as_str() else {
        return;
    };
    let result_text = match &block["content"] {
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|p| p["text"].as_str())
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    };

    let slot = pending
        .iter_mut()
        .flat_map(|m| m.tool_calls.iter_mut())
        .chain(messages.iter_mut().rev().flat_map(|m| m.tool_calls.iter_mut()))
        .find(|call| call.id == use_id);
    if let Some(call) = slot {
        call.result = Some(result_text);
    }
}
