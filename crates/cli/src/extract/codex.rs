// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Codex rollout log classification.
//!
//! User and assistant text come from `response_item` message rows; the
//! duplicate `event_msg` `user_message`/`agent_message` entries are ignored
//! so nothing is counted twice. `event_msg` rows contribute only the
//! `task_started`/`task_complete` turn markers.

use serde_json::Value;

use crate::block::strip_injected_context;

use super::Row;

/// Content wrappers codex injects around non-instruction user messages.
const META_PREFIXES: [&str; 4] =
    ["<user_instructions>", "<environment_context>", "<turn_context>", "<permissions"];

/// Classify one codex rollout row.
pub fn classify(json: &Value) -> Row {
    match json.get("type").and_then(Value::as_str) {
        Some("response_item") => classify_response_item(json.get("payload")),
        Some("event_msg") => {
            match json.get("payload").and_then(|p| p.get("type")).and_then(Value::as_str) {
                Some("task_complete") => Row::TurnComplete,
                Some("task_started") => Row::TurnStarted,
                _ => Row::Other,
            }
        }
        _ => Row::Other,
    }
}

fn classify_response_item(payload: Option<&Value>) -> Row {
    let Some(payload) = payload else {
        return Row::Other;
    };
    if payload.get("type").and_then(Value::as_str) != Some("message") {
        return Row::Other;
    }
    match payload.get("role").and_then(Value::as_str) {
        Some("user") => Row::User { text: user_text(payload) },
        Some("assistant") => Row::Assistant { text: message_text(payload, "output_text") },
        _ => Row::Other,
    }
}

fn user_text(payload: &Value) -> Option<String> {
    let text = message_text(payload, "input_text")?;
    let trimmed = text.trim();
    if META_PREFIXES.iter().any(|p| trimmed.starts_with(p)) {
        return None;
    }
    strip_injected_context(trimmed)
}

/// Concatenate the content parts of the given kind; `None` when empty.
fn message_text(payload: &Value, kind: &str) -> Option<String> {
    let content = payload.get("content")?.as_array()?;
    let texts: Vec<&str> = content
        .iter()
        .filter(|c| c.get("type").and_then(Value::as_str) == Some(kind))
        .filter_map(|c| c.get("text").and_then(Value::as_str))
        .collect();
    if texts.is_empty() {
        return None;
    }
    let joined = texts.join("\n");
    if joined.trim().is_empty() {
        return None;
    }
    Some(joined)
}

#[cfg(test)]
#[path = "codex_tests.rs"]
mod tests;
