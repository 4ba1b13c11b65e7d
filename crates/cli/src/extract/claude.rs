// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Claude session log classification and the Stop-event debug-log fallback.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::block::strip_injected_context;

use super::Row;

/// Literal marker Claude writes to its debug log when the Stop hook fires.
const STOP_MARKER: &str = "Getting matching hook commands for Stop";

/// Content wrappers that mark a user row as meta rather than an instruction.
const META_PREFIXES: [&str; 5] = [
    "<command-name>",
    "<local-command-stdout>",
    "<local-command-stderr>",
    "<system-reminder>",
    "<task-notification>",
];

/// Classify one Claude session log row.
///
/// User rows carry `Some(text)` only when they are a genuine instruction:
/// non-meta, not tool-result-only, and surviving header hygiene. Assistant
/// rows carry the concatenated `text` block content, `None` when the frame
/// has no text blocks.
pub fn classify(json: &Value) -> Row {
    match json.get("type").and_then(Value::as_str) {
        Some("user") => {
            if json.get("message").and_then(|m| m.get("role")).and_then(Value::as_str)
                != Some("user")
            {
                return Row::Other;
            }
            Row::User { text: user_text(json) }
        }
        Some("assistant") => Row::Assistant { text: assistant_text(json) },
        Some("system") => {
            if json.get("subtype").and_then(Value::as_str) == Some("turn_duration") {
                Row::TurnComplete
            } else {
                Row::Other
            }
        }
        _ => Row::Other,
    }
}

/// Extract the instruction text of a user row, or `None` for meta rows.
fn user_text(json: &Value) -> Option<String> {
    if json.get("isMeta").and_then(Value::as_bool) == Some(true) {
        return None;
    }

    let content = json.get("message")?.get("content")?;
    let text = match content {
        Value::String(s) => s.clone(),
        Value::Array(blocks) => {
            let results =
                blocks.iter().filter(|b| block_type(b) == Some("tool_result")).count();
            if results > 0 && results == blocks.len() {
                // Tool-result-only row: a boundary, never an instruction.
                return None;
            }
            blocks
                .iter()
                .filter(|b| block_type(b) == Some("text"))
                .filter_map(|b| b.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n")
        }
        _ => return None,
    };

    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    if META_PREFIXES.iter().any(|p| trimmed.starts_with(p)) {
        return None;
    }

    strip_injected_context(trimmed)
}

/// Concatenated text content of an assistant row; `None` for frames without
/// text blocks (tool calls, thinking).
fn assistant_text(json: &Value) -> Option<String> {
    let content = json.get("message")?.get("content")?.as_array()?;
    let texts: Vec<&str> = content
        .iter()
        .filter(|b| block_type(b) == Some("text"))
        .filter_map(|b| b.get("text").and_then(Value::as_str))
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

fn block_type(block: &Value) -> Option<&str> {
    block.get("type").and_then(Value::as_str)
}

/// Path of the out-of-band debug log for a Claude session.
pub fn debug_log_path(debug_dir: &Path, session_id: &str) -> PathBuf {
    debug_dir.join(format!("{session_id}.txt"))
}

/// Scan the debug log for a Stop-event line with a timestamp strictly
/// greater than `after`. Returns the newest qualifying timestamp.
///
/// A missing debug log is not an error; Claude creates it lazily.
pub fn scan_stop_event(
    path: &Path,
    after: DateTime<Utc>,
) -> anyhow::Result<Option<DateTime<Utc>>> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let ts_pattern = regex::Regex::new(
        r"^\[?(\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:?\d{2})?)",
    )?;

    let mut newest: Option<DateTime<Utc>> = None;
    for line in contents.lines() {
        if !line.contains(STOP_MARKER) {
            continue;
        }
        let Some(caps) = ts_pattern.captures(line) else {
            continue;
        };
        let Some(ts) = parse_timestamp(&caps[1]) else {
            continue;
        };
        if ts > after && newest.is_none_or(|n| ts > n) {
            newest = Some(ts);
        }
    }
    Ok(newest)
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    // Lines without an offset are UTC.
    chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
#[path = "claude_tests.rs"]
mod tests;
