// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Extraction: typed room events and turn-end markers out of the agents'
//! append-only JSONL session logs.
//!
//! All reads are expressed over `(lo, hi]` spans of 1-indexed line numbers,
//! so any window can be recomputed from the file at any time; extracted
//! events are never cached.

pub mod claude;
pub mod codex;
pub mod tail;

use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::warn;

use crate::agent::Agent;

/// Parse failures for one line are tolerated this many refreshes before the
/// line is skipped.
const MAX_PARSE_ATTEMPTS: u32 = 3;

/// A line that stays unparseable this long is skipped regardless of attempt
/// count.
const STALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Classification of a single JSONL row.
#[derive(Debug, Clone, PartialEq)]
pub enum Row {
    /// A user-role row. `text` is `Some` only for genuine instructions
    /// (non-meta, not tool-result-only, hygiene applied); every `User` row,
    /// meta or not, is a boundary for the boundary-aware scans.
    User { text: Option<String> },
    /// An assistant frame; `text` is the frame's text content, if any.
    Assistant { text: Option<String> },
    /// Turn-end marker (claude `turn_duration`, codex `task_complete`).
    TurnComplete,
    /// Codex `task_started` marker.
    TurnStarted,
    Other,
}

/// A typed event extracted from a session log, tagged with its source line.
#[derive(Debug, Clone, PartialEq)]
pub enum RoomEvent {
    UserText { line: u64, text: String },
    AssistantText { line: u64, text: String },
}

impl RoomEvent {
    pub fn line(&self) -> u64 {
        match self {
            Self::UserText { line, .. } | Self::AssistantText { line, .. } => *line,
        }
    }

    pub fn text(&self) -> &str {
        match self {
            Self::UserText { text, .. } | Self::AssistantText { text, .. } => text,
        }
    }
}

/// One stalled (unparseable) line being retried.
#[derive(Debug)]
struct Stall {
    line: u64,
    attempts: u32,
    first_seen: Instant,
}

/// Stateless JSONL extraction plus per-agent stuck-line bookkeeping.
pub struct Extractor {
    stalls: HashMap<Agent, Stall>,
    stall_timeout: Duration,
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new()
    }
}

impl Extractor {
    pub fn new() -> Self {
        Self { stalls: HashMap::new(), stall_timeout: STALL_TIMEOUT }
    }

    #[cfg(test)]
    pub fn with_stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout = timeout;
        self
    }

    /// Classify one row of `agent`'s log.
    pub fn classify(agent: Agent, json: &Value) -> Row {
        match agent {
            Agent::Claude => claude::classify(json),
            Agent::Codex => codex::classify(json),
        }
    }

    /// Read `agent`'s log from `read_cursor` to end-of-file, advancing past
    /// every line that parses. The final line is deferred (cursor held) while
    /// it fails to parse, then skipped with a warning once it has failed
    /// [`MAX_PARSE_ATTEMPTS`] consecutive refreshes or stayed unparseable for
    /// the stall timeout.
    ///
    /// Returns the events found in the newly consumed window and the new
    /// read cursor.
    pub fn refresh_source(
        &mut self,
        agent: Agent,
        path: &Path,
        read_cursor: u64,
    ) -> anyhow::Result<(Vec<RoomEvent>, u64)> {
        let lines = tail::read_span(path, read_cursor, u64::MAX)?;
        let mut cursor = read_cursor;

        for line in &lines {
            if line.text.trim().is_empty() {
                cursor = line.number;
                continue;
            }
            match serde_json::from_str::<Value>(&line.text) {
                Ok(_) => {
                    if self.stalls.get(&agent).is_some_and(|s| s.line == line.number) {
                        self.stalls.remove(&agent);
                    }
                    cursor = line.number;
                }
                Err(e) => {
                    if self.note_parse_failure(agent, line.number, &e) {
                        cursor = line.number;
                        continue;
                    }
                    break;
                }
            }
        }

        let events = self.events_between(agent, path, read_cursor, cursor)?;
        Ok((events, cursor))
    }

    /// Record a parse failure; returns true when the line should be skipped.
    fn note_parse_failure(
        &mut self,
        agent: Agent,
        line: u64,
        error: &serde_json::Error,
    ) -> bool {
        let stall = self.stalls.entry(agent).or_insert(Stall {
            line,
            attempts: 0,
            first_seen: Instant::now(),
        });
        if stall.line != line {
            *stall = Stall { line, attempts: 0, first_seen: Instant::now() };
        }
        stall.attempts += 1;

        if stall.attempts >= MAX_PARSE_ATTEMPTS || stall.first_seen.elapsed() >= self.stall_timeout
        {
            warn!(agent = %agent, line, %error, "skipping unparseable session log line");
            self.stalls.remove(&agent);
            return true;
        }
        false
    }

    /// Typed events with line numbers in `(lo, hi]`, in file order. Per
    /// turn, only the last non-empty assistant frame between two user events
    /// is retained.
    pub fn events_between(
        &self,
        agent: Agent,
        path: &Path,
        lo: u64,
        hi: u64,
    ) -> anyhow::Result<Vec<RoomEvent>> {
        let mut events = Vec::new();
        let mut pending: Option<(u64, String)> = None;

        for (number, json) in parsed_rows(path, lo, hi)? {
            match Self::classify(agent, &json) {
                Row::User { text: Some(text) } => {
                    if let Some((line, text)) = pending.take() {
                        events.push(RoomEvent::AssistantText { line, text });
                    }
                    events.push(RoomEvent::UserText { line: number, text });
                }
                Row::Assistant { text: Some(text) } => pending = Some((number, text)),
                _ => {}
            }
        }
        if let Some((line, text)) = pending {
            events.push(RoomEvent::AssistantText { line, text });
        }
        Ok(events)
    }

    /// Last non-empty assistant frame in `(lo, hi]`, ignoring boundaries.
    /// This is the fast-path extraction.
    pub fn latest_assistant_between(
        &self,
        agent: Agent,
        path: &Path,
        lo: u64,
        hi: u64,
    ) -> anyhow::Result<Option<String>> {
        let mut latest = None;
        for (_, json) in parsed_rows(path, lo, hi)? {
            if let Row::Assistant { text: Some(text) } = Self::classify(agent, &json) {
                latest = Some(text);
            }
        }
        Ok(latest)
    }

    /// Boundary-aware extraction for the Stop-event fallback: every
    /// user-role row (meta and tool-result-only included) is a boundary, and
    /// the newest assistant frame qualifies only when it lies strictly after
    /// the latest boundary.
    pub fn latest_assistant_since_last_user_boundary(
        &self,
        agent: Agent,
        path: &Path,
        lo: u64,
        hi: u64,
    ) -> anyhow::Result<Option<String>> {
        let mut latest: Option<(u64, String)> = None;
        let mut boundary = 0u64;
        for (number, json) in parsed_rows(path, lo, hi)? {
            match Self::classify(agent, &json) {
                Row::User { .. } => boundary = number,
                Row::Assistant { text: Some(text) } => latest = Some((number, text)),
                _ => {}
            }
        }
        Ok(latest.and_then(|(line, text)| (line > boundary).then_some(text)))
    }

    /// User-role rows in `(lo, hi]` with their instruction text (`None` for
    /// meta rows). Used by interference detection.
    pub fn user_rows_between(
        &self,
        agent: Agent,
        path: &Path,
        lo: u64,
        hi: u64,
    ) -> anyhow::Result<Vec<(u64, Option<String>)>> {
        let mut rows = Vec::new();
        for (number, json) in parsed_rows(path, lo, hi)? {
            if let Row::User { text } = Self::classify(agent, &json) {
                rows.push((number, text));
            }
        }
        Ok(rows)
    }

    /// Whether a completed-turn marker is present after `anchor`.
    ///
    /// For codex, a `task_started` in the window demands a *subsequent*
    /// `task_complete` so a stale marker from the previous turn is not
    /// mistaken for this turn's end.
    pub fn turn_marker_after(
        &self,
        agent: Agent,
        path: &Path,
        anchor: u64,
    ) -> anyhow::Result<bool> {
        let mut last_started: Option<u64> = None;
        let mut completes: Vec<u64> = Vec::new();
        for (number, json) in parsed_rows(path, anchor, u64::MAX)? {
            match Self::classify(agent, &json) {
                Row::TurnComplete => completes.push(number),
                Row::TurnStarted => last_started = Some(number),
                _ => {}
            }
        }
        Ok(completes.iter().any(|c| last_started.is_none_or(|s| *c > s)))
    }
}

/// Parse the JSON rows in `(lo, hi]`, silently skipping blank and
/// unparseable lines (refresh handles those via the stall machinery).
fn parsed_rows(path: &Path, lo: u64, hi: u64) -> anyhow::Result<Vec<(u64, Value)>> {
    let lines = tail::read_span(path, lo, hi)?;
    Ok(lines
        .into_iter()
        .filter(|l| !l.text.trim().is_empty())
        .filter_map(|l| serde_json::from_str::<Value>(&l.text).ok().map(|v| (l.number, v)))
        .collect())
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
