// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Payload blocks: the `--- {source} ---` sections a composed send is made
//! of, plus the hygiene rules for payloads that come back as echoes in an
//! agent's session log.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::agent::Agent;

/// Who a block speaks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    User,
    Claude,
    Codex,
}

impl Source {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Claude => "claude",
            Self::Codex => "codex",
        }
    }
}

impl From<Agent> for Source {
    fn from(agent: Agent) -> Self {
        match agent {
            Agent::Claude => Self::Claude,
            Agent::Codex => Self::Codex,
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One rendered section of a composed payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub source: Source,
    pub text: String,
}

impl Block {
    pub fn user(text: impl Into<String>) -> Self {
        Self { source: Source::User, text: text.into() }
    }

    pub fn agent(agent: Agent, text: impl Into<String>) -> Self {
        Self { source: agent.into(), text: text.into() }
    }

    pub fn render(&self) -> String {
        format!("--- {} ---\n{}", self.source, self.text)
    }
}

/// Render a composed payload: blocks separated by a blank line.
pub fn render_payload(blocks: &[Block]) -> String {
    blocks.iter().map(Block::render).collect::<Vec<_>>().join("\n\n")
}

/// Collapse all whitespace runs to single spaces and trim. Anchor texts are
/// compared in this form so that editor re-wrapping and paste artifacts do
/// not defeat echo matching.
pub fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// If `line` is exactly an injected block header, return its source.
fn header_source(line: &str) -> Option<Source> {
    match line.trim_end() {
        "--- user ---" => Some(Source::User),
        "--- claude ---" => Some(Source::Claude),
        "--- codex ---" => Some(Source::Codex),
        _ => None,
    }
}

/// Parse a body that *begins* with a block header back into its blocks.
/// Returns `None` when the first line is not a header (the body is ordinary
/// user text, headers further down notwithstanding).
pub fn parse_payload(body: &str) -> Option<Vec<Block>> {
    let mut lines = body.lines();
    let first = lines.next()?;
    let mut current = header_source(first)?;
    let mut blocks = Vec::new();
    let mut buf: Vec<&str> = Vec::new();

    for line in lines {
        if let Some(source) = header_source(line) {
            blocks.push(Block { source: current, text: join_body(&buf) });
            current = source;
            buf.clear();
        } else {
            buf.push(line);
        }
    }
    blocks.push(Block { source: current, text: join_body(&buf) });
    Some(blocks)
}

/// Join block body lines, dropping leading and trailing blank lines while
/// preserving interior structure.
fn join_body(lines: &[&str]) -> String {
    let start = lines.iter().position(|l| !l.trim().is_empty()).unwrap_or(lines.len());
    let end = lines.iter().rposition(|l| !l.trim().is_empty()).map_or(start, |i| i + 1);
    lines[start..end].join("\n")
}

/// Header hygiene for user rows read back from an agent's session log.
///
/// A body that begins with a block header is the echo of a previously
/// injected payload, not the user's own words. If the payload ends with a
/// `--- user ---` block, that trailing block was the actual instruction and
/// is kept; everything before it was context. A payload that does not end
/// with a user block (the echo of a pure routed turn) carries no user
/// instruction at all and yields `None`.
///
/// Idempotent: the retained text never begins with a header line.
pub fn strip_injected_context(body: &str) -> Option<String> {
    let Some(blocks) = parse_payload(body) else {
        return Some(body.to_string());
    };
    match blocks.last() {
        Some(Block { source: Source::User, text }) if !text.is_empty() => Some(text.clone()),
        _ => None,
    }
}

#[cfg(test)]
#[path = "block_tests.rs"]
mod tests;
