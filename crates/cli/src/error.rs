// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

use crate::agent::Agent;

/// Typed routing failures surfaced by the router to its callers.
///
/// The router never catches these; the orchestrator catches them to run its
/// cleanup path and re-surfaces, and the REPL turns them into a single
/// `error` bus event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    /// The target's input channel is gone. Fatal to any in-flight send.
    PaneDead(Agent),
    /// Turn-detection deadline hit, or a turn-end marker was observed but no
    /// assistant text could be extracted.
    SmokeSignal(Agent),
    /// Unexpected non-meta user input appeared in the target's JSONL during
    /// a collab wait.
    Interference(Agent),
    /// The paste primitive failed. Treated like `PaneDead` for routing; the
    /// delivery cursor is not advanced.
    InjectFailed { target: Agent, detail: String },
    /// An attempt to persist a smaller cursor value. Programming error.
    CursorRetreat { agent: Agent, cursor: &'static str, current: u64, attempted: u64 },
}

impl RouteError {
    /// Short wire-format code, used in bus events.
    pub fn code(&self) -> &'static str {
        match self {
            Self::PaneDead(_) => "pane_dead",
            Self::SmokeSignal(_) => "smoke_signal",
            Self::Interference(_) => "interference",
            Self::InjectFailed { .. } => "inject_failed",
            Self::CursorRetreat { .. } => "cursor_retreat",
        }
    }

    /// The agent this failure concerns, when meaningful.
    pub fn agent(&self) -> Option<Agent> {
        match self {
            Self::PaneDead(a) | Self::SmokeSignal(a) | Self::Interference(a) => Some(*a),
            Self::InjectFailed { target, .. } => Some(*target),
            Self::CursorRetreat { agent, .. } => Some(*agent),
        }
    }
}

impl fmt::Display for RouteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PaneDead(a) => write!(f, "pane for {a} is no longer accepting input"),
            Self::SmokeSignal(a) => write!(f, "SMOKE SIGNAL: no response detected from {a}"),
            Self::Interference(a) => {
                write!(f, "interference: unexpected user input in {a}'s session")
            }
            Self::InjectFailed { target, detail } => {
                write!(f, "paste to {target} failed: {detail}")
            }
            Self::CursorRetreat { agent, cursor, current, attempted } => write!(
                f,
                "refusing to retreat {cursor} cursor for {agent}: {current} -> {attempted}"
            ),
        }
    }
}

impl std::error::Error for RouteError {}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
