// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workspace state: cursor files and participant records.
//!
//! Cursors are single ASCII integers, one file each, flushed with a
//! temp-file + rename so a crash never leaves a torn value. Participant
//! records are written once by the agent-side `register` step and read-only
//! here, except that a re-registration (e.g. `/resume` inside the agent)
//! replaces the record; callers detect that through the file's mtime.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::Context;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::agent::Agent;
use crate::error::RouteError;

/// Which of an agent's two cursors a read/write refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorKind {
    /// Extractor's read position in the agent's own JSONL.
    Read,
    /// Highest line of the *peer's* JSONL already injected into the agent.
    Delivery,
}

impl CursorKind {
    fn dir(self) -> &'static str {
        match self {
            Self::Read => "cursors",
            Self::Delivery => "delivery",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Delivery => "delivery",
        }
    }
}

/// Registration record for one agent, produced by `claodex register` inside
/// the agent's pane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub agent: Agent,
    pub session_file: PathBuf,
    pub session_id: String,
    pub pane_handle: String,
    pub cwd: PathBuf,
    pub registered_at: DateTime<FixedOffset>,
}

/// File-backed store for cursors and participants under a workspace root.
pub struct StateStore {
    root: PathBuf,
    /// Participant-file mtimes observed at the last load, for re-register
    /// detection.
    mtimes: parking_lot::Mutex<HashMap<Agent, SystemTime>>,
}

impl StateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), mtimes: parking_lot::Mutex::new(HashMap::new()) }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the state directory layout (idempotent).
    pub fn ensure_layout(&self) -> anyhow::Result<()> {
        for dir in ["state/cursors", "state/delivery", "state/participants"] {
            std::fs::create_dir_all(self.root.join(dir))
                .with_context(|| format!("creating {dir}"))?;
        }
        std::fs::create_dir_all(self.root.join("exchanges")).context("creating exchanges")?;
        Ok(())
    }

    fn cursor_path(&self, kind: CursorKind, agent: Agent) -> PathBuf {
        self.root.join("state").join(kind.dir()).join(agent.as_str())
    }

    /// Read a cursor; a missing file reads as `0` (before the first line).
    pub fn cursor(&self, kind: CursorKind, agent: Agent) -> anyhow::Result<u64> {
        let path = self.cursor_path(kind, agent);
        let contents = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        contents
            .trim()
            .parse::<u64>()
            .with_context(|| format!("corrupt {} cursor for {agent}", kind.as_str()))
    }

    /// Persist a cursor advance. Retreats are rejected as programming
    /// errors; equal writes are no-ops.
    pub fn write_cursor(&self, kind: CursorKind, agent: Agent, value: u64) -> anyhow::Result<()> {
        let current = self.cursor(kind, agent)?;
        if value < current {
            return Err(RouteError::CursorRetreat {
                agent,
                cursor: kind.as_str(),
                current,
                attempted: value,
            }
            .into());
        }
        if value == current {
            return Ok(());
        }

        let path = self.cursor_path(kind, agent);
        atomic_write(&path, format!("{value}\n").as_bytes())
            .with_context(|| format!("writing {} cursor for {agent}", kind.as_str()))
    }

    fn participant_path(&self, agent: Agent) -> PathBuf {
        self.root.join("state").join("participants").join(format!("{agent}.json"))
    }

    /// Write a participant record (registration step).
    pub fn write_participant(&self, participant: &Participant) -> anyhow::Result<()> {
        let path = self.participant_path(participant.agent);
        let json = serde_json::to_vec_pretty(participant)?;
        atomic_write(&path, &json)
            .with_context(|| format!("writing participant record for {}", participant.agent))
    }

    /// Load a participant record, recording its mtime for change detection.
    pub fn load_participant(&self, agent: Agent) -> anyhow::Result<Participant> {
        let path = self.participant_path(agent);
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("{agent} is not registered (missing {})", path.display()))?;
        let participant: Participant = serde_json::from_str(&contents)
            .with_context(|| format!("corrupt participant record for {agent}"))?;

        if let Ok(meta) = std::fs::metadata(&path) {
            if let Ok(mtime) = meta.modified() {
                self.mtimes.lock().insert(agent, mtime);
            }
        }
        Ok(participant)
    }

    /// Reload the participant record if its file changed since the last
    /// load (the agent re-registered, e.g. after `/resume`). Returns the
    /// fresh record, or `None` when nothing changed.
    pub fn refresh_participant(&self, agent: Agent) -> anyhow::Result<Option<Participant>> {
        let path = self.participant_path(agent);
        let mtime = match std::fs::metadata(&path).and_then(|m| m.modified()) {
            Ok(t) => t,
            Err(_) => return Ok(None),
        };
        let changed = self.mtimes.lock().get(&agent) != Some(&mtime);
        if !changed {
            return Ok(None);
        }
        self.load_participant(agent).map(Some)
    }
}

/// Write via a temp file in the same directory followed by a rename.
fn atomic_write(path: &Path, contents: &[u8]) -> anyhow::Result<()> {
    let dir = path.parent().context("path has no parent directory")?;
    let tmp = dir.join(format!(
        ".{}.tmp",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("claodex")
    ));
    {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(contents)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
