// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Markdown transcript of a collab session, written incrementally as
//! messages arrive and closed with a summary footer.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

use crate::block::Source;
use crate::collab::strip_all_signals;

/// One exchange log file, append-only for the life of a collab.
pub struct ExchangeLog {
    path: PathBuf,
    blocks_written: u64,
}

impl ExchangeLog {
    /// Create `exchanges/collab-{timestamp}.md` under the workspace root.
    pub fn create(root: &Path, started_at: DateTime<Local>) -> anyhow::Result<Self> {
        let dir = root.join("exchanges");
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(format!("collab-{}.md", started_at.format("%Y%m%d-%H%M%S")));

        let mut file = std::fs::File::create(&path)?;
        writeln!(file, "# claodex exchange · {}", started_at.format("%Y-%m-%d"))?;
        Ok(Self { path, blocks_written: 0 })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one message. Collab signals are stripped from the body; a
    /// message reduced to nothing by stripping is skipped.
    pub fn append_block(
        &mut self,
        source: Source,
        text: &str,
        at: DateTime<Local>,
    ) -> anyhow::Result<()> {
        let body = strip_all_signals(text);
        if body.trim().is_empty() {
            return Ok(());
        }

        let mut file = std::fs::OpenOptions::new().append(true).open(&self.path)?;
        if self.blocks_written > 0 {
            writeln!(file, "\n---")?;
        }
        writeln!(file, "\n## {source} · {}\n\n{body}", at.format("%-I:%M %p"))?;
        self.blocks_written += 1;
        Ok(())
    }

    /// Append the summary footer. The log is complete after this.
    pub fn close(&mut self, turns: u32, stop_reason: &str) -> anyhow::Result<()> {
        let mut file = std::fs::OpenOptions::new().append(true).open(&self.path)?;
        writeln!(file, "\n---\n\n*Turns: {turns} · Stop reason: {stop_reason}*")?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "exchange_tests.rs"]
mod tests;
