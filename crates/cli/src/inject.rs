// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Payload injection into agent panes.
//!
//! The core only requires two operations: deliver a payload to the target's
//! input channel followed by a submit keystroke, and probe whether the pane
//! still accepts input. `paste` is best-effort atomic: on failure nothing
//! partial may have been delivered, so the whole payload is staged in a tmux
//! buffer before anything touches the pane.

use std::collections::HashMap;
use std::io::Write;
use std::process::{Command, Stdio};
use std::time::Duration;

use crate::agent::Agent;

/// Delivery seam between the router and the terminal multiplexer.
pub trait Injector: Send + Sync {
    /// Deliver `payload` to the target's input channel and submit it.
    fn paste(&self, target: Agent, payload: &str) -> anyhow::Result<()>;

    /// Whether the target's pane still accepts input.
    fn pane_alive(&self, target: Agent) -> bool;
}

/// Pause between pasting and the submit keystroke, scaled by payload size so
/// slow TUIs finish ingesting large pastes before Enter arrives.
///
/// Payloads up to 256 bytes get the base delay; each byte beyond that adds
/// `per_byte`.
pub fn submit_delay(base: Duration, per_byte: Duration, len: usize) -> Duration {
    let extra_bytes = len.saturating_sub(256);
    base + per_byte * extra_bytes as u32
}

/// tmux-backed injector. Pane handles come from the participant records.
pub struct TmuxInjector {
    panes: HashMap<Agent, String>,
    base_delay: Duration,
    per_byte_delay: Duration,
}

impl TmuxInjector {
    pub fn new(panes: HashMap<Agent, String>) -> Self {
        Self {
            panes,
            base_delay: Duration::from_millis(150),
            per_byte_delay: Duration::from_micros(20),
        }
    }

    fn pane(&self, target: Agent) -> anyhow::Result<&str> {
        self.panes
            .get(&target)
            .map(String::as_str)
            .ok_or_else(|| anyhow::anyhow!("no pane registered for {target}"))
    }
}

impl Injector for TmuxInjector {
    fn paste(&self, target: Agent, payload: &str) -> anyhow::Result<()> {
        let pane = self.pane(target)?;

        // Stage the full payload in a named buffer first.
        let mut load = Command::new("tmux")
            .args(["load-buffer", "-b", "claodex", "-"])
            .stdin(Stdio::piped())
            .spawn()?;
        if let Some(stdin) = load.stdin.as_mut() {
            stdin.write_all(payload.as_bytes())?;
        }
        let status = load.wait()?;
        if !status.success() {
            anyhow::bail!("tmux load-buffer exited with {status}");
        }

        // Plain paste-buffer: no bracketed-paste wrapping, which some TUIs
        // re-interpret inside pasted content.
        let status = Command::new("tmux")
            .args(["paste-buffer", "-d", "-b", "claodex", "-t", pane])
            .status()?;
        if !status.success() {
            anyhow::bail!("tmux paste-buffer exited with {status}");
        }

        std::thread::sleep(submit_delay(self.base_delay, self.per_byte_delay, payload.len()));

        let status = Command::new("tmux").args(["send-keys", "-t", pane, "Enter"]).status()?;
        if !status.success() {
            anyhow::bail!("tmux send-keys exited with {status}");
        }
        Ok(())
    }

    fn pane_alive(&self, target: Agent) -> bool {
        let Ok(pane) = self.pane(target) else {
            return false;
        };
        Command::new("tmux")
            .args(["display-message", "-p", "-t", pane, "#{pane_id}"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }
}

#[cfg(test)]
#[path = "inject_tests.rs"]
mod tests;
