// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::router::RouterConfig;

/// Two-agent message router for interactive AI coding agents.
#[derive(Debug, Parser)]
#[command(name = "claodex", version, about)]
pub struct Config {
    /// Workspace root holding state/ and exchanges/.
    #[arg(long, env = "CLAODEX_WORKSPACE", default_value = ".")]
    pub workspace: PathBuf,

    /// Seconds between turn-detection polls.
    #[arg(long, env = "CLAODEX_POLL_INTERVAL", default_value = "0.5")]
    pub poll_interval_seconds: f64,

    /// Seconds before a turn wait gives up with a smoke signal.
    #[arg(long, env = "CLAODEX_TURN_TIMEOUT", default_value = "18000")]
    pub turn_timeout_seconds: u64,

    /// Directory of Claude's debug logs (Stop-event fallback).
    /// Defaults to ~/.claude/debug.
    #[arg(long, env = "CLAODEX_CLAUDE_DEBUG_DIR")]
    pub claude_debug_dir: Option<PathBuf>,

    /// Default turn budget for /collab.
    #[arg(long, env = "CLAODEX_COLLAB_TURNS", default_value = "8")]
    pub collab_turns: u32,

    /// Log format (json or text).
    #[arg(long, env = "CLAODEX_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "CLAODEX_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(self.poll_interval_seconds > 0.0) {
            anyhow::bail!("--poll-interval-seconds must be positive");
        }
        if self.turn_timeout_seconds == 0 {
            anyhow::bail!("--turn-timeout-seconds must be positive");
        }
        if self.collab_turns == 0 {
            anyhow::bail!("--collab-turns must be positive");
        }
        match self.log_format.as_str() {
            "json" | "text" => {}
            other => anyhow::bail!("invalid log format: {other}"),
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.poll_interval_seconds)
    }

    pub fn turn_timeout(&self) -> Duration {
        Duration::from_secs(self.turn_timeout_seconds)
    }

    /// The configured debug dir, or `~/.claude/debug`.
    pub fn effective_claude_debug_dir(&self) -> PathBuf {
        self.claude_debug_dir.clone().unwrap_or_else(|| {
            dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".claude").join("debug")
        })
    }

    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            poll_interval: self.poll_interval(),
            turn_timeout: self.turn_timeout(),
            claude_debug_dir: self.effective_claude_debug_dir(),
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
