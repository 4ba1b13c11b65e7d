// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `claodex register` — the agent-side registration step, invoked from
//! inside an agent's pane. Writes the participant record the coordinator
//! reads and creates the workspace state layout on first use.

use std::path::PathBuf;

use crate::agent::Agent;
use crate::state::{Participant, StateStore};

#[derive(Debug, clap::Args)]
pub struct RegisterArgs {
    /// Which agent is registering (claude or codex).
    #[arg(long)]
    pub agent: String,

    /// Path to the agent's JSONL session log.
    #[arg(long)]
    pub session_file: PathBuf,

    /// The agent's session ID.
    #[arg(long)]
    pub session_id: String,

    /// tmux pane handle accepting this agent's input (e.g. %3).
    #[arg(long)]
    pub pane: String,

    /// Working directory of the agent (defaults to the current directory).
    #[arg(long)]
    pub cwd: Option<PathBuf>,

    /// Workspace root holding state/.
    #[arg(long, env = "CLAODEX_WORKSPACE", default_value = ".")]
    pub workspace: PathBuf,
}

/// Run the `register` subcommand. Returns a process exit code.
pub fn run(args: &RegisterArgs) -> i32 {
    let agent: Agent = match args.agent.parse() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("error: {e}");
            return 2;
        }
    };

    match register(agent, args) {
        Ok(participant) => {
            println!(
                "registered {} (session {}, pane {})",
                participant.agent, participant.session_id, participant.pane_handle
            );
            0
        }
        Err(e) => {
            eprintln!("error: {e:#}");
            1
        }
    }
}

fn register(agent: Agent, args: &RegisterArgs) -> anyhow::Result<Participant> {
    let cwd = match &args.cwd {
        Some(dir) => dir.clone(),
        None => std::env::current_dir()?,
    };
    let session_file = absolute(&args.session_file, &cwd);

    let store = StateStore::new(&args.workspace);
    store.ensure_layout()?;

    let participant = Participant {
        agent,
        session_file,
        session_id: args.session_id.clone(),
        pane_handle: args.pane.clone(),
        cwd,
        registered_at: chrono::Local::now().fixed_offset(),
    };
    store.write_participant(&participant)?;
    Ok(participant)
}

fn absolute(path: &std::path::Path, base: &std::path::Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

#[cfg(test)]
#[path = "register_tests.rs"]
mod tests;
