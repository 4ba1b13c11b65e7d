// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Harness for end-to-end scenario tests.
//!
//! Scenarios run against a registered two-agent workspace with synthesized
//! session logs and a scripted injector; agent turns are played back by
//! appending the rows a real agent process would flush.

pub use claodex::test_support::{
    assistant_row, spawn_scripted_agents, turn_end_rows, user_row, Fixture, ScriptedInjector,
    SessionFile,
};

use claodex::agent::Agent;

/// Append a complete agent turn (response text plus turn-end marker) to the
/// agent's session log.
pub fn complete_turn(fx: &Fixture, agent: Agent, text: &str) -> anyhow::Result<()> {
    fx.log(agent).append(&assistant_row(agent, text))?;
    for row in turn_end_rows(agent) {
        fx.log(agent).append(&row)?;
    }
    Ok(())
}
