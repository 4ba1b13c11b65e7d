// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::agent::Agent;
use crate::state::StateStore;

use super::{run, RegisterArgs};

fn args(workspace: &std::path::Path) -> RegisterArgs {
    RegisterArgs {
        agent: "codex".into(),
        session_file: "/logs/rollout.jsonl".into(),
        session_id: "sess-42".into(),
        pane: "%7".into(),
        cwd: Some("/work".into()),
        workspace: workspace.to_path_buf(),
    }
}

#[test]
fn writes_a_loadable_participant_record() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    assert_eq!(run(&args(dir.path())), 0);

    let store = StateStore::new(dir.path());
    let participant = store.load_participant(Agent::Codex)?;
    assert_eq!(participant.session_file, std::path::PathBuf::from("/logs/rollout.jsonl"));
    assert_eq!(participant.session_id, "sess-42");
    assert_eq!(participant.pane_handle, "%7");
    Ok(())
}

#[test]
fn relative_session_files_are_anchored_to_cwd() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut a = args(dir.path());
    a.session_file = "logs/rollout.jsonl".into();
    assert_eq!(run(&a), 0);

    let participant = StateStore::new(dir.path()).load_participant(Agent::Codex)?;
    assert_eq!(participant.session_file, std::path::PathBuf::from("/work/logs/rollout.jsonl"));
    Ok(())
}

#[test]
fn unknown_agent_is_a_usage_error() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let mut a = args(dir.path());
    a.agent = "gemini".into();
    assert_eq!(run(&a), 2);
    Ok(())
}

#[test]
fn reregistration_replaces_the_record() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    assert_eq!(run(&args(dir.path())), 0);

    let mut updated = args(dir.path());
    updated.session_file = "/logs/resumed.jsonl".into();
    assert_eq!(run(&updated), 0);

    let participant = StateStore::new(dir.path()).load_participant(Agent::Codex)?;
    assert_eq!(participant.session_file, std::path::PathBuf::from("/logs/resumed.jsonl"));
    Ok(())
}
