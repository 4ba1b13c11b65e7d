// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use crate::agent::Agent;
use crate::test_support::{
    claude_assistant_row, claude_tool_result_row, claude_user_row, codex_assistant_row,
    codex_task_complete_row, codex_task_started_row, codex_user_row, SessionFile,
};

use super::{Extractor, RoomEvent};

fn session(dir: &tempfile::TempDir, lines: &[String]) -> anyhow::Result<SessionFile> {
    let file = SessionFile::new(dir.path().join("session.jsonl"));
    file.append_all(lines)?;
    Ok(file)
}

#[test]
fn events_keep_only_the_last_assistant_text_per_turn() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let file = session(
        &dir,
        &[
            claude_user_row("question one"),
            claude_assistant_row("thinking out loud"),
            claude_tool_result_row(),
            claude_assistant_row("final answer one"),
            claude_user_row("question two"),
            claude_assistant_row("final answer two"),
        ],
    )?;

    let extractor = Extractor::new();
    let events = extractor.events_between(Agent::Claude, file.path(), 0, u64::MAX)?;
    assert_eq!(
        events,
        vec![
            RoomEvent::UserText { line: 1, text: "question one".into() },
            RoomEvent::AssistantText { line: 4, text: "final answer one".into() },
            RoomEvent::UserText { line: 5, text: "question two".into() },
            RoomEvent::AssistantText { line: 6, text: "final answer two".into() },
        ]
    );
    Ok(())
}

#[test]
fn events_between_respects_the_window() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let file = session(
        &dir,
        &[
            codex_user_row("first"),
            codex_assistant_row("answer"),
            codex_user_row("second"),
        ],
    )?;

    let extractor = Extractor::new();
    let events = extractor.events_between(Agent::Codex, file.path(), 1, 2)?;
    assert_eq!(events, vec![RoomEvent::AssistantText { line: 2, text: "answer".into() }]);
    Ok(())
}

#[test]
fn refresh_advances_past_parseable_lines() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let file = session(&dir, &[claude_user_row("hello"), claude_assistant_row("hi")])?;

    let mut extractor = Extractor::new();
    let (events, cursor) = extractor.refresh_source(Agent::Claude, file.path(), 0)?;
    assert_eq!(cursor, 2);
    assert_eq!(events.len(), 2);

    // Nothing new: cursor holds.
    let (events, cursor) = extractor.refresh_source(Agent::Claude, file.path(), cursor)?;
    assert_eq!(cursor, 2);
    assert!(events.is_empty());
    Ok(())
}

#[test]
fn refresh_defers_a_bad_tail_then_skips_after_three_attempts() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let file = session(&dir, &[claude_user_row("ok")])?;
    file.append("{ this is not json")?;

    let mut extractor = Extractor::new();

    // Two refreshes: deferred, cursor stays before the bad line.
    let (_, cursor) = extractor.refresh_source(Agent::Claude, file.path(), 0)?;
    assert_eq!(cursor, 1);
    let (_, cursor) = extractor.refresh_source(Agent::Claude, file.path(), cursor)?;
    assert_eq!(cursor, 1);

    // Third consecutive failure: the line is skipped.
    let (_, cursor) = extractor.refresh_source(Agent::Claude, file.path(), cursor)?;
    assert_eq!(cursor, 2);

    // Subsequent lines process normally.
    file.append(&claude_assistant_row("after the stall"))?;
    let (events, cursor) = extractor.refresh_source(Agent::Claude, file.path(), cursor)?;
    assert_eq!(cursor, 3);
    assert_eq!(events, vec![RoomEvent::AssistantText { line: 3, text: "after the stall".into() }]);
    Ok(())
}

#[test]
fn refresh_skips_a_stalled_line_after_the_timeout() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let file = session(&dir, &[])?;
    file.append("not json at all")?;

    let mut extractor = Extractor::new().with_stall_timeout(Duration::from_millis(5));

    let (_, cursor) = extractor.refresh_source(Agent::Claude, file.path(), 0)?;
    assert_eq!(cursor, 0);

    std::thread::sleep(Duration::from_millis(10));
    let (_, cursor) = extractor.refresh_source(Agent::Claude, file.path(), 0)?;
    assert_eq!(cursor, 1);
    Ok(())
}

#[test]
fn tail_fragment_becomes_parseable_after_completion() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let file = session(&dir, &[codex_user_row("go")])?;
    let full = codex_assistant_row("done");
    let (head, rest) = full.split_at(20);
    file.append_fragment(head)?;

    let mut extractor = Extractor::new();
    let (_, cursor) = extractor.refresh_source(Agent::Codex, file.path(), 0)?;
    assert_eq!(cursor, 1);

    file.append_fragment(rest)?;
    file.append_fragment("\n")?;
    let (events, cursor) = extractor.refresh_source(Agent::Codex, file.path(), cursor)?;
    assert_eq!(cursor, 2);
    assert_eq!(events, vec![RoomEvent::AssistantText { line: 2, text: "done".into() }]);
    Ok(())
}

#[test]
fn boundary_aware_scan_requires_text_after_the_latest_user_row() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let file = session(
        &dir,
        &[
            claude_user_row("do a thing"),
            claude_assistant_row("pre-tool narration"),
            claude_tool_result_row(),
        ],
    )?;

    let extractor = Extractor::new();
    // The newest assistant frame precedes the tool-result boundary: refuse.
    let text = extractor.latest_assistant_since_last_user_boundary(
        Agent::Claude,
        file.path(),
        0,
        u64::MAX,
    )?;
    assert_eq!(text, None);

    // The non-boundary-aware variant still sees it.
    let text = extractor.latest_assistant_between(Agent::Claude, file.path(), 0, u64::MAX)?;
    assert_eq!(text, Some("pre-tool narration".into()));

    // Once the real final frame lands, the boundary-aware scan accepts.
    file.append(&claude_assistant_row("the real answer"))?;
    let text = extractor.latest_assistant_since_last_user_boundary(
        Agent::Claude,
        file.path(),
        0,
        u64::MAX,
    )?;
    assert_eq!(text, Some("the real answer".into()));
    Ok(())
}

#[test]
fn codex_marker_scan_ignores_stale_completes() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let file = session(
        &dir,
        &[
            codex_task_complete_row(), // stale, from a previous turn
            codex_task_started_row(),
        ],
    )?;

    let extractor = Extractor::new();
    assert!(!extractor.turn_marker_after(Agent::Codex, file.path(), 0)?);

    file.append(&codex_task_complete_row())?;
    assert!(extractor.turn_marker_after(Agent::Codex, file.path(), 0)?);
    Ok(())
}

#[test]
fn codex_marker_scan_accepts_complete_without_started() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let file = session(&dir, &[codex_assistant_row("hi"), codex_task_complete_row()])?;

    let extractor = Extractor::new();
    assert!(extractor.turn_marker_after(Agent::Codex, file.path(), 0)?);
    // Nothing after the marker itself.
    assert!(!extractor.turn_marker_after(Agent::Codex, file.path(), 2)?);
    Ok(())
}

#[test]
fn user_rows_between_reports_meta_and_instructions() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let file = session(
        &dir,
        &[
            claude_user_row("real input"),
            claude_tool_result_row(),
            claude_assistant_row("answer"),
        ],
    )?;

    let extractor = Extractor::new();
    let rows = extractor.user_rows_between(Agent::Claude, file.path(), 0, u64::MAX)?;
    assert_eq!(rows, vec![(1, Some("real input".into())), (2, None)]);
    Ok(())
}
