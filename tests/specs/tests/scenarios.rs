// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end scenarios over a registered two-agent workspace: round-trip
//! delta delivery, stacked sends, convergence, halt recovery, the Stop-event
//! flush race, and agent-initiated collabs.

use std::sync::atomic::AtomicBool;

use tokio::sync::mpsc;

use claodex::agent::Agent;
use claodex::block::{Block, Source};
use claodex::collab::{run_collab, signals, CollabRequest, CollabSeed, StopReason, COLLAB_SIGNAL};
use claodex::repl::InputEvent;
use claodex::state::CursorKind;
use claodex_specs::{complete_turn, spawn_scripted_agents, Fixture};

#[test]
fn round_trip_delivers_each_event_once() -> anyhow::Result<()> {
    let fx = Fixture::new()?;
    let mut router = fx.router()?;

    // User → claude, claude answers, user toggles to codex.
    router.send_user_message(Agent::Claude, "hello")?;
    complete_turn(&fx, Agent::Claude, "hi")?;
    let (_, blocks) = router.send_user_message(Agent::Codex, "your turn")?;

    assert_eq!(
        blocks,
        vec![
            Block::user("hello"),
            Block::agent(Agent::Claude, "hi"),
            Block::user("your turn"),
        ]
    );
    let rendered = fx
        .injector
        .last_paste_to(Agent::Codex)
        .ok_or_else(|| anyhow::anyhow!("nothing pasted"))?;
    assert_eq!(rendered, "--- user ---\nhello\n\n--- claude ---\nhi\n\n--- user ---\nyour turn");

    // Delivery caught up: a follow-up send repeats nothing.
    assert_eq!(
        router.cursor(CursorKind::Delivery, Agent::Codex)?,
        router.cursor(CursorKind::Read, Agent::Claude)?
    );
    let (_, blocks) = router.send_user_message(Agent::Codex, "ok")?;
    assert_eq!(blocks, vec![Block::user("ok")]);
    Ok(())
}

#[test]
fn stacked_sends_supersede_the_watch() -> anyhow::Result<()> {
    let fx = Fixture::new()?;
    let mut router = fx.router()?;

    router.send_user_message(Agent::Claude, "first")?;
    let first_sent = router
        .pending(Agent::Claude)
        .map(|w| w.sent_at)
        .ok_or_else(|| anyhow::anyhow!("no watch"))?;
    router.send_user_message(Agent::Claude, "second")?;

    // Each delivery carried only its own user block.
    let pastes: Vec<String> = fx
        .injector
        .pastes()
        .into_iter()
        .filter(|(a, _)| *a == Agent::Claude)
        .map(|(_, p)| p)
        .collect();
    assert_eq!(pastes, vec!["--- user ---\nfirst", "--- user ---\nsecond"]);

    // One watch per target, with the earliest sent_at and both payloads.
    let watch = router.pending(Agent::Claude).ok_or_else(|| anyhow::anyhow!("no watch"))?;
    assert_eq!(watch.sent_at, first_sent);
    assert_eq!(watch.blocks, vec![Block::user("first"), Block::user("second")]);
    Ok(())
}

#[tokio::test]
async fn convergence_requires_consecutive_signals() -> anyhow::Result<()> {
    let fx = Fixture::new()?;
    let mut router = fx.router()?;
    let halt = AtomicBool::new(false);
    let (_tx, mut input_rx) = mpsc::channel::<InputEvent>(4);
    let agents = spawn_scripted_agents(
        &fx,
        &[(Agent::Claude, "ship it\n[CONVERGED]"), (Agent::Codex, "agreed\n[CONVERGED]")],
    );

    let outcome = run_collab(
        &mut router,
        &fx.bus,
        fx.dir.path(),
        CollabRequest {
            turns: 10,
            starter: Agent::Claude,
            initial_message: Some("wrap up?".into()),
            seed: None,
        },
        &halt,
        &mut input_rx,
    )
    .await?;
    agents.abort();

    assert_eq!(outcome.stop_reason, StopReason::Converged);
    // The final routed payload still carries the signal to the peer.
    let to_claude = fx.injector.last_paste_to(Agent::Claude).unwrap_or_default();
    assert!(to_claude.contains("[CONVERGED]"));

    // Both sides fully synchronized: no residual delta either way.
    for agent in Agent::ALL {
        let (blocks, _) = router.build_delta_for_target(agent, None)?;
        assert_eq!(blocks, Vec::<Block>::new());
    }
    Ok(())
}

#[tokio::test]
async fn halt_keeps_the_unrouted_response_deliverable() -> anyhow::Result<()> {
    let fx = Fixture::new()?;
    let mut router = fx.router()?;
    let halt = AtomicBool::new(false);
    let (tx, mut input_rx) = mpsc::channel::<InputEvent>(4);
    let agents = spawn_scripted_agents(&fx, &[(Agent::Claude, "R")]);

    // The halt is queued before the orchestrator's first cooperative point.
    tx.send(InputEvent::Submit("/halt".into())).await?;

    let outcome = run_collab(
        &mut router,
        &fx.bus,
        fx.dir.path(),
        CollabRequest {
            turns: 8,
            starter: Agent::Claude,
            initial_message: Some("the collab ask".into()),
            seed: None,
        },
        &halt,
        &mut input_rx,
    )
    .await?;
    agents.abort();

    assert_eq!(outcome.stop_reason, StopReason::UserHalt);
    assert!(fx.injector.last_paste_to(Agent::Codex).is_none());

    // The next user-facing send to codex replays the halted exchange ahead
    // of the new instruction.
    let (_, blocks) = router.send_user_message(Agent::Codex, "(collab halted by user)\n\nnext")?;
    assert_eq!(
        blocks,
        vec![
            Block::user("the collab ask"),
            Block::agent(Agent::Claude, "R"),
            Block::user("(collab halted by user)\n\nnext"),
        ]
    );
    Ok(())
}

#[test]
fn stop_event_fallback_waits_for_the_flush() -> anyhow::Result<()> {
    let fx = Fixture::new()?;
    let mut router = fx.router()?;

    router.send_user_message(Agent::Claude, "do a thing")?;
    fx.claude_log.append(&claodex_specs::assistant_row(Agent::Claude, "pre-tool narration"))?;
    fx.claude_log.append(&claodex::test_support::claude_tool_result_row())?;

    let stop_at = chrono::Utc::now() + chrono::Duration::seconds(1);
    fx.write_stop_event(&stop_at.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))?;

    // Stop observed, but the newest assistant frame is not past the last
    // user-row boundary: no completion, latch held.
    assert!(router.poll_for_response(Agent::Claude)?.is_none());

    // The flush lands; the same Stop event now completes the turn.
    fx.claude_log.append(&claodex_specs::assistant_row(Agent::Claude, "final text"))?;
    let (response, _) = router
        .poll_for_response(Agent::Claude)?
        .ok_or_else(|| anyhow::anyhow!("latched response never surfaced"))?;
    assert_eq!(response.text, "final text");
    assert_eq!(response.detected_at.timestamp_millis(), stop_at.timestamp_millis());
    Ok(())
}

#[tokio::test]
async fn agent_initiated_collab_preserves_context() -> anyhow::Result<()> {
    let fx = Fixture::new()?;
    let mut router = fx.router()?;

    // Normal mode: user asks claude; claude asks for a collab.
    router.send_user_message(Agent::Claude, "design auth")?;
    complete_turn(&fx, Agent::Claude, "here are my thoughts\n[COLLAB]")?;
    let (response, watch) = router
        .poll_for_response(Agent::Claude)?
        .ok_or_else(|| anyhow::anyhow!("no response"))?;
    assert!(signals(&response.text, COLLAB_SIGNAL));

    let halt = AtomicBool::new(false);
    let (_tx, mut input_rx) = mpsc::channel::<InputEvent>(4);
    let agents = spawn_scripted_agents(&fx, &[(Agent::Codex, "sounds good")]);

    let outcome = run_collab(
        &mut router,
        &fx.bus,
        fx.dir.path(),
        CollabRequest {
            turns: 2,
            starter: Agent::Claude,
            initial_message: None,
            seed: Some(CollabSeed { response, blocks: watch.blocks }),
        },
        &halt,
        &mut input_rx,
    )
    .await?;
    agents.abort();

    assert_eq!(outcome.stop_reason, StopReason::TurnsReached);

    // The first routed payload gives codex the user's original message and
    // claude's stripped response, in that order.
    let to_codex = fx
        .injector
        .pastes()
        .into_iter()
        .find(|(a, _)| *a == Agent::Codex)
        .map(|(_, p)| p)
        .ok_or_else(|| anyhow::anyhow!("nothing routed to codex"))?;
    assert_eq!(
        to_codex,
        "--- user ---\ndesign auth\n\n--- claude ---\nhere are my thoughts"
    );
    Ok(())
}

#[tokio::test]
async fn interjections_reach_both_agents_exactly_once() -> anyhow::Result<()> {
    let fx = Fixture::new()?;
    let mut router = fx.router()?;
    let halt = AtomicBool::new(false);
    let (tx, mut input_rx) = mpsc::channel::<InputEvent>(4);
    let agents = spawn_scripted_agents(
        &fx,
        &[
            (Agent::Claude, "r1"),
            (Agent::Codex, "r2"),
            (Agent::Claude, "r3"),
            (Agent::Codex, "r4"),
        ],
    );

    tx.send(InputEvent::Submit("consider caching".into())).await?;
    run_collab(
        &mut router,
        &fx.bus,
        fx.dir.path(),
        CollabRequest {
            turns: 4,
            starter: Agent::Claude,
            initial_message: Some("performance?".into()),
            seed: None,
        },
        &halt,
        &mut input_rx,
    )
    .await?;
    agents.abort();

    // Count the interjection across every payload pasted to each agent:
    // exactly once per agent.
    for agent in Agent::ALL {
        let count = fx
            .injector
            .pastes()
            .iter()
            .filter(|(a, _)| *a == agent)
            .filter(|(_, p)| p.contains("--- user ---\nconsider caching"))
            .count();
        assert_eq!(count, 1, "interjection count for {agent}");
    }
    Ok(())
}

#[test]
fn composition_shape_holds_for_routed_sends() -> anyhow::Result<()> {
    let fx = Fixture::new()?;
    let mut router = fx.router()?;

    fx.claude_log.append(&claodex_specs::user_row(Agent::Claude, "context q"))?;
    fx.claude_log.append(&claodex_specs::assistant_row(Agent::Claude, "the answer"))?;

    let blocks = router.send_routed_message(
        Agent::Codex,
        Agent::Claude,
        "the answer",
        &["a note".to_string()],
        None,
    )?;

    // Routed sends end with the source agent's block; user blocks appear
    // strictly before it.
    assert_eq!(blocks.last().map(|b| b.source), Some(Source::Claude));
    let last_user = blocks.iter().rposition(|b| b.source == Source::User);
    let agent_pos = blocks.iter().rposition(|b| b.source == Source::Claude);
    assert!(last_user < agent_pos);
    Ok(())
}
