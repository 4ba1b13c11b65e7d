// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::agent::Agent;

use super::RouteError;

#[yare::parameterized(
    pane_dead = { RouteError::PaneDead(Agent::Claude), "pane_dead" },
    smoke = { RouteError::SmokeSignal(Agent::Codex), "smoke_signal" },
    interference = { RouteError::Interference(Agent::Claude), "interference" },
)]
fn codes_are_stable(err: RouteError, code: &str) {
    assert_eq!(err.code(), code);
}

#[test]
fn smoke_signal_names_the_target() {
    let err = RouteError::SmokeSignal(Agent::Codex);
    assert!(err.to_string().contains("SMOKE SIGNAL"));
    assert!(err.to_string().contains("codex"));
    assert_eq!(err.agent(), Some(Agent::Codex));
}

#[test]
fn downcasts_through_anyhow() {
    let err: anyhow::Error = RouteError::PaneDead(Agent::Claude).into();
    let route = err.downcast_ref::<RouteError>();
    assert_eq!(route, Some(&RouteError::PaneDead(Agent::Claude)));
}

#[test]
fn cursor_retreat_reports_both_values() {
    let err = RouteError::CursorRetreat {
        agent: Agent::Codex,
        cursor: "delivery",
        current: 12,
        attempted: 7,
    };
    let msg = err.to_string();
    assert!(msg.contains("12"));
    assert!(msg.contains('7'));
    assert!(msg.contains("delivery"));
}
