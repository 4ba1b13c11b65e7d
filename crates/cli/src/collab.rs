// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The collab orchestrator: an automated turn loop alternating routed sends
//! between the two agents, with user interjections, a convergence protocol,
//! and halt semantics. Every exit path funnels through one cleanup block
//! that synchronizes delivery cursors and closes the exchange log.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Local;
use tokio::sync::mpsc;
use tracing::warn;

use crate::agent::Agent;
use crate::block::{normalize, Block, Source};
use crate::bus::{EventBus, EventKind};
use crate::error::RouteError;
use crate::exchange::ExchangeLog;
use crate::repl::InputEvent;
use crate::router::{Response, Router};

/// Trailing-line signal an agent uses to request a collab.
pub const COLLAB_SIGNAL: &str = "[COLLAB]";
/// Trailing-line signal an agent uses to propose convergence.
pub const CONVERGE_SIGNAL: &str = "[CONVERGED]";

/// Last non-empty line of a response body.
pub fn last_nonempty_line(text: &str) -> Option<&str> {
    text.lines().rev().map(str::trim).find(|l| !l.is_empty())
}

/// Whether the response ends with `signal` as the sole content of its last
/// non-empty line.
pub fn signals(text: &str, signal: &str) -> bool {
    last_nonempty_line(text) == Some(signal)
}

/// Remove a trailing `signal` line (and the whitespace around it). Bodies
/// without the signal pass through unchanged.
pub fn strip_trailing_signal(text: &str, signal: &str) -> String {
    if !signals(text, signal) {
        return text.to_string();
    }
    let trimmed = text.trim_end();
    trimmed[..trimmed.len() - signal.len()].trim_end().to_string()
}

/// Remove every trailing collab signal, for transcripted bodies.
pub fn strip_all_signals(text: &str) -> String {
    let mut body = text.to_string();
    loop {
        let next = strip_trailing_signal(
            &strip_trailing_signal(&body, COLLAB_SIGNAL),
            CONVERGE_SIGNAL,
        );
        if next == body {
            return body;
        }
        body = next;
    }
}

/// Why a collab ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Converged,
    TurnsReached,
    UserHalt,
    Timeout,
    Interference,
    PaneDead,
}

impl StopReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Converged => "converged",
            Self::TurnsReached => "turns_reached",
            Self::UserHalt => "user_halt",
            Self::Timeout => "timeout",
            Self::Interference => "interference",
            Self::PaneDead => "pane_dead",
        }
    }

    fn from_error(err: &anyhow::Error) -> Self {
        match err.downcast_ref::<RouteError>() {
            Some(RouteError::SmokeSignal(_)) => Self::Timeout,
            Some(RouteError::Interference(_)) => Self::Interference,
            _ => Self::PaneDead,
        }
    }
}

/// Seed for an agent-initiated collab: the response that carried
/// `[COLLAB]`, plus the watch's accumulated blocks for exchange-log
/// continuity.
pub struct CollabSeed {
    pub response: Response,
    pub blocks: Vec<Block>,
}

/// How a collab begins: `/collab` (with an initial message) or detection of
/// a `[COLLAB]` trailer (with a seed).
pub struct CollabRequest {
    pub turns: u32,
    pub starter: Agent,
    pub initial_message: Option<String>,
    pub seed: Option<CollabSeed>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollabOutcome {
    pub stop_reason: StopReason,
    pub turns_completed: u32,
}

struct CollabSession<'a> {
    router: &'a mut Router,
    bus: &'a EventBus,
    halt: &'a AtomicBool,
    input_rx: &'a mut mpsc::Receiver<InputEvent>,
    exchange: ExchangeLog,
    turns: u32,
    turns_completed: u32,
    /// Queue drained into each routed send.
    interjections: Vec<String>,
    /// Interjections routed on the previous turn, replayed once so the
    /// other agent sees them too.
    replayed_last: Vec<String>,
    pending_converge: Option<Agent>,
    last_unrouted: Option<Agent>,
    initial_anchor: Option<String>,
    first_route_done: bool,
}

/// Run a collab to completion. Normal terminations return the outcome;
/// routing failures run the same cleanup and then re-surface.
pub async fn run_collab(
    router: &mut Router,
    bus: &EventBus,
    workspace_root: &Path,
    request: CollabRequest,
    halt: &AtomicBool,
    input_rx: &mut mpsc::Receiver<InputEvent>,
) -> anyhow::Result<CollabOutcome> {
    halt.store(false, Ordering::Relaxed);
    bus.log(
        EventKind::Collab,
        format!("collab started with {}", request.starter),
        Some(request.starter),
        None,
        Some(serde_json::json!({ "turns": request.turns })),
    )?;

    let mut session = CollabSession {
        router,
        bus,
        halt,
        input_rx,
        exchange: ExchangeLog::create(workspace_root, Local::now())?,
        turns: request.turns,
        turns_completed: 0,
        interjections: Vec::new(),
        replayed_last: Vec::new(),
        pending_converge: None,
        last_unrouted: None,
        initial_anchor: request.initial_message.as_deref().map(normalize),
        first_route_done: false,
    };

    match session.drive(request).await {
        Ok(stop_reason) => {
            let turns_completed = session.turns_completed;
            session.cleanup(stop_reason);
            Ok(CollabOutcome { stop_reason, turns_completed })
        }
        Err(err) => {
            session.cleanup(StopReason::from_error(&err));
            Err(err)
        }
    }
}

impl CollabSession<'_> {
    async fn drive(&mut self, request: CollabRequest) -> anyhow::Result<StopReason> {
        let starter = request.starter;

        // Seed turn: either send the user's initial message and wait, or
        // adopt the already-received response that carried [COLLAB].
        let mut response = match request.seed {
            Some(seed) => {
                for block in &seed.blocks {
                    self.exchange.append_block(block.source, &block.text, Local::now())?;
                }
                self.exchange.append_block(starter.into(), &seed.response.text, Local::now())?;
                self.turns_completed = 1;
                seed.response
            }
            None => {
                let initial = request.initial_message.clone().unwrap_or_default();
                self.exchange.append_block(Source::User, &initial, Local::now())?;
                self.router.send_user_message(starter, &initial)?;
                let response = self.router.wait_for_response(starter, self.halt, true).await?;
                self.turns_completed = 1;
                self.exchange.append_block(starter.into(), &response.text, Local::now())?;
                response
            }
        };
        let mut current = starter;

        loop {
            self.drain_input()?;

            let peer = current.peer();
            let signaled = signals(&response.text, CONVERGE_SIGNAL);
            let converged = signaled && self.pending_converge == Some(peer);
            self.pending_converge = if signaled { Some(current) } else { None };

            // Halt with a response in hand: leave it unrouted so the
            // selective cursor sync keeps it deliverable as delta.
            if self.halt_requested() {
                self.last_unrouted = Some(current);
                return Ok(StopReason::UserHalt);
            }

            if !converged && self.turns_completed >= self.turns {
                return Ok(StopReason::TurnsReached);
            }

            // Route the response onward. [COLLAB] trailers are stripped;
            // [CONVERGED] rides along so the peer sees the proposal.
            self.last_unrouted = Some(current);
            let stripped = strip_trailing_signal(&response.text, COLLAB_SIGNAL);
            let drained = std::mem::take(&mut self.interjections);
            for interjection in &drained {
                self.exchange.append_block(Source::User, interjection, Local::now())?;
            }
            let mut routed: Vec<String> = self.replayed_last.clone();
            routed.extend(drained.iter().cloned());

            let echoed_anchor =
                if self.first_route_done { None } else { self.initial_anchor.clone() };
            self.router.send_routed_message(
                peer,
                current,
                &stripped,
                &routed,
                echoed_anchor.as_deref(),
            )?;
            self.first_route_done = true;
            self.last_unrouted = None;
            self.replayed_last = drained;

            if converged {
                return Ok(StopReason::Converged);
            }

            self.drain_input()?;
            if self.halt_requested() {
                return Ok(StopReason::UserHalt);
            }

            response = self.router.wait_for_response(peer, self.halt, true).await?;
            self.turns_completed += 1;
            self.exchange.append_block(peer.into(), &response.text, Local::now())?;
            current = peer;
        }
    }

    fn halt_requested(&self) -> bool {
        self.halt.load(Ordering::Relaxed)
    }

    /// Drain queued line events: `/halt` (and `Quit`/Ctrl+C) set the halt
    /// flag; anything else typed is queued as an interjection and
    /// acknowledged immediately.
    fn drain_input(&mut self) -> anyhow::Result<()> {
        while let Ok(event) = self.input_rx.try_recv() {
            match event {
                InputEvent::Submit(text) => {
                    let trimmed = text.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    if trimmed == "/halt" || trimmed == "/quit" {
                        self.halt.store(true, Ordering::Relaxed);
                        self.bus.log(EventKind::System, "halt requested", None, None, None)?;
                    } else {
                        self.interjections.push(text);
                        self.bus.log(
                            EventKind::System,
                            "interjection queued",
                            None,
                            None,
                            None,
                        )?;
                        self.bus.update_metrics(|m| m.interjections_queued += 1)?;
                    }
                }
                InputEvent::Quit => {
                    self.halt.store(true, Ordering::Relaxed);
                }
                InputEvent::ToggleTarget | InputEvent::Idle => {}
            }
        }
        Ok(())
    }

    /// The single exit path: selective cursor sync, exchange footer,
    /// terminal collab event. Sync failures warn but never block the rest.
    fn cleanup(&mut self, stop_reason: StopReason) {
        let scope: Vec<Agent> = match (stop_reason, self.last_unrouted) {
            (StopReason::UserHalt, Some(unrouted)) => vec![unrouted],
            _ => Vec::new(),
        };
        if let Err(e) = self.router.sync_delivery_cursors(&scope) {
            warn!(error = %format!("{e:#}"), "delivery cursor sync failed on collab exit");
        }

        if let Err(e) = self.exchange.close(self.turns_completed, stop_reason.as_str()) {
            warn!(error = %format!("{e:#}"), "failed to close exchange log");
        }

        let _ = self.bus.log(
            EventKind::Collab,
            format!("collab ended: {}", stop_reason.as_str()),
            None,
            None,
            Some(serde_json::json!({
                "stop_reason": stop_reason.as_str(),
                "turns_completed": self.turns_completed,
            })),
        );
        let _ = self.bus.update_metrics(|m| m.collabs_completed += 1);
    }
}

#[cfg(test)]
#[path = "collab_tests.rs"]
mod tests;
