// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The router: delta composition against persistent cursors, payload
//! injection, pending watches, and turn-end detection for both agents.
//!
//! All cursor movement funnels through here. Read cursors advance when a
//! source is refreshed; delivery cursors advance only after a successful
//! paste, so a failed injection leaves every event still deliverable.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::agent::Agent;
use crate::block::{normalize, render_payload, Block, Source};
use crate::bus::{EventBus, EventKind};
use crate::error::RouteError;
use crate::extract::{claude, Extractor, RoomEvent};
use crate::inject::Injector;
use crate::state::{CursorKind, Participant, StateStore};

/// Tunables the router needs, resolved from the CLI configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub poll_interval: Duration,
    pub turn_timeout: Duration,
    pub claude_debug_dir: PathBuf,
}

/// The router's outstanding expectation that a target will respond.
///
/// At most one per target. A newer send to the same target supersedes the
/// old watch, inheriting the earliest `sent_at` and concatenating `blocks`
/// so the exchange log loses nothing.
#[derive(Debug, Clone)]
pub struct PendingSend {
    pub id: Uuid,
    pub target: Agent,
    pub sent_at: DateTime<Utc>,
    /// `read[target]` at send time: the scan window's lower bound.
    pub anchor_cursor: u64,
    /// Normalized final `--- user ---` block of the composed payload
    /// (empty for pure routed sends).
    pub anchor_text: String,
    pub blocks: Vec<Block>,
}

/// A detected turn-end response.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub text: String,
    pub detected_at: DateTime<Utc>,
}

/// Outcome of one turn-end scan.
enum TurnCheck {
    Pending,
    Completed(Response),
    Interference,
}

pub struct Router {
    store: Arc<StateStore>,
    extractor: Extractor,
    injector: Arc<dyn Injector>,
    bus: Arc<EventBus>,
    config: RouterConfig,
    participants: HashMap<Agent, Participant>,
    pending: HashMap<Agent, PendingSend>,
    /// Stop-event latches keyed by `(target, anchor_cursor)`: a Stop was
    /// observed but the final assistant text had not flushed yet.
    latches: HashMap<(Agent, u64), DateTime<Utc>>,
}

impl Router {
    /// Build a router over a registered workspace. Fails if either
    /// participant record is missing.
    pub fn new(
        store: Arc<StateStore>,
        injector: Arc<dyn Injector>,
        bus: Arc<EventBus>,
        config: RouterConfig,
    ) -> anyhow::Result<Self> {
        let mut participants = HashMap::new();
        for agent in Agent::ALL {
            participants.insert(agent, store.load_participant(agent)?);
        }
        Ok(Self {
            store,
            extractor: Extractor::new(),
            injector,
            bus,
            config,
            participants,
            pending: HashMap::new(),
            latches: HashMap::new(),
        })
    }

    pub fn participant(&self, agent: Agent) -> Option<&Participant> {
        self.participants.get(&agent)
    }

    pub fn pending(&self, target: Agent) -> Option<&PendingSend> {
        self.pending.get(&target)
    }

    pub fn cursor(&self, kind: CursorKind, agent: Agent) -> anyhow::Result<u64> {
        self.store.cursor(kind, agent)
    }

    /// Session file for `agent`, picking up re-registration (the agent ran
    /// `/resume` and its participant record changed).
    fn session_file(&mut self, agent: Agent) -> anyhow::Result<PathBuf> {
        if let Some(fresh) = self.store.refresh_participant(agent)? {
            debug!(agent = %agent, file = %fresh.session_file.display(), "participant re-registered");
            self.participants.insert(agent, fresh);
        }
        self.participants
            .get(&agent)
            .map(|p| p.session_file.clone())
            .ok_or_else(|| anyhow::anyhow!("{agent} is not registered"))
    }

    /// Refresh an agent's JSONL: parse new lines and advance its read
    /// cursor. Returns the new cursor.
    fn refresh(&mut self, agent: Agent) -> anyhow::Result<u64> {
        let path = self.session_file(agent)?;
        let read = self.store.cursor(CursorKind::Read, agent)?;
        let (_, new_read) = self.extractor.refresh_source(agent, &path, read)?;
        self.store.write_cursor(CursorKind::Read, agent, new_read)?;
        Ok(new_read)
    }

    /// Compose the delta for `target`: every undelivered peer event in
    /// `(delivery[target], read[peer]]`, rendered as blocks. With
    /// `echoed_anchor`, the first `UserText` block matching the anchor is
    /// dropped (it is the target-bound echo of a payload this router pasted
    /// into the peer); later equal blocks are legitimate repeats and kept.
    ///
    /// Returns the blocks and the proposed delivery cursor.
    pub fn build_delta_for_target(
        &mut self,
        target: Agent,
        echoed_anchor: Option<&str>,
    ) -> anyhow::Result<(Vec<Block>, u64)> {
        let src = target.peer();
        let read = self.refresh(src)?;
        let delivery = self.store.cursor(CursorKind::Delivery, target)?;
        let path = self.session_file(src)?;
        let events = self.extractor.events_between(src, &path, delivery, read)?;

        let mut dedup_pending = echoed_anchor.map(normalize);
        let mut blocks = Vec::new();
        for event in events {
            match event {
                RoomEvent::UserText { text, .. } => {
                    if dedup_pending.as_deref() == Some(normalize(&text).as_str()) {
                        dedup_pending = None;
                        continue;
                    }
                    blocks.push(Block::user(text));
                }
                RoomEvent::AssistantText { text, .. } => blocks.push(Block::agent(src, text)),
            }
        }
        Ok((blocks, read))
    }

    /// A user-facing send: delta plus the user's message, pasted to the
    /// target. Advances `delivery[target]` and registers a watch.
    pub fn send_user_message(
        &mut self,
        target: Agent,
        user_text: &str,
    ) -> anyhow::Result<(Uuid, Vec<Block>)> {
        let (mut blocks, delta_cursor) = self.build_delta_for_target(target, None)?;
        blocks.push(Block::user(user_text));

        self.deliver(target, &blocks, delta_cursor)?;
        let pending_id = self.register_watch(target, blocks.clone())?;

        self.bus.log(
            EventKind::Sent,
            format!("user message to {target}"),
            None,
            Some(target),
            Some(serde_json::json!({ "blocks": blocks.len() })),
        )?;
        self.bus.update_metrics(|m| m.sent.bump(target))?;
        Ok((pending_id, blocks))
    }

    /// A routed send during collab (or the `[COLLAB]` handoff): delta with
    /// the source agent's own assistant blocks filtered out (the response
    /// text conveys them), then any user interjections, then the response.
    pub fn send_routed_message(
        &mut self,
        target: Agent,
        source_agent: Agent,
        response_text: &str,
        interjections: &[String],
        echoed_anchor: Option<&str>,
    ) -> anyhow::Result<Vec<Block>> {
        let (delta, delta_cursor) = self.build_delta_for_target(target, echoed_anchor)?;
        let mut blocks: Vec<Block> =
            delta.into_iter().filter(|b| b.source != Source::from(source_agent)).collect();
        for interjection in interjections {
            blocks.push(Block::user(interjection.clone()));
        }
        blocks.push(Block::agent(source_agent, response_text));

        self.deliver(target, &blocks, delta_cursor)?;
        self.register_watch(target, blocks.clone())?;

        self.bus.log(
            EventKind::Sent,
            format!("routed {source_agent} -> {target}"),
            Some(source_agent),
            Some(target),
            Some(serde_json::json!({ "blocks": blocks.len() })),
        )?;
        self.bus.update_metrics(|m| m.sent.bump(target))?;
        Ok(blocks)
    }

    /// Paste a composed payload and, only on success, advance the delivery
    /// cursor.
    fn deliver(&mut self, target: Agent, blocks: &[Block], delta_cursor: u64) -> anyhow::Result<()> {
        if !self.injector.pane_alive(target) {
            return Err(RouteError::PaneDead(target).into());
        }
        let payload = render_payload(blocks);
        self.injector
            .paste(target, &payload)
            .map_err(|e| RouteError::InjectFailed { target, detail: format!("{e:#}") })?;
        self.store.write_cursor(CursorKind::Delivery, target, delta_cursor)?;
        Ok(())
    }

    /// Create (or supersede) the watch on `target`.
    fn register_watch(&mut self, target: Agent, blocks: Vec<Block>) -> anyhow::Result<Uuid> {
        let anchor_cursor = self.store.cursor(CursorKind::Read, target)?;
        let anchor_text = blocks
            .iter()
            .rev()
            .find(|b| b.source == Source::User)
            .map(|b| normalize(&b.text))
            .unwrap_or_default();

        let mut watch = PendingSend {
            id: Uuid::new_v4(),
            target,
            sent_at: Utc::now(),
            anchor_cursor,
            anchor_text,
            blocks,
        };

        let superseded = self.pending.remove(&target);
        if let Some(prev) = superseded {
            watch.sent_at = prev.sent_at.min(watch.sent_at);
            let mut blocks = prev.blocks;
            blocks.extend(watch.blocks);
            watch.blocks = blocks;
            self.latches.remove(&(target, prev.anchor_cursor));
            self.bus.log(
                EventKind::Watch,
                format!("watch on {target} superseded"),
                None,
                Some(target),
                None,
            )?;
        } else {
            self.bus.log(
                EventKind::Watch,
                format!("watching {target}"),
                None,
                Some(target),
                None,
            )?;
        }

        let id = watch.id;
        self.pending.insert(target, watch);
        Ok(id)
    }

    /// One turn-end scan over `(anchor_cursor, read]` in the target's JSONL.
    fn check_turn_end(&mut self, target: Agent, collab_wait: bool) -> anyhow::Result<TurnCheck> {
        let Some(watch) = self.pending.get(&target).cloned() else {
            return Ok(TurnCheck::Pending);
        };
        let path = self.session_file(target)?;
        let read = self.refresh(target)?;
        let lo = watch.anchor_cursor;

        // Interference: during a collab wait, a non-meta user row in
        // claude's log that is not the echoed anchor means a human typed
        // into the pane.
        if collab_wait && target == Agent::Claude {
            for (line, text) in
                self.extractor.user_rows_between(target, &path, lo, read)?
            {
                if let Some(text) = text {
                    if normalize(&text) != watch.anchor_text {
                        warn!(line, "interference detected in claude session");
                        return Ok(TurnCheck::Interference);
                    }
                }
            }
        }

        match target {
            Agent::Codex => {
                if self.extractor.turn_marker_after(target, &path, lo)? {
                    if let Some(text) =
                        self.extractor.latest_assistant_between(target, &path, lo, read)?
                    {
                        return Ok(TurnCheck::Completed(Response {
                            text,
                            detected_at: Utc::now(),
                        }));
                    }
                    // Marker without extractable text: keep polling; the
                    // deadline escalates this to a smoke signal.
                }
            }
            Agent::Claude => {
                if self.extractor.turn_marker_after(target, &path, lo)? {
                    if let Some(text) =
                        self.extractor.latest_assistant_between(target, &path, lo, read)?
                    {
                        return Ok(TurnCheck::Completed(Response {
                            text,
                            detected_at: Utc::now(),
                        }));
                    }
                } else if let Some(stop_at) = self.stop_event_for(&watch)? {
                    // Boundary-aware extraction guards against an
                    // intermediate frame being on disk when the Stop event
                    // fires; until the final frame flushes, the latch holds.
                    if let Some(text) = self.extractor.latest_assistant_since_last_user_boundary(
                        target, &path, lo, read,
                    )? {
                        self.latches.remove(&(target, lo));
                        return Ok(TurnCheck::Completed(Response { text, detected_at: stop_at }));
                    }
                    self.latches.insert((target, lo), stop_at);
                }
            }
        }
        Ok(TurnCheck::Pending)
    }

    /// Latched Stop timestamp for this watch, or a fresh debug-log scan for
    /// a Stop event strictly after the send.
    fn stop_event_for(&mut self, watch: &PendingSend) -> anyhow::Result<Option<DateTime<Utc>>> {
        let key = (watch.target, watch.anchor_cursor);
        if let Some(ts) = self.latches.get(&key) {
            return Ok(Some(*ts));
        }
        let Some(participant) = self.participants.get(&watch.target) else {
            return Ok(None);
        };
        let debug_path =
            claude::debug_log_path(&self.config.claude_debug_dir, &participant.session_id);
        claude::scan_stop_event(&debug_path, watch.sent_at)
    }

    /// Resolve the watch on `target`: clear it and any latch, record the
    /// receive.
    fn resolve_watch(&mut self, target: Agent) -> anyhow::Result<Option<PendingSend>> {
        let watch = self.pending.remove(&target);
        if let Some(ref w) = watch {
            self.latches.remove(&(target, w.anchor_cursor));
            self.bus.log(
                EventKind::Recv,
                format!("response from {target}"),
                Some(target),
                None,
                None,
            )?;
            self.bus.update_metrics(|m| m.received.bump(target))?;
        }
        Ok(watch)
    }

    /// Non-blocking turn-end check driven by the REPL's idle tick. Returns
    /// the response and the resolved watch, or `None` if nothing yet.
    /// Stop-event latches persist across calls.
    pub fn poll_for_response(
        &mut self,
        target: Agent,
    ) -> anyhow::Result<Option<(Response, PendingSend)>> {
        if !self.pending.contains_key(&target) {
            return Ok(None);
        }
        match self.check_turn_end(target, false)? {
            TurnCheck::Completed(response) => {
                let watch = self.resolve_watch(target)?;
                Ok(watch.map(|w| (response, w)))
            }
            _ => Ok(None),
        }
    }

    /// Blocking wait for the target's turn end, used by the orchestrator.
    ///
    /// Polls at the configured interval with a filesystem wake on session
    /// log changes. Raises `interference` immediately, `pane_dead` when the
    /// pane disappears, and `SMOKE SIGNAL` on deadline expiry. A pending
    /// halt is observed but never cuts the wait short; the orchestrator
    /// checks the flag once the wait returns.
    pub async fn wait_for_response(
        &mut self,
        target: Agent,
        halt: &AtomicBool,
        collab_wait: bool,
    ) -> anyhow::Result<Response> {
        let deadline = tokio::time::Instant::now() + self.config.turn_timeout;
        let (wake_tx, mut wake_rx) = mpsc::channel::<()>(1);
        let _watcher = self.session_file(target).ok().and_then(|p| notify_wake(&p, wake_tx));
        let mut halt_noted = false;

        loop {
            if !self.injector.pane_alive(target) {
                return Err(RouteError::PaneDead(target).into());
            }
            match self.check_turn_end(target, collab_wait)? {
                TurnCheck::Completed(response) => {
                    self.resolve_watch(target)?;
                    return Ok(response);
                }
                TurnCheck::Interference => {
                    return Err(RouteError::Interference(target).into());
                }
                TurnCheck::Pending => {}
            }

            if halt.load(Ordering::Relaxed) && !halt_noted {
                // The wait is allowed to finish or time out; the halt takes
                // effect at the next loop boundary in the orchestrator.
                debug!(target = %target, "halt requested mid-wait");
                halt_noted = true;
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(RouteError::SmokeSignal(target).into());
            }

            tokio::select! {
                _ = wake_rx.recv() => {}
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
    }

    /// Set `delivery[target] = read[peer(target)]` for the listed targets
    /// (both when empty), refreshing the peer first so trailing unrouted
    /// content is absorbed.
    pub fn sync_delivery_cursors(&mut self, targets: &[Agent]) -> anyhow::Result<()> {
        let targets: &[Agent] = if targets.is_empty() { &Agent::ALL } else { targets };
        for &target in targets {
            let read_peer = self.refresh(target.peer())?;
            self.store.write_cursor(CursorKind::Delivery, target, read_peer)?;
        }
        Ok(())
    }
}

/// Watch the session log's parent directory, waking the wait loop on any
/// change. Polling continues regardless; this only shortens latency.
fn notify_wake(path: &std::path::Path, wake_tx: mpsc::Sender<()>) -> Option<notify::RecommendedWatcher> {
    use notify::{RecursiveMode, Watcher};

    let mut watcher = notify::recommended_watcher(move |_: notify::Result<notify::Event>| {
        let _ = wake_tx.try_send(());
    })
    .ok()?;
    let watch_path = path.parent().unwrap_or(path);
    watcher.watch(watch_path, RecursiveMode::NonRecursive).ok()?;
    Some(watcher)
}

#[cfg(test)]
#[path = "router_tests.rs"]
mod tests;
