// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! REPL controller: consumes the line editor's event stream, dispatches
//! sends and commands, and drives the pending-watch poller from idle ticks.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use crate::agent::Agent;
use crate::bus::{EventBus, EventKind};
use crate::collab::{run_collab, signals, CollabRequest, CollabSeed, StopReason, COLLAB_SIGNAL};
use crate::error::RouteError;
use crate::router::Router;
use crate::state::CursorKind;

/// Events produced by the line editor. `Idle` ticks arrive on a timer while
/// the prompt is idle (never mid bracketed-paste).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    Submit(String),
    ToggleTarget,
    Idle,
    Quit,
}

/// Draft text restored on the next prompt, shared with the line editor.
pub type PrefillSlot = Arc<parking_lot::Mutex<Option<String>>>;

pub struct Repl {
    router: Router,
    bus: Arc<EventBus>,
    workspace_root: PathBuf,
    input_rx: mpsc::Receiver<InputEvent>,
    halt: Arc<AtomicBool>,
    prefill: PrefillSlot,
    current_target: Agent,
    /// One-shot: the next user-facing send carries a halt notice.
    post_halt: bool,
    default_collab_turns: u32,
}

impl Repl {
    pub fn new(
        router: Router,
        bus: Arc<EventBus>,
        workspace_root: PathBuf,
        input_rx: mpsc::Receiver<InputEvent>,
        halt: Arc<AtomicBool>,
        prefill: PrefillSlot,
        default_collab_turns: u32,
    ) -> Self {
        Self {
            router,
            bus,
            workspace_root,
            input_rx,
            halt,
            prefill,
            current_target: Agent::Claude,
            post_halt: false,
            default_collab_turns,
        }
    }

    pub fn current_target(&self) -> Agent {
        self.current_target
    }

    /// Main event loop. Returns when the user quits or the editor closes.
    pub async fn run(mut self) -> anyhow::Result<()> {
        loop {
            if self.halt.load(Ordering::Relaxed) {
                // Ctrl+C outside a collab quits.
                break;
            }
            let Some(event) = self.input_rx.recv().await else {
                break;
            };
            match event {
                InputEvent::Quit => break,
                InputEvent::ToggleTarget => {
                    self.current_target = self.current_target.peer();
                    println!("target: {}", self.current_target);
                }
                InputEvent::Idle => self.on_idle().await?,
                InputEvent::Submit(text) => {
                    if !self.on_submit(text).await? {
                        break;
                    }
                }
            }
        }
        self.bus.log(EventKind::System, "session ended", None, None, None)?;
        Ok(())
    }

    /// Handle one submitted line. Returns false to quit.
    async fn on_submit(&mut self, text: String) -> anyhow::Result<bool> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(true);
        }

        if trimmed == "/collab" || trimmed.starts_with("/collab ") {
            let rest = trimmed.strip_prefix("/collab").unwrap_or_default();
            self.start_collab(rest.trim()).await?;
            return Ok(true);
        }
        match trimmed {
            "/quit" => return Ok(false),
            "/halt" => {
                println!("no collab is active");
                return Ok(true);
            }
            "/status" => {
                self.status()?;
                return Ok(true);
            }
            _ => {}
        }

        let user_text = if self.post_halt {
            self.post_halt = false;
            format!("(collab halted by user)\n\n{text}")
        } else {
            text.clone()
        };

        match self.router.send_user_message(self.current_target, &user_text) {
            Ok(_) => {}
            Err(err) => {
                // Preserve the draft so the user can retry.
                *self.prefill.lock() = Some(text);
                self.report(&err)?;
            }
        }
        Ok(true)
    }

    /// `/collab [turns] <message>`: start a user-initiated collab with the
    /// current target.
    async fn start_collab(&mut self, args: &str) -> anyhow::Result<()> {
        let (turns, message) = match args.split_whitespace().next().and_then(|w| w.parse().ok()) {
            Some(turns) => {
                let rest = args.split_once(char::is_whitespace).map(|(_, r)| r).unwrap_or("");
                (turns, rest.trim())
            }
            None => (self.default_collab_turns, args),
        };
        if message.is_empty() {
            println!("usage: /collab [turns] <message>");
            return Ok(());
        }

        let request = CollabRequest {
            turns,
            starter: self.current_target,
            initial_message: Some(message.to_string()),
            seed: None,
        };
        self.enter_collab(request).await
    }

    /// Run a collab and return to normal mode whatever happens.
    async fn enter_collab(&mut self, request: CollabRequest) -> anyhow::Result<()> {
        let result = run_collab(
            &mut self.router,
            &self.bus,
            &self.workspace_root,
            request,
            &self.halt,
            &mut self.input_rx,
        )
        .await;
        self.halt.store(false, Ordering::Relaxed);

        match result {
            Ok(outcome) => {
                if outcome.stop_reason == StopReason::UserHalt {
                    self.post_halt = true;
                }
                println!(
                    "collab ended: {} after {} turn(s)",
                    outcome.stop_reason.as_str(),
                    outcome.turns_completed
                );
            }
            Err(err) => self.report(&err)?,
        }
        Ok(())
    }

    /// Idle tick: poll every outstanding watch. A response ending with the
    /// collab signal hands control to the orchestrator, seeded with the
    /// response and the watch's accumulated blocks.
    async fn on_idle(&mut self) -> anyhow::Result<()> {
        for target in Agent::ALL {
            let polled = match self.router.poll_for_response(target) {
                Ok(polled) => polled,
                Err(err) => {
                    self.report(&err)?;
                    continue;
                }
            };
            let Some((response, watch)) = polled else {
                continue;
            };

            if signals(&response.text, COLLAB_SIGNAL) {
                debug!(starter = %target, "agent-initiated collab");
                let request = CollabRequest {
                    turns: self.default_collab_turns,
                    starter: target,
                    initial_message: None,
                    seed: Some(CollabSeed { response, blocks: watch.blocks }),
                };
                self.enter_collab(request).await?;
            } else {
                println!("--- {target} ---\n{}", response.text);
            }
        }
        Ok(())
    }

    /// `/status`: cursors, outstanding watches, current target.
    fn status(&self) -> anyhow::Result<()> {
        println!("target: {}", self.current_target);
        let mut meta = serde_json::Map::new();
        for agent in Agent::ALL {
            let read = self.router.cursor(CursorKind::Read, agent)?;
            let delivery = self.router.cursor(CursorKind::Delivery, agent)?;
            let watching = self.router.pending(agent).is_some();
            println!("{agent}: read={read} delivery={delivery} watching={watching}");
            meta.insert(
                agent.as_str().to_string(),
                serde_json::json!({ "read": read, "delivery": delivery, "watching": watching }),
            );
        }
        self.bus.log(
            EventKind::Status,
            format!("target {}", self.current_target),
            None,
            None,
            Some(serde_json::Value::Object(meta)),
        )?;
        Ok(())
    }

    /// Emit exactly one `error` event for a failure, then stay in normal
    /// mode.
    fn report(&self, err: &anyhow::Error) -> anyhow::Result<()> {
        let agent = err.downcast_ref::<RouteError>().and_then(RouteError::agent);
        self.bus.log(EventKind::Error, format!("{err:#}"), agent, None, None)?;
        eprintln!("error: {err:#}");
        Ok(())
    }
}

#[cfg(test)]
#[path = "repl_tests.rs"]
mod tests;
