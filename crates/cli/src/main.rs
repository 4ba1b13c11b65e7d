// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing_subscriber::EnvFilter;

use claodex::agent::Agent;
use claodex::bus::{EventBus, EventKind};
use claodex::config::Config;
use claodex::inject::{Injector, TmuxInjector};
use claodex::repl::{InputEvent, PrefillSlot, Repl};
use claodex::router::Router;
use claodex::state::StateStore;

#[derive(Parser)]
#[command(
    name = "claodex",
    version,
    about = "Two-agent message router for interactive AI coding agents."
)]
struct Cli {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    subcommand: Option<Commands>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Register an agent's session with the coordinator (run inside the
    /// agent's pane).
    Register(claodex::register::RegisterArgs),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.subcommand {
        Some(Commands::Register(args)) => {
            std::process::exit(claodex::register::run(&args));
        }
        None => {
            let config = cli.config;
            if let Err(e) = config.validate() {
                eprintln!("error: {e}");
                std::process::exit(2);
            }
            init_tracing(&config);

            if let Err(e) = run(config).await {
                error!("fatal: {e:#}");
                std::process::exit(1);
            }
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    if config.log_format == "json" {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    let store = Arc::new(StateStore::new(&config.workspace));
    store.ensure_layout()?;
    let bus = Arc::new(EventBus::open(store.root())?);

    // Startup validation: both agents registered, panes accepting input.
    let mut panes = HashMap::new();
    for agent in Agent::ALL {
        let participant = store.load_participant(agent)?;
        panes.insert(agent, participant.pane_handle.clone());
    }
    let injector = Arc::new(TmuxInjector::new(panes));
    for agent in Agent::ALL {
        anyhow::ensure!(injector.pane_alive(agent), "pane for {agent} is not accepting input");
    }

    let router =
        Router::new(store.clone(), injector, bus.clone(), config.router_config())?;
    bus.log(EventKind::System, "session started", None, None, None)?;

    let (input_tx, input_rx) = mpsc::channel::<InputEvent>(64);
    let halt = Arc::new(AtomicBool::new(false));
    let prefill: PrefillSlot = Arc::new(parking_lot::Mutex::new(None));
    let shutdown = CancellationToken::new();

    spawn_line_editor(input_tx.clone(), prefill.clone(), shutdown.clone());
    spawn_idle_ticker(input_tx, config.poll_interval(), shutdown.clone());
    spawn_halt_listener(halt.clone(), shutdown.clone());

    let repl = Repl::new(
        router,
        bus,
        config.workspace.clone(),
        input_rx,
        halt,
        prefill,
        config.collab_turns,
    );
    let result = repl.run().await;
    shutdown.cancel();
    result
}

/// Minimal stdin line editor: each line is a `Submit`, `/switch` toggles the
/// target, EOF quits. A restored draft is shown before the next prompt.
fn spawn_line_editor(
    input_tx: mpsc::Sender<InputEvent>,
    prefill: PrefillSlot,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
        loop {
            if let Some(draft) = prefill.lock().take() {
                eprintln!("(draft) {draft}");
            }
            let line = tokio::select! {
                _ = shutdown.cancelled() => break,
                line = lines.next_line() => line,
            };
            let event = match line {
                Ok(Some(line)) if line.trim() == "/switch" => InputEvent::ToggleTarget,
                Ok(Some(line)) => InputEvent::Submit(line),
                Ok(None) | Err(_) => {
                    let _ = input_tx.send(InputEvent::Quit).await;
                    break;
                }
            };
            if input_tx.send(event).await.is_err() {
                break;
            }
        }
    });
}

/// Periodic idle ticks driving the pending-watch poller. A full queue means
/// the REPL is busy; the tick is simply dropped. A richer line editor would
/// suppress ticks mid bracketed-paste; the stdin editor has no paste state.
fn spawn_idle_ticker(
    input_tx: mpsc::Sender<InputEvent>,
    interval: std::time::Duration,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if let Err(mpsc::error::TrySendError::Closed(_)) =
                input_tx.try_send(InputEvent::Idle)
            {
                break;
            }
        }
    });
}

/// Ctrl+C sets the halt flag and nothing else; during a collab the
/// orchestrator observes it at the next loop boundary, outside one the REPL
/// treats it as quit.
fn spawn_halt_listener(halt: Arc<AtomicBool>, shutdown: CancellationToken) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                result = tokio::signal::ctrl_c() => {
                    if result.is_err() {
                        break;
                    }
                    halt.store(true, Ordering::Relaxed);
                }
            }
        }
    });
}
