// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixtures for unit tests and the end-to-end specs: synthesized
//! agent session logs, a scripted injector, and a ready-made workspace.

use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::path::{Path, PathBuf};

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;

use crate::agent::Agent;
use crate::bus::EventBus;
use crate::inject::Injector;
use crate::router::{Router, RouterConfig};
use crate::state::{Participant, StateStore};

// -- JSONL row builders -------------------------------------------------------

pub fn claude_user_row(text: &str) -> String {
    json!({
        "type": "user",
        "uuid": "00000000-0000-0000-0000-000000000001",
        "message": { "role": "user", "content": text },
    })
    .to_string()
}

pub fn claude_meta_row(text: &str) -> String {
    json!({
        "type": "user",
        "isMeta": true,
        "message": { "role": "user", "content": text },
    })
    .to_string()
}

pub fn claude_tool_result_row() -> String {
    json!({
        "type": "user",
        "message": {
            "role": "user",
            "content": [
                { "type": "tool_result", "tool_use_id": "tu_1", "content": "ok" },
            ],
        },
    })
    .to_string()
}

pub fn claude_assistant_row(text: &str) -> String {
    json!({
        "type": "assistant",
        "message": {
            "role": "assistant",
            "content": [ { "type": "text", "text": text } ],
        },
    })
    .to_string()
}

pub fn claude_assistant_tool_use_row(tool: &str) -> String {
    json!({
        "type": "assistant",
        "message": {
            "role": "assistant",
            "content": [ { "type": "tool_use", "name": tool, "input": {} } ],
        },
    })
    .to_string()
}

pub fn claude_turn_duration_row() -> String {
    json!({ "type": "system", "subtype": "turn_duration", "durationMs": 1234 }).to_string()
}

pub fn codex_user_row(text: &str) -> String {
    json!({
        "type": "response_item",
        "timestamp": "2026-01-05T10:00:00.000Z",
        "payload": {
            "type": "message",
            "role": "user",
            "content": [ { "type": "input_text", "text": text } ],
        },
    })
    .to_string()
}

pub fn codex_assistant_row(text: &str) -> String {
    json!({
        "type": "response_item",
        "timestamp": "2026-01-05T10:00:01.000Z",
        "payload": {
            "type": "message",
            "role": "assistant",
            "content": [ { "type": "output_text", "text": text } ],
        },
    })
    .to_string()
}

pub fn codex_task_started_row() -> String {
    json!({ "type": "event_msg", "payload": { "type": "task_started" } }).to_string()
}

pub fn codex_task_complete_row() -> String {
    json!({ "type": "event_msg", "payload": { "type": "task_complete" } }).to_string()
}

pub fn user_row(agent: Agent, text: &str) -> String {
    match agent {
        Agent::Claude => claude_user_row(text),
        Agent::Codex => codex_user_row(text),
    }
}

pub fn assistant_row(agent: Agent, text: &str) -> String {
    match agent {
        Agent::Claude => claude_assistant_row(text),
        Agent::Codex => codex_assistant_row(text),
    }
}

pub fn turn_end_rows(agent: Agent) -> Vec<String> {
    match agent {
        Agent::Claude => vec![claude_turn_duration_row()],
        Agent::Codex => vec![codex_task_complete_row()],
    }
}

// -- Session files ------------------------------------------------------------

/// Append-only JSONL writer standing in for an agent process.
pub struct SessionFile {
    path: PathBuf,
}

impl SessionFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, line: &str) -> anyhow::Result<()> {
        let mut file =
            std::fs::OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    pub fn append_all(&self, lines: &[String]) -> anyhow::Result<()> {
        for line in lines {
            self.append(line)?;
        }
        Ok(())
    }

    /// Append raw bytes without a trailing newline (partial-write tails).
    pub fn append_fragment(&self, fragment: &str) -> anyhow::Result<()> {
        let mut file =
            std::fs::OpenOptions::new().create(true).append(true).open(&self.path)?;
        write!(file, "{fragment}")?;
        Ok(())
    }
}

// -- Scripted injector --------------------------------------------------------

/// Injector that records pastes instead of touching a terminal. The target
/// agent's session file receives the echo row a real agent would log, so
/// composed payloads round-trip the way they do in production.
pub struct ScriptedInjector {
    pastes: Mutex<Vec<(Agent, String)>>,
    alive: Mutex<HashMap<Agent, bool>>,
    echo_to: Mutex<HashMap<Agent, PathBuf>>,
    fail_next: Mutex<bool>,
}

impl Default for ScriptedInjector {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedInjector {
    pub fn new() -> Self {
        Self {
            pastes: Mutex::new(Vec::new()),
            alive: Mutex::new(HashMap::from([(Agent::Claude, true), (Agent::Codex, true)])),
            echo_to: Mutex::new(HashMap::new()),
            fail_next: Mutex::new(false),
        }
    }

    /// Route future pastes for `agent` into its session file as an echoed
    /// user row.
    pub fn echo_into(&self, agent: Agent, session_file: impl Into<PathBuf>) {
        self.echo_to.lock().insert(agent, session_file.into());
    }

    pub fn set_alive(&self, agent: Agent, alive: bool) {
        self.alive.lock().insert(agent, alive);
    }

    pub fn fail_next_paste(&self) {
        *self.fail_next.lock() = true;
    }

    pub fn pastes(&self) -> Vec<(Agent, String)> {
        self.pastes.lock().clone()
    }

    pub fn last_paste_to(&self, agent: Agent) -> Option<String> {
        self.pastes
            .lock()
            .iter()
            .rev()
            .find(|(a, _)| *a == agent)
            .map(|(_, p)| p.clone())
    }
}

impl Injector for ScriptedInjector {
    fn paste(&self, target: Agent, payload: &str) -> anyhow::Result<()> {
        if std::mem::take(&mut *self.fail_next.lock()) {
            anyhow::bail!("scripted paste failure");
        }
        self.pastes.lock().push((target, payload.to_string()));
        if let Some(path) = self.echo_to.lock().get(&target) {
            SessionFile::new(path).append(&user_row(target, payload))?;
        }
        Ok(())
    }

    fn pane_alive(&self, target: Agent) -> bool {
        self.alive.lock().get(&target).copied().unwrap_or(false)
    }
}

// -- Workspace fixture --------------------------------------------------------

/// A registered two-agent workspace over a tempdir: session files, debug
/// dir, participants, a scripted injector wired for echoes, and an event
/// bus.
pub struct Fixture {
    pub dir: tempfile::TempDir,
    pub store: Arc<StateStore>,
    pub bus: Arc<EventBus>,
    pub injector: Arc<ScriptedInjector>,
    pub claude_log: SessionFile,
    pub codex_log: SessionFile,
    pub debug_dir: PathBuf,
    pub claude_session_id: String,
}

impl Fixture {
    pub fn new() -> anyhow::Result<Self> {
        let dir = tempfile::tempdir()?;
        let store = Arc::new(StateStore::new(dir.path()));
        store.ensure_layout()?;

        let claude_log = SessionFile::new(dir.path().join("claude.jsonl"));
        let codex_log = SessionFile::new(dir.path().join("codex.jsonl"));
        let debug_dir = dir.path().join("debug");
        std::fs::create_dir_all(&debug_dir)?;

        let claude_session_id = "cafe0001-0000-0000-0000-000000000000".to_string();
        let registered_at = chrono::DateTime::parse_from_rfc3339("2026-01-05T09:00:00+00:00")?;

        store.write_participant(&Participant {
            agent: Agent::Claude,
            session_file: claude_log.path().to_path_buf(),
            session_id: claude_session_id.clone(),
            pane_handle: "%1".into(),
            cwd: dir.path().to_path_buf(),
            registered_at,
        })?;
        store.write_participant(&Participant {
            agent: Agent::Codex,
            session_file: codex_log.path().to_path_buf(),
            session_id: "cafe0002-0000-0000-0000-000000000000".into(),
            pane_handle: "%2".into(),
            cwd: dir.path().to_path_buf(),
            registered_at,
        })?;

        let injector = Arc::new(ScriptedInjector::new());
        injector.echo_into(Agent::Claude, claude_log.path());
        injector.echo_into(Agent::Codex, codex_log.path());

        let bus = Arc::new(EventBus::open(dir.path())?);

        Ok(Self { dir, store, bus, injector, claude_log, codex_log, debug_dir, claude_session_id })
    }

    pub fn log(&self, agent: Agent) -> &SessionFile {
        match agent {
            Agent::Claude => &self.claude_log,
            Agent::Codex => &self.codex_log,
        }
    }

    /// Router config with fast polling and a short deadline, pointed at the
    /// fixture's debug dir.
    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            poll_interval: Duration::from_millis(10),
            turn_timeout: Duration::from_secs(5),
            claude_debug_dir: self.debug_dir.clone(),
        }
    }

    pub fn router(&self) -> anyhow::Result<Router> {
        self.router_with(self.router_config())
    }

    pub fn router_with(&self, config: RouterConfig) -> anyhow::Result<Router> {
        Router::new(self.store.clone(), self.injector.clone(), self.bus.clone(), config)
    }

    /// Write a Stop-event line into claude's debug log.
    pub fn write_stop_event(&self, at: &str) -> anyhow::Result<()> {
        let path = self.debug_dir.join(format!("{}.txt", self.claude_session_id));
        let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{at} [DEBUG] Getting matching hook commands for Stop")?;
        Ok(())
    }
}

/// Play both agents: whenever a new paste lands for an agent, append its
/// next scripted response (plus turn-end marker) to that agent's log.
/// Responses are consumed per agent, in order. Abort the handle when done.
pub fn spawn_scripted_agents(
    fx: &Fixture,
    scripts: &[(Agent, &str)],
) -> tokio::task::JoinHandle<()> {
    let mut queues: HashMap<Agent, VecDeque<String>> = HashMap::new();
    for (agent, text) in scripts {
        queues.entry(*agent).or_default().push_back((*text).to_string());
    }
    let injector = fx.injector.clone();
    let logs: HashMap<Agent, SessionFile> =
        Agent::ALL.into_iter().map(|a| (a, SessionFile::new(fx.log(a).path()))).collect();

    tokio::spawn(async move {
        let mut answered: HashMap<Agent, usize> = HashMap::new();
        loop {
            for agent in Agent::ALL {
                let pastes = injector.pastes().iter().filter(|(a, _)| *a == agent).count();
                let seen = answered.entry(agent).or_insert(0);
                if pastes > *seen {
                    *seen = pastes;
                    if let Some(text) = queues.get_mut(&agent).and_then(VecDeque::pop_front) {
                        if let Some(log) = logs.get(&agent) {
                            let _ = log.append(&assistant_row(agent, &text));
                            for row in turn_end_rows(agent) {
                                let _ = log.append(&row);
                            }
                        }
                    }
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    })
}
