// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Sink-only event bus: an append-only JSONL events file plus an atomically
//! replaced metrics snapshot. All writes are serialized by a mutex; the
//! producers are the main thread, the halt listener, and the poll worker.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::agent::Agent;

/// The closed set of persisted event kinds. Anything else is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Sent,
    Recv,
    Collab,
    Watch,
    Error,
    System,
    Status,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Recv => "recv",
            Self::Collab => "collab",
            Self::Watch => "watch",
            Self::Error => "error",
            Self::System => "system",
            Self::Status => "status",
        }
    }
}

impl FromStr for EventKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(Self::Sent),
            "recv" => Ok(Self::Recv),
            "collab" => Ok(Self::Collab),
            "watch" => Ok(Self::Watch),
            "error" => Ok(Self::Error),
            "system" => Ok(Self::System),
            "status" => Ok(Self::Status),
            other => anyhow::bail!("rejected event kind: {other}"),
        }
    }
}

/// One persisted event record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusEvent {
    pub ts: DateTime<Utc>,
    pub kind: EventKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<Agent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Agent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

/// Per-agent counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentCounts {
    pub claude: u64,
    pub codex: u64,
}

impl AgentCounts {
    pub fn bump(&mut self, agent: Agent) {
        match agent {
            Agent::Claude => self.claude += 1,
            Agent::Codex => self.codex += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.claude + self.codex
    }
}

/// The canonical metrics snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metrics {
    pub session_started_at: DateTime<Utc>,
    #[serde(default)]
    pub last_activity_at: Option<DateTime<Utc>>,
    pub sent: AgentCounts,
    pub received: AgentCounts,
    pub collabs_completed: u64,
    pub interjections_queued: u64,
}

/// Field names every snapshot must carry, exactly.
const METRICS_FIELDS: [&str; 6] = [
    "session_started_at",
    "last_activity_at",
    "sent",
    "received",
    "collabs_completed",
    "interjections_queued",
];

impl Metrics {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            session_started_at: started_at,
            last_activity_at: None,
            sent: AgentCounts::default(),
            received: AgentCounts::default(),
            collabs_completed: 0,
            interjections_queued: 0,
        }
    }

    /// Check the complete snapshot against the canonical schema.
    pub fn validate(&self) -> anyhow::Result<()> {
        if let Some(last) = self.last_activity_at {
            if last < self.session_started_at {
                anyhow::bail!("last_activity_at precedes session_started_at");
            }
        }
        let value = serde_json::to_value(self)?;
        let Some(object) = value.as_object() else {
            anyhow::bail!("metrics snapshot is not an object");
        };
        for field in METRICS_FIELDS {
            if !object.contains_key(field) {
                anyhow::bail!("metrics snapshot missing field: {field}");
            }
        }
        if object.len() != METRICS_FIELDS.len() {
            anyhow::bail!("metrics snapshot has unexpected fields");
        }
        Ok(())
    }
}

struct BusInner {
    events_path: PathBuf,
    metrics_path: PathBuf,
    metrics: Metrics,
}

/// File-backed event sink. Both files are truncated at session start.
pub struct EventBus {
    inner: Mutex<BusInner>,
}

impl EventBus {
    /// Open the bus under the workspace root, truncating both files.
    pub fn open(root: &Path) -> anyhow::Result<Self> {
        let events_path = root.join("state").join("events.jsonl");
        let metrics_path = root.join("state").join("metrics.json");
        std::fs::File::create(&events_path)?;

        let metrics = Metrics::new(Utc::now());
        let bus = Self {
            inner: Mutex::new(BusInner { events_path, metrics_path, metrics }),
        };
        {
            let inner = bus.inner.lock();
            write_metrics(&inner.metrics_path, &inner.metrics)?;
        }
        Ok(bus)
    }

    /// Append one event record.
    pub fn log(
        &self,
        kind: EventKind,
        message: impl Into<String>,
        agent: Option<Agent>,
        target: Option<Agent>,
        meta: Option<serde_json::Value>,
    ) -> anyhow::Result<()> {
        let event =
            BusEvent { ts: Utc::now(), kind, message: message.into(), agent, target, meta };
        let mut line = serde_json::to_string(&event)?;
        line.push('\n');

        let inner = self.inner.lock();
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&inner.events_path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    /// Merge an update into the snapshot, validate, and atomically replace
    /// the metrics file.
    pub fn update_metrics(
        &self,
        update: impl FnOnce(&mut Metrics),
    ) -> anyhow::Result<()> {
        let mut inner = self.inner.lock();
        let mut next = inner.metrics.clone();
        update(&mut next);
        next.last_activity_at = Some(Utc::now());
        next.validate()?;
        write_metrics(&inner.metrics_path, &next)?;
        inner.metrics = next;
        Ok(())
    }

    /// Snapshot of the current metrics (for `/status`).
    pub fn metrics(&self) -> Metrics {
        self.inner.lock().metrics.clone()
    }
}

fn write_metrics(path: &Path, metrics: &Metrics) -> anyhow::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let tmp = dir.join(".metrics.json.tmp");
    {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(serde_json::to_string_pretty(metrics)?.as_bytes())?;
        file.write_all(b"\n")?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
#[path = "bus_tests.rs"]
mod tests;
