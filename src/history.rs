//! Command history as JSON lines.
//!
//! Every state-changing `wt2` command appends one self-contained JSON object
//! with an RFC 3339 timestamp to `history.jsonl`. The file is trimmed to the
//! newest `general.max_history` entries after each write.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: String,
    #[serde(flatten)]
    pub event: HistoryEvent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
#[serde(rename_all = "snake_case")]
pub enum HistoryEvent {
    /// A CLI invocation finished.
    Command { args: Vec<String>, exit_code: u8 },
    SessionCreated {
        id: String,
        shell: String,
        name: Option<String>,
    },
    SessionClosed { id: String },
    /// Text typed into a pane or session.
    InputSent { target: String, length: usize },
    Broadcast {
        command: String,
        sent: usize,
        total: usize,
    },
    ConfigChanged { key: String, value: String },
    ArrangementSaved { name: String, tabs: usize },
}

impl HistoryEvent {
    /// One-line description for `wt2 history show`.
    pub fn summary(&self) -> String {
        match self {
            HistoryEvent::Command { args, exit_code } => {
                format!("wt2 {} (exit {exit_code})", args.join(" "))
            }
            HistoryEvent::SessionCreated { id, shell, name } => match name {
                Some(name) => format!("session {id} created ({shell}, {name})"),
                None => format!("session {id} created ({shell})"),
            },
            HistoryEvent::SessionClosed { id } => format!("session {id} closed"),
            HistoryEvent::InputSent { target, length } => {
                format!("sent {length} bytes to {target}")
            }
            HistoryEvent::Broadcast {
                command,
                sent,
                total,
            } => format!("broadcast '{command}' to {sent}/{total} panes"),
            HistoryEvent::ConfigChanged { key, value } => format!("config {key} = {value}"),
            HistoryEvent::ArrangementSaved { name, tabs } => {
                format!("arrangement '{name}' saved ({tabs} tabs)")
            }
        }
    }
}

/// Append-only history file with a size cap.
pub struct History {
    path: PathBuf,
    max_entries: usize,
}

impl History {
    pub fn new(path: &Path, max_entries: usize) -> Self {
        Self {
            path: path.to_path_buf(),
            max_entries,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append an event; a cap of zero disables history.
    pub fn record(&self, event: HistoryEvent) -> Result<()> {
        if self.max_entries == 0 {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| {
                    format!("failed to create history directory: {}", parent.display())
                })?;
        }
        let entry = HistoryEntry {
            timestamp: chrono::Utc::now().to_rfc3339(),
            event,
        };
        let json = serde_json::to_string(&entry).context("failed to serialize history entry")?;
        debug!(entry = %json, "history");

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open history file: {}", self.path.display()))?;
        writeln!(file, "{json}").context("failed to write history entry")?;
        drop(file);

        self.trim()
    }

    fn trim(&self) -> Result<()> {
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read history file: {}", self.path.display()))?;
        let lines: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();
        if lines.len() <= self.max_entries {
            return Ok(());
        }
        let keep = &lines[lines.len() - self.max_entries..];
        let mut trimmed = keep.join("\n");
        trimmed.push('\n');
        std::fs::write(&self.path, trimmed)
            .with_context(|| format!("failed to trim history file: {}", self.path.display()))?;
        debug!(kept = keep.len(), dropped = lines.len() - keep.len(), "trimmed history");
        Ok(())
    }

    /// Newest `limit` entries (all when `None`), oldest first. Lines that
    /// fail to parse are skipped.
    pub fn read(&self, limit: Option<usize>) -> Result<Vec<HistoryEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read history file: {}", self.path.display()))?;
        let mut entries: Vec<HistoryEntry> = content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .filter_map(|(n, line)| match serde_json::from_str(line) {
                Ok(entry) => Some(entry),
                Err(err) => {
                    warn!(line = n + 1, error = %err, "skipping malformed history line");
                    None
                }
            })
            .collect();
        if let Some(limit) = limit {
            if entries.len() > limit {
                entries.drain(..entries.len() - limit);
            }
        }
        Ok(entries)
    }

    pub fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err)
                .with_context(|| format!("failed to clear history: {}", self.path.display())),
        }
    }
}
