//! Send one command line to many panes at once.
//!
//! Targets come from the live terminal state (`--all`, `--tabs`), from an
//! explicit pane list, or from the persisted broadcast set toggled by
//! `wt2 broadcast on/off`. Sends run on a small scoped worker pool; a pane
//! that fails or exceeds `broadcast.timeout_secs` does not stop the others.

use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::adapter::ShellType;
use crate::config::BroadcastConfig;
use crate::pipe::TerminalState;
use crate::terminal::Terminal;

const MAX_WORKERS: usize = 8;

/// The persisted broadcast set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BroadcastTargets {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub panes: Vec<String>,
}

impl BroadcastTargets {
    pub fn enable(&mut self, panes: Vec<String>) {
        self.enabled = true;
        self.panes = panes;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
        self.panes.clear();
    }

    /// Active panes, empty when broadcasting is off.
    pub fn active(&self) -> &[String] {
        if self.enabled { &self.panes } else { &[] }
    }
}

/// How the caller picked targets on the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TargetSelector {
    All,
    Panes(Vec<String>),
    Tabs(Vec<String>),
    /// Fall back to the persisted set.
    #[default]
    Saved,
}

impl TargetSelector {
    /// Build a selector from the `--all`, `--panes` and `--tabs` flags.
    pub fn from_flags(all: bool, panes: Option<&str>, tabs: Option<&str>) -> Self {
        if all {
            TargetSelector::All
        } else if let Some(panes) = panes {
            TargetSelector::Panes(split_list(panes))
        } else if let Some(tabs) = tabs {
            TargetSelector::Tabs(split_list(tabs))
        } else {
            TargetSelector::Saved
        }
    }

    /// Only `All` and `Tabs` need the live terminal state.
    pub fn needs_state(&self) -> bool {
        matches!(self, TargetSelector::All | TargetSelector::Tabs(_))
    }

    /// Pane ids in state order, without duplicates.
    pub fn resolve(&self, state: Option<&TerminalState>, saved: &BroadcastTargets) -> Vec<String> {
        let panes: Vec<String> = match self {
            TargetSelector::All => state.map(TerminalState::pane_ids).unwrap_or_default(),
            TargetSelector::Panes(panes) => panes.clone(),
            TargetSelector::Tabs(tabs) => state
                .map(|state| {
                    state
                        .tabs
                        .iter()
                        .filter(|tab| {
                            tabs.iter().any(|key| {
                                *key == tab.id || key.parse::<u32>().ok() == Some(tab.index)
                            })
                        })
                        .flat_map(|tab| tab.panes.iter().map(|pane| pane.id.clone()))
                        .collect()
                })
                .unwrap_or_default(),
            TargetSelector::Saved => saved.active().to_vec(),
        };
        let mut seen = std::collections::BTreeSet::new();
        panes.into_iter().filter(|pane| seen.insert(pane.clone())).collect()
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

/// Rewrite the generic `clear`, `ls` and `pwd` into the target shell's spelling.
pub fn translate_command(shell: ShellType, command: &str) -> String {
    let commands = shell.commands();
    match command.trim() {
        "clear" | "cls" => commands.clear.to_string(),
        "ls" | "dir" => commands.list_dir.to_string(),
        "pwd" => commands.print_dir.to_string(),
        _ => command.to_string(),
    }
}

/// How each line is prepared and sent.
#[derive(Debug, Clone, PartialEq)]
pub struct SendOptions {
    /// Translate `clear`/`ls`/`pwd` for this shell.
    pub shell: Option<ShellType>,
    /// A line starting with this is sent verbatim, minus the prefix.
    pub escape_char: String,
    /// Deadline for each pane.
    pub timeout: Duration,
}

impl SendOptions {
    pub fn from_config(config: &BroadcastConfig, shell: Option<ShellType>) -> Self {
        Self {
            shell,
            escape_char: config.escape_char.clone(),
            timeout: config.timeout(),
        }
    }

    /// The line as it will be typed into each pane.
    pub fn prepare(&self, command: &str) -> String {
        if !self.escape_char.is_empty() {
            if let Some(verbatim) = command.strip_prefix(self.escape_char.as_str()) {
                return verbatim.to_string();
            }
        }
        match self.shell {
            Some(shell) => translate_command(shell, command),
            None => command.to_string(),
        }
    }
}

impl Default for SendOptions {
    fn default() -> Self {
        Self::from_config(&BroadcastConfig::default(), None)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaneResult {
    pub pane: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BroadcastReport {
    pub command: String,
    pub results: Vec<PaneResult>,
}

impl BroadcastReport {
    pub fn sent(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    pub fn total(&self) -> usize {
        self.results.len()
    }

    pub fn all_sent(&self) -> bool {
        self.sent() == self.total()
    }
}

/// Type `command` followed by Enter into every pane, waiting at most
/// `timeout` for each.
pub fn send_to_panes(
    terminal: &Terminal,
    panes: &[String],
    command: &str,
    timeout: Duration,
) -> BroadcastReport {
    let workers = panes.len().clamp(1, MAX_WORKERS);
    let chunk = panes.len().div_ceil(workers).max(1);
    let results = Mutex::new(Vec::with_capacity(panes.len()));

    std::thread::scope(|scope| {
        for batch in panes.chunks(chunk) {
            let results = &results;
            scope.spawn(move || {
                for pane in batch {
                    let outcome = terminal.run_command_within(Some(pane), command, timeout);
                    let result = match outcome {
                        Ok(()) => PaneResult {
                            pane: pane.clone(),
                            success: true,
                            error: None,
                        },
                        Err(err) => {
                            warn!(pane = %pane, error = %err, "broadcast send failed");
                            PaneResult {
                                pane: pane.clone(),
                                success: false,
                                error: Some(format!("{err:#}")),
                            }
                        }
                    };
                    if let Ok(mut results) = results.lock() {
                        results.push(result);
                    }
                }
            });
        }
    });

    let mut results = results.into_inner().unwrap_or_default();
    results.sort_by_key(|r| panes.iter().position(|p| *p == r.pane));
    let report = BroadcastReport {
        command: command.to_string(),
        results,
    };
    info!(sent = report.sent(), total = report.total(), workers, "broadcast finished");
    report
}

/// Resolve targets, translate and send.
pub fn broadcast(
    terminal: &Terminal,
    selector: &TargetSelector,
    saved: &BroadcastTargets,
    command: &str,
    opts: &SendOptions,
) -> Result<BroadcastReport> {
    let state = if selector.needs_state() {
        Some(terminal.state()?)
    } else {
        None
    };
    let panes = selector.resolve(state.as_ref(), saved);
    if panes.is_empty() {
        anyhow::bail!(crate::error::WtError::PaneNotFound(
            "no broadcast targets; use --all, --panes or `wt2 broadcast on` first".to_string()
        ));
    }
    let command = opts.prepare(command);
    debug!(panes = ?panes, command = %command, timeout = ?opts.timeout, "broadcasting");
    Ok(send_to_panes(terminal, &panes, &command, opts.timeout))
}
