//! Persistent state in `state.json`.
//!
//! Holds what must outlive one `wt2` invocation: the session registry, the
//! broadcast target set and saved window arrangements. Writes go to a
//! temporary file that is renamed over the old one.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::broadcast::BroadcastTargets;
use crate::pipe::TerminalState;
use crate::session::Session;
use crate::wt::{PaneLaunch, SplitDirection, WtAction};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppState {
    #[serde(default)]
    pub sessions: Vec<Session>,
    #[serde(default)]
    pub broadcast: BroadcastTargets,
    #[serde(default)]
    pub arrangements: BTreeMap<String, Arrangement>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArrangedPane {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArrangedTab {
    pub title: String,
    #[serde(default)]
    pub panes: Vec<ArrangedPane>,
}

/// Saved tabs and panes that can be replayed into a new window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Arrangement {
    pub name: String,
    pub saved_at: DateTime<Utc>,
    pub tabs: Vec<ArrangedTab>,
}

impl Arrangement {
    pub fn capture(name: &str, state: &TerminalState) -> Self {
        let tabs = state
            .tabs
            .iter()
            .map(|tab| ArrangedTab {
                title: tab.title.clone(),
                panes: tab
                    .panes
                    .iter()
                    .map(|pane| ArrangedPane {
                        profile: pane.profile.clone(),
                        cwd: pane.cwd.clone(),
                    })
                    .collect(),
            })
            .collect();
        Self {
            name: name.to_string(),
            saved_at: Utc::now(),
            tabs,
        }
    }

    pub fn pane_count(&self) -> usize {
        self.tabs.iter().map(|tab| tab.panes.len().max(1)).sum()
    }

    /// One `new-tab` per tab followed by a `split-pane` per extra pane.
    pub fn replay_actions(&self) -> Vec<WtAction> {
        let mut actions = Vec::new();
        for tab in &self.tabs {
            let mut panes = tab.panes.iter();
            let first = panes.next().cloned().unwrap_or_default();
            actions.push(WtAction::NewTab(PaneLaunch {
                profile: first.profile,
                starting_directory: first.cwd,
                title: (!tab.title.is_empty()).then(|| tab.title.clone()),
                ..PaneLaunch::default()
            }));
            for pane in panes {
                actions.push(WtAction::SplitPane {
                    direction: SplitDirection::Auto,
                    size: None,
                    duplicate: false,
                    launch: PaneLaunch {
                        profile: pane.profile.clone(),
                        starting_directory: pane.cwd.clone(),
                        ..PaneLaunch::default()
                    },
                });
            }
        }
        actions
    }
}

/// Reads and writes [`AppState`] at a fixed path.
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing file is an empty state.
    pub fn load(&self) -> Result<AppState> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "no state file yet");
            return Ok(AppState::default());
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read state file: {}", self.path.display()))?;
        if content.trim().is_empty() {
            warn!(path = %self.path.display(), "state file is empty");
            return Ok(AppState::default());
        }
        serde_json::from_str(&content)
            .with_context(|| format!("failed to parse state file: {}", self.path.display()))
    }

    pub fn save(&self, state: &AppState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| {
                    format!("failed to create state directory: {}", parent.display())
                })?;
        }
        let json = serde_json::to_string_pretty(state).context("failed to serialize state")?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .with_context(|| format!("failed to write state file: {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to replace state file: {}", self.path.display()))?;
        debug!(
            path = %self.path.display(),
            sessions = state.sessions.len(),
            arrangements = state.arrangements.len(),
            "saved state"
        );
        Ok(())
    }

    /// Load, apply `f`, save.
    pub fn update<T>(&self, f: impl FnOnce(&mut AppState) -> Result<T>) -> Result<T> {
        let mut state = self.load()?;
        let out = f(&mut state)?;
        self.save(&state)?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipe::{PaneInfo, TabInfo};

    fn sample_state() -> TerminalState {
        TerminalState {
            windows: Vec::new(),
            tabs: vec![
                TabInfo {
                    id: "1".into(),
                    index: 0,
                    title: "dev".into(),
                    panes: vec![
                        PaneInfo {
                            id: "a".into(),
                            profile: Some("PowerShell".into()),
                            cwd: Some(r"C:\src".into()),
                            ..PaneInfo::default()
                        },
                        PaneInfo {
                            id: "b".into(),
                            profile: Some("Ubuntu".into()),
                            ..PaneInfo::default()
                        },
                    ],
                    ..TabInfo::default()
                },
                TabInfo {
                    id: "2".into(),
                    index: 1,
                    title: String::new(),
                    ..TabInfo::default()
                },
            ],
        }
    }

    #[test]
    fn arrangement_replays_tabs_then_splits() {
        let arrangement = Arrangement::capture("work", &sample_state());
        assert_eq!(arrangement.pane_count(), 3);
        let args: Vec<Vec<String>> = arrangement
            .replay_actions()
            .iter()
            .map(WtAction::to_args)
            .collect();
        assert_eq!(
            args,
            vec![
                vec![
                    "new-tab",
                    "--profile",
                    "PowerShell",
                    "--startingDirectory",
                    r"C:\src",
                    "--title",
                    "dev"
                ],
                vec!["split-pane", "--profile", "Ubuntu"],
                vec!["new-tab"],
            ]
        );
    }

    #[test]
    fn missing_or_empty_file_is_default_state() {
        let tmp = tempfile::tempdir().unwrap();
        let store = StateStore::new(&tmp.path().join("state.json"));
        assert_eq!(store.load().unwrap(), AppState::default());
        std::fs::write(store.path(), "  ").unwrap();
        assert_eq!(store.load().unwrap(), AppState::default());
    }

    #[test]
    fn save_then_update_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let store = StateStore::new(&tmp.path().join("nested").join("state.json"));
        store
            .update(|state| {
                state
                    .arrangements
                    .insert("work".into(), Arrangement::capture("work", &sample_state()));
                state.broadcast.panes = vec!["a".into(), "b".into()];
                Ok(())
            })
            .unwrap();
        let loaded = store.load().unwrap();
        assert_eq!(loaded.arrangements["work"].tabs.len(), 2);
        assert_eq!(loaded.broadcast.panes, vec!["a", "b"]);
        assert!(!store.path().with_extension("json.tmp").exists());
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let store = StateStore::new(&tmp.path().join("state.json"));
        std::fs::write(store.path(), "{not json").unwrap();
        let err = store.load().unwrap_err();
        assert!(err.to_string().contains("failed to parse state file"));
    }
}
