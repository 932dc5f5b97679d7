//! Session registry and manager.
//!
//! A session is a record of a shell running in a Windows Terminal tab: its
//! shell, profile, working directory, pane/tab ids and user variables. The
//! registry is a plain map keyed by UUID with a connection limit and an
//! inactivity TTL; the manager pairs it with the terminal facade and can run
//! a background reaper.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::adapter::ShellType;
use crate::config::SessionConfig;
use crate::error::WtError;
use crate::terminal::Terminal;
use crate::wt::PaneLaunch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Created,
    Connecting,
    Connected,
    Disconnected,
    Closed,
    Error,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Created => "created",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Disconnected => "disconnected",
            SessionState::Closed => "closed",
            SessionState::Error => "error",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionState {
    type Err = WtError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "created" => Ok(SessionState::Created),
            "connecting" => Ok(SessionState::Connecting),
            "connected" => Ok(SessionState::Connected),
            "disconnected" => Ok(SessionState::Disconnected),
            "closed" => Ok(SessionState::Closed),
            "error" => Ok(SessionState::Error),
            _ => Err(WtError::invalid(
                "state",
                s,
                "expected created, connecting, connected, disconnected, closed or error",
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub state: SessionState,
    pub shell: ShellType,
    pub profile: String,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub pane_id: Option<String>,
    #[serde(default)]
    pub tab_id: Option<String>,
    #[serde(default)]
    pub vars: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl Session {
    pub fn is_active(&self) -> bool {
        matches!(self.state, SessionState::Created | SessionState::Connected)
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    pub fn short_id(&self) -> String {
        self.id.simple().to_string()[..8].to_string()
    }

    /// The name, or the short id when unnamed.
    pub fn label(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.short_id())
    }

    pub fn idle_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.last_activity).num_seconds()
    }
}

/// Parameters for a new session.
#[derive(Debug, Clone, Default)]
pub struct NewSession {
    pub shell: ShellType,
    pub profile: Option<String>,
    pub cwd: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionStats {
    pub total: usize,
    pub active: usize,
    pub max_connections: usize,
    pub by_state: BTreeMap<String, usize>,
    pub by_shell: BTreeMap<String, usize>,
}

pub struct SessionRegistry {
    sessions: BTreeMap<Uuid, Session>,
    max_connections: usize,
    ttl_secs: u64,
}

impl SessionRegistry {
    pub fn new(max_connections: usize, ttl_secs: u64) -> Self {
        Self {
            sessions: BTreeMap::new(),
            max_connections,
            ttl_secs,
        }
    }

    pub fn from_config(config: &SessionConfig, sessions: Vec<Session>) -> Self {
        let mut registry = Self::new(config.max_connections, config.session_timeout_secs);
        for session in sessions {
            registry.sessions.insert(session.id, session);
        }
        registry
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn create(&mut self, request: NewSession) -> Result<&mut Session, WtError> {
        if self.sessions.len() >= self.max_connections {
            return Err(WtError::SessionLimit(self.max_connections));
        }
        let now = Utc::now();
        let profile = request
            .profile
            .or_else(|| request.shell.default_profile().map(str::to_string))
            .unwrap_or_else(|| "PowerShell".to_string());
        let session = Session {
            id: Uuid::new_v4(),
            state: SessionState::Created,
            shell: request.shell,
            profile,
            cwd: request.cwd,
            name: request.name,
            pane_id: None,
            tab_id: None,
            vars: BTreeMap::new(),
            created_at: now,
            last_activity: now,
        };
        let id = session.id;
        info!(session = %id, shell = %session.shell, profile = %session.profile, "session created");
        Ok(self.sessions.entry(id).or_insert(session))
    }

    pub fn get(&self, id: &Uuid) -> Option<&Session> {
        self.sessions.get(id)
    }

    /// Resolve a full id, a unique id prefix or a session name.
    pub fn resolve(&self, key: &str) -> Result<Uuid, WtError> {
        let key = key.trim();
        if let Ok(id) = Uuid::parse_str(key) {
            if self.sessions.contains_key(&id) {
                return Ok(id);
            }
        }
        if let Some(session) = self.sessions.values().find(|s| s.name.as_deref() == Some(key)) {
            return Ok(session.id);
        }
        let prefix = key.replace('-', "").to_ascii_lowercase();
        if prefix.is_empty() {
            return Err(WtError::SessionNotFound(key.to_string()));
        }
        let matches: Vec<Uuid> = self
            .sessions
            .keys()
            .filter(|id| id.simple().to_string().starts_with(&prefix))
            .copied()
            .collect();
        match matches.as_slice() {
            [id] => Ok(*id),
            [] => Err(WtError::SessionNotFound(key.to_string())),
            many => Err(WtError::invalid(
                "session",
                key,
                format!("prefix matches {} sessions", many.len()),
            )),
        }
    }

    pub fn find(&self, key: &str) -> Result<&Session, WtError> {
        let id = self.resolve(key)?;
        self.sessions
            .get(&id)
            .ok_or_else(|| WtError::SessionNotFound(key.to_string()))
    }

    /// Sessions oldest first, optionally filtered.
    pub fn list(&self, state: Option<SessionState>, shell: Option<ShellType>) -> Vec<&Session> {
        let mut sessions: Vec<&Session> = self
            .sessions
            .values()
            .filter(|s| state.is_none_or(|state| s.state == state))
            .filter(|s| shell.is_none_or(|shell| s.shell == shell))
            .collect();
        sessions.sort_by_key(|s| s.created_at);
        sessions
    }

    /// Remove a session; it is returned in the `closed` state.
    pub fn close(&mut self, id: &Uuid) -> Option<Session> {
        let mut session = self.sessions.remove(id)?;
        session.state = SessionState::Closed;
        info!(session = %id, "session closed");
        Some(session)
    }

    /// Apply `f` to a session and mark it active now.
    pub fn update(&mut self, key: &str, f: impl FnOnce(&mut Session)) -> Result<&Session, WtError> {
        let id = self.resolve(key)?;
        let session = self
            .sessions
            .get_mut(&id)
            .ok_or_else(|| WtError::SessionNotFound(key.to_string()))?;
        f(session);
        session.touch();
        Ok(session)
    }

    pub fn set_var(&mut self, key: &str, name: &str, value: &str) -> Result<(), WtError> {
        if name.trim().is_empty() {
            return Err(WtError::invalid("variable", name, "name is empty"));
        }
        self.update(key, |s| {
            s.vars.insert(name.to_string(), value.to_string());
        })?;
        Ok(())
    }

    pub fn get_var(&self, key: &str, name: &str) -> Result<Option<&str>, WtError> {
        Ok(self.find(key)?.vars.get(name).map(String::as_str))
    }

    /// Drop disconnected or errored sessions and those idle past the TTL.
    pub fn cleanup_inactive(&mut self, now: DateTime<Utc>) -> Vec<Session> {
        let ttl = i64::try_from(self.ttl_secs).unwrap_or(i64::MAX);
        let expired: Vec<Uuid> = self
            .sessions
            .values()
            .filter(|s| {
                matches!(s.state, SessionState::Disconnected | SessionState::Error)
                    || s.idle_secs(now) > ttl
            })
            .map(|s| s.id)
            .collect();
        let removed: Vec<Session> = expired.iter().filter_map(|id| self.close(id)).collect();
        if !removed.is_empty() {
            info!(removed = removed.len(), "cleaned up inactive sessions");
        }
        removed
    }

    pub fn stats(&self) -> SessionStats {
        let mut stats = SessionStats {
            total: self.sessions.len(),
            active: self.sessions.values().filter(|s| s.is_active()).count(),
            max_connections: self.max_connections,
            ..SessionStats::default()
        };
        for session in self.sessions.values() {
            *stats.by_state.entry(session.state.to_string()).or_default() += 1;
            *stats.by_shell.entry(session.shell.to_string()).or_default() += 1;
        }
        stats
    }

    /// Every session, for persisting.
    pub fn sessions(&self) -> Vec<Session> {
        self.sessions.values().cloned().collect()
    }
}

struct Reaper {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

/// Registry plus terminal: the operations behind `wt2 session`.
pub struct SessionManager {
    registry: Arc<Mutex<SessionRegistry>>,
    terminal: Arc<Terminal>,
    cleanup_interval: Duration,
    reaper: Option<Reaper>,
}

impl SessionManager {
    pub fn new(
        registry: SessionRegistry,
        terminal: Arc<Terminal>,
        cleanup_interval: Duration,
    ) -> Self {
        Self {
            registry: Arc::new(Mutex::new(registry)),
            terminal,
            cleanup_interval,
            reaper: None,
        }
    }

    pub fn registry(&self) -> Result<MutexGuard<'_, SessionRegistry>> {
        self.registry
            .lock()
            .map_err(|_| anyhow::anyhow!("session registry lock poisoned"))
    }

    /// Create a record and open its tab.
    pub fn open_session(&self, request: NewSession) -> Result<Session> {
        let (id, launch) = {
            let mut registry = self.registry()?;
            let session = registry.create(request)?;
            session.state = SessionState::Connecting;
            let launch = PaneLaunch {
                profile: Some(session.profile.clone()),
                title: Some(
                    session
                        .name
                        .clone()
                        .unwrap_or_else(|| format!("wt2-{}", session.short_id())),
                ),
                starting_directory: session.cwd.clone(),
                ..PaneLaunch::default()
            };
            (session.id, launch)
        };

        let opened = self.terminal.new_tab(&launch, None);
        let ids = opened.as_ref().ok().and_then(|_| {
            self.terminal.state().ok().and_then(|state| {
                let tab = state.active_tab()?;
                let pane = tab.panes.iter().find(|p| p.active).or(tab.panes.first());
                Some((tab.id.clone(), pane.map(|p| p.id.clone())))
            })
        });

        let mut registry = self.registry()?;
        let key = id.to_string();
        let session = registry.update(&key, |s| match &opened {
            Ok(()) => {
                s.state = SessionState::Connected;
                if let Some((tab, pane)) = ids {
                    s.tab_id = Some(tab);
                    s.pane_id = pane;
                }
            }
            Err(_) => s.state = SessionState::Error,
        })?;
        let session = session.clone();
        opened?;
        Ok(session)
    }

    fn target(&self, key: &str) -> Result<Option<String>> {
        let mut registry = self.registry()?;
        let session = registry.update(key, |_| {})?;
        Ok(session.pane_id.clone())
    }

    pub fn send_command(&self, key: &str, command: &str) -> Result<()> {
        let pane = self.target(key)?;
        self.terminal.run_command(pane.as_deref(), command)
    }

    pub fn send_text(&self, key: &str, text: &str) -> Result<()> {
        let pane = self.target(key)?;
        self.terminal.send_text(pane.as_deref(), text)
    }

    pub fn clear(&self, key: &str) -> Result<()> {
        let pane = self.target(key)?;
        self.terminal.clear_screen(pane.as_deref())
    }

    pub fn read(&self, key: &str, lines: usize) -> Result<Vec<String>> {
        let pane = self.target(key)?;
        self.terminal.read_output(pane.as_deref(), lines)
    }

    pub fn restart(&self, key: &str) -> Result<()> {
        let pane = self.target(key)?;
        self.terminal.restart_pane(pane.as_deref())
    }

    /// Set the session name and the pane title together.
    pub fn rename(&self, key: &str, name: &str) -> Result<()> {
        let pane = {
            let mut registry = self.registry()?;
            registry
                .update(key, |s| s.name = Some(name.to_string()))?
                .pane_id
                .clone()
        };
        self.terminal.set_title(pane.as_deref(), name)
    }

    pub fn focus_session(&self, key: &str) -> Result<()> {
        let (tab, pane) = {
            let mut registry = self.registry()?;
            let session = registry.update(key, |_| {})?;
            (session.tab_id.clone(), session.pane_id.clone())
        };
        if tab.is_none() && pane.is_none() {
            return Err(WtError::unsupported("focus", "for a session with no pane or tab").into());
        }
        if let Some(ref tab) = tab {
            self.terminal.focus_tab(tab)?;
        }
        if let Some(index) = pane.as_deref().and_then(|p| p.parse::<u32>().ok()) {
            self.terminal.focus_pane_id(index)?;
        }
        Ok(())
    }

    /// Remove the record and close its tab.
    pub fn close_session(&self, key: &str) -> Result<Session> {
        let session = {
            let mut registry = self.registry()?;
            let id = registry.resolve(key)?;
            registry
                .close(&id)
                .ok_or_else(|| WtError::SessionNotFound(key.to_string()))?
        };
        if let Some(ref tab) = session.tab_id {
            if let Err(err) = self.terminal.close_tab(tab) {
                warn!(
                    session = %session.id,
                    tab = %tab,
                    error = %err,
                    "failed to close session tab"
                );
            }
        }
        Ok(session)
    }

    /// Run `cleanup_inactive` every `cleanup_interval` on a background thread.
    pub fn start_reaper(&mut self) {
        if self.reaper.is_some() {
            return;
        }
        let (stop, stopped) = mpsc::channel::<()>();
        let registry = Arc::clone(&self.registry);
        let interval = self.cleanup_interval;
        let handle = std::thread::spawn(move || loop {
            match stopped.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => match registry.lock() {
                    Ok(mut registry) => {
                        let removed = registry.cleanup_inactive(Utc::now());
                        debug!(removed = removed.len(), "reaper pass");
                    }
                    Err(_) => break,
                },
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        });
        info!(interval = ?interval, "session reaper started");
        self.reaper = Some(Reaper { stop, handle });
    }

    pub fn stop_reaper(&mut self) {
        if let Some(reaper) = self.reaper.take() {
            let _ = reaper.stop.send(());
            if reaper.handle.join().is_err() {
                warn!("session reaper panicked");
            }
        }
    }

    /// Stop the reaper and close every session.
    pub fn shutdown(&mut self) -> Result<Vec<Session>> {
        self.stop_reaper();
        let ids: Vec<String> = self
            .registry()?
            .sessions()
            .iter()
            .map(|s| s.id.to_string())
            .collect();
        let mut closed = Vec::new();
        for id in ids {
            closed.push(self.close_session(&id)?);
        }
        info!(closed = closed.len(), "session manager shut down");
        Ok(closed)
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.stop_reaper();
    }
}
