//! Windows Terminal panes as a shell.
//!
//! A session is a new tab; input is typed into its pane through the JSON
//! pipe. Nothing is captured from a command's output, so `execute` reports
//! success once the tab is open.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use tracing::{debug, info};

use super::{ExecOptions, ShellAdapter, ShellType};
use crate::error::WtError;
use crate::exec::CommandOutput;
use crate::terminal::Terminal;
use crate::wt::PaneLaunch;

pub struct TerminalAdapter {
    terminal: Arc<Terminal>,
    /// Session id -> pane id, when the pipe could tell us which pane opened.
    panes: Mutex<HashMap<String, Option<String>>>,
}

impl TerminalAdapter {
    pub fn new(terminal: Arc<Terminal>) -> Self {
        Self {
            terminal,
            panes: Mutex::new(HashMap::new()),
        }
    }

    fn launch(
        opts: &ExecOptions,
        title: Option<String>,
        commandline: Option<String>,
    ) -> PaneLaunch {
        PaneLaunch {
            starting_directory: opts.cwd.as_ref().map(|p| p.display().to_string()),
            title,
            commandline,
            ..PaneLaunch::default()
        }
    }

    fn pane_of(&self, session_id: &str) -> Result<Option<String>> {
        let panes = self
            .panes
            .lock()
            .map_err(|_| anyhow::anyhow!("pane table lock poisoned"))?;
        panes
            .get(session_id)
            .cloned()
            .ok_or_else(|| WtError::SessionNotFound(session_id.to_string()).into())
    }
}

impl ShellAdapter for TerminalAdapter {
    fn shell_type(&self) -> ShellType {
        ShellType::Terminal
    }

    fn executable(&self) -> &str {
        self.terminal.wt().path()
    }

    fn version(&self) -> Option<String> {
        self.terminal.version().ok()
    }

    fn execute(&self, command: &str, opts: &ExecOptions) -> Result<CommandOutput> {
        self.terminal
            .new_tab(&Self::launch(opts, None, Some(command.to_string())), None)?;
        Ok(CommandOutput::ok(""))
    }

    fn start_session(&self, opts: &ExecOptions) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let title = format!("wt2-{}", &id[..8]);
        self.terminal
            .new_tab(&Self::launch(opts, Some(title.clone()), None), None)?;
        let pane = self
            .terminal
            .state()
            .ok()
            .and_then(|state| state.active_pane().map(|pane| pane.id.clone()));
        info!(session = %id, pane = ?pane, title = %title, "started terminal session");
        self.panes
            .lock()
            .map_err(|_| anyhow::anyhow!("pane table lock poisoned"))?
            .insert(id.clone(), pane);
        for (key, value) in &opts.env {
            self.send_input(
                &id,
                &format!("{}{}", self.set_env_command(key, value), self.line_ending()),
            )?;
        }
        Ok(id)
    }

    fn end_session(&self, session_id: &str) -> Result<bool> {
        let removed = self
            .panes
            .lock()
            .map_err(|_| anyhow::anyhow!("pane table lock poisoned"))?
            .remove(session_id);
        match removed {
            Some(Some(pane)) => {
                self.terminal.close_pane(Some(&pane))?;
                Ok(true)
            }
            Some(None) => {
                debug!(session = %session_id, "pane unknown; leaving tab open");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn send_input(&self, session_id: &str, text: &str) -> Result<()> {
        let pane = self.pane_of(session_id)?;
        self.terminal.send_text(pane.as_deref(), text)
    }

    fn change_directory_command(&self, path: &str) -> String {
        format!("cd \"{path}\"")
    }

    fn set_env_command(&self, key: &str, value: &str) -> String {
        format!("$env:{key} = '{}'", value.replace('\'', "''"))
    }

    fn env_command(&self, key: &str) -> String {
        format!("$env:{key}")
    }

    fn prompt_command(&self) -> String {
        "prompt".to_string()
    }

    fn line_ending(&self) -> &'static str {
        "\r"
    }

    fn clear_screen(&self, session_id: &str) -> Result<()> {
        let pane = self.pane_of(session_id)?;
        self.terminal.clear_screen(pane.as_deref())
    }
}
