//! Shell adapter layer.
//!
//! Each shell (Windows PowerShell, PowerShell 7, CMD, WSL, and Windows
//! Terminal panes) is wrapped in an adapter that knows how to:
//! - Build the command line that runs one command non-interactively
//! - Start and feed an interactive session through its stdin
//! - Spell common operations (cd, clear, env vars) in that shell's dialect
//!
//! Commands built on top of this trait never need to know a shell's quoting
//! or flag conventions.

pub mod cmd;
pub mod powershell;
pub mod terminal;
pub mod wsl;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::Config;
use crate::error::WtError;
use crate::exec::{CommandOutput, CommandRunner, CommandSpec, ProcessHandle};

/// Shells tried by auto-detection, most capable first.
pub const AUTO_DETECT_ORDER: [ShellType; 4] = [
    ShellType::Pwsh,
    ShellType::PowerShell,
    ShellType::Cmd,
    ShellType::Wsl,
];

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ShellType {
    Terminal,
    #[default]
    PowerShell,
    #[serde(alias = "powershell_core")]
    Pwsh,
    Cmd,
    Wsl,
}

/// The spelling of everyday commands in one shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShellCommands {
    pub clear: &'static str,
    pub list_dir: &'static str,
    pub print_dir: &'static str,
    pub change_dir: &'static str,
    pub env_prefix: &'static str,
}

impl ShellType {
    pub const ALL: [ShellType; 5] = [
        ShellType::Terminal,
        ShellType::PowerShell,
        ShellType::Pwsh,
        ShellType::Cmd,
        ShellType::Wsl,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ShellType::Terminal => "terminal",
            ShellType::PowerShell => "powershell",
            ShellType::Pwsh => "pwsh",
            ShellType::Cmd => "cmd",
            ShellType::Wsl => "wsl",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            ShellType::Terminal => "Windows Terminal",
            ShellType::PowerShell => "Windows PowerShell",
            ShellType::Pwsh => "PowerShell",
            ShellType::Cmd => "Command Prompt",
            ShellType::Wsl => "WSL",
        }
    }

    pub fn executable(self) -> &'static str {
        match self {
            ShellType::Terminal => "wt.exe",
            ShellType::PowerShell => "powershell.exe",
            ShellType::Pwsh => "pwsh.exe",
            ShellType::Cmd => "cmd.exe",
            ShellType::Wsl => "wsl.exe",
        }
    }

    /// Windows Terminal profile opened for a new session of this shell.
    pub fn default_profile(self) -> Option<&'static str> {
        match self {
            ShellType::Terminal => None,
            ShellType::PowerShell | ShellType::Pwsh => Some("PowerShell"),
            ShellType::Cmd => Some("Command Prompt"),
            ShellType::Wsl => Some("WSL"),
        }
    }

    pub fn commands(self) -> ShellCommands {
        match self {
            ShellType::Cmd => ShellCommands {
                clear: "cls",
                list_dir: "dir",
                print_dir: "cd",
                change_dir: "cd /d",
                env_prefix: "%",
            },
            ShellType::Wsl => ShellCommands {
                clear: "clear",
                list_dir: "ls",
                print_dir: "pwd",
                change_dir: "cd",
                env_prefix: "$",
            },
            ShellType::Terminal | ShellType::PowerShell | ShellType::Pwsh => ShellCommands {
                clear: "Clear-Host",
                list_dir: "Get-ChildItem",
                print_dir: "(Get-Location).Path",
                change_dir: "Set-Location",
                env_prefix: "$env:",
            },
        }
    }
}

impl fmt::Display for ShellType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShellType {
    type Err = WtError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "terminal" | "wt" => Ok(ShellType::Terminal),
            "powershell" | "ps" => Ok(ShellType::PowerShell),
            "pwsh" | "powershell_core" | "powershell-core" => Ok(ShellType::Pwsh),
            "cmd" => Ok(ShellType::Cmd),
            "wsl" | "bash" => Ok(ShellType::Wsl),
            _ => Err(WtError::invalid(
                "shell",
                s,
                "expected one of terminal, powershell, pwsh, cmd, wsl",
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AdapterInfo {
    pub name: String,
    pub shell_type: ShellType,
    pub version: Option<String>,
    pub available: bool,
    pub executable: String,
    pub default_args: Vec<String>,
}

/// Working directory, environment and timeout for one invocation.
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    pub cwd: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    pub timeout: Option<Duration>,
}

impl ExecOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..Self::default()
        }
    }

    /// Apply cwd, env and timeout to a spec.
    pub fn apply(&self, mut spec: CommandSpec) -> CommandSpec {
        spec = spec.cwd(self.cwd.clone()).timeout(self.timeout);
        for (key, value) in &self.env {
            spec = spec.env(key, value);
        }
        spec
    }
}

/// Trait that all shell adapters implement.
///
/// Adapters are stateless apart from their interactive session table, so a
/// single instance serves every command of a `wt2` invocation.
pub trait ShellAdapter: Send + Sync {
    fn shell_type(&self) -> ShellType;

    fn executable(&self) -> &str;

    fn version(&self) -> Option<String>;

    fn is_available(&self) -> bool {
        self.version().is_some()
    }

    fn default_args(&self) -> Vec<String> {
        Vec::new()
    }

    fn info(&self) -> AdapterInfo {
        let version = self.version();
        AdapterInfo {
            name: self.shell_type().display_name().to_string(),
            shell_type: self.shell_type(),
            available: version.is_some(),
            version,
            executable: self.executable().to_string(),
            default_args: self.default_args(),
        }
    }

    /// Run one command to completion.
    fn execute(&self, command: &str, opts: &ExecOptions) -> Result<CommandOutput>;

    /// Start an interactive session; returns its id.
    fn start_session(&self, opts: &ExecOptions) -> Result<String>;

    /// Returns `false` when no such session exists.
    fn end_session(&self, session_id: &str) -> Result<bool>;

    fn send_input(&self, session_id: &str, text: &str) -> Result<()>;

    fn change_directory_command(&self, path: &str) -> String;

    fn set_env_command(&self, key: &str, value: &str) -> String;

    /// Prints the value of one environment variable.
    fn env_command(&self, key: &str) -> String;

    fn prompt_command(&self) -> String;

    /// `None` when the shell cannot resize its own buffer.
    fn resize_command(&self, _rows: u16, _cols: u16) -> Option<String> {
        None
    }

    fn line_ending(&self) -> &'static str {
        "\r\n"
    }

    fn kill_session(&self, session_id: &str) -> Result<bool> {
        self.end_session(session_id)
    }

    fn change_directory(&self, session_id: &str, path: &str) -> Result<()> {
        let line = format!("{}{}", self.change_directory_command(path), self.line_ending());
        self.send_input(session_id, &line)
    }

    fn clear_screen(&self, session_id: &str) -> Result<()> {
        let line = format!("{}{}", self.shell_type().commands().clear, self.line_ending());
        self.send_input(session_id, &line)
    }

    fn set_environment(&self, session_id: &str, vars: &BTreeMap<String, String>) -> Result<()> {
        for (key, value) in vars {
            let line = format!("{}{}", self.set_env_command(key, value), self.line_ending());
            self.send_input(session_id, &line)?;
        }
        Ok(())
    }

    fn resize_terminal(&self, session_id: &str, rows: u16, cols: u16) -> Result<()> {
        match self.resize_command(rows, cols) {
            Some(command) => {
                let line = format!("{command}{}", self.line_ending());
                self.send_input(session_id, &line)
            }
            None => Err(WtError::unsupported(
                "resize",
                format!("by the {} adapter", self.shell_type()),
            )
            .into()),
        }
    }

    fn get_working_directory(&self, opts: &ExecOptions) -> Result<String> {
        let command = self.shell_type().commands().print_dir;
        let output = self.execute(command, opts)?.check(self.executable())?;
        Ok(output.stdout.trim().to_string())
    }

    /// Values of the named variables; unset ones are omitted.
    fn get_environment(
        &self,
        names: &[String],
        opts: &ExecOptions,
    ) -> Result<BTreeMap<String, String>> {
        let mut vars = BTreeMap::new();
        for name in names {
            let output = self.execute(&self.env_command(name), opts)?;
            let value = output.stdout.trim();
            if output.success() && !value.is_empty() {
                vars.insert(name.clone(), value.to_string());
            }
        }
        Ok(vars)
    }

    fn get_exit_code(&self, command: &str, opts: &ExecOptions) -> Result<Option<i32>> {
        Ok(self.execute(command, opts)?.status)
    }

    fn get_prompt(&self, opts: &ExecOptions) -> Result<String> {
        let output = self.execute(&self.prompt_command(), opts)?;
        Ok(output.stdout.trim().to_string())
    }
}

/// Interactive child processes owned by one adapter, keyed by session id.
pub struct ProcessSessions {
    runner: Arc<dyn CommandRunner>,
    sessions: Mutex<HashMap<String, Box<dyn ProcessHandle>>>,
}

impl ProcessSessions {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn start(&self, spec: &CommandSpec) -> Result<String> {
        let handle = self.runner.spawn(spec)?;
        let id = uuid::Uuid::new_v4().to_string();
        info!(session = %id, pid = handle.id(), program = %spec.program, "started shell session");
        self.lock()?.insert(id.clone(), handle);
        Ok(id)
    }

    pub fn write(&self, session_id: &str, text: &str) -> Result<()> {
        let mut sessions = self.lock()?;
        let handle = sessions
            .get_mut(session_id)
            .ok_or_else(|| WtError::SessionNotFound(session_id.to_string()))?;
        if let Some(code) = handle.try_wait()? {
            sessions.remove(session_id);
            anyhow::bail!("session {session_id} has exited with code {code}");
        }
        debug!(session = %session_id, bytes = text.len(), "writing to session");
        handle.write_input(text)
    }

    pub fn end(&self, session_id: &str) -> Result<bool> {
        let handle = self.lock()?.remove(session_id);
        match handle {
            Some(mut handle) => {
                handle.kill()?;
                info!(session = %session_id, "ended shell session");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .lock()
            .map(|sessions| sessions.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Box<dyn ProcessHandle>>>> {
        self.sessions
            .lock()
            .map_err(|_| anyhow::anyhow!("session table lock poisoned"))
    }
}

impl Drop for ProcessSessions {
    fn drop(&mut self) {
        if let Ok(mut sessions) = self.sessions.lock() {
            for (id, mut handle) in sessions.drain() {
                if let Err(err) = handle.kill() {
                    debug!(session = %id, error = %err, "failed to stop session on drop");
                }
            }
        }
    }
}

/// Run `version_args` and keep the first non-empty stdout line.
pub(crate) fn query_version(
    runner: &dyn CommandRunner,
    program: &str,
    version_args: &[&str],
) -> Option<String> {
    let spec = CommandSpec::new(program)
        .args(version_args.iter().copied())
        .timeout(Some(Duration::from_secs(5)));
    match runner.run(&spec) {
        Ok(output) if output.success() => output
            .stdout
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string)
            .or_else(|| Some("unknown".to_string())),
        Ok(output) => {
            debug!(program, status = ?output.status, "version query failed");
            None
        }
        Err(err) => {
            debug!(program, error = %err, "version query failed");
            None
        }
    }
}

/// Construct the process-backed adapter for a shell.
///
/// Returns `None` for [`ShellType::Terminal`], whose adapter needs a
/// terminal handle; see [`AdapterRegistry::with_defaults`].
pub fn adapter_from_shell(
    shell: ShellType,
    runner: Arc<dyn CommandRunner>,
    config: &Config,
) -> Option<Box<dyn ShellAdapter>> {
    match shell {
        ShellType::PowerShell => Some(Box::new(powershell::PowerShellAdapter::windows(runner))),
        ShellType::Pwsh => Some(Box::new(powershell::PowerShellAdapter::core(runner))),
        ShellType::Cmd => Some(Box::new(cmd::CmdAdapter::new(runner))),
        ShellType::Wsl => Some(Box::new(wsl::WslAdapter::new(
            runner,
            config.wsl.distribution.clone(),
            config.wsl.user.clone(),
        ))),
        ShellType::Terminal => None,
    }
}

/// Adapters by shell type.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: BTreeMap<ShellType, Box<dyn ShellAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every built-in adapter. The terminal adapter is included when a
    /// terminal handle is given.
    pub fn with_defaults(
        runner: Arc<dyn CommandRunner>,
        config: &Config,
        terminal: Option<Arc<crate::terminal::Terminal>>,
    ) -> Self {
        let mut registry = Self::new();
        for shell in AUTO_DETECT_ORDER {
            if let Some(adapter) = adapter_from_shell(shell, Arc::clone(&runner), config) {
                registry.register(adapter);
            }
        }
        if let Some(terminal) = terminal {
            registry.register(Box::new(terminal::TerminalAdapter::new(terminal)));
        }
        registry
    }

    pub fn register(&mut self, adapter: Box<dyn ShellAdapter>) {
        self.adapters.insert(adapter.shell_type(), adapter);
    }

    pub fn get(&self, shell: ShellType) -> Option<&dyn ShellAdapter> {
        self.adapters.get(&shell).map(|adapter| adapter.as_ref())
    }

    pub fn registered(&self) -> Vec<ShellType> {
        self.adapters.keys().copied().collect()
    }

    pub fn available(&self) -> Vec<ShellType> {
        self.adapters
            .iter()
            .filter(|(_, adapter)| adapter.is_available())
            .map(|(shell, _)| *shell)
            .collect()
    }

    /// First available shell in [`AUTO_DETECT_ORDER`].
    pub fn detect(&self) -> Option<&dyn ShellAdapter> {
        AUTO_DETECT_ORDER
            .iter()
            .filter_map(|shell| self.get(*shell))
            .find(|adapter| adapter.is_available())
    }

    /// The requested shell, or the auto-detected one for `None`.
    pub fn resolve(&self, requested: Option<ShellType>) -> Result<&dyn ShellAdapter> {
        match requested {
            Some(shell) => {
                let adapter = self
                    .get(shell)
                    .ok_or_else(|| WtError::ShellNotFound(shell.to_string()))?;
                if !adapter.is_available() {
                    return Err(WtError::ShellNotFound(adapter.executable().to_string()).into());
                }
                Ok(adapter)
            }
            None => self
                .detect()
                .ok_or_else(|| WtError::ShellNotFound("no supported shell found".to_string()))
                .context("shell auto-detection failed"),
        }
    }

    pub fn infos(&self) -> Vec<AdapterInfo> {
        self.adapters.values().map(|adapter| adapter.info()).collect()
    }
}
