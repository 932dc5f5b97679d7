//! Handlers behind each `wt2` subcommand.
//!
//! Every handler takes a [`Context`] holding the loaded config, the command
//! runner, the terminal facade and the state/history files, and returns the
//! process exit code. Errors propagate as `anyhow::Error`; `main` maps them
//! to exit codes.

mod broadcast;
mod config;
mod monitor;
mod pane;
mod session;
mod shell;
mod tab;
mod window;

use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use serde::Serialize;
use tracing::{debug, warn};

use crate::adapter::{AdapterRegistry, ShellType};
use crate::cli::{Command, GlobalArgs, PaneTarget, ShellSelection};
use crate::config::{Config, SearchRoots};
use crate::error::WtError;
use crate::exec::{CommandRunner, DryRunRunner, SystemRunner};
use crate::history::{History, HistoryEvent};
use crate::pipe::{NamedPipeTransport, PipeTransport};
use crate::platform::{self, EnvVars};
use crate::session::{SessionManager, SessionRegistry};
use crate::state::{AppState, StateStore};
use crate::terminal::Terminal;
use crate::wt::PaneLaunch;

pub const EXIT_OK: u8 = 0;

/// Everything a handler needs for one invocation.
pub struct Context {
    pub config: Config,
    pub config_path: Option<PathBuf>,
    pub roots: SearchRoots,
    pub runner: Arc<dyn CommandRunner>,
    pub terminal: Arc<Terminal>,
    pub store: StateStore,
    pub history: History,
    pub global: GlobalArgs,
}

impl Context {
    /// Load the config and wire up the real runner, pipe and state directory.
    pub fn from_args(global: GlobalArgs) -> Result<Self> {
        let roots = SearchRoots::from_env();
        let (config, config_path) = Config::load(global.config.as_deref(), &roots)?;
        let runner: Arc<dyn CommandRunner> = if global.dry_run {
            Arc::new(DryRunRunner::echoing())
        } else {
            Arc::new(SystemRunner)
        };
        Ok(Self::new(
            config,
            config_path,
            roots,
            crate::paths::state_dir(),
            runner,
            Arc::new(NamedPipeTransport),
            global,
        ))
    }

    /// Build a context from explicit parts; tests pass scripted backends here.
    pub fn new(
        config: Config,
        config_path: Option<PathBuf>,
        roots: SearchRoots,
        state_dir: PathBuf,
        runner: Arc<dyn CommandRunner>,
        transport: Arc<dyn PipeTransport>,
        global: GlobalArgs,
    ) -> Self {
        for problem in config.validate() {
            warn!(problem = %problem, "config problem");
        }
        let terminal = Arc::new(Terminal::from_config(Arc::clone(&runner), transport, &config));
        let store = StateStore::new(&crate::paths::state_file(&state_dir));
        let history = History::new(
            &crate::paths::history_file(&state_dir),
            config.general.max_history,
        );
        debug!(
            config = ?config_path,
            state = %store.path().display(),
            dry_run = global.dry_run,
            "context ready"
        );
        Self {
            config,
            config_path,
            roots,
            runner,
            terminal,
            store,
            history,
            global,
        }
    }

    pub fn dry_run(&self) -> bool {
        self.global.dry_run
    }

    /// Log filter for `-v` repeated `verbose` times. `general.verbose_output`
    /// counts as one `-v`.
    pub fn log_filter(&self, verbose: u8) -> &'static str {
        if self.config.general.verbose_output {
            log_filter(verbose.max(1))
        } else {
            log_filter(verbose)
        }
    }

    pub fn json(&self) -> bool {
        self.global.json
    }

    /// `--shell`, else the configured default. `--shell auto` is `None`.
    pub fn requested_shell(&self) -> Option<ShellType> {
        match self.global.shell {
            Some(ShellSelection::Auto) => None,
            Some(ShellSelection::Shell(shell)) => Some(shell),
            None => Some(self.config.general.default_shell),
        }
    }

    /// The shell to use, detecting it from the environment for `auto`.
    pub fn shell(&self) -> ShellType {
        self.requested_shell()
            .or_else(|| platform::detect_shell(&EnvVars::from_process()))
            .unwrap_or_default()
    }

    /// Only a shell named on the command line; used to translate broadcasts.
    pub fn explicit_shell(&self) -> Option<ShellType> {
        self.global.shell.and_then(ShellSelection::explicit)
    }

    pub fn adapters(&self) -> AdapterRegistry {
        AdapterRegistry::with_defaults(
            Arc::clone(&self.runner),
            &self.config,
            Some(Arc::clone(&self.terminal)),
        )
    }

    /// Profile for new panes: `--profile`, the configured default, or the
    /// default profile of an explicitly requested shell.
    pub fn profile(&self) -> Option<String> {
        self.global
            .profile
            .clone()
            .or_else(|| self.config.general.default_profile.clone())
            .or_else(|| {
                self.explicit_shell()
                    .and_then(ShellType::default_profile)
                    .map(str::to_string)
            })
    }

    /// A launch for a new tab, pane or window. A matching wt2rc profile
    /// supplies the command line and directory when none is given.
    pub fn launch(
        &self,
        title: Option<String>,
        command: Option<String>,
        dir: Option<String>,
    ) -> PaneLaunch {
        let profile = self.profile();
        let configured = profile
            .as_deref()
            .and_then(|name| self.config.find_profile(name));
        PaneLaunch {
            commandline: command.or_else(|| configured.and_then(|p| p.commandline.clone())),
            starting_directory: dir
                .or_else(|| configured.and_then(|p| p.starting_directory.clone())),
            profile,
            title,
            ..PaneLaunch::default()
        }
    }

    pub fn load_state(&self) -> Result<AppState> {
        self.store.load()
    }

    /// Persist state; a dry run never writes.
    pub fn save_state(&self, state: &AppState) -> Result<()> {
        if self.dry_run() {
            debug!("dry run: state not saved");
            return Ok(());
        }
        self.store.save(state)
    }

    /// Run `f` against the persisted session registry and write it back,
    /// also when `f` fails, so failed opens stay visible as `error`.
    pub fn with_sessions<T>(
        &self,
        f: impl FnOnce(&mut SessionManager) -> Result<T>,
    ) -> Result<T> {
        let mut state = self.load_state()?;
        let registry = SessionRegistry::from_config(
            &self.config.sessions,
            std::mem::take(&mut state.sessions),
        );
        let mut manager = self.session_manager(registry);
        let out = f(&mut manager);
        state.sessions = manager.registry()?.sessions();
        self.save_state(&state)?;
        out
    }

    pub fn session_manager(&self, registry: SessionRegistry) -> SessionManager {
        SessionManager::new(
            registry,
            Arc::clone(&self.terminal),
            Duration::from_secs(self.config.sessions.cleanup_interval_secs),
        )
    }

    /// The pane a `--pane-id`/`--session` pair points at.
    pub fn pane_for(&self, target: &PaneTarget) -> Result<Option<String>> {
        match target.session {
            Some(ref key) => {
                let state = self.load_state()?;
                let registry = SessionRegistry::from_config(&self.config.sessions, state.sessions);
                let session = registry.find(key)?;
                Ok(session.pane_id.clone())
            }
            None => Ok(target.pane_id.clone()),
        }
    }

    /// Append to the history file. Failures are logged, not fatal.
    pub fn record(&self, event: HistoryEvent) {
        if self.dry_run() {
            return;
        }
        if let Err(err) = self.history.record(event) {
            warn!(error = %err, path = %self.history.path().display(), "failed to write history");
        }
    }

    /// Print `value` as JSON with `--json`, else the human rendering.
    pub fn emit<T: Serialize>(&self, value: &T, human: impl FnOnce() -> String) -> Result<()> {
        if self.json() {
            println!(
                "{}",
                serde_json::to_string_pretty(value).context("failed to serialize output")?
            );
        } else {
            let text = human();
            if !text.is_empty() {
                println!("{}", text.trim_end());
            }
        }
        Ok(())
    }

    /// A status line, suppressed under `--json`.
    pub fn say(&self, message: impl AsRef<str>) {
        if !self.json() {
            println!("{}", message.as_ref());
        }
    }

    /// Ask before a destructive step. `--force`, `--dry-run` and
    /// `general.confirmation_prompt: false` skip the prompt.
    pub fn confirm(&self, prompt: &str, force: bool) -> Result<bool> {
        if force || self.dry_run() || !self.config.general.confirmation_prompt {
            return Ok(true);
        }
        if !std::io::stdin().is_terminal() {
            return Err(WtError::invalid(
                "confirmation",
                prompt,
                "no terminal to ask on; pass --force",
            )
            .into());
        }
        dialoguer::Confirm::new()
            .with_prompt(prompt)
            .default(false)
            .interact()
            .context("failed to read confirmation")
    }
}

/// `tracing` filter for a `-v` count.
pub fn log_filter(verbose: u8) -> &'static str {
    match verbose {
        0 => "winterm2=warn",
        1 => "winterm2=info",
        2 => "winterm2=debug",
        _ => "winterm2=trace",
    }
}

/// Dispatch one parsed command.
pub fn run(ctx: &Context, command: Command) -> Result<u8> {
    match command {
        Command::Window(cmd) => window::run(ctx, cmd),
        Command::Tab(cmd) => tab::run(ctx, cmd),
        Command::Pane(cmd) => pane::run(ctx, cmd),
        Command::Session(cmd) => session::run(ctx, cmd),
        Command::Broadcast(cmd) => broadcast::run(ctx, cmd),
        Command::Monitor(cmd) => monitor::run(ctx, cmd),
        Command::Config(cmd) => config::run(ctx, cmd),
        Command::Shell(cmd) => shell::run_shell(ctx, cmd),
        Command::Wsl(cmd) => shell::run_wsl(ctx, cmd),
        Command::Path(cmd) => shell::run_path(ctx, cmd),
        Command::History(cmd) => shell::run_history(ctx, cmd),
        Command::Doctor => shell::doctor(ctx),
        Command::Completions { shell } => {
            crate::shell_completion::print(shell)?;
            Ok(EXIT_OK)
        }
        Command::Send { text, target } => session::send(ctx, &text.join(" "), &target),
        Command::Run { command, target } => session::run_command(ctx, &command, &target),
        Command::Split(args) => pane::split(ctx, crate::wt::SplitDirection::Horizontal, args),
        Command::Vsplit(args) => pane::split(ctx, crate::wt::SplitDirection::Vertical, args),
        Command::Clear { target } => session::clear(ctx, &target),
        Command::Ls => session::list(ctx, None),
        Command::New(args) => window::new_window(ctx, args),
        Command::Newtab(args) => tab::new_tab(ctx, args),
    }
}

/// Render rows as left-aligned columns under a header.
pub(crate) fn table(header: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = header.iter().map(|h| h.len()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if let Some(width) = widths.get_mut(i) {
                *width = (*width).max(cell.chars().count());
            }
        }
    }
    let render = |cells: Vec<&str>| {
        cells
            .iter()
            .zip(&widths)
            .map(|(cell, width)| format!("{cell:<width$}"))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };
    let mut out = render(header.to_vec());
    out.push('\n');
    for row in rows {
        out.push_str(&render(row.iter().map(String::as_str).collect()));
        out.push('\n');
    }
    out
}

/// Seconds from a `--timeout` flag.
pub(crate) fn timeout_from(secs: Option<f64>) -> Result<Option<Duration>> {
    let Some(secs) = secs else {
        return Ok(None);
    };
    match Duration::try_from_secs_f64(secs) {
        Ok(timeout) if secs > 0.0 => Ok(Some(timeout)),
        _ => Err(WtError::invalid(
            "timeout",
            secs.to_string(),
            "must be a positive number of seconds",
        )
        .into()),
    }
}
