//! Windows PowerShell (`powershell.exe`) and PowerShell 7 (`pwsh.exe`).
//!
//! Commands run as `-NoLogo -NoProfile -Command "& { ... }"`; a command that
//! starts with `$` is an expression and is passed through unwrapped.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use anyhow::{Context, Result};
use tracing::debug;

use super::{ExecOptions, ProcessSessions, ShellAdapter, ShellType, query_version};
use crate::error::WtError;
use crate::exec::{CommandOutput, CommandRunner, CommandSpec};

const BASE_ARGS: [&str; 2] = ["-NoLogo", "-NoProfile"];

pub struct PowerShellAdapter {
    shell: ShellType,
    runner: Arc<dyn CommandRunner>,
    sessions: ProcessSessions,
    version: OnceLock<Option<String>>,
}

/// Single-quote a string for PowerShell; embedded quotes are doubled.
pub fn ps_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// `& { cmd }` unless the command is a bare `$` expression.
pub fn wrap_command(command: &str) -> String {
    if command.trim_start().starts_with('$') {
        command.to_string()
    } else {
        format!("& {{{command}}}")
    }
}

/// Build `Name 'pos' -Key 'value' -Count 3`.
pub fn build_invocation(name: &str, args: &[String], params: &BTreeMap<String, String>) -> String {
    let mut parts = vec![name.to_string()];
    parts.extend(args.iter().map(|arg| ps_quote(arg)));
    for (key, value) in params {
        let is_literal = value.parse::<f64>().is_ok()
            || value.eq_ignore_ascii_case("$true")
            || value.eq_ignore_ascii_case("$false");
        if is_literal {
            parts.push(format!("-{key} {value}"));
        } else {
            parts.push(format!("-{key} {}", ps_quote(value)));
        }
    }
    parts.join(" ")
}

impl PowerShellAdapter {
    /// Windows PowerShell 5.1.
    pub fn windows(runner: Arc<dyn CommandRunner>) -> Self {
        Self::with_shell(ShellType::PowerShell, runner)
    }

    /// PowerShell 7+.
    pub fn core(runner: Arc<dyn CommandRunner>) -> Self {
        Self::with_shell(ShellType::Pwsh, runner)
    }

    fn with_shell(shell: ShellType, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            shell,
            sessions: ProcessSessions::new(Arc::clone(&runner)),
            runner,
            version: OnceLock::new(),
        }
    }

    fn spec(&self) -> CommandSpec {
        CommandSpec::new(self.shell.executable()).args(BASE_ARGS)
    }

    /// Run a `.ps1` file with arguments.
    pub fn execute_script(
        &self,
        script: &Path,
        args: &[String],
        opts: &ExecOptions,
    ) -> Result<CommandOutput> {
        if !script.is_file() {
            return Err(WtError::invalid(
                "script",
                script.display().to_string(),
                "file not found",
            )
            .into());
        }
        let spec = self
            .spec()
            .args(["-ExecutionPolicy", "Bypass", "-File"])
            .arg(script.display().to_string())
            .args(args.iter().cloned());
        self.runner.run(&opts.apply(spec))
    }

    /// Evaluate an expression and return its value as JSON.
    pub fn invoke_expression(&self, expression: &str) -> Result<serde_json::Value> {
        let command = format!("({expression}) | ConvertTo-Json -Depth 4 -Compress");
        let output = self
            .execute(&command, &ExecOptions::default())?
            .check(self.executable())?;
        let text = output.stdout.trim();
        if text.is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_str(text)
            .with_context(|| format!("PowerShell returned non-JSON output for {expression}"))
    }

    pub fn invoke_command(
        &self,
        name: &str,
        args: &[String],
        params: &BTreeMap<String, String>,
    ) -> Result<CommandOutput> {
        self.execute(&build_invocation(name, args, params), &ExecOptions::default())
    }

    /// Version of an installed module, `None` when it is not installed.
    pub fn module_version(&self, module: &str) -> Result<Option<String>> {
        let command = format!(
            "(Get-Module -ListAvailable -Name {} | Select-Object -First 1).Version.ToString()",
            ps_quote(module)
        );
        let output = self.execute(&command, &ExecOptions::default())?;
        let version = output.stdout.trim();
        Ok((output.success() && !version.is_empty()).then(|| version.to_string()))
    }

    pub fn import_module(&self, module: &str) -> Result<()> {
        let command = format!("Import-Module {}", ps_quote(module));
        self.execute(&command, &ExecOptions::default())?
            .check(self.executable())?;
        Ok(())
    }
}

impl ShellAdapter for PowerShellAdapter {
    fn shell_type(&self) -> ShellType {
        self.shell
    }

    fn executable(&self) -> &str {
        self.shell.executable()
    }

    fn version(&self) -> Option<String> {
        self.version
            .get_or_init(|| {
                query_version(
                    self.runner.as_ref(),
                    self.shell.executable(),
                    &["-NoLogo", "-NoProfile", "-Command", "$PSVersionTable.PSVersion.ToString()"],
                )
            })
            .clone()
    }

    fn default_args(&self) -> Vec<String> {
        BASE_ARGS.iter().map(|s| s.to_string()).collect()
    }

    fn execute(&self, command: &str, opts: &ExecOptions) -> Result<CommandOutput> {
        debug!(shell = %self.shell, command, "executing");
        let spec = self.spec().arg("-Command").arg(wrap_command(command));
        self.runner.run(&opts.apply(spec))
    }

    fn start_session(&self, opts: &ExecOptions) -> Result<String> {
        // `-Command -` reads one command per stdin line.
        let spec = self.spec().args(["-Command", "-"]);
        self.sessions.start(&opts.apply(spec))
    }

    fn end_session(&self, session_id: &str) -> Result<bool> {
        self.sessions.end(session_id)
    }

    fn send_input(&self, session_id: &str, text: &str) -> Result<()> {
        self.sessions.write(session_id, text)
    }

    fn change_directory_command(&self, path: &str) -> String {
        format!("Set-Location -LiteralPath {}", ps_quote(path))
    }

    fn set_env_command(&self, key: &str, value: &str) -> String {
        format!("$env:{key} = {}", ps_quote(value))
    }

    fn env_command(&self, key: &str) -> String {
        format!("$env:{key}")
    }

    fn prompt_command(&self) -> String {
        "prompt".to_string()
    }

    fn resize_command(&self, rows: u16, cols: u16) -> Option<String> {
        Some(format!(
            "$host.UI.RawUI.BufferSize = \
             New-Object Management.Automation.Host.Size ({cols}, {rows})"
        ))
    }
}
