//! WSL (`wsl.exe`).
//!
//! Commands run as `wsl.exe [--distribution D] [--user U] bash -c SCRIPT`.
//! Windows paths in the working directory and in environment values are
//! rewritten to their `/mnt/<drive>` form before they reach bash, and the
//! environment is exported inside the script because `wsl.exe` does not
//! forward the Windows environment.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info};

use super::{ExecOptions, ProcessSessions, ShellAdapter, ShellType, query_version};
use crate::error::WtError;
use crate::exec::{CommandOutput, CommandRunner, CommandSpec};
use crate::path::{is_windows_path, windows_to_wsl, wsl_to_windows};

const IMPORT_TIMEOUT: Duration = Duration::from_secs(600);
const ADMIN_TIMEOUT: Duration = Duration::from_secs(30);

/// One row of `wsl.exe --list --verbose`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Distribution {
    pub name: String,
    pub state: String,
    pub version: Option<u8>,
    pub is_default: bool,
}

pub struct WslAdapter {
    runner: Arc<dyn CommandRunner>,
    distribution: Option<String>,
    user: Option<String>,
    sessions: ProcessSessions,
    version: OnceLock<Option<String>>,
}

/// Single-quote for POSIX shells.
pub fn sh_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn to_linux(value: &str) -> String {
    if is_windows_path(value) {
        windows_to_wsl(value)
    } else {
        value.to_string()
    }
}

/// Parse `wsl.exe --list --verbose`; the default distro is marked with `*`.
pub fn parse_distributions(output: &str) -> Vec<Distribution> {
    output
        .lines()
        .map(|line| line.trim_matches(|c: char| c.is_whitespace() || c == '\0'))
        .filter(|line| !line.is_empty())
        .filter(|line| !line.split_whitespace().next().is_some_and(|w| w == "NAME"))
        .filter_map(|line| {
            let is_default = line.starts_with('*');
            let mut fields = line.trim_start_matches('*').split_whitespace();
            let name = fields.next()?.to_string();
            let state = fields.next().unwrap_or("Unknown").to_string();
            let version = fields.next().and_then(|v| v.parse().ok());
            Some(Distribution {
                name,
                state,
                version,
                is_default,
            })
        })
        .collect()
}

/// Parse `mount` output into mount point -> source for Windows drives.
pub fn parse_mounts(output: &str) -> BTreeMap<String, String> {
    output
        .lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            match parts.as_slice() {
                [source, "on", target, "type", fstype, ..]
                    if matches!(*fstype, "drvfs" | "9p") && target.starts_with("/mnt/") =>
                {
                    Some((target.to_string(), source.to_string()))
                }
                _ => None,
            }
        })
        .collect()
}

impl WslAdapter {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        distribution: Option<String>,
        user: Option<String>,
    ) -> Self {
        Self {
            sessions: ProcessSessions::new(Arc::clone(&runner)),
            runner,
            distribution,
            user,
            version: OnceLock::new(),
        }
    }

    pub fn distribution(&self) -> Option<&str> {
        self.distribution.as_deref()
    }

    fn target_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(ref distro) = self.distribution {
            args.extend(["--distribution".to_string(), distro.clone()]);
        }
        if let Some(ref user) = self.user {
            args.extend(["--user".to_string(), user.clone()]);
        }
        args
    }

    /// Exports, then `cd`, then the command, joined with `&&`.
    pub fn build_script(&self, command: &str, opts: &ExecOptions) -> String {
        let mut steps = Vec::new();
        for (key, value) in &opts.env {
            steps.push(format!("export {key}={}", sh_quote(&to_linux(value))));
        }
        if let Some(ref cwd) = opts.cwd {
            steps.push(format!("cd {}", sh_quote(&to_linux(&cwd.display().to_string()))));
        }
        steps.push(command.to_string());
        steps.join(" && ")
    }

    fn admin(&self, args: &[&str], timeout: Duration) -> Result<CommandOutput> {
        let spec = CommandSpec::new("wsl.exe")
            .args(args.iter().copied())
            .timeout(Some(timeout));
        Ok(self.runner.run(&spec)?.check("wsl.exe")?)
    }

    pub fn distributions(&self) -> Result<Vec<Distribution>> {
        let output = self.admin(&["--list", "--verbose"], ADMIN_TIMEOUT)?;
        Ok(parse_distributions(&output.stdout))
    }

    /// The configured distro, else the one WSL marks as default.
    pub fn default_distribution(&self) -> Result<Option<String>> {
        if let Some(ref distro) = self.distribution {
            return Ok(Some(distro.clone()));
        }
        Ok(self
            .distributions()?
            .into_iter()
            .find(|d| d.is_default)
            .map(|d| d.name))
    }

    pub fn set_default_distribution(&self, name: &str) -> Result<()> {
        self.admin(&["--setdefault", name], ADMIN_TIMEOUT)?;
        info!(distro = name, "set default WSL distribution");
        Ok(())
    }

    /// Run a PowerShell command on the Windows side through WSL interop.
    pub fn execute_powershell(&self, command: &str, opts: &ExecOptions) -> Result<CommandOutput> {
        let script = format!("powershell.exe -NoProfile -Command {}", sh_quote(command));
        self.execute(&script, opts)
    }

    /// `%USERPROFILE%` of the Windows user, as a `/mnt/...` path.
    pub fn windows_home(&self) -> Result<String> {
        let output = self.execute(
            "cmd.exe /c 'echo %USERPROFILE%' 2>/dev/null",
            &ExecOptions::default(),
        )?;
        let profile = output.stdout.trim();
        if output.success() && is_windows_path(profile) {
            return Ok(windows_to_wsl(profile));
        }
        let user = std::env::var("USERNAME").unwrap_or_else(|_| "User".to_string());
        debug!(user = %user, "falling back to default Windows home");
        Ok(format!("/mnt/c/Users/{user}"))
    }

    /// `$HOME` inside the distro.
    pub fn linux_home(&self) -> Result<String> {
        let output = self
            .execute("printenv HOME", &ExecOptions::default())?
            .check("wsl.exe")?;
        Ok(output.stdout.trim().to_string())
    }

    pub fn mount_points(&self) -> Result<BTreeMap<String, String>> {
        let output = self
            .execute("mount", &ExecOptions::default())?
            .check("wsl.exe")?;
        Ok(parse_mounts(&output.stdout))
    }

    pub fn shutdown(&self) -> Result<()> {
        self.admin(&["--shutdown"], ADMIN_TIMEOUT)?;
        info!("WSL shut down");
        Ok(())
    }

    pub fn terminate(&self, distribution: Option<&str>) -> Result<()> {
        let distro = match distribution.or(self.distribution.as_deref()) {
            Some(distro) => distro.to_string(),
            None => self
                .default_distribution()?
                .context("no WSL distribution to terminate")?,
        };
        self.admin(&["--terminate", &distro], ADMIN_TIMEOUT)?;
        info!(distro = %distro, "terminated WSL distribution");
        Ok(())
    }

    pub fn import_distribution(&self, name: &str, install_dir: &str, tarball: &str) -> Result<()> {
        self.admin(&["--import", name, install_dir, tarball], IMPORT_TIMEOUT)?;
        info!(distro = name, install_dir, "imported WSL distribution");
        Ok(())
    }

    pub fn export_distribution(&self, name: &str, file: &str) -> Result<()> {
        self.admin(&["--export", name, file], IMPORT_TIMEOUT)?;
        info!(distro = name, file, "exported WSL distribution");
        Ok(())
    }

    pub fn convert_path_to_wsl(&self, windows_path: &str) -> String {
        windows_to_wsl(windows_path)
    }

    pub fn convert_path_to_windows(&self, wsl_path: &str) -> String {
        wsl_to_windows(wsl_path, self.distribution.as_deref())
    }

    /// Reject an empty distro name early with a readable error.
    pub fn require_name(name: &str) -> Result<&str, WtError> {
        if name.trim().is_empty() {
            Err(WtError::invalid("distribution", name, "name is empty"))
        } else {
            Ok(name.trim())
        }
    }
}

impl ShellAdapter for WslAdapter {
    fn shell_type(&self) -> ShellType {
        ShellType::Wsl
    }

    fn executable(&self) -> &str {
        "wsl.exe"
    }

    fn version(&self) -> Option<String> {
        self.version
            .get_or_init(|| {
                query_version(self.runner.as_ref(), "wsl.exe", &["--version"]).or_else(|| {
                    // Inbox WSL has no --version; a working --list still means it is usable.
                    query_version(self.runner.as_ref(), "wsl.exe", &["--list", "--quiet"])
                        .map(|_| "inbox".to_string())
                })
            })
            .clone()
    }

    fn default_args(&self) -> Vec<String> {
        self.target_args()
    }

    fn execute(&self, command: &str, opts: &ExecOptions) -> Result<CommandOutput> {
        let script = self.build_script(command, opts);
        debug!(distro = ?self.distribution, script = %script, "executing in WSL");
        let spec = CommandSpec::new("wsl.exe")
            .args(self.target_args())
            .args(["bash", "-c"])
            .arg(script)
            .timeout(opts.timeout);
        self.runner.run(&spec)
    }

    fn start_session(&self, opts: &ExecOptions) -> Result<String> {
        let mut spec = CommandSpec::new("wsl.exe").args(self.target_args());
        if let Some(ref cwd) = opts.cwd {
            spec = spec.args(["--cd".to_string(), to_linux(&cwd.display().to_string())]);
        }
        let id = self.sessions.start(&spec.arg("bash"))?;
        for (key, value) in &opts.env {
            let line = format!("{}{}", self.set_env_command(key, value), self.line_ending());
            self.sessions.write(&id, &line)?;
        }
        Ok(id)
    }

    fn end_session(&self, session_id: &str) -> Result<bool> {
        self.sessions.end(session_id)
    }

    fn send_input(&self, session_id: &str, text: &str) -> Result<()> {
        self.sessions.write(session_id, text)
    }

    fn change_directory_command(&self, path: &str) -> String {
        format!("cd {}", sh_quote(&to_linux(path)))
    }

    fn set_env_command(&self, key: &str, value: &str) -> String {
        format!("export {key}={}", sh_quote(&to_linux(value)))
    }

    fn env_command(&self, key: &str) -> String {
        format!("printenv {key}")
    }

    fn prompt_command(&self) -> String {
        "echo \"${PS1:-\\$ }\"".to_string()
    }

    fn resize_command(&self, rows: u16, cols: u16) -> Option<String> {
        Some(format!("stty rows {rows} cols {cols}"))
    }

    fn line_ending(&self) -> &'static str {
        "\n"
    }
}
