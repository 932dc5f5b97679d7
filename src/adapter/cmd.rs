//! Command Prompt (`cmd.exe`).
//!
//! One-shot commands run through `cmd.exe /Q /C "<command>"`, passed as a
//! raw command-line tail: cmd strips the outer quotes itself and never sees
//! `\"` escapes. File helpers wrap the built-in `dir`, `copy`, `move`, `ren`,
//! `del`, `mkdir` and `rmdir`.

use std::path::Path;
use std::sync::{Arc, LazyLock, OnceLock};

use anyhow::Result;
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use super::{ExecOptions, ProcessSessions, ShellAdapter, ShellType, query_version};
use crate::error::WtError;
use crate::exec::{CommandOutput, CommandRunner, CommandSpec};

static DIR_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"^\s*(\S+)\s+(\d{1,2}:\d{2}(?:\s*[AaPp][Mm])?)\s+",
        r"(<DIR>|<JUNCTION>|<SYMLINKD?>|[\d,.\u{a0}\u{202f}]+)\s+(.+?)\s*$",
    ))
    .expect("valid dir listing regex")
});
static DRIVE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z]:$").expect("valid drive regex"));

/// One row of a `dir` listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: Option<u64>,
    pub modified: String,
}

pub struct CmdAdapter {
    runner: Arc<dyn CommandRunner>,
    sessions: ProcessSessions,
    version: OnceLock<Option<String>>,
}

/// Double-quote a path for cmd; cmd has no escape for embedded quotes.
pub fn cmd_quote(value: &str) -> Result<String, WtError> {
    if value.contains('"') {
        return Err(WtError::invalid("path", value, "cmd.exe paths cannot contain quotes"));
    }
    Ok(format!("\"{value}\""))
}

/// `cmd.exe /Q /C "<command>"` with the command line left unescaped.
pub fn one_shot(command: &str) -> CommandSpec {
    CommandSpec::new("cmd.exe")
        .args(["/Q", "/C"])
        .raw_tail(format!("\"{command}\""))
}

/// Parse the entries of `dir` output, skipping `.`/`..`, headers and totals.
pub fn parse_dir_listing(output: &str) -> Vec<DirEntry> {
    output
        .lines()
        .filter_map(|line| DIR_LINE_RE.captures(line))
        .filter_map(|caps| {
            let name = caps[4].to_string();
            if name == "." || name == ".." {
                return None;
            }
            let kind = &caps[3];
            let is_dir = kind.starts_with('<');
            let size = if is_dir {
                None
            } else {
                kind.chars()
                    .filter(char::is_ascii_digit)
                    .collect::<String>()
                    .parse()
                    .ok()
            };
            Some(DirEntry {
                name,
                is_dir,
                size,
                modified: format!("{} {}", &caps[1], &caps[2]),
            })
        })
        .collect()
}

/// Drive letters from `wmic logicaldisk get name`.
pub fn parse_drive_list(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| DRIVE_RE.is_match(line))
        .map(|line| line.to_ascii_uppercase())
        .collect()
}

impl CmdAdapter {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            sessions: ProcessSessions::new(Arc::clone(&runner)),
            runner,
            version: OnceLock::new(),
        }
    }

    fn run_checked(&self, command: &str) -> Result<CommandOutput> {
        Ok(self
            .execute(command, &ExecOptions::default())?
            .check("cmd.exe")?)
    }

    /// `call "script.bat" args...`
    pub fn run_batch_file(
        &self,
        script: &Path,
        args: &[String],
        opts: &ExecOptions,
    ) -> Result<CommandOutput> {
        if !script.is_file() {
            return Err(WtError::invalid(
                "batch file",
                script.display().to_string(),
                "file not found",
            )
            .into());
        }
        let mut command = format!("call {}", cmd_quote(&script.display().to_string())?);
        for arg in args {
            command.push(' ');
            command.push_str(arg);
        }
        self.execute(&command, opts)
    }

    pub fn drive_list(&self) -> Result<Vec<String>> {
        let output = self.run_checked("wmic logicaldisk get name")?;
        Ok(parse_drive_list(&output.stdout))
    }

    pub fn directory_contents(&self, path: &str, show_hidden: bool) -> Result<Vec<DirEntry>> {
        let attrs = if show_hidden { "/A " } else { "" };
        let command = format!("dir {attrs}/-C {}", cmd_quote(path)?);
        let output = self.run_checked(&command)?;
        Ok(parse_dir_listing(&output.stdout))
    }

    pub fn create_directory(&self, path: &str) -> Result<()> {
        self.run_checked(&format!("mkdir {}", cmd_quote(path)?))?;
        Ok(())
    }

    pub fn delete_file(&self, path: &str, force: bool) -> Result<()> {
        let flag = if force { "/F " } else { "" };
        self.run_checked(&format!("del /Q {flag}{}", cmd_quote(path)?))?;
        Ok(())
    }

    pub fn delete_directory(&self, path: &str, recursive: bool) -> Result<()> {
        let flag = if recursive { "/S /Q " } else { "" };
        self.run_checked(&format!("rmdir {flag}{}", cmd_quote(path)?))?;
        Ok(())
    }

    pub fn copy_file(&self, source: &str, destination: &str, overwrite: bool) -> Result<()> {
        let flag = if overwrite { "/Y " } else { "/-Y " };
        self.run_checked(&format!(
            "copy {flag}{} {}",
            cmd_quote(source)?,
            cmd_quote(destination)?
        ))?;
        Ok(())
    }

    pub fn move_file(&self, source: &str, destination: &str) -> Result<()> {
        self.run_checked(&format!(
            "move /Y {} {}",
            cmd_quote(source)?,
            cmd_quote(destination)?
        ))?;
        Ok(())
    }

    /// `ren` only takes a bare new name, never a path.
    pub fn rename(&self, path: &str, new_name: &str) -> Result<()> {
        if new_name.contains(['\\', '/', ':']) {
            return Err(WtError::invalid("new name", new_name, "must not contain a path").into());
        }
        self.run_checked(&format!("ren {} {}", cmd_quote(path)?, cmd_quote(new_name)?))?;
        Ok(())
    }
}

impl ShellAdapter for CmdAdapter {
    fn shell_type(&self) -> ShellType {
        ShellType::Cmd
    }

    fn executable(&self) -> &str {
        "cmd.exe"
    }

    fn version(&self) -> Option<String> {
        self.version
            .get_or_init(|| query_version(self.runner.as_ref(), "cmd.exe", &["/Q", "/C", "ver"]))
            .clone()
    }

    fn default_args(&self) -> Vec<String> {
        vec!["/Q".to_string()]
    }

    fn execute(&self, command: &str, opts: &ExecOptions) -> Result<CommandOutput> {
        debug!(command, "executing in cmd.exe");
        self.runner.run(&opts.apply(one_shot(command)))
    }

    fn start_session(&self, opts: &ExecOptions) -> Result<String> {
        let spec = CommandSpec::new("cmd.exe").arg("/Q");
        self.sessions.start(&opts.apply(spec))
    }

    fn end_session(&self, session_id: &str) -> Result<bool> {
        self.sessions.end(session_id)
    }

    fn send_input(&self, session_id: &str, text: &str) -> Result<()> {
        self.sessions.write(session_id, text)
    }

    fn change_directory_command(&self, path: &str) -> String {
        format!("cd /d \"{}\"", path.replace('"', ""))
    }

    fn set_env_command(&self, key: &str, value: &str) -> String {
        format!("set \"{key}={value}\"")
    }

    fn env_command(&self, key: &str) -> String {
        format!("if defined {key} (echo %{key}%)")
    }

    fn prompt_command(&self) -> String {
        "echo %PROMPT%".to_string()
    }

    fn resize_command(&self, rows: u16, cols: u16) -> Option<String> {
        Some(format!("mode con: cols={cols} lines={rows}"))
    }
}
