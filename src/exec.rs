//! Subprocess execution.
//!
//! Every external program (`wt.exe`, the shells, `wsl.exe`) is launched
//! through a [`CommandRunner`]. The system runner enforces timeouts and
//! decodes output; the dry-run runner records command lines instead of
//! executing them.

use std::fmt;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::Mutex;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::error::WtError;

const WAIT_POLL: Duration = Duration::from_millis(20);

/// A fully described program invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub timeout: Option<Duration>,
    /// Appended to the command line verbatim, after `args`. `cmd.exe` parses
    /// its own command line and does not understand `\"` escapes.
    pub raw_tail: Option<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            timeout: None,
            raw_tail: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, cwd: Option<PathBuf>) -> Self {
        self.cwd = cwd;
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn raw_tail(mut self, tail: impl Into<String>) -> Self {
        self.raw_tail = Some(tail.into());
        self
    }

    fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(ref tail) = self.raw_tail {
            append_raw(&mut cmd, tail);
        }
        if let Some(ref cwd) = self.cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        hide_console_window(&mut cmd);
        cmd
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", quote_arg(&self.program))?;
        for arg in &self.args {
            write!(f, " {}", quote_arg(arg))?;
        }
        if let Some(ref tail) = self.raw_tail {
            write!(f, " {tail}")?;
        }
        Ok(())
    }
}

/// Quote an argument for display when it contains whitespace or quotes.
pub fn quote_arg(arg: &str) -> String {
    if arg.is_empty() {
        return "\"\"".to_string();
    }
    if arg.chars().any(|c| c.is_whitespace() || c == '"') {
        format!("\"{}\"", arg.replace('"', "\\\""))
    } else {
        arg.to_string()
    }
}

#[cfg(windows)]
fn append_raw(cmd: &mut Command, tail: &str) {
    use std::os::windows::process::CommandExt;
    cmd.raw_arg(tail);
}

#[cfg(not(windows))]
fn append_raw(cmd: &mut Command, tail: &str) {
    cmd.arg(tail);
}

#[cfg(windows)]
fn hide_console_window(cmd: &mut Command) {
    use std::os::windows::process::CommandExt;
    const CREATE_NO_WINDOW: u32 = 0x0800_0000;
    cmd.creation_flags(CREATE_NO_WINDOW);
}

#[cfg(not(windows))]
fn hide_console_window(_cmd: &mut Command) {}

/// Captured result of a finished program.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            status: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(status: i32, stderr: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Turn a non-zero exit into a `WT010` error.
    pub fn check(self, program: &str) -> Result<Self, WtError> {
        if self.success() {
            Ok(self)
        } else {
            Err(WtError::CommandFailed {
                program: program.to_string(),
                status: self.status,
                stderr: if self.stderr.trim().is_empty() {
                    self.stdout
                } else {
                    self.stderr
                },
            })
        }
    }
}

/// A long-running child with writable stdin.
pub trait ProcessHandle: Send {
    fn id(&self) -> u32;
    fn write_input(&mut self, text: &str) -> Result<()>;
    /// `Some(code)` once the process has exited.
    fn try_wait(&mut self) -> Result<Option<i32>>;
    fn kill(&mut self) -> Result<()>;
}

/// Launches programs on behalf of the adapters.
pub trait CommandRunner: Send + Sync {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;

    fn spawn(&self, spec: &CommandSpec) -> Result<Box<dyn ProcessHandle>>;

    fn is_dry_run(&self) -> bool {
        false
    }
}

/// Runs programs with `std::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        debug!(command = %spec, timeout = ?spec.timeout, "running command");
        let mut cmd = spec.to_command();
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = start(&mut cmd, spec)?;
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let status = match spec.timeout {
            Some(limit) => wait_with_deadline(&mut child, limit, spec)?,
            None => child
                .wait()
                .with_context(|| format!("failed to wait for {}", spec.program))?
                .code(),
        };

        let output = CommandOutput {
            status,
            stdout: decode_output(&collect(stdout)),
            stderr: decode_output(&collect(stderr)),
        };
        debug!(
            program = %spec.program,
            status = ?output.status,
            stdout_len = output.stdout.len(),
            "command finished"
        );
        Ok(output)
    }

    fn spawn(&self, spec: &CommandSpec) -> Result<Box<dyn ProcessHandle>> {
        debug!(command = %spec, "spawning interactive process");
        let mut cmd = spec.to_command();
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        let mut child = start(&mut cmd, spec)?;
        let stdin = child.stdin.take();
        Ok(Box::new(SystemProcess { child, stdin }))
    }
}

fn start(cmd: &mut Command, spec: &CommandSpec) -> Result<Child> {
    match cmd.spawn() {
        Ok(child) => Ok(child),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            Err(WtError::ShellNotFound(spec.program.clone()).into())
        }
        Err(err) => Err(err).with_context(|| format!("failed to start {}", spec.program)),
    }
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Err(err) = pipe.read_to_end(&mut buf) {
            warn!(error = %err, "failed to read child output");
        }
        buf
    })
}

fn collect(handle: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}

fn wait_with_deadline(
    child: &mut Child,
    limit: Duration,
    spec: &CommandSpec,
) -> Result<Option<i32>> {
    let deadline = Instant::now() + limit;
    loop {
        if let Some(status) = child
            .try_wait()
            .with_context(|| format!("failed to poll {}", spec.program))?
        {
            return Ok(status.code());
        }
        if Instant::now() >= deadline {
            warn!(program = %spec.program, timeout = ?limit, "command timed out; killing");
            let _ = child.kill();
            let _ = child.wait();
            return Err(WtError::Timeout {
                operation: spec.to_string(),
                seconds: limit.as_secs_f64(),
            }
            .into());
        }
        thread::sleep(WAIT_POLL);
    }
}

struct SystemProcess {
    child: Child,
    stdin: Option<ChildStdin>,
}

impl ProcessHandle for SystemProcess {
    fn id(&self) -> u32 {
        self.child.id()
    }

    fn write_input(&mut self, text: &str) -> Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .context("process stdin is closed")?;
        stdin
            .write_all(text.as_bytes())
            .and_then(|_| stdin.flush())
            .with_context(|| format!("failed to write to process {}", self.child.id()))
    }

    fn try_wait(&mut self) -> Result<Option<i32>> {
        Ok(self.child.try_wait()?.map(|status| status.code().unwrap_or(-1)))
    }

    fn kill(&mut self) -> Result<()> {
        self.stdin.take();
        if self.child.try_wait()?.is_none() {
            self.child
                .kill()
                .with_context(|| format!("failed to kill process {}", self.child.id()))?;
        }
        let _ = self.child.wait();
        Ok(())
    }
}

/// Decode captured bytes as UTF-8, or as UTF-16LE when the bytes look like
/// `wsl.exe` output (BOM or interleaved NULs).
pub fn decode_output(bytes: &[u8]) -> String {
    if bytes.starts_with(&[0xFF, 0xFE]) {
        return decode_utf16le(&bytes[2..]);
    }
    if bytes.len() >= 2 && bytes.len() % 2 == 0 {
        let odd_nuls = bytes.iter().skip(1).step_by(2).filter(|b| **b == 0).count();
        if odd_nuls * 2 >= bytes.len() / 2 {
            return decode_utf16le(bytes);
        }
    }
    String::from_utf8_lossy(bytes).into_owned()
}

fn decode_utf16le(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

/// Records command lines instead of running them (`--dry-run`).
#[derive(Debug, Default)]
pub struct DryRunRunner {
    echo: bool,
    recorded: Mutex<Vec<CommandSpec>>,
}

impl DryRunRunner {
    /// A runner that also prints each command line to stdout.
    pub fn echoing() -> Self {
        Self {
            echo: true,
            recorded: Mutex::new(Vec::new()),
        }
    }

    pub fn recorded(&self) -> Vec<CommandSpec> {
        self.recorded
            .lock()
            .map(|specs| specs.clone())
            .unwrap_or_default()
    }

    fn record(&self, spec: &CommandSpec) {
        if self.echo {
            println!("{spec}");
        }
        if let Ok(mut specs) = self.recorded.lock() {
            specs.push(spec.clone());
        }
    }
}

impl CommandRunner for DryRunRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        self.record(spec);
        Ok(CommandOutput::ok(""))
    }

    fn spawn(&self, spec: &CommandSpec) -> Result<Box<dyn ProcessHandle>> {
        self.record(spec);
        Ok(Box::new(DetachedProcess))
    }

    fn is_dry_run(&self) -> bool {
        true
    }
}

struct DetachedProcess;

impl ProcessHandle for DetachedProcess {
    fn id(&self) -> u32 {
        0
    }

    fn write_input(&mut self, _text: &str) -> Result<()> {
        Ok(())
    }

    fn try_wait(&mut self) -> Result<Option<i32>> {
        Ok(None)
    }

    fn kill(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted runner for unit tests.

    use super::*;
    use std::sync::Arc;

    #[derive(Default)]
    pub struct ScriptedRunner {
        responses: Mutex<Vec<(String, CommandOutput)>>,
        missing: Mutex<Vec<String>>,
        calls: Mutex<Vec<CommandSpec>>,
        pub input: Arc<Mutex<String>>,
        pub killed: Arc<Mutex<Vec<u32>>>,
    }

    impl ScriptedRunner {
        pub fn new() -> Self {
            Self::default()
        }

        /// Reply with `output` to any command line containing `needle`.
        pub fn respond(self, needle: &str, output: CommandOutput) -> Self {
            self.responses
                .lock()
                .unwrap()
                .push((needle.to_string(), output));
            self
        }

        pub fn missing_program(self, program: &str) -> Self {
            self.missing.lock().unwrap().push(program.to_string());
            self
        }

        pub fn calls(&self) -> Vec<CommandSpec> {
            self.calls.lock().unwrap().clone()
        }

        pub fn lines(&self) -> Vec<String> {
            self.calls().iter().map(ToString::to_string).collect()
        }

        pub fn input(&self) -> String {
            self.input.lock().unwrap().clone()
        }
    }

    impl CommandRunner for ScriptedRunner {
        fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
            self.calls.lock().unwrap().push(spec.clone());
            if self.missing.lock().unwrap().contains(&spec.program) {
                return Err(WtError::ShellNotFound(spec.program.clone()).into());
            }
            let line = spec.to_string();
            let responses = self.responses.lock().unwrap();
            Ok(responses
                .iter()
                .find(|(needle, _)| line.contains(needle.as_str()))
                .map(|(_, output)| output.clone())
                .unwrap_or_else(|| CommandOutput::ok("")))
        }

        fn spawn(&self, spec: &CommandSpec) -> Result<Box<dyn ProcessHandle>> {
            let mut calls = self.calls.lock().unwrap();
            calls.push(spec.clone());
            Ok(Box::new(FakeProcess {
                id: 1000 + calls.len() as u32,
                input: Arc::clone(&self.input),
                killed: Arc::clone(&self.killed),
                exited: false,
            }))
        }
    }

    struct FakeProcess {
        id: u32,
        input: Arc<Mutex<String>>,
        killed: Arc<Mutex<Vec<u32>>>,
        exited: bool,
    }

    impl ProcessHandle for FakeProcess {
        fn id(&self) -> u32 {
            self.id
        }

        fn write_input(&mut self, text: &str) -> Result<()> {
            anyhow::ensure!(!self.exited, "process {} has exited", self.id);
            self.input.lock().unwrap().push_str(text);
            Ok(())
        }

        fn try_wait(&mut self) -> Result<Option<i32>> {
            Ok(self.exited.then_some(0))
        }

        fn kill(&mut self) -> Result<()> {
            self.exited = true;
            self.killed.lock().unwrap().push(self.id);
            Ok(())
        }
    }
}
