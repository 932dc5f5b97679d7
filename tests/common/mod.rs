//! In-memory runner and pipe for driving `wt2` commands end to end.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{Cursor, Read, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Result, bail};
use clap::Parser;
use serde_json::{Value, json};

use winterm2::cli::{Cli, GlobalArgs};
use winterm2::commands::{self, Context};
use winterm2::config::{Config, SearchRoots};
use winterm2::exec::{CommandOutput, CommandRunner, CommandSpec, ProcessHandle};
use winterm2::pipe::{PipeStream, PipeTransport};

/// Records command lines and answers every one with empty success.
#[derive(Default)]
pub struct RecordingRunner {
    lines: Mutex<Vec<String>>,
}

impl RecordingRunner {
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }
}

impl CommandRunner for RecordingRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        self.lines.lock().unwrap().push(spec.to_string());
        Ok(CommandOutput::ok(""))
    }

    fn spawn(&self, spec: &CommandSpec) -> Result<Box<dyn ProcessHandle>> {
        bail!("unexpected spawn of {spec}")
    }
}

#[derive(Default)]
struct Shared {
    responses: HashMap<String, Value>,
    requests: Mutex<Vec<Value>>,
}

/// A pipe that replies by action name; unknown actions succeed.
#[derive(Clone, Default)]
pub struct FakePipe {
    shared: Arc<Shared>,
}

impl FakePipe {
    pub fn with(responses: &[(&str, Value)]) -> Self {
        Self {
            shared: Arc::new(Shared {
                responses: responses
                    .iter()
                    .map(|(action, value)| (action.to_string(), value.clone()))
                    .collect(),
                requests: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn requests(&self) -> Vec<Value> {
        self.shared.requests.lock().unwrap().clone()
    }

    pub fn actions(&self) -> Vec<String> {
        self.requests()
            .iter()
            .filter_map(|r| r["action"].as_str().map(str::to_string))
            .collect()
    }
}

impl PipeTransport for FakePipe {
    fn open(&self, _name: &str) -> Result<Box<dyn PipeStream>> {
        Ok(Box::new(Connection {
            shared: Arc::clone(&self.shared),
            written: Vec::new(),
            reply: None,
        }))
    }
}

struct Connection {
    shared: Arc<Shared>,
    written: Vec<u8>,
    reply: Option<Cursor<Vec<u8>>>,
}

impl Write for Connection {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Read for Connection {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.reply.is_none() {
            let request: Value = serde_json::from_slice(&self.written).unwrap_or(Value::Null);
            let action = request["action"].as_str().unwrap_or_default().to_string();
            self.shared.requests.lock().unwrap().push(request);
            let response = self
                .shared
                .responses
                .get(&action)
                .cloned()
                .unwrap_or_else(|| json!({"success": true}));
            self.reply = Some(Cursor::new(format!("{response}\n").into_bytes()));
        }
        match self.reply {
            Some(ref mut reply) => reply.read(buf),
            None => Ok(0),
        }
    }
}

pub struct Harness {
    pub runner: Arc<RecordingRunner>,
    pub pipe: FakePipe,
    pub dir: tempfile::TempDir,
}

impl Harness {
    pub fn new(pipe: FakePipe) -> Self {
        Self {
            runner: Arc::new(RecordingRunner::default()),
            pipe,
            dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn context(&self, global: GlobalArgs) -> Context {
        let mut config = Config::default();
        config.terminal.wt_path = Some("wt.exe".to_string());
        config.general.confirmation_prompt = false;
        self.context_with(config, global)
    }

    pub fn context_with(&self, config: Config, global: GlobalArgs) -> Context {
        Context::new(
            config,
            None,
            roots(self.dir.path()),
            self.dir.path().join("state"),
            self.runner.clone(),
            Arc::new(self.pipe.clone()),
            global,
        )
    }

    /// Parse `args` as a `wt2` command line and run it.
    pub fn wt2(&self, args: &[&str]) -> Result<u8> {
        let cli = Cli::try_parse_from(std::iter::once("wt2").chain(args.iter().copied()))?;
        let ctx = self.context(cli.global.clone());
        commands::run(&ctx, cli.command)
    }
}

pub fn roots(dir: &Path) -> SearchRoots {
    SearchRoots {
        cwd: Some(dir.join("cwd")),
        home: Some(dir.join("home")),
        appdata: None,
    }
}
