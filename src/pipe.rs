//! JSON named-pipe client for the Windows Terminal command API.
//!
//! Requests and responses are single JSON objects terminated by a newline.
//! A request names its `action` in camelCase; a response always carries
//! `success` and, on failure, `error`. Everything else in a response is
//! action-specific payload.

use std::io::{BufRead, BufReader, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::config::TerminalConfig;
use crate::error::WtError;
use crate::wt::Direction;

/// Overrides `terminal.pipe_name`.
pub const PIPE_ENV: &str = "WT2_PIPE";

/// Connection threads per client. A terminal that stops answering pins at
/// most this many threads; later requests queue and time out.
pub const PIPE_WORKERS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FullscreenState {
    On,
    Off,
    Toggle,
}

impl std::str::FromStr for FullscreenState {
    type Err = WtError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "on" | "true" => Ok(FullscreenState::On),
            "off" | "false" => Ok(FullscreenState::Off),
            "toggle" => Ok(FullscreenState::Toggle),
            _ => Err(WtError::invalid("state", s, "expected on, off or toggle")),
        }
    }
}

/// Every action the pipe understands.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum PipeRequest {
    GetInfo,
    GetState,
    ListProfiles,
    ListWindows,
    GetActiveWindow,
    NewWindow {
        #[serde(skip_serializing_if = "Option::is_none")]
        profile: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        commandline: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        starting_directory: Option<String>,
    },
    CloseWindow {
        #[serde(skip_serializing_if = "Option::is_none")]
        window_id: Option<String>,
    },
    FocusWindow {
        window_id: String,
    },
    MoveWindow {
        #[serde(skip_serializing_if = "Option::is_none")]
        window_id: Option<String>,
        x: i32,
        y: i32,
    },
    ResizeWindow {
        #[serde(skip_serializing_if = "Option::is_none")]
        window_id: Option<String>,
        width: u32,
        height: u32,
    },
    SetFullscreen {
        #[serde(skip_serializing_if = "Option::is_none")]
        window_id: Option<String>,
        state: FullscreenState,
    },
    NewTab {
        #[serde(skip_serializing_if = "Option::is_none")]
        window_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        profile: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        commandline: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        starting_directory: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },
    CloseTab {
        tab_id: String,
    },
    RenameTab {
        #[serde(skip_serializing_if = "Option::is_none")]
        tab_id: Option<String>,
        title: String,
    },
    MoveTab {
        tab_id: String,
        index: u32,
    },
    ClosePane {
        #[serde(skip_serializing_if = "Option::is_none")]
        pane_id: Option<String>,
    },
    ResizePane {
        #[serde(skip_serializing_if = "Option::is_none")]
        pane_id: Option<String>,
        direction: Direction,
        amount: u32,
    },
    TogglePaneZoom {
        #[serde(skip_serializing_if = "Option::is_none")]
        pane_id: Option<String>,
    },
    SwapPane {
        #[serde(skip_serializing_if = "Option::is_none")]
        pane_id: Option<String>,
        direction: Direction,
    },
    SendInput {
        #[serde(skip_serializing_if = "Option::is_none")]
        pane_id: Option<String>,
        input: String,
    },
    SetTitle {
        #[serde(skip_serializing_if = "Option::is_none")]
        pane_id: Option<String>,
        title: String,
    },
    GetOutput {
        #[serde(skip_serializing_if = "Option::is_none")]
        pane_id: Option<String>,
        lines: usize,
    },
    RestartPane {
        #[serde(skip_serializing_if = "Option::is_none")]
        pane_id: Option<String>,
    },
}

impl PipeRequest {
    pub fn to_line(&self) -> Result<String> {
        let mut line = serde_json::to_string(self).context("failed to encode pipe request")?;
        line.push('\n');
        Ok(line)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipeResponse {
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl PipeResponse {
    /// Payload of a successful response; `success: false` is `WT010`.
    pub fn into_data(self, action: &str) -> Result<Map<String, Value>, WtError> {
        if self.success {
            Ok(self.data)
        } else {
            Err(WtError::CommandFailed {
                program: format!("pipe action {action}"),
                status: None,
                stderr: self.error.unwrap_or_else(|| "unknown error".to_string()),
            })
        }
    }
}

/// Ids arrive as strings or numbers depending on the terminal build.
fn id_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

fn opt_id_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    })
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaneInfo {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub profile: Option<String>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub active: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabInfo {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub title: String,
    #[serde(default, deserialize_with = "opt_id_string")]
    pub window_id: Option<String>,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub panes: Vec<PaneInfo>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowInfo {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub x: Option<i32>,
    #[serde(default)]
    pub y: Option<i32>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

/// Snapshot returned by `getState`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TerminalState {
    #[serde(default)]
    pub windows: Vec<WindowInfo>,
    #[serde(default)]
    pub tabs: Vec<TabInfo>,
}

impl TerminalState {
    pub fn panes(&self) -> impl Iterator<Item = (&TabInfo, &PaneInfo)> {
        self.tabs
            .iter()
            .flat_map(|tab| tab.panes.iter().map(move |pane| (tab, pane)))
    }

    pub fn find_pane(&self, id: &str) -> Option<(&TabInfo, &PaneInfo)> {
        self.panes().find(|(_, pane)| pane.id == id)
    }

    /// A tab by id, or by index when `key` is numeric and no id matches.
    pub fn find_tab(&self, key: &str) -> Option<&TabInfo> {
        self.tabs.iter().find(|tab| tab.id == key).or_else(|| {
            key.parse::<u32>()
                .ok()
                .and_then(|index| self.tabs.iter().find(|tab| tab.index == index))
        })
    }

    pub fn active_tab(&self) -> Option<&TabInfo> {
        self.tabs.iter().find(|tab| tab.active)
    }

    pub fn active_pane(&self) -> Option<&PaneInfo> {
        self.panes().find(|(tab, pane)| tab.active && pane.active).map(|(_, pane)| pane)
    }

    pub fn pane_ids(&self) -> Vec<String> {
        self.panes().map(|(_, pane)| pane.id.clone()).collect()
    }
}

/// A connected read/write pipe stream.
pub trait PipeStream: Read + Write + Send {}

impl<T: Read + Write + Send> PipeStream for T {}

/// Opens pipe streams; swapped for an in-memory transport in tests.
pub trait PipeTransport: Send + Sync {
    fn open(&self, name: &str) -> Result<Box<dyn PipeStream>>;
}

/// The OS named pipe.
#[derive(Debug, Default, Clone, Copy)]
pub struct NamedPipeTransport;

#[cfg(windows)]
impl PipeTransport for NamedPipeTransport {
    fn open(&self, name: &str) -> Result<Box<dyn PipeStream>> {
        const ERROR_PIPE_BUSY: i32 = 231;
        let mut attempts = 0;
        loop {
            match std::fs::OpenOptions::new().read(true).write(true).open(name) {
                Ok(file) => return Ok(Box::new(file)),
                Err(err) if err.raw_os_error() == Some(ERROR_PIPE_BUSY) && attempts < 10 => {
                    attempts += 1;
                    thread::sleep(Duration::from_millis(50));
                }
                Err(err) => {
                    return Err(WtError::Connection {
                        pipe: name.to_string(),
                        reason: err.to_string(),
                    }
                    .into());
                }
            }
        }
    }
}

#[cfg(not(windows))]
impl PipeTransport for NamedPipeTransport {
    fn open(&self, name: &str) -> Result<Box<dyn PipeStream>> {
        Err(WtError::JsonApiUnavailable(format!("named pipe {name} requires Windows")).into())
    }
}

/// Sends requests over a [`PipeTransport`], one connection per request.
///
/// Connections are opened and read by a small pool of worker threads owned
/// by the client, so a request that times out leaves no new thread behind.
pub struct PipeClient {
    transport: Arc<dyn PipeTransport>,
    name: String,
    timeout: Duration,
    workers: Mutex<Workers>,
}

struct Job {
    line: String,
    abandoned: Arc<AtomicBool>,
    reply: mpsc::Sender<Result<String>>,
}

struct Workers {
    jobs: mpsc::Sender<Job>,
    queue: Arc<Mutex<mpsc::Receiver<Job>>>,
    spawned: usize,
    idle: Arc<AtomicUsize>,
}

impl Workers {
    fn new() -> Self {
        let (jobs, queue) = mpsc::channel();
        Self {
            jobs,
            queue: Arc::new(Mutex::new(queue)),
            spawned: 0,
            idle: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl PipeClient {
    pub fn new(
        transport: Arc<dyn PipeTransport>,
        name: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            transport,
            name: name.into(),
            timeout,
            workers: Mutex::new(Workers::new()),
        }
    }

    /// Pipe name from `WT2_PIPE` or the config.
    pub fn from_config(transport: Arc<dyn PipeTransport>, config: &TerminalConfig) -> Self {
        let name = std::env::var(PIPE_ENV)
            .ok()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| config.pipe_name.clone());
        Self::new(transport, name, config.timeout())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Round-trip one request and return the response payload.
    pub fn request(&self, request: &PipeRequest) -> Result<Map<String, Value>> {
        self.request_within(request, self.timeout)
    }

    /// [`request`](Self::request) with its own deadline.
    pub fn request_within(
        &self,
        request: &PipeRequest,
        timeout: Duration,
    ) -> Result<Map<String, Value>> {
        let line = request.to_line()?;
        let action = action_name(&line);
        debug!(pipe = %self.name, action = %action, "pipe request");

        let (tx, rx) = mpsc::channel();
        let abandoned = Arc::new(AtomicBool::new(false));
        self.submit(Job {
            line,
            abandoned: Arc::clone(&abandoned),
            reply: tx,
        })?;
        let reply = match rx.recv_timeout(timeout) {
            Ok(reply) => reply?,
            Err(_) => {
                abandoned.store(true, Ordering::SeqCst);
                warn!(pipe = %self.name, action = %action, "pipe request timed out");
                return Err(WtError::Timeout {
                    operation: format!("pipe action {action}"),
                    seconds: timeout.as_secs_f64(),
                }
                .into());
            }
        };

        let response: PipeResponse = serde_json::from_str(reply.trim())
            .with_context(|| format!("invalid response from {}: {}", self.name, reply.trim()))?;
        debug!(action = %action, success = response.success, "pipe response");
        Ok(response.into_data(&action)?)
    }

    /// Hand a job to an idle worker, starting one while under the limit.
    fn submit(&self, job: Job) -> Result<()> {
        let mut workers = self
            .workers
            .lock()
            .map_err(|_| anyhow::anyhow!("pipe worker pool poisoned"))?;
        let reserved = workers
            .idle
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if !reserved && workers.spawned < PIPE_WORKERS {
            workers.spawned += 1;
            let transport = Arc::clone(&self.transport);
            let name = self.name.clone();
            let queue = Arc::clone(&workers.queue);
            let idle = Arc::clone(&workers.idle);
            thread::Builder::new()
                .name(format!("wt2-pipe-{}", workers.spawned))
                .spawn(move || serve(transport.as_ref(), &name, &queue, &idle))
                .context("failed to start pipe worker")?;
        } else if !reserved {
            debug!(pipe = %self.name, "all pipe workers busy; request queued");
        }
        workers
            .jobs
            .send(job)
            .map_err(|_| anyhow::anyhow!("pipe workers have stopped"))
    }

    /// Decode one field of the response payload.
    pub fn request_field<T: DeserializeOwned>(
        &self,
        request: &PipeRequest,
        field: &str,
    ) -> Result<T> {
        let mut data = self.request(request)?;
        let value = data.remove(field).unwrap_or(Value::Null);
        serde_json::from_value(value).with_context(|| format!("response has no usable `{field}`"))
    }

    pub fn state(&self) -> Result<TerminalState> {
        let data = self.request(&PipeRequest::GetState)?;
        serde_json::from_value(Value::Object(data)).context("invalid terminal state")
    }

    pub fn is_available(&self) -> bool {
        match self.request(&PipeRequest::GetInfo) {
            Ok(_) => true,
            Err(err) => {
                debug!(pipe = %self.name, error = %err, "JSON API not available");
                false
            }
        }
    }
}

fn action_name(line: &str) -> String {
    serde_json::from_str::<Value>(line)
        .ok()
        .and_then(|v| v.get("action").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Worker loop: runs until the client, and with it the job sender, is dropped.
fn serve(
    transport: &dyn PipeTransport,
    name: &str,
    queue: &Mutex<mpsc::Receiver<Job>>,
    idle: &AtomicUsize,
) {
    loop {
        let job = match queue.lock() {
            Ok(queue) => match queue.recv() {
                Ok(job) => job,
                Err(_) => return,
            },
            Err(_) => return,
        };
        let reply = (!job.abandoned.load(Ordering::SeqCst)).then(|| {
            transport
                .open(name)
                .and_then(|stream| exchange(stream, &job.line, name))
        });
        // Back in the pool before the requester wakes up.
        idle.fetch_add(1, Ordering::SeqCst);
        if let Some(reply) = reply {
            let _ = job.reply.send(reply);
        }
    }
}

fn exchange(mut stream: Box<dyn PipeStream>, line: &str, pipe: &str) -> Result<String> {
    stream
        .write_all(line.as_bytes())
        .and_then(|_| stream.flush())
        .context("failed to write pipe request")?;
    let mut reader = BufReader::new(stream);
    let mut reply = String::new();
    reader
        .read_line(&mut reply)
        .context("failed to read pipe response")?;
    if reply.trim().is_empty() {
        anyhow::bail!(WtError::Connection {
            pipe: pipe.to_string(),
            reason: "pipe closed without a response".to_string(),
        });
    }
    Ok(reply)
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory pipe that answers by action name.

    use super::*;
    use std::collections::HashMap;
    use std::io::Cursor;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Inner {
        responses: Mutex<HashMap<String, Value>>,
        requests: Mutex<Vec<Value>>,
        offline: bool,
    }

    #[derive(Clone, Default)]
    pub struct ScriptedPipe {
        inner: Arc<Inner>,
    }

    impl ScriptedPipe {
        pub fn new() -> Self {
            Self::default()
        }

        /// A pipe that nobody listens on.
        pub fn offline() -> Self {
            Self {
                inner: Arc::new(Inner {
                    offline: true,
                    ..Inner::default()
                }),
            }
        }

        /// Reply to `action` with `response`; unscripted actions succeed.
        pub fn respond(self, action: &str, response: Value) -> Self {
            self.inner
                .responses
                .lock()
                .unwrap()
                .insert(action.to_string(), response);
            self
        }

        pub fn requests(&self) -> Vec<Value> {
            self.inner.requests.lock().unwrap().clone()
        }

        pub fn actions(&self) -> Vec<String> {
            self.requests()
                .iter()
                .map(|r| r["action"].as_str().unwrap_or_default().to_string())
                .collect()
        }

        pub fn client(&self) -> PipeClient {
            PipeClient::new(Arc::new(self.clone()), "test-pipe", Duration::from_secs(2))
        }
    }

    impl PipeTransport for ScriptedPipe {
        fn open(&self, name: &str) -> Result<Box<dyn PipeStream>> {
            if self.inner.offline {
                return Err(WtError::Connection {
                    pipe: name.to_string(),
                    reason: "not found".to_string(),
                }
                .into());
            }
            Ok(Box::new(MemoryStream {
                written: Vec::new(),
                reply: None,
                inner: Arc::clone(&self.inner),
            }))
        }
    }

    struct MemoryStream {
        written: Vec<u8>,
        reply: Option<Cursor<Vec<u8>>>,
        inner: Arc<Inner>,
    }

    impl Write for MemoryStream {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Read for MemoryStream {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.reply.is_none() {
                let request: Value = serde_json::from_slice(self.written.trim_ascii())
                    .map_err(std::io::Error::other)?;
                let action = request["action"].as_str().unwrap_or_default().to_string();
                self.inner.requests.lock().unwrap().push(request);
                let response = self
                    .inner
                    .responses
                    .lock()
                    .unwrap()
                    .get(&action)
                    .cloned()
                    .unwrap_or_else(|| serde_json::json!({"success": true}));
                self.reply = Some(Cursor::new(format!("{response}\n").into_bytes()));
            }
            match self.reply.as_mut() {
                Some(reply) => reply.read(buf),
                None => Ok(0),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedPipe;
    use super::*;
    use serde_json::json;

    #[test]
    fn requests_serialize_with_camel_case_action_and_fields() {
        let req = PipeRequest::SendInput {
            pane_id: Some("3".into()),
            input: "dir\r".into(),
        };
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({"action": "sendInput", "paneId": "3", "input": "dir\r"})
        );
        assert_eq!(
            serde_json::to_value(PipeRequest::GetState).unwrap(),
            json!({"action": "getState"})
        );
        let req = PipeRequest::NewTab {
            window_id: None,
            profile: Some("Ubuntu".into()),
            commandline: None,
            starting_directory: Some("/home".into()),
            title: None,
        };
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({"action": "newTab", "profile": "Ubuntu", "startingDirectory": "/home"})
        );
        let line = PipeRequest::ResizePane {
            pane_id: None,
            direction: Direction::Left,
            amount: 5,
        }
        .to_line()
        .unwrap();
        assert!(line.ends_with("}\n"));
        assert!(line.contains("\"direction\":\"left\""));
    }

    #[test]
    fn failed_response_is_command_failed() {
        let pipe =
            ScriptedPipe::new().respond("closeTab", json!({"success": false, "error": "no tab 9"}));
        let err = pipe
            .client()
            .request(&PipeRequest::CloseTab { tab_id: "9".into() })
            .unwrap_err();
        let wt = err.downcast_ref::<WtError>().unwrap();
        assert_eq!(wt.code(), "WT010");
        assert!(wt.to_string().contains("no tab 9"));
    }

    #[test]
    fn state_decodes_numeric_ids() {
        let pipe = ScriptedPipe::new().respond(
            "getState",
            json!({
                "success": true,
                "windows": [{"id": 1, "title": "main", "active": true}],
                "tabs": [
                    {"id": 10, "index": 0, "title": "pwsh", "windowId": 1, "active": true,
                     "panes": [{"id": 100, "active": true, "cwd": "C:\\src"}, {"id": "101"}]},
                    {"id": "11", "index": 1, "title": "wsl", "panes": [{"id": 110}]}
                ]
            }),
        );
        let state = pipe.client().state().unwrap();
        assert_eq!(state.windows[0].id, "1");
        assert_eq!(state.tabs[0].window_id.as_deref(), Some("1"));
        assert_eq!(state.pane_ids(), vec!["100", "101", "110"]);
        assert_eq!(state.active_pane().unwrap().cwd.as_deref(), Some("C:\\src"));
        assert_eq!(state.find_tab("1").unwrap().id, "11");
        assert_eq!(state.find_tab("10").unwrap().title, "pwsh");
        assert_eq!(state.find_pane("110").unwrap().0.id, "11");
        assert!(state.find_pane("999").is_none());
    }

    #[test]
    fn request_field_extracts_payload() {
        let pipe = ScriptedPipe::new().respond(
            "getOutput",
            json!({"success": true, "lines": ["a", "b"]}),
        );
        let lines: Vec<String> = pipe
            .client()
            .request_field(&PipeRequest::GetOutput { pane_id: None, lines: 2 }, "lines")
            .unwrap();
        assert_eq!(lines, vec!["a", "b"]);
        assert_eq!(pipe.requests()[0], json!({"action": "getOutput", "lines": 2}));
    }

    #[test]
    fn offline_pipe_is_unavailable() {
        let pipe = ScriptedPipe::offline();
        assert!(!pipe.client().is_available());
        let err = pipe.client().request(&PipeRequest::GetInfo).unwrap_err();
        assert_eq!(err.downcast_ref::<WtError>().unwrap().code(), "WT001");
    }

    #[cfg(not(windows))]
    #[test]
    fn named_pipe_requires_windows() {
        let err = NamedPipeTransport.open(r"\\.\pipe\WindowsTerminal").err().unwrap();
        assert_eq!(err.downcast_ref::<WtError>().unwrap().code(), "WT002");
    }

    /// Streams that swallow the request and never answer until released.
    #[derive(Clone, Default)]
    struct SilentPipe {
        opened: Arc<AtomicUsize>,
        release: Arc<(Mutex<bool>, std::sync::Condvar)>,
    }

    impl SilentPipe {
        fn release(&self) {
            let (lock, cvar) = &*self.release;
            *lock.lock().unwrap() = true;
            cvar.notify_all();
        }
    }

    impl PipeTransport for SilentPipe {
        fn open(&self, _name: &str) -> Result<Box<dyn PipeStream>> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(self.clone()))
        }
    }

    impl Write for SilentPipe {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Read for SilentPipe {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            let (lock, cvar) = &*self.release;
            let mut released = lock.lock().unwrap();
            while !*released {
                released = cvar.wait(released).unwrap();
            }
            Ok(0)
        }
    }

    #[test]
    fn hung_terminal_pins_a_bounded_number_of_threads() {
        let pipe = SilentPipe::default();
        let client = PipeClient::new(
            Arc::new(pipe.clone()),
            r"\\.\pipe\wt2-hung",
            Duration::from_millis(30),
        );
        for _ in 0..PIPE_WORKERS + 4 {
            let err = client.request(&PipeRequest::GetInfo).unwrap_err();
            assert_eq!(err.downcast_ref::<WtError>().unwrap().code(), "WT060");
        }
        let opened = pipe.opened.load(Ordering::SeqCst);
        assert!((1..=PIPE_WORKERS).contains(&opened), "{opened} connections");
        assert!(client.workers.lock().unwrap().spawned <= PIPE_WORKERS);
        pipe.release();
    }

    #[test]
    fn closed_pipe_error_names_the_configured_pipe() {
        let pipe = SilentPipe::default();
        pipe.release();
        let client =
            PipeClient::new(Arc::new(pipe), r"\\.\pipe\wt2-custom", Duration::from_secs(2));
        let err = client.request(&PipeRequest::GetInfo).unwrap_err();
        let wt = err.downcast_ref::<WtError>().unwrap();
        assert_eq!(wt.code(), "WT001");
        assert!(wt.to_string().contains(r"\\.\pipe\wt2-custom"), "{wt}");
    }

    #[test]
    fn idle_workers_are_reused() {
        let pipe = ScriptedPipe::new();
        let client = pipe.client();
        for _ in 0..5 {
            client.request(&PipeRequest::GetInfo).unwrap();
        }
        assert_eq!(client.workers.lock().unwrap().spawned, 1);
        assert_eq!(pipe.actions().len(), 5);
    }

    #[test]
    fn fullscreen_state_parses() {
        assert_eq!("ON".parse::<FullscreenState>().unwrap(), FullscreenState::On);
        assert!("maybe".parse::<FullscreenState>().is_err());
    }
}
