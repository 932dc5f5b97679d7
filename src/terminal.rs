//! Windows Terminal facade.
//!
//! Routes each operation to `wt.exe` when it has a matching subcommand and
//! to the JSON pipe otherwise. When the pipe cannot be reached, pipe-only
//! operations fail with `WT011` instead of a connection error, so callers
//! see which operation needs the JSON API.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::config::Config;
use crate::error::WtError;
use crate::exec::CommandRunner;
use crate::pipe::{
    FullscreenState, PaneInfo, PipeClient, PipeRequest, PipeTransport, TabInfo, TerminalState,
    WindowInfo,
};
use crate::wt::{Direction, PaneLaunch, SplitDirection, TabTarget, WindowLaunch, WtAction, WtCli};

/// Clears the visible screen and the scrollback, then homes the cursor.
pub const CLEAR_SEQUENCE: &str = "\x1b[2J\x1b[3J\x1b[H";

/// A Windows Terminal profile as listed by the pipe or `settings.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileSummary {
    pub name: String,
    #[serde(default)]
    pub guid: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub hidden: bool,
}

pub struct Terminal {
    wt: WtCli,
    pipe: Option<PipeClient>,
    dry_run: bool,
}

impl Terminal {
    /// `pipe` is `None` when the JSON API is disabled in the config.
    pub fn new(wt: WtCli, pipe: Option<PipeClient>, dry_run: bool) -> Self {
        Self { wt, pipe, dry_run }
    }

    pub fn from_config(
        runner: Arc<dyn CommandRunner>,
        transport: Arc<dyn PipeTransport>,
        config: &Config,
    ) -> Self {
        let dry_run = runner.is_dry_run();
        let wt = WtCli::new(runner, &config.terminal);
        let pipe = config
            .terminal
            .json_api
            .then(|| PipeClient::from_config(transport, &config.terminal));
        Self::new(wt, pipe, dry_run)
    }

    pub fn wt(&self) -> &WtCli {
        &self.wt
    }

    fn run_wt(&self, launch: &WindowLaunch, actions: &[WtAction]) -> Result<()> {
        self.wt.run(launch, actions)
    }

    /// Send a pipe request on behalf of `operation`.
    fn via_pipe(&self, operation: &str, request: &PipeRequest) -> Result<Map<String, Value>> {
        self.via_pipe_within(operation, request, None)
    }

    fn via_pipe_within(
        &self,
        operation: &str,
        request: &PipeRequest,
        timeout: Option<Duration>,
    ) -> Result<Map<String, Value>> {
        if self.dry_run {
            println!("pipe {}", request.to_line()?.trim_end());
            return Ok(Map::new());
        }
        let Some(ref pipe) = self.pipe else {
            return Err(WtError::unsupported(
                operation,
                "while terminal.json_api is disabled",
            )
            .into());
        };
        let timeout = timeout.unwrap_or_else(|| pipe.timeout());
        pipe.request_within(request, timeout).map_err(|err| {
            let offline = matches!(
                err.downcast_ref::<WtError>(),
                Some(WtError::Connection { .. } | WtError::JsonApiUnavailable(_))
            );
            if offline {
                debug!(operation, error = %err, "pipe unavailable");
                err.context(WtError::unsupported(
                    operation,
                    "without the Windows Terminal JSON API",
                ))
            } else {
                err
            }
        })
    }

    fn field<T: for<'de> Deserialize<'de> + Default>(
        data: &mut Map<String, Value>,
        name: &str,
    ) -> Result<T> {
        match data.remove(name) {
            Some(value) => serde_json::from_value(value)
                .with_context(|| format!("invalid `{name}` in response")),
            None => Ok(T::default()),
        }
    }

    // Windows

    pub fn new_window(&self, launch: &PaneLaunch, window: &WindowLaunch) -> Result<()> {
        let mut window = window.clone();
        if window.window.is_none() {
            window.window = Some("new".to_string());
        }
        self.run_wt(&window, &[WtAction::NewTab(launch.clone())])?;
        info!(profile = ?launch.profile, "opened new window");
        Ok(())
    }

    pub fn close_window(&self, window_id: Option<&str>) -> Result<()> {
        self.via_pipe(
            "close-window",
            &PipeRequest::CloseWindow {
                window_id: window_id.map(str::to_string),
            },
        )?;
        Ok(())
    }

    pub fn focus_window(&self, window_id: &str) -> Result<()> {
        self.via_pipe(
            "focus-window",
            &PipeRequest::FocusWindow {
                window_id: window_id.to_string(),
            },
        )?;
        Ok(())
    }

    pub fn list_windows(&self) -> Result<Vec<WindowInfo>> {
        let mut data = self.via_pipe("list-windows", &PipeRequest::ListWindows)?;
        Self::field(&mut data, "windows")
    }

    pub fn move_window(&self, window_id: Option<&str>, x: i32, y: i32) -> Result<()> {
        self.via_pipe(
            "move-window",
            &PipeRequest::MoveWindow {
                window_id: window_id.map(str::to_string),
                x,
                y,
            },
        )?;
        Ok(())
    }

    pub fn resize_window(&self, window_id: Option<&str>, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            return Err(WtError::invalid(
                "size",
                format!("{width}x{height}"),
                "width and height must be positive",
            )
            .into());
        }
        self.via_pipe(
            "resize-window",
            &PipeRequest::ResizeWindow {
                window_id: window_id.map(str::to_string),
                width,
                height,
            },
        )?;
        Ok(())
    }

    pub fn set_fullscreen(&self, window_id: Option<&str>, state: FullscreenState) -> Result<()> {
        self.via_pipe(
            "fullscreen",
            &PipeRequest::SetFullscreen {
                window_id: window_id.map(str::to_string),
                state,
            },
        )?;
        Ok(())
    }

    // Tabs

    pub fn new_tab(&self, launch: &PaneLaunch, window: Option<&str>) -> Result<()> {
        let target = WindowLaunch::window(window.unwrap_or("0"));
        self.run_wt(&target, &[WtAction::NewTab(launch.clone())])?;
        info!(profile = ?launch.profile, title = ?launch.title, "opened new tab");
        Ok(())
    }

    pub fn close_tab(&self, tab_id: &str) -> Result<()> {
        self.via_pipe(
            "close-tab",
            &PipeRequest::CloseTab {
                tab_id: tab_id.to_string(),
            },
        )?;
        Ok(())
    }

    /// Focus a tab by id, or by index when the JSON API is not available.
    pub fn focus_tab(&self, key: &str) -> Result<()> {
        let index = match self.state() {
            Ok(state) if !self.dry_run => state
                .find_tab(key)
                .map(|tab| tab.index)
                .ok_or_else(|| WtError::TabNotFound(key.to_string()))?,
            _ => key
                .parse::<u32>()
                .map_err(|_| {
                    WtError::unsupported("focus-tab by id", "without the Windows Terminal JSON API")
                })?,
        };
        self.select_tab(index)
    }

    pub fn select_tab(&self, index: u32) -> Result<()> {
        self.run_wt(&WindowLaunch::current(), &[WtAction::FocusTab(TabTarget::Index(index))])
    }

    pub fn next_tab(&self) -> Result<()> {
        self.run_wt(&WindowLaunch::current(), &[WtAction::FocusTab(TabTarget::Next)])
    }

    pub fn prev_tab(&self) -> Result<()> {
        self.run_wt(&WindowLaunch::current(), &[WtAction::FocusTab(TabTarget::Previous)])
    }

    pub fn list_tabs(&self) -> Result<Vec<TabInfo>> {
        Ok(self.state()?.tabs)
    }

    pub fn rename_tab(&self, tab_id: Option<&str>, title: &str) -> Result<()> {
        self.via_pipe(
            "rename-tab",
            &PipeRequest::RenameTab {
                tab_id: tab_id.map(str::to_string),
                title: title.to_string(),
            },
        )?;
        Ok(())
    }

    pub fn move_tab(&self, tab_id: &str, index: u32) -> Result<()> {
        self.via_pipe(
            "move-tab",
            &PipeRequest::MoveTab {
                tab_id: tab_id.to_string(),
                index,
            },
        )?;
        Ok(())
    }

    // Panes

    pub fn split_pane(
        &self,
        direction: SplitDirection,
        size: Option<f64>,
        launch: &PaneLaunch,
    ) -> Result<()> {
        let action = WtAction::split(direction, size, launch.clone())?;
        self.run_wt(&WindowLaunch::current(), &[action])?;
        info!(direction = ?direction, size = ?size, "split pane");
        Ok(())
    }

    pub fn close_pane(&self, pane_id: Option<&str>) -> Result<()> {
        self.via_pipe(
            "close-pane",
            &PipeRequest::ClosePane {
                pane_id: pane_id.map(str::to_string),
            },
        )?;
        Ok(())
    }

    pub fn focus_pane(&self, direction: Direction) -> Result<()> {
        self.run_wt(&WindowLaunch::current(), &[WtAction::MoveFocus(direction)])
    }

    pub fn focus_pane_id(&self, index: u32) -> Result<()> {
        self.run_wt(&WindowLaunch::current(), &[WtAction::FocusPane(index)])
    }

    pub fn resize_pane(
        &self,
        pane_id: Option<&str>,
        direction: Direction,
        amount: u32,
    ) -> Result<()> {
        if !direction.is_cardinal() {
            return Err(WtError::invalid(
                "direction",
                direction.as_str(),
                "resize takes up, down, left or right",
            )
            .into());
        }
        if amount == 0 {
            return Err(WtError::invalid("amount", "0", "must be at least 1").into());
        }
        self.via_pipe(
            "resize-pane",
            &PipeRequest::ResizePane {
                pane_id: pane_id.map(str::to_string),
                direction,
                amount,
            },
        )?;
        Ok(())
    }

    pub fn toggle_zoom(&self, pane_id: Option<&str>) -> Result<()> {
        self.via_pipe(
            "zoom",
            &PipeRequest::TogglePaneZoom {
                pane_id: pane_id.map(str::to_string),
            },
        )?;
        Ok(())
    }

    pub fn swap_pane(&self, direction: Direction) -> Result<()> {
        self.run_wt(&WindowLaunch::current(), &[WtAction::SwapPane(direction)])
    }

    /// Panes of one tab, or of every tab when `tab` is `None`.
    pub fn list_panes(&self, tab: Option<&str>) -> Result<Vec<PaneInfo>> {
        let state = self.state()?;
        match tab {
            Some(key) => state
                .find_tab(key)
                .map(|tab| tab.panes.clone())
                .ok_or_else(|| WtError::TabNotFound(key.to_string()).into()),
            None => Ok(state.panes().map(|(_, pane)| pane.clone()).collect()),
        }
    }

    /// Four equal panes in the current tab, in one `wt.exe` call.
    pub fn split_grid_2x2(&self, launch: &PaneLaunch) -> Result<()> {
        let actions = [
            WtAction::split(SplitDirection::Vertical, Some(0.5), launch.clone())?,
            WtAction::split(SplitDirection::Horizontal, Some(0.5), launch.clone())?,
            WtAction::MoveFocus(Direction::Left),
            WtAction::split(SplitDirection::Horizontal, Some(0.5), launch.clone())?,
        ];
        self.run_wt(&WindowLaunch::current(), &actions)?;
        info!("created 2x2 pane grid");
        Ok(())
    }

    // Session I/O

    pub fn send_text(&self, pane_id: Option<&str>, text: &str) -> Result<()> {
        self.send_input(pane_id, text, None)
    }

    fn send_input(
        &self,
        pane_id: Option<&str>,
        text: &str,
        timeout: Option<Duration>,
    ) -> Result<()> {
        self.via_pipe_within(
            "send-input",
            &PipeRequest::SendInput {
                pane_id: pane_id.map(str::to_string),
                input: text.to_string(),
            },
            timeout,
        )?;
        debug!(pane = ?pane_id, bytes = text.len(), "sent input");
        Ok(())
    }

    /// Type `command` and press Enter.
    pub fn run_command(&self, pane_id: Option<&str>, command: &str) -> Result<()> {
        self.send_text(pane_id, &format!("{command}\r"))
    }

    /// [`run_command`](Self::run_command) with its own pipe deadline.
    pub fn run_command_within(
        &self,
        pane_id: Option<&str>,
        command: &str,
        timeout: Duration,
    ) -> Result<()> {
        self.send_input(pane_id, &format!("{command}\r"), Some(timeout))
    }

    pub fn clear_screen(&self, pane_id: Option<&str>) -> Result<()> {
        self.send_text(pane_id, CLEAR_SEQUENCE)
    }

    pub fn set_title(&self, pane_id: Option<&str>, title: &str) -> Result<()> {
        self.via_pipe(
            "set-title",
            &PipeRequest::SetTitle {
                pane_id: pane_id.map(str::to_string),
                title: title.to_string(),
            },
        )?;
        Ok(())
    }

    /// The last `lines` lines of a pane's buffer.
    pub fn read_output(&self, pane_id: Option<&str>, lines: usize) -> Result<Vec<String>> {
        let mut data = self.via_pipe(
            "read-output",
            &PipeRequest::GetOutput {
                pane_id: pane_id.map(str::to_string),
                lines,
            },
        )?;
        let mut out: Vec<String> = match data.remove("output") {
            Some(Value::String(text)) => text.lines().map(str::to_string).collect(),
            _ => Self::field(&mut data, "lines")?,
        };
        if out.len() > lines {
            out.drain(..out.len() - lines);
        }
        Ok(out)
    }

    pub fn restart_pane(&self, pane_id: Option<&str>) -> Result<()> {
        self.via_pipe(
            "restart-pane",
            &PipeRequest::RestartPane {
                pane_id: pane_id.map(str::to_string),
            },
        )?;
        Ok(())
    }

    // Utility

    pub fn state(&self) -> Result<TerminalState> {
        let data = self.via_pipe("state", &PipeRequest::GetState)?;
        serde_json::from_value(Value::Object(data)).context("invalid terminal state")
    }

    pub fn version(&self) -> Result<String> {
        self.wt.version()
    }

    /// Profiles from the pipe, else from `settings.json`.
    pub fn list_profiles(&self) -> Result<Vec<ProfileSummary>> {
        match self.via_pipe("list-profiles", &PipeRequest::ListProfiles) {
            Ok(mut data) => Self::field(&mut data, "profiles"),
            Err(err) => {
                debug!(error = %err, "falling back to settings.json for profiles");
                let settings = crate::platform::load_wt_settings()
                    .ok_or(err)
                    .context("no Windows Terminal settings.json found")?;
                Ok(crate::platform::settings_profiles(&settings))
            }
        }
    }

    pub fn json_api_available(&self) -> bool {
        self.pipe.as_ref().is_some_and(PipeClient::is_available)
    }

    pub fn is_available(&self) -> bool {
        self.wt.is_available() || self.json_api_available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::CommandOutput;
    use crate::exec::testing::ScriptedRunner;
    use crate::pipe::testing::ScriptedPipe;
    use serde_json::json;
    use std::time::Duration;

    fn terminal(runner: &Arc<ScriptedRunner>, pipe: &ScriptedPipe) -> Terminal {
        Terminal::new(
            WtCli::with_path(runner.clone(), "wt.exe", Duration::from_secs(5)),
            Some(pipe.client()),
            false,
        )
    }

    fn two_tab_state() -> Value {
        json!({
            "success": true,
            "tabs": [
                {"id": "t1", "index": 0, "title": "pwsh", "active": true,
                 "panes": [{"id": "p1", "active": true}, {"id": "p2"}]},
                {"id": "t2", "index": 1, "title": "wsl", "panes": [{"id": "p3"}]}
            ]
        })
    }

    #[test]
    fn tabs_and_splits_go_through_wt_exe() {
        let runner = Arc::new(ScriptedRunner::new());
        let pipe = ScriptedPipe::new();
        let term = terminal(&runner, &pipe);
        term.new_tab(&PaneLaunch::profile("Ubuntu"), None).unwrap();
        term.split_pane(SplitDirection::Horizontal, Some(0.4), &PaneLaunch::default())
            .unwrap();
        term.next_tab().unwrap();
        term.focus_pane(Direction::Up).unwrap();
        term.swap_pane(Direction::Left).unwrap();
        assert_eq!(
            runner.lines(),
            vec![
                "wt.exe -w 0 new-tab --profile Ubuntu",
                "wt.exe -w 0 split-pane -H --size 0.4",
                "wt.exe -w 0 focus-tab --next",
                "wt.exe -w 0 move-focus up",
                "wt.exe -w 0 swap-pane left",
            ]
        );
        assert!(pipe.requests().is_empty());
    }

    #[test]
    fn new_window_targets_a_new_window() {
        let runner = Arc::new(ScriptedRunner::new());
        let term = terminal(&runner, &ScriptedPipe::new());
        term.new_window(
            &PaneLaunch::default(),
            &WindowLaunch {
                maximized: true,
                ..WindowLaunch::default()
            },
        )
        .unwrap();
        assert_eq!(runner.lines(), vec!["wt.exe -w new --maximized new-tab"]);
    }

    #[test]
    fn io_goes_through_the_pipe() {
        let runner = Arc::new(ScriptedRunner::new());
        let pipe = ScriptedPipe::new();
        let term = terminal(&runner, &pipe);
        term.run_command(Some("p2"), "git status").unwrap();
        term.clear_screen(None).unwrap();
        let requests = pipe.requests();
        assert_eq!(
            requests[0],
            json!({"action": "sendInput", "paneId": "p2", "input": "git status\r"})
        );
        assert_eq!(requests[1]["input"], CLEAR_SEQUENCE);
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn focus_tab_resolves_id_to_index() {
        let runner = Arc::new(ScriptedRunner::new());
        let pipe = ScriptedPipe::new().respond("getState", two_tab_state());
        let term = terminal(&runner, &pipe);
        term.focus_tab("t2").unwrap();
        assert_eq!(runner.lines(), vec!["wt.exe -w 0 focus-tab -t 1"]);
        let err = term.focus_tab("nope").unwrap_err();
        assert_eq!(err.downcast_ref::<WtError>().unwrap().code(), "WT051");
    }

    #[test]
    fn focus_tab_falls_back_to_index_without_pipe() {
        let runner = Arc::new(ScriptedRunner::new());
        let term = terminal(&runner, &ScriptedPipe::offline());
        term.focus_tab("3").unwrap();
        assert_eq!(runner.lines(), vec!["wt.exe -w 0 focus-tab -t 3"]);
        assert!(term.focus_tab("abc").is_err());
    }

    #[test]
    fn offline_pipe_reports_unsupported() {
        let runner = Arc::new(ScriptedRunner::new());
        let term = terminal(&runner, &ScriptedPipe::offline());
        let err = term.rename_tab(None, "logs").unwrap_err();
        assert_eq!(crate::error::exit_code_for(&err), crate::error::EXIT_FAILED);
        assert!(err.to_string().starts_with("[WT011] rename-tab"));
        assert!(crate::error::suggestion_for(&err).unwrap().contains("enableJsonApi"));
        assert!(!term.json_api_available());
    }

    #[test]
    fn disabled_json_api_reports_unsupported() {
        let runner = Arc::new(ScriptedRunner::new());
        let term = Terminal::new(
            WtCli::with_path(runner, "wt.exe", Duration::from_secs(5)),
            None,
            false,
        );
        let err = term.toggle_zoom(None).unwrap_err();
        assert_eq!(err.downcast_ref::<WtError>().unwrap().code(), "WT011");
    }

    #[test]
    fn list_panes_filters_by_tab() {
        let pipe = ScriptedPipe::new().respond("getState", two_tab_state());
        let term = terminal(&Arc::new(ScriptedRunner::new()), &pipe);
        let all: Vec<String> = term.list_panes(None).unwrap().into_iter().map(|p| p.id).collect();
        assert_eq!(all, vec!["p1", "p2", "p3"]);
        let second = term.list_panes(Some("1")).unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(term.list_tabs().unwrap().len(), 2);
        assert!(term.list_panes(Some("t9")).is_err());
    }

    #[test]
    fn read_output_accepts_text_or_lines() {
        let pipe = ScriptedPipe::new().respond(
            "getOutput",
            json!({"success": true, "output": "one\ntwo\nthree\n"}),
        );
        let term = terminal(&Arc::new(ScriptedRunner::new()), &pipe);
        assert_eq!(term.read_output(None, 2).unwrap(), vec!["two", "three"]);

        let pipe =
            ScriptedPipe::new().respond("getOutput", json!({"success": true, "lines": ["x"]}));
        let term = terminal(&Arc::new(ScriptedRunner::new()), &pipe);
        assert_eq!(term.read_output(Some("p1"), 10).unwrap(), vec!["x"]);
    }

    #[test]
    fn grid_is_one_wt_invocation() {
        let runner = Arc::new(ScriptedRunner::new());
        terminal(&runner, &ScriptedPipe::new())
            .split_grid_2x2(&PaneLaunch::default())
            .unwrap();
        assert_eq!(
            runner.lines(),
            vec![
                [
                    "wt.exe -w 0 split-pane -V --size 0.5",
                    "split-pane -H --size 0.5",
                    "move-focus left",
                    "split-pane -H --size 0.5",
                ]
                .join(" ; ")
            ]
        );
    }

    #[test]
    fn resize_validates_direction_and_amount() {
        let pipe = ScriptedPipe::new();
        let term = terminal(&Arc::new(ScriptedRunner::new()), &pipe);
        assert!(term.resize_pane(None, Direction::First, 5).is_err());
        assert!(term.resize_pane(None, Direction::Up, 0).is_err());
        term.resize_pane(Some("p1"), Direction::Right, 3).unwrap();
        assert_eq!(pipe.requests()[0]["direction"], "right");
        assert!(term.resize_window(None, 0, 10).is_err());
    }

    #[test]
    fn version_and_profiles() {
        let runner = Arc::new(
            ScriptedRunner::new().respond("--version", CommandOutput::ok("1.21.2361.0\n")),
        );
        let pipe = ScriptedPipe::new().respond(
            "listProfiles",
            json!({"success": true, "profiles": [{"name": "PowerShell", "guid": "{abc}"}]}),
        );
        let term = terminal(&runner, &pipe);
        assert_eq!(term.version().unwrap(), "1.21.2361.0");
        let profiles = term.list_profiles().unwrap();
        assert_eq!(profiles[0].name, "PowerShell");
        assert!(term.is_available());
    }

    #[test]
    fn dry_run_prints_pipe_requests_instead_of_sending() {
        let pipe = ScriptedPipe::offline();
        let term = Terminal::new(
            WtCli::with_path(Arc::new(ScriptedRunner::new()), "wt.exe", Duration::from_secs(5)),
            Some(pipe.client()),
            true,
        );
        term.close_pane(Some("p1")).unwrap();
        assert!(term.state().unwrap().tabs.is_empty());
    }
}
