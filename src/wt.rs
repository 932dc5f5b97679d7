//! `wt.exe` command-line builder.
//!
//! Windows Terminal accepts a list of subcommands separated by a standalone
//! `;`. Each [`WtAction`] renders to the argv of one subcommand and
//! [`build_argv`] joins them after the window launch options.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info};

use crate::config::TerminalConfig;
use crate::error::WtError;
use crate::exec::{CommandRunner, CommandSpec};

pub const WT_EXE: &str = "wt.exe";

/// Split orientation. `Horizontal` stacks the new pane below (`-H`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitDirection {
    Horizontal,
    #[default]
    Vertical,
    Auto,
}

impl SplitDirection {
    fn flag(self) -> Option<&'static str> {
        match self {
            SplitDirection::Horizontal => Some("-H"),
            SplitDirection::Vertical => Some("-V"),
            SplitDirection::Auto => None,
        }
    }
}

impl FromStr for SplitDirection {
    type Err = WtError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "horizontal" | "h" | "down" => Ok(SplitDirection::Horizontal),
            "vertical" | "v" | "right" => Ok(SplitDirection::Vertical),
            "auto" => Ok(SplitDirection::Auto),
            _ => Err(WtError::invalid(
                "direction",
                s,
                "expected horizontal, vertical or auto",
            )),
        }
    }
}

/// Direction for `move-focus`, `swap-pane` and pane resizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
    Previous,
    NextInOrder,
    PreviousInOrder,
    First,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Left => "left",
            Direction::Right => "right",
            Direction::Previous => "previous",
            Direction::NextInOrder => "nextInOrder",
            Direction::PreviousInOrder => "previousInOrder",
            Direction::First => "first",
        }
    }

    /// Only the four cardinal directions make sense for resizing.
    pub fn is_cardinal(self) -> bool {
        matches!(
            self,
            Direction::Up | Direction::Down | Direction::Left | Direction::Right
        )
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = WtError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "up" | "u" => Ok(Direction::Up),
            "down" | "d" => Ok(Direction::Down),
            "left" | "l" => Ok(Direction::Left),
            "right" | "r" => Ok(Direction::Right),
            "previous" | "prev" => Ok(Direction::Previous),
            "next" | "nextinorder" => Ok(Direction::NextInOrder),
            "previousinorder" => Ok(Direction::PreviousInOrder),
            "first" => Ok(Direction::First),
            _ => Err(WtError::invalid(
                "direction",
                s,
                "expected up, down, left, right, previous, next or first",
            )),
        }
    }
}

/// Options shared by `new-tab` and `split-pane`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PaneLaunch {
    pub profile: Option<String>,
    pub title: Option<String>,
    pub starting_directory: Option<String>,
    pub tab_color: Option<String>,
    /// Command line run instead of the profile's default.
    pub commandline: Option<String>,
}

impl PaneLaunch {
    pub fn profile(name: impl Into<String>) -> Self {
        Self {
            profile: Some(name.into()),
            ..Self::default()
        }
    }

    fn push_args(&self, args: &mut Vec<String>) {
        if let Some(ref profile) = self.profile {
            args.extend(["--profile".to_string(), profile.clone()]);
        }
        if let Some(ref dir) = self.starting_directory {
            args.extend(["--startingDirectory".to_string(), dir.clone()]);
        }
        if let Some(ref title) = self.title {
            args.extend(["--title".to_string(), title.clone()]);
        }
        if let Some(ref color) = self.tab_color {
            args.extend(["--tabColor".to_string(), color.clone()]);
        }
        if let Some(ref commandline) = self.commandline {
            args.push(escape_semicolons(commandline));
        }
    }
}

/// Which tab `focus-tab` selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabTarget {
    Index(u32),
    Next,
    Previous,
}

/// One `wt.exe` subcommand.
#[derive(Debug, Clone, PartialEq)]
pub enum WtAction {
    NewTab(PaneLaunch),
    SplitPane {
        direction: SplitDirection,
        size: Option<f64>,
        duplicate: bool,
        launch: PaneLaunch,
    },
    FocusTab(TabTarget),
    MoveFocus(Direction),
    FocusPane(u32),
    SwapPane(Direction),
    MovePane(u32),
}

impl WtAction {
    pub fn split(
        direction: SplitDirection,
        size: Option<f64>,
        launch: PaneLaunch,
    ) -> Result<Self, WtError> {
        if let Some(size) = size {
            if !(size > 0.0 && size < 1.0) {
                return Err(WtError::invalid(
                    "size",
                    size.to_string(),
                    "must be between 0 and 1 (exclusive)",
                ));
            }
        }
        Ok(WtAction::SplitPane {
            direction,
            size,
            duplicate: false,
            launch,
        })
    }

    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        match self {
            WtAction::NewTab(launch) => {
                args.push("new-tab".to_string());
                launch.push_args(&mut args);
            }
            WtAction::SplitPane {
                direction,
                size,
                duplicate,
                launch,
            } => {
                args.push("split-pane".to_string());
                if let Some(flag) = direction.flag() {
                    args.push(flag.to_string());
                }
                if let Some(size) = size {
                    args.extend(["--size".to_string(), size.to_string()]);
                }
                if *duplicate {
                    args.push("--duplicate".to_string());
                }
                launch.push_args(&mut args);
            }
            WtAction::FocusTab(target) => {
                args.push("focus-tab".to_string());
                match target {
                    TabTarget::Index(index) => args.extend(["-t".to_string(), index.to_string()]),
                    TabTarget::Next => args.push("--next".to_string()),
                    TabTarget::Previous => args.push("--previous".to_string()),
                }
            }
            WtAction::MoveFocus(direction) => {
                args.extend(["move-focus".to_string(), direction.to_string()]);
            }
            WtAction::FocusPane(index) => {
                args.extend(["focus-pane".to_string(), "-t".to_string(), index.to_string()]);
            }
            WtAction::SwapPane(direction) => {
                args.extend(["swap-pane".to_string(), direction.to_string()]);
            }
            WtAction::MovePane(tab) => {
                args.extend(["move-pane".to_string(), "-t".to_string(), tab.to_string()]);
            }
        }
        args
    }
}

/// Options placed before the first subcommand.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WindowLaunch {
    /// `-w` target: a window id, a name, `0` for the current window or `new`.
    pub window: Option<String>,
    pub maximized: bool,
    pub fullscreen: bool,
    pub focus: bool,
    pub pos: Option<(i32, i32)>,
    pub size: Option<(u32, u32)>,
}

impl WindowLaunch {
    /// Target the window `wt2` was started from.
    pub fn current() -> Self {
        Self::window("0")
    }

    pub fn window(target: impl Into<String>) -> Self {
        Self {
            window: Some(target.into()),
            ..Self::default()
        }
    }

    fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(ref window) = self.window {
            args.extend(["-w".to_string(), window.clone()]);
        }
        if self.maximized {
            args.push("--maximized".to_string());
        }
        if self.fullscreen {
            args.push("--fullscreen".to_string());
        }
        if self.focus {
            args.push("--focus".to_string());
        }
        if let Some((x, y)) = self.pos {
            args.extend(["--pos".to_string(), format!("{x},{y}")]);
        }
        if let Some((cols, rows)) = self.size {
            args.extend(["--size".to_string(), format!("{cols},{rows}")]);
        }
        args
    }
}

/// `;` separates subcommands for wt.exe, so a literal one must be `\;`.
pub fn escape_semicolons(commandline: &str) -> String {
    commandline.replace(';', r"\;")
}

/// Launch options followed by the actions, separated by standalone `;`.
pub fn build_argv(launch: &WindowLaunch, actions: &[WtAction]) -> Vec<String> {
    let mut argv = launch.to_args();
    for (i, action) in actions.iter().enumerate() {
        if i > 0 {
            argv.push(";".to_string());
        }
        argv.extend(action.to_args());
    }
    argv
}

/// Find `wt.exe`: configured path, `PATH`, the WindowsApps alias, then the
/// bare name.
pub fn locate_wt(configured: Option<&str>) -> String {
    if let Some(path) = configured.filter(|p| !p.trim().is_empty()) {
        return path.to_string();
    }
    if let Ok(found) = which::which(WT_EXE) {
        return found.display().to_string();
    }
    let alias = dirs::data_local_dir().map(|dir| {
        dir.join("Microsoft")
            .join("WindowsApps")
            .join(WT_EXE)
    });
    match alias {
        Some(path) if path.exists() => path.display().to_string(),
        _ => WT_EXE.to_string(),
    }
}

/// Runs `wt.exe` through a [`CommandRunner`].
pub struct WtCli {
    runner: Arc<dyn CommandRunner>,
    path: String,
    timeout: Duration,
}

impl WtCli {
    pub fn new(runner: Arc<dyn CommandRunner>, config: &TerminalConfig) -> Self {
        Self::with_path(
            runner,
            locate_wt(config.wt_path.as_deref()),
            config.timeout(),
        )
    }

    pub fn with_path(
        runner: Arc<dyn CommandRunner>,
        path: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            runner,
            path: path.into(),
            timeout,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn spec(&self, launch: &WindowLaunch, actions: &[WtAction]) -> CommandSpec {
        CommandSpec::new(&self.path)
            .args(build_argv(launch, actions))
            .timeout(Some(self.timeout))
    }

    /// Run the actions; a non-zero exit is `WT010`.
    pub fn run(&self, launch: &WindowLaunch, actions: &[WtAction]) -> Result<()> {
        let spec = self.spec(launch, actions);
        debug!(command = %spec, "invoking wt.exe");
        self.runner.run(&spec)?.check(WT_EXE)?;
        info!(actions = actions.len(), window = ?launch.window, "wt.exe actions sent");
        Ok(())
    }

    pub fn version(&self) -> Result<String> {
        let spec = CommandSpec::new(&self.path)
            .arg("--version")
            .timeout(Some(self.timeout));
        let output = self.runner.run(&spec)?.check(WT_EXE)?;
        let text = output.stdout.trim();
        Ok(if text.is_empty() {
            "unknown".to_string()
        } else {
            text.lines().next().unwrap_or(text).trim().to_string()
        })
    }

    pub fn is_available(&self) -> bool {
        PathBuf::from(&self.path).is_file() || self.version().is_ok()
    }
}
