use std::path::PathBuf;
use std::str::FromStr;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::adapter::ShellType;
use crate::error::WtError;
use crate::pipe::FullscreenState;
use crate::session::SessionState;
use crate::wt::{Direction, SplitDirection};

#[derive(Parser, Debug)]
#[command(
    name = "wt2",
    about = "Control Windows Terminal, PowerShell, CMD and WSL from the command line",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[command(flatten)]
    pub global: GlobalArgs,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

/// Flags accepted by every subcommand.
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Shell to use: powershell, pwsh, cmd, wsl or auto
    #[arg(long, global = true)]
    pub shell: Option<ShellSelection>,

    /// Windows Terminal profile for new tabs, panes and windows
    #[arg(short = 'p', long, global = true)]
    pub profile: Option<String>,

    /// Config file (default: search for wt2rc.yaml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Print the commands and pipe requests instead of running them
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Machine-readable output
    #[arg(long, global = true)]
    pub json: bool,
}

/// `--shell` value; `auto` means detect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellSelection {
    Auto,
    Shell(ShellType),
}

impl ShellSelection {
    pub fn explicit(self) -> Option<ShellType> {
        match self {
            ShellSelection::Auto => None,
            ShellSelection::Shell(shell) => Some(shell),
        }
    }
}

impl FromStr for ShellSelection {
    type Err = WtError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("auto") {
            Ok(ShellSelection::Auto)
        } else {
            s.parse().map(ShellSelection::Shell)
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Window management
    #[command(subcommand)]
    Window(WindowCommand),

    /// Tab management
    #[command(subcommand)]
    Tab(TabCommand),

    /// Pane management
    #[command(subcommand)]
    Pane(PaneCommand),

    /// Send input to panes and manage tracked sessions
    #[command(subcommand)]
    Session(SessionCommand),

    /// Send one command to many panes
    #[command(subcommand)]
    Broadcast(BroadcastCommand),

    /// Follow and filter pane output
    #[command(subcommand)]
    Monitor(MonitorCommand),

    /// Show and edit wt2rc.yaml
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Run commands through a shell adapter
    #[command(subcommand)]
    Shell(ShellCommand),

    /// WSL distributions and paths
    #[command(subcommand)]
    Wsl(WslCommand),

    /// Convert paths between Windows and WSL
    #[command(subcommand)]
    Path(PathCommand),

    /// Show or clear the command history
    #[command(subcommand)]
    History(HistoryCommand),

    /// Check Windows, Windows Terminal, the JSON API and installed shells
    Doctor,

    /// Print a shell completion script
    Completions {
        #[arg(value_enum)]
        shell: CompletionShell,
    },

    /// Shortcut for `session send`
    Send {
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
        #[command(flatten)]
        target: PaneTarget,
    },

    /// Shortcut for `session run`
    Run {
        command: String,
        #[command(flatten)]
        target: PaneTarget,
    },

    /// Shortcut for `pane split`
    Split(SplitArgs),

    /// Shortcut for `pane vsplit`
    Vsplit(SplitArgs),

    /// Shortcut for `session clear`
    Clear {
        #[command(flatten)]
        target: PaneTarget,
    },

    /// Shortcut for `session list`
    Ls,

    /// Shortcut for `window new`
    New(NewWindowArgs),

    /// Shortcut for `tab new`
    Newtab(NewTabArgs),
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
    #[value(name = "powershell")]
    PowerShell,
}

/// `--pane-id` or `--session`; neither means the focused pane.
#[derive(Args, Debug, Clone, Default)]
pub struct PaneTarget {
    /// Pane id
    #[arg(long)]
    pub pane_id: Option<String>,

    /// Tracked session (id, id prefix or name)
    #[arg(short, long, conflicts_with = "pane_id")]
    pub session: Option<String>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct NewWindowArgs {
    /// Command to run instead of the profile's shell
    #[arg(short, long)]
    pub command: Option<String>,

    /// Starting directory
    #[arg(short = 'd', long)]
    pub startup_dir: Option<String>,

    #[arg(long)]
    pub maximized: bool,

    #[arg(long)]
    pub fullscreen: bool,

    /// Window position as X,Y
    #[arg(long, value_parser = parse_pair::<i32>, allow_hyphen_values = true)]
    pub pos: Option<(i32, i32)>,

    /// Window size as COLUMNS,ROWS
    #[arg(short, long, value_parser = parse_pair::<u32>)]
    pub size: Option<(u32, u32)>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct NewTabArgs {
    #[arg(short, long)]
    pub title: Option<String>,

    /// Window to open the tab in (default: current)
    #[arg(short, long)]
    pub window_id: Option<String>,

    /// Command to run instead of the profile's shell
    #[arg(short, long)]
    pub command: Option<String>,

    /// Starting directory
    #[arg(short = 'd', long)]
    pub startup_dir: Option<String>,

    /// Tab color, e.g. #009999
    #[arg(long)]
    pub color: Option<String>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct SplitArgs {
    /// Fraction of the current pane the new pane takes (0-1)
    #[arg(short, long)]
    pub size: Option<f64>,

    /// Command to run in the new pane
    #[arg(short, long)]
    pub command: Option<String>,

    /// Starting directory
    #[arg(short = 'd', long)]
    pub startup_dir: Option<String>,

    #[arg(short, long)]
    pub title: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum WindowCommand {
    /// Open a new window
    New(NewWindowArgs),

    /// Close a window (default: current)
    Close {
        window_id: Option<String>,
        #[arg(short, long)]
        force: bool,
    },

    /// Bring a window to the front
    Focus { window_id: String },

    /// List windows
    List,

    /// Move a window to X,Y
    Move {
        #[arg(allow_hyphen_values = true)]
        x: i32,
        #[arg(allow_hyphen_values = true)]
        y: i32,
        window_id: Option<String>,
    },

    /// Resize a window to WIDTH x HEIGHT pixels
    Resize {
        width: u32,
        height: u32,
        window_id: Option<String>,
    },

    /// Switch fullscreen on, off or toggle it
    Fullscreen {
        #[arg(default_value = "toggle")]
        state: FullscreenState,
        #[arg(short, long)]
        window_id: Option<String>,
    },

    /// Save and restore tab/pane arrangements
    #[command(subcommand)]
    Arrange(ArrangeCommand),
}

#[derive(Subcommand, Debug)]
pub enum ArrangeCommand {
    /// Capture the current tabs and panes
    Save { name: String },
    /// Open a saved arrangement in a new window
    Restore { name: String },
    List,
    Delete {
        name: String,
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum TabCommand {
    /// Open a new tab
    New(NewTabArgs),

    /// Close a tab (default: current)
    Close {
        tab_id: Option<String>,
        #[arg(short, long)]
        force: bool,
    },

    /// Focus a tab by id
    Focus { tab_id: String },

    /// Focus a tab by zero-based index
    Select { index: u32 },

    /// List tabs
    List {
        #[arg(short, long)]
        window_id: Option<String>,
    },

    /// Focus the next tab
    Next,

    /// Focus the previous tab
    Prev,

    /// Focus a tab by one-based position
    Goto { position: u32 },

    /// Rename a tab (default: current)
    Rename {
        title: String,
        #[arg(long)]
        tab_id: Option<String>,
    },

    /// Move a tab to a new index
    Move {
        index: u32,
        #[arg(long)]
        tab_id: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum PaneCommand {
    /// Split the focused pane
    Split {
        #[arg(short = 'D', long, default_value = "horizontal")]
        direction: SplitDirection,
        #[command(flatten)]
        args: SplitArgs,
    },

    /// Split the focused pane side by side
    Vsplit(SplitArgs),

    /// Close a pane (default: focused)
    Close {
        pane_id: Option<String>,
        #[arg(short, long)]
        force: bool,
    },

    /// Move focus in a direction, or to a pane index
    Focus { target: String },

    /// Grow a pane towards a direction
    Resize {
        direction: Direction,
        #[arg(default_value_t = 1)]
        amount: u32,
        #[arg(long)]
        pane_id: Option<String>,
    },

    /// List panes
    List {
        #[arg(long)]
        tab_id: Option<String>,
    },

    /// Toggle zoom on a pane
    Zoom {
        #[arg(long)]
        pane_id: Option<String>,
    },

    /// Swap the focused pane with its neighbour
    Swap { direction: Direction },

    /// Turn the current tab into a 2x2 grid
    #[command(name = "split2x2")]
    Split2x2,
}

#[derive(Subcommand, Debug)]
pub enum SessionCommand {
    /// Open a tracked session in a new tab
    New {
        #[arg(short, long)]
        name: Option<String>,
        /// Starting directory
        #[arg(short = 'd', long)]
        cwd: Option<String>,
    },

    /// Type text into a pane without pressing Enter
    Send {
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
        #[command(flatten)]
        target: PaneTarget,
    },

    /// Type a command into a pane and press Enter
    Run {
        command: String,
        #[command(flatten)]
        target: PaneTarget,
    },

    /// Clear a pane's screen and scrollback
    Clear {
        #[command(flatten)]
        target: PaneTarget,
    },

    /// List tracked sessions
    List {
        #[arg(long)]
        state: Option<SessionState>,
    },

    /// Close a tracked session and its tab
    Close {
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        session: Option<String>,
        /// Close every tracked session
        #[arg(long)]
        all: bool,
        #[arg(short, long)]
        force: bool,
    },

    /// Restart the shell in a pane
    Restart {
        #[command(flatten)]
        target: PaneTarget,
    },

    /// Focus a session's tab and pane, or a pane index
    Focus { target: String },

    /// Print the last lines of a pane
    Read {
        #[arg(short = 'n', long, default_value_t = 50)]
        lines: usize,
        #[command(flatten)]
        target: PaneTarget,
    },

    /// Write a pane's buffer to a file
    Capture {
        #[arg(short, long)]
        output: PathBuf,
        /// Include scrollback
        #[arg(long)]
        history: bool,
        #[command(flatten)]
        target: PaneTarget,
    },

    /// Set a pane title, or rename a session
    SetName {
        name: String,
        #[command(flatten)]
        target: PaneTarget,
    },

    /// Print a session variable
    GetVar {
        variable: String,
        #[arg(short, long)]
        session: String,
    },

    /// Store a session variable
    SetVar {
        variable: String,
        value: String,
        #[arg(short, long)]
        session: String,
    },

    /// Run a command to completion in a session's shell and directory
    Exec {
        session: String,
        command: String,
        #[arg(long)]
        timeout: Option<f64>,
    },

    /// Session counts by state and shell
    Stats,

    /// Drop disconnected, failed and idle sessions
    Cleanup {
        /// Keep reaping every `sessions.cleanup_interval_secs` until Ctrl+C
        #[arg(long)]
        watch: bool,

        /// Stop watching after this many seconds
        #[arg(long = "for", value_name = "SECS", requires = "watch")]
        duration: Option<f64>,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct BroadcastTargetArgs {
    /// Comma-separated pane ids
    #[arg(long)]
    pub panes: Option<String>,

    /// Comma-separated tab ids or indexes
    #[arg(short, long)]
    pub tabs: Option<String>,

    /// Every pane in every tab
    #[arg(long)]
    pub all: bool,
}

#[derive(Subcommand, Debug)]
pub enum BroadcastCommand {
    /// Remember a set of target panes
    On(BroadcastTargetArgs),
    /// Forget the target panes
    Off,
    /// Type a command into every target pane
    Send {
        #[arg(required = true, num_args = 1..)]
        command: Vec<String>,
        #[command(flatten)]
        targets: BroadcastTargetArgs,
    },
    /// Show the remembered targets
    Status,
}

#[derive(Subcommand, Debug)]
pub enum MonitorCommand {
    /// Print new output as it arrives
    Follow {
        #[arg(long)]
        pane_id: Option<String>,
        /// Only show lines containing this text
        #[arg(short, long)]
        filter: Option<String>,
        /// Treat --filter as a regular expression
        #[arg(long)]
        regex: bool,
        /// Stop after this many seconds
        #[arg(short, long)]
        timeout: Option<f64>,
        /// Print this many recent lines first
        #[arg(short, long, default_value_t = 0)]
        lines: usize,
    },

    /// Wait for lines matching a keyword
    Watch {
        keyword: String,
        #[arg(long)]
        pane_id: Option<String>,
        #[arg(long)]
        regex: bool,
        /// Stop after this many matches
        #[arg(short, long)]
        count: Option<usize>,
        #[arg(short, long)]
        timeout: Option<f64>,
    },

    /// Print the last lines of a pane
    Tail {
        #[arg(default_value_t = 20)]
        lines: usize,
        #[arg(long)]
        pane_id: Option<String>,
        /// Keep following new output (default: monitor.follow)
        #[arg(short, long, overrides_with = "no_follow")]
        follow: bool,
        /// Print once and exit even when monitor.follow is set
        #[arg(long, overrides_with = "follow")]
        no_follow: bool,
        /// Stop following after this many seconds
        #[arg(short, long)]
        timeout: Option<f64>,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the config file in use
    Path,
    /// Write a default config file
    Init {
        path: Option<PathBuf>,
        #[arg(short, long)]
        force: bool,
    },
    /// Print the effective config
    Show,
    /// Print one value by dotted key
    Get { key: String },
    /// Set one value by dotted key and save
    Set { key: String, value: String },
    /// Validate a config file and make it the active one
    Load { path: PathBuf },
    /// Write the effective config to a file
    Save { path: Option<PathBuf> },
    /// Open the config file in $EDITOR
    Edit,
}

#[derive(Subcommand, Debug)]
pub enum ShellCommand {
    /// Installed shells and their versions
    List,
    /// Run a command to completion and print its output
    Exec {
        command: String,
        /// Working directory
        #[arg(short = 'd', long)]
        cwd: Option<PathBuf>,
        /// KEY=VALUE pairs
        #[arg(short, long, value_parser = parse_key_value)]
        env: Vec<(String, String)>,
        #[arg(long)]
        timeout: Option<f64>,
    },
}

#[derive(Subcommand, Debug)]
pub enum WslCommand {
    /// List installed distributions
    Distros,
    /// Show or set the default distribution
    Default { name: Option<String> },
    /// Stop every distribution and the WSL VM
    Shutdown {
        #[arg(short, long)]
        force: bool,
    },
    /// Stop one distribution (default: the configured one)
    Terminate { distribution: Option<String> },
    /// Print the Linux home directory, or the Windows one with --windows
    Home {
        #[arg(long)]
        windows: bool,
    },
    /// Windows drives mounted in WSL
    Mounts,
    /// Export a distribution to a tar file
    Export { name: String, file: String },
    /// Import a distribution from a tar file
    Import {
        name: String,
        install_dir: String,
        tarball: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum PathCommand {
    /// C:\src -> /mnt/c/src
    ToWsl { path: String },
    /// /mnt/c/src -> C:\src
    ToWindows {
        path: String,
        /// Distribution for paths outside /mnt
        #[arg(long)]
        distro: Option<String>,
    },
    /// Convert foreign paths and switch separators to one style
    Normalize {
        path: String,
        /// Target Windows syntax instead of WSL
        #[arg(long)]
        windows: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum HistoryCommand {
    Show {
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
    },
    Clear {
        #[arg(short, long)]
        force: bool,
    },
}

fn parse_pair<T: FromStr>(raw: &str) -> Result<(T, T), String> {
    let (a, b) = raw
        .split_once(',')
        .ok_or_else(|| format!("expected two comma-separated numbers, got '{raw}'"))?;
    let parse = |s: &str| {
        s.trim()
            .parse::<T>()
            .map_err(|_| format!("'{}' is not a valid number", s.trim()))
    };
    Ok((parse(a)?, parse(b)?))
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{raw}'")),
    }
}
