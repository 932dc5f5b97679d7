//! Host detection and `wt2 doctor`.
//!
//! Works out which shell and terminal `wt2` runs in, which Windows release
//! is installed, where Windows Terminal keeps `settings.json` and whether
//! its JSON API is switched on. Environment lookups go through [`EnvVars`]
//! so detection can be tested off Windows.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result};
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::adapter::{AdapterInfo, ShellType};
use crate::exec::{CommandRunner, CommandSpec};
use crate::terminal::{ProfileSummary, Terminal};

const WT_PACKAGE: &str = "Microsoft.WindowsTerminal_8wekyb3td8";
const WT_PREVIEW_PACKAGE: &str = "Microsoft.WindowsTerminalPreview_8wekyb3td8";

/// First Windows 10 build `wt2` supports (21H2).
pub const MIN_WIN10_BUILD: u32 = 19044;
/// Windows 11 reports major version 10 from build 22000 on.
pub const WIN11_FIRST_BUILD: u32 = 22000;

/// Release labels by build number.
const RELEASES: &[(u32, &str)] = &[
    (19041, "2004"),
    (19042, "20H2"),
    (19043, "21H1"),
    (19044, "21H2"),
    (19045, "22H2"),
    (22000, "21H2"),
    (22621, "22H2"),
    (22631, "23H2"),
    (26100, "24H2"),
];

/// A snapshot of environment variables.
#[derive(Debug, Clone, Default)]
pub struct EnvVars(BTreeMap<String, String>);

impl EnvVars {
    pub fn from_process() -> Self {
        Self(std::env::vars().collect())
    }

    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    /// A non-empty value. Names are matched case-insensitively, as on Windows.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
            .filter(|value| !value.trim().is_empty())
    }
}

/// Guess the shell `wt2` was started from.
pub fn detect_shell(env: &EnvVars) -> Option<ShellType> {
    if env.get("WSL_DISTRO_NAME").is_some() {
        return Some(ShellType::Wsl);
    }
    if env.get("POWERSHELL_DISTRIBUTION_CHANNEL").is_some() {
        return Some(ShellType::Pwsh);
    }
    if let Some(modules) = env.get("PSModulePath") {
        let modules = modules.to_ascii_lowercase();
        // cmd.exe inherits PSModulePath from the system, so only trust the
        // per-user entries PowerShell itself prepends.
        if modules.contains(r"\powershell\7") || modules.contains(r"documents\powershell\modules") {
            return Some(ShellType::Pwsh);
        }
        if modules.contains(r"documents\windowspowershell\modules") {
            return Some(ShellType::PowerShell);
        }
    }
    if env.get("PROMPT").is_some() {
        return Some(ShellType::Cmd);
    }
    None
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalKind {
    WindowsTerminal,
    VsCode,
    Unknown,
}

impl TerminalKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TerminalKind::WindowsTerminal => "Windows Terminal",
            TerminalKind::VsCode => "VS Code",
            TerminalKind::Unknown => "unknown",
        }
    }
}

pub fn detect_terminal(env: &EnvVars) -> TerminalKind {
    if env.get("WT_SESSION").is_some() || env.get("WT_PROFILE_ID").is_some() {
        return TerminalKind::WindowsTerminal;
    }
    match env.get("TERM_PROGRAM") {
        Some(program) if program.eq_ignore_ascii_case("WindowsTerminal") => {
            TerminalKind::WindowsTerminal
        }
        Some(program) if program.eq_ignore_ascii_case("vscode") => TerminalKind::VsCode,
        _ => TerminalKind::Unknown,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WindowsVersion {
    pub major: u32,
    pub minor: u32,
    pub build: u32,
    pub revision: Option<u32>,
}

impl WindowsVersion {
    /// Parse `cmd /c ver` output, e.g. `Microsoft Windows [Version 10.0.22631.4037]`.
    pub fn parse(ver_output: &str) -> Option<Self> {
        static VER_RE: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(r"(\d+)\.(\d+)\.(\d+)(?:\.(\d+))?").expect("valid version regex")
        });
        let caps = VER_RE.captures(ver_output)?;
        Some(Self {
            major: caps[1].parse().ok()?,
            minor: caps[2].parse().ok()?,
            build: caps[3].parse().ok()?,
            revision: caps.get(4).and_then(|m| m.as_str().parse().ok()),
        })
    }

    pub fn is_windows_11(&self) -> bool {
        self.major == 10 && self.build >= WIN11_FIRST_BUILD
    }

    pub fn is_supported(&self) -> bool {
        self.major > 10 || (self.major == 10 && self.build >= MIN_WIN10_BUILD)
    }

    /// Feature-update label of the newest release at or below this build.
    pub fn release(&self) -> Option<&'static str> {
        let first = if self.is_windows_11() { WIN11_FIRST_BUILD } else { 0 };
        RELEASES
            .iter()
            .rev()
            .find(|(build, _)| *build <= self.build && *build >= first)
            .map(|(_, label)| *label)
    }

    pub fn label(&self) -> String {
        if self.major != 10 {
            return format!("Windows {}.{} (build {})", self.major, self.minor, self.build);
        }
        let name = if self.is_windows_11() { "Windows 11" } else { "Windows 10" };
        match self.release() {
            Some(release) => format!("{name} {release}"),
            None => name.to_string(),
        }
    }
}

pub fn windows_version(runner: &dyn CommandRunner) -> Option<WindowsVersion> {
    let spec = CommandSpec::new("cmd.exe")
        .args(["/c", "ver"])
        .timeout(Some(Duration::from_secs(5)));
    match runner.run(&spec) {
        Ok(output) if output.success() => WindowsVersion::parse(&output.stdout),
        Ok(_) => None,
        Err(err) => {
            debug!(error = %err, "cannot read Windows version");
            None
        }
    }
}

/// `net session` only succeeds from an elevated prompt.
pub fn is_elevated(runner: &dyn CommandRunner) -> bool {
    let spec = CommandSpec::new("net.exe")
        .arg("session")
        .timeout(Some(Duration::from_secs(5)));
    runner.run(&spec).is_ok_and(|output| output.success())
}

/// Where Windows Terminal may keep `settings.json`: stable, preview, then
/// the unpackaged install.
pub fn settings_candidates(local_app_data: &Path) -> Vec<PathBuf> {
    vec![
        local_app_data
            .join("Packages")
            .join(WT_PACKAGE)
            .join("LocalState")
            .join("settings.json"),
        local_app_data
            .join("Packages")
            .join(WT_PREVIEW_PACKAGE)
            .join("LocalState")
            .join("settings.json"),
        local_app_data
            .join("Microsoft")
            .join("Windows Terminal")
            .join("settings.json"),
    ]
}

pub fn find_settings_file() -> Option<PathBuf> {
    let local = dirs::data_local_dir()?;
    settings_candidates(&local).into_iter().find(|path| path.is_file())
}

/// Remove `//` and `/* */` comments and trailing commas from JSONC text.
///
/// String contents are copied untouched.
pub fn strip_jsonc(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    // A comma plus the whitespace after it, held until the next token shows
    // whether it closes an object or array.
    let mut comma: Option<String> = None;
    let mut chars = input.chars().peekable();
    let mut in_string = false;
    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            match c {
                '\\' => {
                    if let Some(next) = chars.next() {
                        out.push(next);
                    }
                }
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match (c, chars.peek()) {
            ('/', Some('/')) => {
                for skipped in chars.by_ref() {
                    if skipped == '\n' {
                        hold(&mut out, &mut comma, '\n');
                        break;
                    }
                }
            }
            ('/', Some('*')) => {
                chars.next();
                let mut prev = '\0';
                for skipped in chars.by_ref() {
                    if prev == '*' && skipped == '/' {
                        break;
                    }
                    prev = skipped;
                }
            }
            (c, _) if c.is_whitespace() => hold(&mut out, &mut comma, c),
            _ => {
                if let Some(held) = comma.take() {
                    let trailing = c == '}' || c == ']';
                    out.push_str(if trailing { &held[1..] } else { held.as_str() });
                }
                match c {
                    ',' => comma = Some(",".to_string()),
                    '"' => {
                        in_string = true;
                        out.push(c);
                    }
                    _ => out.push(c),
                }
            }
        }
    }
    if let Some(held) = comma {
        out.push_str(&held);
    }
    out
}

fn hold(out: &mut String, comma: &mut Option<String>, c: char) {
    match comma {
        Some(held) => held.push(c),
        None => out.push(c),
    }
}

pub fn parse_settings(content: &str) -> Result<Value> {
    serde_json::from_str(&strip_jsonc(content)).context("invalid Windows Terminal settings.json")
}

pub fn read_settings(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_settings(&content).with_context(|| format!("in {}", path.display()))
}

/// The first readable `settings.json`, parsed.
pub fn load_wt_settings() -> Option<Value> {
    let path = find_settings_file()?;
    match read_settings(&path) {
        Ok(settings) => Some(settings),
        Err(err) => {
            debug!(path = %path.display(), error = %format!("{err:#}"), "unreadable settings.json");
            None
        }
    }
}

/// Profiles from `profiles.list` (or a bare `profiles` array).
pub fn settings_profiles(settings: &Value) -> Vec<ProfileSummary> {
    let list = match settings.get("profiles") {
        Some(Value::Array(list)) => list,
        Some(Value::Object(profiles)) => match profiles.get("list") {
            Some(Value::Array(list)) => list,
            _ => return Vec::new(),
        },
        _ => return Vec::new(),
    };
    list.iter()
        .filter_map(|profile| {
            let text = |key: &str| profile.get(key).and_then(Value::as_str).map(str::to_string);
            Some(ProfileSummary {
                name: text("name")?,
                guid: text("guid"),
                source: text("source"),
                hidden: profile.get("hidden").and_then(Value::as_bool).unwrap_or(false),
            })
        })
        .collect()
}

/// `experimental.enableJsonApi`, nested or as a flat dotted key.
pub fn json_api_enabled(settings: &Value) -> bool {
    if let Some(flag) = settings.get("experimental.enableJsonApi").and_then(Value::as_bool) {
        return flag;
    }
    match settings.get("experimental") {
        Some(Value::Bool(flag)) => *flag,
        Some(Value::Object(experimental)) => experimental
            .get("enableJsonApi")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        _ => false,
    }
}

/// One line of the doctor report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Check {
    pub name: &'static str,
    pub ok: bool,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DoctorReport {
    pub os: &'static str,
    pub windows: Option<String>,
    pub windows_build: Option<u32>,
    pub supported: bool,
    pub shell: Option<ShellType>,
    pub terminal: TerminalKind,
    pub elevated: bool,
    pub wt_path: String,
    pub wt_version: Option<String>,
    pub settings_path: Option<PathBuf>,
    pub json_api_enabled: bool,
    pub pipe_reachable: bool,
    pub config_path: Option<PathBuf>,
    pub shells: Vec<AdapterInfo>,
}

impl DoctorReport {
    pub fn checks(&self) -> Vec<Check> {
        let mut checks = vec![
            Check {
                name: "windows",
                ok: self.supported,
                detail: self
                    .windows
                    .clone()
                    .unwrap_or_else(|| format!("not Windows ({})", self.os)),
            },
            Check {
                name: "wt.exe",
                ok: self.wt_version.is_some(),
                detail: match self.wt_version {
                    Some(ref version) => format!("{} ({version})", self.wt_path),
                    None => format!("{} not runnable", self.wt_path),
                },
            },
            Check {
                name: "settings.json",
                ok: self.settings_path.is_some(),
                detail: self
                    .settings_path
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "not found".to_string()),
            },
            Check {
                name: "json api",
                ok: self.json_api_enabled,
                detail: if self.json_api_enabled { "enabled" } else { "disabled" }.to_string(),
            },
            Check {
                name: "pipe",
                ok: self.pipe_reachable,
                detail: if self.pipe_reachable { "reachable" } else { "not reachable" }.to_string(),
            },
        ];
        for shell in &self.shells {
            checks.push(Check {
                name: shell.shell_type.as_str(),
                ok: shell.available,
                detail: shell
                    .version
                    .clone()
                    .unwrap_or_else(|| format!("{} not found", shell.executable)),
            });
        }
        checks
    }

    /// Healthy enough to drive the terminal through wt.exe.
    pub fn healthy(&self) -> bool {
        self.wt_version.is_some()
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for check in self.checks() {
            let mark = if check.ok { "ok" } else { "!!" };
            out.push_str(&format!("[{mark}] {:<14} {}\n", check.name, check.detail));
        }
        out.push_str(&format!(
            "shell: {}  terminal: {}  elevated: {}\n",
            self.shell.map(ShellType::as_str).unwrap_or("unknown"),
            self.terminal.as_str(),
            if self.elevated { "yes" } else { "no" }
        ));
        if let Some(ref path) = self.config_path {
            out.push_str(&format!("config: {}\n", path.display()));
        }
        out
    }
}

/// Everything `wt2 doctor` checks.
pub struct DoctorInputs<'a> {
    pub runner: &'a dyn CommandRunner,
    pub terminal: &'a Terminal,
    pub shells: Vec<AdapterInfo>,
    pub env: &'a EnvVars,
    pub settings_path: Option<PathBuf>,
    pub config_path: Option<PathBuf>,
}

pub fn doctor(inputs: DoctorInputs<'_>) -> DoctorReport {
    let version = windows_version(inputs.runner);
    let json_api_enabled = inputs
        .settings_path
        .as_deref()
        .and_then(|path| read_settings(path).ok())
        .is_some_and(|settings| json_api_enabled(&settings));
    DoctorReport {
        os: std::env::consts::OS,
        windows: version.map(|v| v.label()),
        windows_build: version.map(|v| v.build),
        supported: version.is_some_and(|v| v.is_supported()),
        shell: detect_shell(inputs.env),
        terminal: detect_terminal(inputs.env),
        elevated: is_elevated(inputs.runner),
        wt_path: inputs.terminal.wt().path().to_string(),
        wt_version: inputs.terminal.version().ok(),
        settings_path: inputs.settings_path,
        json_api_enabled,
        pipe_reachable: inputs.terminal.json_api_available(),
        config_path: inputs.config_path,
        shells: inputs.shells,
    }
}
