//! `wt2rc.yaml` configuration.
//!
//! Every section and field is optional; a missing file yields defaults. The
//! file is looked up in the working directory, the home directory, the
//! `~/.wt2` / `~/winterm2` directories and finally under `%APPDATA%`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::adapter::ShellType;
use crate::error::WtError;

pub const CONFIG_FILE_NAMES: &[&str] = &[".wt2rc.yaml", ".wt2rc.yml", "wt2rc.yaml"];
pub const CONFIG_DIR_NAMES: &[&str] = &[".wt2", "winterm2"];
pub const CONFIG_ENV: &str = "WT2_CONFIG";
pub const DEFAULT_PIPE_NAME: &str = r"\\.\pipe\WindowsTerminal";
/// Upper bound for `terminal.timeout_secs` and `broadcast.timeout_secs`.
pub const MAX_TIMEOUT_SECS: f64 = 3600.0;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneralConfig {
    #[serde(default)]
    pub default_shell: ShellType,
    #[serde(default)]
    pub default_profile: Option<String>,
    #[serde(default = "default_true")]
    pub confirmation_prompt: bool,
    #[serde(default)]
    pub verbose_output: bool,
    #[serde(default = "default_max_history")]
    pub max_history: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TerminalConfig {
    /// Explicit `wt.exe` location; looked up on PATH when unset.
    #[serde(default)]
    pub wt_path: Option<String>,
    #[serde(default = "default_pipe_name")]
    pub pipe_name: String,
    #[serde(default = "default_terminal_timeout_secs")]
    pub timeout_secs: f64,
    /// Try the JSON pipe before reporting an operation as unsupported.
    #[serde(default = "default_true")]
    pub json_api: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_session_timeout_secs")]
    pub session_timeout_secs: u64,
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WslConfig {
    #[serde(default)]
    pub distribution: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProfileConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commandline: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starting_directory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color_scheme: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_size: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThemeConfig {
    pub name: String,
    pub background: String,
    pub foreground: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selection: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub colors: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KeybindingConfig {
    pub keys: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BroadcastConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_escape_char")]
    pub escape_char: String,
    #[serde(default = "default_broadcast_timeout_secs", alias = "timeout")]
    pub timeout_secs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MonitorConfig {
    #[serde(default)]
    pub follow: bool,
    #[serde(default)]
    pub filter: Option<String>,
    #[serde(default = "default_true")]
    pub highlight: bool,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub terminal: TerminalConfig,
    #[serde(default)]
    pub sessions: SessionConfig,
    #[serde(default)]
    pub wsl: WslConfig,
    #[serde(default)]
    pub profiles: Vec<ProfileConfig>,
    #[serde(default)]
    pub themes: Vec<ThemeConfig>,
    #[serde(default)]
    pub keybindings: Vec<KeybindingConfig>,
    #[serde(default)]
    pub broadcast: BroadcastConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
}

fn default_true() -> bool {
    true
}

fn default_version() -> String {
    "1.0".to_string()
}

fn default_max_history() -> usize {
    1000
}

fn default_pipe_name() -> String {
    DEFAULT_PIPE_NAME.to_string()
}

fn default_terminal_timeout_secs() -> f64 {
    10.0
}

fn default_max_connections() -> usize {
    10
}

fn default_session_timeout_secs() -> u64 {
    300
}

fn default_cleanup_interval_secs() -> u64 {
    60
}

fn default_escape_char() -> String {
    "\\".to_string()
}

fn default_broadcast_timeout_secs() -> f64 {
    5.0
}

fn default_poll_interval_ms() -> u64 {
    500
}

/// Seconds as a `Duration`, falling back when the value is out of range.
fn bounded_timeout(secs: f64, fallback: f64) -> Duration {
    let secs = if secs.is_finite() && secs > 0.0 {
        secs.min(MAX_TIMEOUT_SECS)
    } else {
        fallback
    };
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::from_secs(5))
}

fn timeout_problem(key: &str, secs: f64) -> Option<String> {
    if secs.is_finite() && secs > 0.0 && secs <= MAX_TIMEOUT_SECS {
        None
    } else {
        Some(format!(
            "{key} must be a number of seconds between 0 and {MAX_TIMEOUT_SECS}, got {secs}"
        ))
    }
}

impl TerminalConfig {
    /// `timeout_secs` for wt.exe runs and pipe requests.
    pub fn timeout(&self) -> Duration {
        bounded_timeout(self.timeout_secs, default_terminal_timeout_secs())
    }
}

impl BroadcastConfig {
    /// `timeout_secs` for each pane a broadcast reaches.
    pub fn timeout(&self) -> Duration {
        bounded_timeout(self.timeout_secs, default_broadcast_timeout_secs())
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            default_shell: ShellType::default(),
            default_profile: None,
            confirmation_prompt: true,
            verbose_output: false,
            max_history: default_max_history(),
        }
    }
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            wt_path: None,
            pipe_name: default_pipe_name(),
            timeout_secs: default_terminal_timeout_secs(),
            json_api: true,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            session_timeout_secs: default_session_timeout_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            escape_char: default_escape_char(),
            timeout_secs: default_broadcast_timeout_secs(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            follow: false,
            filter: None,
            highlight: true,
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            general: GeneralConfig::default(),
            terminal: TerminalConfig::default(),
            sessions: SessionConfig::default(),
            wsl: WslConfig::default(),
            profiles: Vec::new(),
            themes: Vec::new(),
            keybindings: Vec::new(),
            broadcast: BroadcastConfig::default(),
            monitor: MonitorConfig::default(),
        }
    }
}

/// Directories consulted while looking for a config file.
#[derive(Debug, Clone, Default)]
pub struct SearchRoots {
    pub cwd: Option<PathBuf>,
    pub home: Option<PathBuf>,
    pub appdata: Option<PathBuf>,
}

impl SearchRoots {
    pub fn from_env() -> Self {
        Self {
            cwd: std::env::current_dir().ok(),
            home: dirs::home_dir(),
            appdata: std::env::var_os("APPDATA")
                .map(PathBuf::from)
                .or_else(dirs::config_dir),
        }
    }

    /// Every candidate path in lookup order.
    pub fn candidates(&self) -> Vec<PathBuf> {
        let mut out = Vec::new();
        for base in [&self.cwd, &self.home].into_iter().flatten() {
            out.extend(CONFIG_FILE_NAMES.iter().map(|name| base.join(name)));
        }
        for base in [&self.home, &self.appdata].into_iter().flatten() {
            for dir in CONFIG_DIR_NAMES {
                out.extend(CONFIG_FILE_NAMES.iter().map(|name| base.join(dir).join(name)));
            }
        }
        out
    }

    pub fn find_config_file(&self) -> Option<PathBuf> {
        self.candidates().into_iter().find(|path| path.is_file())
    }

    /// Where `config init` / `config save` write when no file exists yet.
    pub fn default_save_path(&self) -> PathBuf {
        self.home
            .clone()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".wt2")
            .join("wt2rc.yaml")
    }
}

impl Config {
    /// Load from an explicit path, `WT2_CONFIG`, or the search roots.
    ///
    /// Returns the config and the file it came from (`None` means defaults).
    pub fn load(explicit: Option<&Path>, roots: &SearchRoots) -> Result<(Self, Option<PathBuf>)> {
        let explicit = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));

        let path = match explicit {
            Some(path) => {
                if !path.is_file() {
                    return Err(WtError::Config {
                        path,
                        reason: "file not found".to_string(),
                    }
                    .into());
                }
                path
            }
            None => match roots.find_config_file() {
                Some(path) => path,
                None => {
                    debug!("no wt2rc.yaml found, using defaults");
                    return Ok((Self::default(), None));
                }
            },
        };

        let config = Self::from_file(&path)?;
        config.check(&path)?;
        debug!(path = %path.display(), "loaded config");
        Ok((config, Some(path)))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|err| WtError::Config {
            path: path.to_path_buf(),
            reason: format!("io error: {err}"),
        })?;
        Ok(Self::parse(&content, path)?)
    }

    pub fn parse(content: &str, path: &Path) -> Result<Self, WtError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content).map_err(|err| WtError::Config {
            path: path.to_path_buf(),
            reason: format!("YAML parsing error: {err}"),
        })
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("failed to serialize config to YAML")
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        std::fs::write(path, self.to_yaml()?)
            .with_context(|| format!("failed to write {}", path.display()))?;
        debug!(path = %path.display(), "saved config");
        Ok(())
    }

    pub fn find_profile(&self, name: &str) -> Option<&ProfileConfig> {
        self.profiles
            .iter()
            .find(|profile| profile.name.eq_ignore_ascii_case(name))
    }

    /// Look up a dotted key such as `general.default_shell` or `profiles.0.name`.
    pub fn get_value(&self, key: &str) -> Result<Value> {
        let tree = serde_yaml::to_value(self).context("failed to serialize config")?;
        let mut node = &tree;
        for part in key.split('.') {
            node = child(node, part).ok_or_else(|| {
                WtError::invalid("config key", key, "no such key")
            })?;
        }
        Ok(node.clone())
    }

    /// Set a dotted key from its YAML text; the result must still be a valid config.
    pub fn set_value(&mut self, key: &str, raw: &str) -> Result<()> {
        let parts: Vec<&str> = key.split('.').filter(|p| !p.is_empty()).collect();
        if parts.is_empty() {
            return Err(WtError::invalid("config key", key, "key is empty").into());
        }
        let value: Value =
            serde_yaml::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));

        let mut tree = serde_yaml::to_value(&*self).context("failed to serialize config")?;
        let mut node = &mut tree;
        for part in &parts[..parts.len() - 1] {
            node = child_mut(node, part)
                .ok_or_else(|| WtError::invalid("config key", key, "no such key"))?;
        }
        let last = parts[parts.len() - 1];
        match node {
            Value::Mapping(map) => {
                map.insert(Value::String(last.to_string()), value);
            }
            Value::Sequence(seq) => {
                let slot = last
                    .parse::<usize>()
                    .ok()
                    .and_then(|index| seq.get_mut(index))
                    .ok_or_else(|| WtError::invalid("config key", key, "index out of range"))?;
                *slot = value;
            }
            _ => return Err(WtError::invalid("config key", key, "not a section").into()),
        }

        *self = serde_yaml::from_value(tree)
            .map_err(|err| WtError::invalid("config value", raw, err.to_string()))?;
        Ok(())
    }

    /// Semantic problems serde cannot catch.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.sessions.max_connections == 0 {
            problems.push("sessions.max_connections must be at least 1".to_string());
        }
        if self.sessions.cleanup_interval_secs == 0 {
            problems.push("sessions.cleanup_interval_secs must be positive".to_string());
        }
        problems.extend(timeout_problem("terminal.timeout_secs", self.terminal.timeout_secs));
        problems.extend(timeout_problem("broadcast.timeout_secs", self.broadcast.timeout_secs));
        if self.monitor.poll_interval_ms == 0 {
            problems.push("monitor.poll_interval_ms must be positive".to_string());
        }
        let mut seen = std::collections::BTreeSet::new();
        for profile in &self.profiles {
            if profile.name.trim().is_empty() {
                problems.push("profiles: every profile needs a name".to_string());
            } else if !seen.insert(profile.name.to_ascii_lowercase()) {
                problems.push(format!("profiles: duplicate profile '{}'", profile.name));
            }
        }
        if let Some(ref filter) = self.monitor.filter {
            if let Err(err) = regex::Regex::new(filter) {
                problems.push(format!("monitor.filter is not a valid pattern: {err}"));
            }
        }
        problems
    }

    /// [`validate`](Self::validate) as a `WT040` error naming `path`.
    pub fn check(&self, path: &Path) -> Result<(), WtError> {
        let problems = self.validate();
        if problems.is_empty() {
            return Ok(());
        }
        Err(WtError::Config {
            path: path.to_path_buf(),
            reason: problems.join("; "),
        })
    }
}

fn child<'a>(node: &'a Value, part: &str) -> Option<&'a Value> {
    match node {
        Value::Mapping(map) => map.get(part),
        Value::Sequence(seq) => part.parse::<usize>().ok().and_then(|i| seq.get(i)),
        _ => None,
    }
}

fn child_mut<'a>(node: &'a mut Value, part: &str) -> Option<&'a mut Value> {
    match node {
        Value::Mapping(map) => {
            if !map.contains_key(part) {
                map.insert(Value::String(part.to_string()), Value::Mapping(Mapping::new()));
            }
            map.get_mut(part)
        }
        Value::Sequence(seq) => part.parse::<usize>().ok().and_then(|i| seq.get_mut(i)),
        _ => None,
    }
}

/// Render a YAML value for `config get`: scalars bare, sections as YAML.
pub fn render_value(value: &Value) -> Result<String> {
    Ok(match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => serde_yaml::to_string(other)
            .context("failed to render value")?
            .trim_end()
            .to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roots_in(dir: &Path) -> SearchRoots {
        SearchRoots {
            cwd: Some(dir.join("cwd")),
            home: Some(dir.join("home")),
            appdata: Some(dir.join("appdata")),
        }
    }

    #[test]
    fn default_config_values() {
        let config = Config::default();
        assert_eq!(config.version, "1.0");
        assert_eq!(config.general.default_shell, ShellType::PowerShell);
        assert!(config.general.confirmation_prompt);
        assert_eq!(config.general.max_history, 1000);
        assert_eq!(config.terminal.pipe_name, DEFAULT_PIPE_NAME);
        assert_eq!(config.sessions.max_connections, 10);
        assert_eq!(config.sessions.session_timeout_secs, 300);
        assert_eq!(config.sessions.cleanup_interval_secs, 60);
        assert_eq!(config.broadcast.escape_char, "\\");
        assert_eq!(config.broadcast.timeout_secs, 5.0);
        assert!(config.monitor.highlight);
        assert!(config.validate().is_empty());
    }

    #[test]
    fn parse_full_config() {
        let yaml = r##"
version: "1.0"
general:
  default_shell: wsl
  default_profile: Ubuntu
  confirmation_prompt: false
  max_history: 50
terminal:
  wt_path: C:\Tools\wt.exe
  timeout_secs: 3
profiles:
  - name: dev
    commandline: pwsh.exe -NoLogo
    starting_directory: D:\src
    font_size: 12
themes:
  - name: night
    background: "#000000"
    foreground: "#ffffff"
    colors:
      red: "#ff0000"
keybindings:
  - keys: ctrl+shift+d
    action: splitPane
    args: [vertical]
broadcast:
  enabled: false
  timeout: 2.5
monitor:
  filter: error
  poll_interval_ms: 250
"##;
        let config = Config::parse(yaml, Path::new("wt2rc.yaml")).unwrap();
        assert_eq!(config.general.default_shell, ShellType::Wsl);
        assert_eq!(config.general.default_profile.as_deref(), Some("Ubuntu"));
        assert!(!config.general.confirmation_prompt);
        assert_eq!(config.general.max_history, 50);
        assert_eq!(config.terminal.wt_path.as_deref(), Some(r"C:\Tools\wt.exe"));
        assert_eq!(config.terminal.timeout_secs, 3.0);
        assert_eq!(config.profiles[0].font_size, Some(12));
        assert_eq!(config.themes[0].colors["red"], "#ff0000");
        assert_eq!(config.keybindings[0].args, vec!["vertical"]);
        assert!(!config.broadcast.enabled);
        assert_eq!(config.broadcast.timeout_secs, 2.5);
        assert_eq!(config.monitor.filter.as_deref(), Some("error"));
        assert_eq!(config.monitor.poll_interval_ms, 250);
        assert_eq!(config.sessions.max_connections, 10);
    }

    #[test]
    fn parse_empty_file_gives_defaults() {
        let config = Config::parse("  \n", Path::new("x.yaml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn parse_invalid_yaml_is_config_error() {
        let err = Config::parse("general: [unclosed", Path::new("bad.yaml")).unwrap_err();
        assert_eq!(err.code(), "WT040");
        assert!(err.to_string().contains("bad.yaml"));
    }

    #[test]
    fn unknown_shell_is_rejected() {
        let err = Config::parse("general:\n  default_shell: fish\n", Path::new("c.yaml"))
            .unwrap_err();
        assert_eq!(err.code(), "WT040");
    }

    #[test]
    fn candidates_follow_lookup_order() {
        let tmp = tempfile::tempdir().unwrap();
        let roots = roots_in(tmp.path());
        let candidates = roots.candidates();
        assert_eq!(candidates[0], tmp.path().join("cwd").join(".wt2rc.yaml"));
        assert_eq!(candidates[3], tmp.path().join("home").join(".wt2rc.yaml"));
        assert_eq!(
            candidates[6],
            tmp.path().join("home").join(".wt2").join(".wt2rc.yaml")
        );
        assert_eq!(
            candidates.last().unwrap(),
            &tmp.path().join("appdata").join("winterm2").join("wt2rc.yaml")
        );
    }

    #[test]
    fn cwd_config_wins_over_home() {
        let tmp = tempfile::tempdir().unwrap();
        let roots = roots_in(tmp.path());
        std::fs::create_dir_all(tmp.path().join("cwd")).unwrap();
        std::fs::create_dir_all(tmp.path().join("home").join(".wt2")).unwrap();
        std::fs::write(
            tmp.path().join("home").join(".wt2").join("wt2rc.yaml"),
            "general:\n  default_shell: cmd\n",
        )
        .unwrap();
        assert_eq!(
            roots.find_config_file().unwrap(),
            tmp.path().join("home").join(".wt2").join("wt2rc.yaml")
        );

        std::fs::write(
            tmp.path().join("cwd").join(".wt2rc.yml"),
            "general:\n  default_shell: wsl\n",
        )
        .unwrap();
        let (config, path) = Config::load(None, &roots).unwrap();
        assert_eq!(path.unwrap(), tmp.path().join("cwd").join(".wt2rc.yml"));
        assert_eq!(config.general.default_shell, ShellType::Wsl);
    }

    #[test]
    fn load_returns_defaults_when_nothing_found() {
        let tmp = tempfile::tempdir().unwrap();
        let (config, path) = Config::load(None, &roots_in(tmp.path())).unwrap();
        assert!(path.is_none());
        assert_eq!(config, Config::default());
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = tmp.path().join("nope.yaml");
        let err = Config::load(Some(&missing), &roots_in(tmp.path())).unwrap_err();
        assert_eq!(err.downcast_ref::<WtError>().unwrap().code(), "WT040");
    }

    #[test]
    fn save_then_load_keeps_values() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("wt2rc.yaml");
        let mut config = Config::default();
        config.general.default_shell = ShellType::Cmd;
        config.profiles.push(ProfileConfig {
            name: "logs".into(),
            commandline: Some("cmd.exe /k type app.log".into()),
            ..Default::default()
        });
        config.save(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded, config);
        assert!(!std::fs::read_to_string(&path).unwrap().contains("font_size"));
    }

    #[test]
    fn get_value_by_dotted_key() {
        let mut config = Config::default();
        config.profiles.push(ProfileConfig {
            name: "dev".into(),
            ..Default::default()
        });
        assert_eq!(
            render_value(&config.get_value("general.default_shell").unwrap()).unwrap(),
            "powershell"
        );
        assert_eq!(
            render_value(&config.get_value("sessions.max_connections").unwrap()).unwrap(),
            "10"
        );
        assert_eq!(
            render_value(&config.get_value("profiles.0.name").unwrap()).unwrap(),
            "dev"
        );
        assert!(config.get_value("general.nope").is_err());
    }

    #[test]
    fn set_value_parses_yaml_scalars() {
        let mut config = Config::default();
        config.set_value("general.default_shell", "wsl").unwrap();
        config.set_value("general.confirmation_prompt", "false").unwrap();
        config.set_value("sessions.max_connections", "3").unwrap();
        config.set_value("wsl.distribution", "Ubuntu-22.04").unwrap();
        assert_eq!(config.general.default_shell, ShellType::Wsl);
        assert!(!config.general.confirmation_prompt);
        assert_eq!(config.sessions.max_connections, 3);
        assert_eq!(config.wsl.distribution.as_deref(), Some("Ubuntu-22.04"));
    }

    #[test]
    fn set_value_rejects_bad_types_and_keeps_old_config() {
        let mut config = Config::default();
        let err = config
            .set_value("sessions.max_connections", "lots")
            .unwrap_err();
        assert_eq!(err.downcast_ref::<WtError>().unwrap().code(), "WT030");
        assert_eq!(config.sessions.max_connections, 10);
    }

    #[test]
    fn validate_reports_semantic_problems() {
        let mut config = Config::default();
        config.sessions.max_connections = 0;
        config.monitor.filter = Some("(".into());
        config.profiles = vec![
            ProfileConfig {
                name: "Dev".into(),
                ..Default::default()
            },
            ProfileConfig {
                name: "dev".into(),
                ..Default::default()
            },
        ];
        let problems = config.validate();
        assert_eq!(problems.len(), 3, "{problems:?}");
    }

    #[test]
    fn unbounded_timeouts_are_rejected_on_load() {
        for value in [".inf", "1e30", ".nan", "-2"] {
            let yaml = format!("terminal:\n  timeout_secs: {value}\n");
            let config = Config::parse(&yaml, Path::new("wt2rc.yaml")).unwrap();
            assert_eq!(config.terminal.timeout(), Duration::from_secs(10), "{value}");
            let err = config.check(Path::new("wt2rc.yaml")).unwrap_err();
            assert_eq!(err.code(), "WT040", "{value}");
        }

        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("wt2rc.yaml");
        std::fs::write(&path, "broadcast:\n  timeout_secs: .inf\n").unwrap();
        let err = Config::load(Some(&path), &roots_in(tmp.path())).unwrap_err();
        assert_eq!(err.downcast_ref::<WtError>().unwrap().code(), "WT040");
    }

    #[test]
    fn large_timeouts_are_capped() {
        let mut config = Config::default();
        config.terminal.timeout_secs = 7200.0;
        assert_eq!(config.terminal.timeout(), Duration::from_secs(3600));
        config.broadcast.timeout_secs = 0.25;
        assert_eq!(config.broadcast.timeout(), Duration::from_millis(250));
    }

    #[test]
    fn find_profile_ignores_case() {
        let mut config = Config::default();
        config.profiles.push(ProfileConfig {
            name: "Build".into(),
            ..Default::default()
        });
        assert!(config.find_profile("build").is_some());
        assert!(config.find_profile("other").is_none());
    }
}
