//! Windows <-> WSL path conversion.
//!
//! Drive paths map onto the `/mnt/<drive>` automounts; Linux paths inside a
//! distro map onto the `\\wsl$\<distro>` share. Anything that matches neither
//! form passes through unchanged.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::exec::{CommandRunner, CommandSpec};

static DRIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z]):(?:[\\/](.*))?$").expect("valid drive regex")
});
static WSL_SHARE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\\\\wsl(?:\$|\.localhost)\\([^\\]+)(?:\\(.*))?$")
        .expect("valid wsl share regex")
});
static MNT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/mnt/([A-Za-z])(?:/(.*))?$").expect("valid mount regex")
});

fn trim_separators(rest: &str, sep: char) -> String {
    rest.split(['\\', '/'])
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join(&sep.to_string())
}

/// `C:\Users\me` -> `/mnt/c/Users/me`; `\\wsl$\Ubuntu\home\me` -> `/home/me`.
pub fn windows_to_wsl(path: &str) -> String {
    if path.is_empty() {
        return String::new();
    }

    if let Some(caps) = DRIVE_RE.captures(path) {
        let drive = caps[1].to_ascii_lowercase();
        let rest = caps.get(2).map(|m| trim_separators(m.as_str(), '/'));
        return match rest {
            Some(rest) if !rest.is_empty() => format!("/mnt/{drive}/{rest}"),
            _ => format!("/mnt/{drive}"),
        };
    }

    if let Some(caps) = WSL_SHARE_RE.captures(path) {
        let rest = caps
            .get(2)
            .map(|m| trim_separators(m.as_str(), '/'))
            .unwrap_or_default();
        return format!("/{rest}");
    }

    path.to_string()
}

/// `/mnt/d/src` -> `D:\src`. Other absolute paths resolve through the
/// `\\wsl$` share and therefore need the distro name; without one they are
/// returned unchanged.
pub fn wsl_to_windows(path: &str, distro: Option<&str>) -> String {
    if path.is_empty() {
        return String::new();
    }

    if let Some(caps) = MNT_RE.captures(path) {
        let drive = caps[1].to_ascii_uppercase();
        let rest = caps
            .get(2)
            .map(|m| trim_separators(m.as_str(), '\\'))
            .unwrap_or_default();
        return format!("{drive}:\\{rest}");
    }

    match distro {
        Some(distro) if path.starts_with('/') && !distro.is_empty() => {
            let rest = trim_separators(path, '\\');
            if rest.is_empty() {
                format!("\\\\wsl$\\{distro}\\")
            } else {
                format!("\\\\wsl$\\{distro}\\{rest}")
            }
        }
        _ => path.to_string(),
    }
}

pub fn is_windows_path(path: &str) -> bool {
    DRIVE_RE.is_match(path) || path.starts_with("\\\\")
}

pub fn is_wsl_path(path: &str) -> bool {
    path.starts_with('/') && !is_windows_path(path)
}

/// Convert when the path is in the other syntax; otherwise only switch its
/// separators to the target style.
pub fn normalize_path(path: &str, prefer_wsl: bool, distro: Option<&str>) -> String {
    if prefer_wsl && is_windows_path(path) {
        windows_to_wsl(path)
    } else if !prefer_wsl && is_wsl_path(path) {
        wsl_to_windows(path, distro)
    } else if prefer_wsl {
        path.replace('\\', "/")
    } else {
        path.replace('/', "\\")
    }
}

/// Convert unconditionally in the requested direction.
pub fn convert_path(path: &str, to_wsl: bool, distro: Option<&str>) -> String {
    if to_wsl {
        windows_to_wsl(path)
    } else {
        wsl_to_windows(path, distro)
    }
}

/// First entry of `wsl.exe --list --quiet`, which is the default distro.
pub fn detect_wsl_distro(runner: &dyn CommandRunner) -> Option<String> {
    let spec = CommandSpec::new("wsl.exe")
        .args(["--list", "--quiet"])
        .timeout(Some(std::time::Duration::from_secs(5)));
    let output = match runner.run(&spec) {
        Ok(output) if output.success() => output,
        Ok(output) => {
            debug!(status = ?output.status, "wsl --list failed");
            return None;
        }
        Err(err) => {
            debug!(error = %err, "wsl.exe unavailable");
            return None;
        }
    };
    output
        .stdout
        .lines()
        .map(|line| line.trim_matches(|c: char| c.is_whitespace() || c == '\0'))
        .find(|line| !line.is_empty())
        .map(str::to_string)
}

/// The Windows UNC path of `$HOME` inside a distro.
pub fn wsl_home_unc(runner: &dyn CommandRunner, distro: &str) -> Option<String> {
    let spec = CommandSpec::new("wsl.exe")
        .args(["--distribution", distro, "--exec", "printenv", "HOME"])
        .timeout(Some(std::time::Duration::from_secs(5)));
    let output = runner.run(&spec).ok().filter(|o| o.success())?;
    let home = output.stdout.trim();
    if home.is_empty() {
        return None;
    }
    Some(wsl_to_windows(home, Some(distro)))
}
