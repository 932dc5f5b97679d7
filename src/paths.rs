use std::path::{Path, PathBuf};

/// Overrides the state directory.
pub const HOME_ENV: &str = "WT2_HOME";

pub const STATE_FILE: &str = "state.json";
pub const HISTORY_FILE: &str = "history.jsonl";

/// Resolve the state directory from an override and a home directory.
///
/// The override wins when non-empty; otherwise `<home>/.wt2`, or `.wt2`
/// relative to the working directory when no home is known.
pub fn resolve_state_dir(override_dir: Option<&str>, home: Option<&Path>) -> PathBuf {
    match override_dir.map(str::trim).filter(|dir| !dir.is_empty()) {
        Some(dir) => PathBuf::from(dir),
        None => home
            .map(|home| home.join(".wt2"))
            .unwrap_or_else(|| PathBuf::from(".wt2")),
    }
}

/// `~/.wt2`, or `$WT2_HOME` when set.
pub fn state_dir() -> PathBuf {
    let override_dir = std::env::var(HOME_ENV).ok();
    resolve_state_dir(override_dir.as_deref(), dirs::home_dir().as_deref())
}

pub fn state_file(dir: &Path) -> PathBuf {
    dir.join(STATE_FILE)
}

pub fn history_file(dir: &Path) -> PathBuf {
    dir.join(HISTORY_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn override_wins_over_home() {
        let dir = resolve_state_dir(Some(r"D:\wt2-state"), Some(Path::new("/home/dev")));
        assert_eq!(dir, PathBuf::from(r"D:\wt2-state"));
    }

    #[test]
    fn blank_override_falls_back_to_home() {
        let dir = resolve_state_dir(Some("  "), Some(Path::new("/home/dev")));
        assert_eq!(dir, Path::new("/home/dev").join(".wt2"));
    }

    #[test]
    fn no_home_uses_relative_dir() {
        assert_eq!(resolve_state_dir(None, None), PathBuf::from(".wt2"));
    }

    #[test]
    fn file_names_live_in_state_dir() {
        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(state_file(tmp.path()), tmp.path().join("state.json"));
        assert_eq!(history_file(tmp.path()), tmp.path().join("history.jsonl"));
    }

    #[test]
    #[serial]
    fn state_dir_reads_environment() {
        let tmp = tempfile::tempdir().unwrap();
        // SAFETY: serialized with every other test that touches the environment.
        unsafe { std::env::set_var(HOME_ENV, tmp.path()) };
        assert_eq!(state_dir(), tmp.path());
        unsafe { std::env::remove_var(HOME_ENV) };
    }
}
