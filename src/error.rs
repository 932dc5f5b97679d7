//! Error codes surfaced to users.
//!
//! Every failure the tool can diagnose maps to a `WtError` variant with a
//! stable `WTnnn` code. Application code wraps these in `anyhow::Error`;
//! `main` downcasts to pick the process exit code and print a suggestion.

use std::path::PathBuf;

use thiserror::Error;

/// Process exit code for an operation that ran but failed.
pub const EXIT_FAILED: u8 = 1;
/// Process exit code for an unexpected error.
pub const EXIT_ERROR: u8 = 2;
/// Process exit code when the requested window, tab, pane or session is missing.
pub const EXIT_NOT_FOUND: u8 = 3;
/// Process exit code for an unreadable or invalid configuration.
pub const EXIT_CONFIG: u8 = 4;
/// Process exit code after Ctrl+C.
pub const EXIT_INTERRUPTED: u8 = 130;

#[derive(Debug, Error)]
pub enum WtError {
    #[error("[WT001] cannot connect to Windows Terminal pipe {pipe}: {reason}")]
    Connection { pipe: String, reason: String },

    #[error("[WT002] Windows Terminal JSON API is not available: {0}")]
    JsonApiUnavailable(String),

    #[error(
        "[WT010] command failed: {program} exited with {}{}",
        fmt_status(.status),
        fmt_stderr(.stderr)
    )]
    CommandFailed {
        program: String,
        status: Option<i32>,
        stderr: String,
    },

    #[error("[WT011] {operation} is not supported {reason}")]
    Unsupported { operation: String, reason: String },

    #[error("[WT020] shell not found: {0}")]
    ShellNotFound(String),

    #[error("[WT030] invalid {name} '{value}': {reason}")]
    InvalidArgument {
        name: String,
        value: String,
        reason: String,
    },

    #[error("[WT040] configuration error in {}: {reason}", .path.display())]
    Config { path: PathBuf, reason: String },

    #[error("[WT050] window not found: {0}")]
    WindowNotFound(String),

    #[error("[WT051] tab not found: {0}")]
    TabNotFound(String),

    #[error("[WT052] pane not found: {0}")]
    PaneNotFound(String),

    #[error("[WT053] session not found: {0}")]
    SessionNotFound(String),

    #[error("[WT054] session limit reached ({0} active sessions)")]
    SessionLimit(usize),

    #[error("[WT060] {operation} timed out after {seconds:.1}s")]
    Timeout { operation: String, seconds: f64 },
}

fn fmt_status(status: &Option<i32>) -> String {
    match status {
        Some(code) => format!("code {code}"),
        None => "no exit code".to_string(),
    }
}

fn fmt_stderr(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(": {trimmed}")
    }
}

impl WtError {
    pub fn invalid(name: &str, value: impl Into<String>, reason: impl Into<String>) -> Self {
        WtError::InvalidArgument {
            name: name.to_string(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    pub fn unsupported(operation: &str, reason: impl Into<String>) -> Self {
        WtError::Unsupported {
            operation: operation.to_string(),
            reason: reason.into(),
        }
    }

    /// The stable `WTnnn` code of this error.
    pub fn code(&self) -> &'static str {
        match self {
            WtError::Connection { .. } => "WT001",
            WtError::JsonApiUnavailable(_) => "WT002",
            WtError::CommandFailed { .. } => "WT010",
            WtError::Unsupported { .. } => "WT011",
            WtError::ShellNotFound(_) => "WT020",
            WtError::InvalidArgument { .. } => "WT030",
            WtError::Config { .. } => "WT040",
            WtError::WindowNotFound(_) => "WT050",
            WtError::TabNotFound(_) => "WT051",
            WtError::PaneNotFound(_) => "WT052",
            WtError::SessionNotFound(_) => "WT053",
            WtError::SessionLimit(_) => "WT054",
            WtError::Timeout { .. } => "WT060",
        }
    }

    pub fn exit_code(&self) -> u8 {
        match self {
            WtError::WindowNotFound(_)
            | WtError::TabNotFound(_)
            | WtError::PaneNotFound(_)
            | WtError::SessionNotFound(_) => EXIT_NOT_FOUND,
            WtError::Config { .. } => EXIT_CONFIG,
            WtError::InvalidArgument { .. } => EXIT_ERROR,
            _ => EXIT_FAILED,
        }
    }

    /// A hint printed under the error message, when one helps.
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            WtError::Connection { .. } | WtError::JsonApiUnavailable(_) => Some(
                "enable the experimental JSON API in Windows Terminal settings.json \
                 (\"experimental.enableJsonApi\": true) and restart the terminal",
            ),
            WtError::Unsupported { .. } => {
                Some(
                    "set \"experimental.enableJsonApi\": true in Windows Terminal settings.json, \
                     or run `wt2 doctor` to see which backends are available",
                )
            }
            WtError::ShellNotFound(_) => {
                Some("install the shell or pick another one with --shell")
            }
            WtError::Config { .. } => Some("run `wt2 config init --force` to regenerate a config"),
            WtError::PaneNotFound(_) | WtError::TabNotFound(_) => {
                Some("list targets with `wt2 pane list` or `wt2 tab list`")
            }
            WtError::SessionNotFound(_) => Some("list sessions with `wt2 session list`"),
            WtError::SessionLimit(_) => {
                Some("close idle sessions or raise sessions.max_connections")
            }
            WtError::Timeout { .. } => Some("raise terminal.timeout_secs or pass --timeout"),
            _ => None,
        }
    }
}

/// Resolve the exit code for an error chain, looking for a `WtError` anywhere in it.
pub fn exit_code_for(err: &anyhow::Error) -> u8 {
    find_wt_error(err)
        .map(WtError::exit_code)
        .unwrap_or(EXIT_ERROR)
}

/// The outermost `WtError`, including one attached as context.
pub fn find_wt_error(err: &anyhow::Error) -> Option<&WtError> {
    err.downcast_ref::<WtError>()
        .or_else(|| err.chain().find_map(|cause| cause.downcast_ref::<WtError>()))
}

/// Find the first suggestion attached to an error chain.
pub fn suggestion_for(err: &anyhow::Error) -> Option<&'static str> {
    find_wt_error(err).and_then(WtError::suggestion).or_else(|| {
        err.chain()
            .filter_map(|cause| cause.downcast_ref::<WtError>())
            .find_map(WtError::suggestion)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn command_failed_message_includes_code_and_stderr() {
        let err = WtError::CommandFailed {
            program: "wt.exe".to_string(),
            status: Some(2),
            stderr: "  bad flag \n".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "[WT010] command failed: wt.exe exited with code 2: bad flag"
        );
        assert_eq!(err.code(), "WT010");
    }

    #[test]
    fn command_failed_without_stderr_omits_suffix() {
        let err = WtError::CommandFailed {
            program: "cmd.exe".to_string(),
            status: None,
            stderr: String::new(),
        };
        assert_eq!(
            err.to_string(),
            "[WT010] command failed: cmd.exe exited with no exit code"
        );
    }

    #[test]
    fn not_found_errors_map_to_exit_code_three() {
        for err in [
            WtError::WindowNotFound("1".into()),
            WtError::TabNotFound("2".into()),
            WtError::PaneNotFound("3".into()),
            WtError::SessionNotFound("abc".into()),
        ] {
            assert_eq!(err.exit_code(), EXIT_NOT_FOUND, "{err}");
        }
    }

    #[test]
    fn exit_code_is_found_through_context_layers() {
        let result: anyhow::Result<()> = Err(WtError::Config {
            path: PathBuf::from("wt2rc.yaml"),
            reason: "bad yaml".into(),
        })
        .context("failed to load config")
        .context("startup");
        let err = result.unwrap_err();
        assert_eq!(exit_code_for(&err), EXIT_CONFIG);
        assert!(suggestion_for(&err).unwrap().contains("config init"));
    }

    #[test]
    fn plain_anyhow_error_is_internal() {
        let err = anyhow::anyhow!("boom");
        assert_eq!(exit_code_for(&err), EXIT_ERROR);
        assert!(suggestion_for(&err).is_none());
    }

    #[test]
    fn timeout_formats_seconds() {
        let err = WtError::Timeout {
            operation: "wsl.exe --list".into(),
            seconds: 2.5,
        };
        assert_eq!(err.to_string(), "[WT060] wsl.exe --list timed out after 2.5s");
    }
}
