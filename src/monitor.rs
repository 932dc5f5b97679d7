//! Pane output monitoring.
//!
//! Windows Terminal has no output stream, so the monitor polls `getOutput`
//! and diffs each snapshot against the previous one to find new lines. Lines
//! are ANSI-stripped, filtered by keyword or regex, and optionally
//! highlighted before they reach the caller's sink.

use std::sync::Arc;
use std::sync::LazyLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::Result;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::WtError;
use crate::terminal::Terminal;

const HIGHLIGHT_START: &str = "\x1b[1;33m";
const HIGHLIGHT_END: &str = "\x1b[0m";

/// Lines requested per poll; enough to bridge a burst between polls.
const POLL_WINDOW: usize = 200;

/// Strip ANSI escape sequences from pane output.
pub fn strip_ansi(input: &str) -> String {
    // CSI, OSC terminated by BEL or ST, and two-byte escapes.
    static ANSI_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[^\[\]]")
            .expect("valid ANSI regex")
    });
    ANSI_RE.replace_all(input, "").to_string()
}

/// Lines that match this filter are shown; the rest are counted and dropped.
#[derive(Debug, Clone)]
pub struct OutputFilter {
    pattern: Regex,
}

impl OutputFilter {
    /// Case-insensitive substring match.
    pub fn keyword(keyword: &str) -> Result<Self, WtError> {
        Self::build(&format!("(?i){}", regex::escape(keyword)), keyword)
    }

    pub fn regex(pattern: &str) -> Result<Self, WtError> {
        Self::build(pattern, pattern)
    }

    fn build(pattern: &str, shown: &str) -> Result<Self, WtError> {
        if shown.is_empty() {
            return Err(WtError::invalid("filter", shown, "must not be empty"));
        }
        Regex::new(pattern)
            .map(|pattern| Self { pattern })
            .map_err(|err| WtError::invalid("filter", shown, err.to_string()))
    }

    pub fn is_match(&self, line: &str) -> bool {
        self.pattern.is_match(line)
    }

    fn highlight(&self, line: &str) -> String {
        self.pattern
            .replace_all(line, |caps: &regex::Captures<'_>| {
                format!("{HIGHLIGHT_START}{}{HIGHLIGHT_END}", &caps[0])
            })
            .to_string()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MonitorStats {
    pub lines_total: usize,
    pub lines_matched: usize,
}

/// Filters and counts lines.
#[derive(Debug, Clone, Default)]
pub struct OutputMonitor {
    filter: Option<OutputFilter>,
    highlight: bool,
    stats: MonitorStats,
}

impl OutputMonitor {
    pub fn new(filter: Option<OutputFilter>, highlight: bool) -> Self {
        Self {
            filter,
            highlight,
            stats: MonitorStats::default(),
        }
    }

    /// The line to display, or `None` when the filter rejects it.
    pub fn process(&mut self, raw: &str) -> Option<String> {
        let line = strip_ansi(raw);
        self.stats.lines_total += 1;
        match self.filter {
            None => Some(line),
            Some(ref filter) if filter.is_match(&line) => {
                self.stats.lines_matched += 1;
                if self.highlight {
                    Some(filter.highlight(&line))
                } else {
                    Some(line)
                }
            }
            Some(_) => None,
        }
    }

    pub fn stats(&self) -> MonitorStats {
        self.stats
    }
}

/// Lines of `current` that were not in `previous`.
///
/// Finds the longest suffix of `previous` that is a prefix of `current`; if
/// the snapshots share nothing the whole of `current` is new.
pub fn new_lines<'a>(previous: &[String], current: &'a [String]) -> &'a [String] {
    let max = previous.len().min(current.len());
    for overlap in (1..=max).rev() {
        if previous[previous.len() - overlap..] == current[..overlap] {
            return &current[overlap..];
        }
    }
    current
}

#[derive(Debug, Clone)]
pub struct FollowOptions {
    pub pane: Option<String>,
    /// Backlog printed before following.
    pub initial_lines: usize,
    pub timeout: Option<Duration>,
    /// Stop after this many matched lines.
    pub max_matches: Option<usize>,
    pub poll_interval: Duration,
}

impl Default for FollowOptions {
    fn default() -> Self {
        Self {
            pane: None,
            initial_lines: 0,
            timeout: None,
            max_matches: None,
            poll_interval: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Interrupted,
    Timeout,
    MatchLimit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FollowSummary {
    pub reason: StopReason,
    #[serde(flatten)]
    pub stats: MonitorStats,
}

/// Poll a pane until `stop` is set, the timeout passes or enough lines matched.
pub fn follow(
    terminal: &Terminal,
    monitor: &mut OutputMonitor,
    opts: &FollowOptions,
    stop: &AtomicBool,
    mut sink: impl FnMut(&str),
) -> Result<FollowSummary> {
    let pane = opts.pane.as_deref();
    let started = Instant::now();
    let mut previous = terminal.read_output(pane, POLL_WINDOW)?;
    let backlog = previous.len().saturating_sub(opts.initial_lines);
    for line in &previous[backlog..] {
        if let Some(shown) = monitor.process(line) {
            sink(&shown);
        }
    }
    info!(pane = ?pane, timeout = ?opts.timeout, "following pane output");

    let reason = loop {
        if stop.load(Ordering::Relaxed) {
            break StopReason::Interrupted;
        }
        if opts
            .max_matches
            .is_some_and(|max| monitor.stats().lines_matched >= max)
        {
            break StopReason::MatchLimit;
        }
        if opts.timeout.is_some_and(|timeout| started.elapsed() >= timeout) {
            break StopReason::Timeout;
        }
        std::thread::sleep(opts.poll_interval);

        let current = terminal.read_output(pane, POLL_WINDOW)?;
        let fresh = new_lines(&previous, &current);
        debug!(new = fresh.len(), "polled pane output");
        for line in fresh {
            if let Some(shown) = monitor.process(line) {
                sink(&shown);
            }
            if opts
                .max_matches
                .is_some_and(|max| monitor.stats().lines_matched >= max)
            {
                break;
            }
        }
        previous = current;
    };

    let summary = FollowSummary {
        reason,
        stats: monitor.stats(),
    };
    info!(
        reason = ?summary.reason,
        total = summary.stats.lines_total,
        matched = summary.stats.lines_matched,
        "stopped following"
    );
    Ok(summary)
}

/// The last `lines` lines of a pane, ANSI-stripped.
pub fn tail(terminal: &Terminal, pane: Option<&str>, lines: usize) -> Result<Vec<String>> {
    Ok(terminal
        .read_output(pane, lines)?
        .iter()
        .map(|line| strip_ansi(line))
        .collect())
}

/// A flag raised by Ctrl+C.
///
/// Only one handler can be installed per process; later calls get a flag
/// that is never raised by the signal.
pub fn interrupt_flag() -> Arc<AtomicBool> {
    let stop = Arc::new(AtomicBool::new(false));
    let raised = Arc::clone(&stop);
    if let Err(err) = ctrlc::set_handler(move || raised.store(true, Ordering::Relaxed)) {
        debug!(error = %err, "Ctrl+C handler not installed");
    }
    stop
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::testing::ScriptedRunner;
    use crate::pipe::testing::ScriptedPipe;
    use crate::wt::WtCli;
    use serde_json::json;

    fn lines(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn terminal(pipe: &ScriptedPipe) -> Terminal {
        Terminal::new(
            WtCli::with_path(Arc::new(ScriptedRunner::new()), "wt.exe", Duration::from_secs(5)),
            Some(pipe.client()),
            false,
        )
    }

    #[test]
    fn strip_ansi_removes_color_and_titles() {
        assert_eq!(strip_ansi("\x1b[31merror\x1b[0m: x"), "error: x");
        assert_eq!(strip_ansi("\x1b]0;title\x07prompt> "), "prompt> ");
        assert_eq!(strip_ansi("plain"), "plain");
    }

    #[test]
    fn keyword_filter_is_case_insensitive_and_literal() {
        let filter = OutputFilter::keyword("Error.").unwrap();
        assert!(filter.is_match("an ERROR. happened"));
        assert!(!filter.is_match("errors"));
        assert!(OutputFilter::keyword("").is_err());
    }

    #[test]
    fn bad_regex_is_invalid_argument() {
        let err = OutputFilter::regex("(unclosed").unwrap_err();
        assert_eq!(err.code(), "WT030");
        assert!(OutputFilter::regex(r"^\d+ passed$").unwrap().is_match("12 passed"));
    }

    #[test]
    fn monitor_counts_and_highlights() {
        let mut monitor = OutputMonitor::new(Some(OutputFilter::keyword("fail").unwrap()), true);
        assert_eq!(monitor.process("ok"), None);
        assert_eq!(
            monitor.process("\x1b[31mtest FAILED\x1b[0m").unwrap(),
            format!("test {HIGHLIGHT_START}FAIL{HIGHLIGHT_END}ED")
        );
        assert_eq!(
            monitor.stats(),
            MonitorStats {
                lines_total: 2,
                lines_matched: 1
            }
        );

        let mut plain = OutputMonitor::default();
        assert_eq!(plain.process("anything").as_deref(), Some("anything"));
        assert_eq!(plain.stats().lines_matched, 0);
    }

    #[test]
    fn new_lines_uses_snapshot_overlap() {
        let prev = lines(&["a", "b", "c"]);
        assert_eq!(new_lines(&prev, &lines(&["b", "c", "d", "e"])), lines(&["d", "e"]).as_slice());
        assert!(new_lines(&prev, &prev).is_empty());
        assert_eq!(new_lines(&prev, &lines(&["x"])), lines(&["x"]).as_slice());
        assert_eq!(new_lines(&[], &lines(&["x"])), lines(&["x"]).as_slice());
    }

    #[test]
    fn follow_stops_at_match_limit() {
        let pipe = ScriptedPipe::new().respond(
            "getOutput",
            json!({"success": true, "output": "build ok\nwarning: a\nwarning: b\n"}),
        );
        let terminal = terminal(&pipe);
        let mut monitor =
            OutputMonitor::new(Some(OutputFilter::keyword("warning").unwrap()), false);
        let opts = FollowOptions {
            initial_lines: 10,
            max_matches: Some(2),
            poll_interval: Duration::from_millis(1),
            ..FollowOptions::default()
        };
        let mut seen = Vec::new();
        let summary = follow(&terminal, &mut monitor, &opts, &AtomicBool::new(false), |line| {
            seen.push(line.to_string())
        })
        .unwrap();
        assert_eq!(summary.reason, StopReason::MatchLimit);
        assert_eq!(seen, vec!["warning: a", "warning: b"]);
        assert_eq!(summary.stats.lines_total, 3);
    }

    #[test]
    fn follow_honors_stop_flag_and_timeout() {
        let pipe =
            ScriptedPipe::new().respond("getOutput", json!({"success": true, "lines": ["x"]}));
        let terminal = terminal(&pipe);
        let mut monitor = OutputMonitor::default();
        let stopped = follow(
            &terminal,
            &mut monitor,
            &FollowOptions::default(),
            &AtomicBool::new(true),
            |_| {},
        )
        .unwrap();
        assert_eq!(stopped.reason, StopReason::Interrupted);
        // No backlog requested.
        assert_eq!(stopped.stats.lines_total, 0);

        let opts = FollowOptions {
            timeout: Some(Duration::from_millis(20)),
            poll_interval: Duration::from_millis(5),
            ..FollowOptions::default()
        };
        let timed =
            follow(&terminal, &mut monitor, &opts, &AtomicBool::new(false), |_| {}).unwrap();
        assert_eq!(timed.reason, StopReason::Timeout);
    }

    #[test]
    fn tail_strips_and_limits() {
        let pipe = ScriptedPipe::new().respond(
            "getOutput",
            json!({"success": true, "output": "one\n\x1b[32mtwo\x1b[0m\nthree"}),
        );
        let terminal = terminal(&pipe);
        assert_eq!(tail(&terminal, Some("3"), 2).unwrap(), vec!["two", "three"]);
        assert_eq!(pipe.requests()[0]["paneId"], "3");
        assert_eq!(pipe.requests()[0]["lines"], 2);
    }
}
