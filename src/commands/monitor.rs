use std::io::IsTerminal;
use std::time::Duration;

use anyhow::Result;

use super::{Context, EXIT_OK, timeout_from};
use crate::cli::MonitorCommand;
use crate::error::{EXIT_INTERRUPTED, WtError};
use crate::monitor::{self, FollowOptions, FollowSummary, OutputFilter, OutputMonitor, StopReason};

pub fn run(ctx: &Context, command: MonitorCommand) -> Result<u8> {
    match command {
        MonitorCommand::Follow {
            pane_id,
            filter,
            regex,
            timeout,
            lines,
        } => {
            let filter = filter.or_else(|| ctx.config.monitor.filter.clone());
            let opts = FollowOptions {
                pane: pane_id,
                initial_lines: lines,
                timeout: timeout_from(timeout)?,
                max_matches: None,
                poll_interval: Duration::from_millis(ctx.config.monitor.poll_interval_ms),
            };
            let monitor =
                OutputMonitor::new(build_filter(filter.as_deref(), regex)?, highlight(ctx));
            watch(ctx, monitor, &opts)
        }
        MonitorCommand::Watch {
            keyword,
            pane_id,
            regex,
            count,
            timeout,
        } => {
            let timeout = timeout_from(timeout)?;
            let opts = FollowOptions {
                pane: pane_id,
                initial_lines: 0,
                timeout,
                max_matches: Some(count.unwrap_or(1).max(1)),
                poll_interval: Duration::from_millis(ctx.config.monitor.poll_interval_ms),
            };
            let monitor = OutputMonitor::new(build_filter(Some(&keyword), regex)?, highlight(ctx));
            watch(ctx, monitor, &opts)
        }
        MonitorCommand::Tail {
            lines,
            pane_id,
            follow,
            no_follow,
            timeout,
        } => {
            if follow || (ctx.config.monitor.follow && !no_follow) {
                let opts = FollowOptions {
                    pane: pane_id,
                    initial_lines: lines,
                    timeout: timeout_from(timeout)?,
                    max_matches: None,
                    poll_interval: Duration::from_millis(ctx.config.monitor.poll_interval_ms),
                };
                let filter = build_filter(ctx.config.monitor.filter.as_deref(), false)?;
                return watch(ctx, OutputMonitor::new(filter, highlight(ctx)), &opts);
            }
            let output = monitor::tail(&ctx.terminal, pane_id.as_deref(), lines)?;
            ctx.emit(&output, || output.join("\n"))?;
            Ok(EXIT_OK)
        }
    }
}

fn build_filter(pattern: Option<&str>, regex: bool) -> Result<Option<OutputFilter>, WtError> {
    pattern
        .map(|p| {
            if regex {
                OutputFilter::regex(p)
            } else {
                OutputFilter::keyword(p)
            }
        })
        .transpose()
}

/// Highlight matches only on an interactive terminal.
fn highlight(ctx: &Context) -> bool {
    ctx.config.monitor.highlight && !ctx.json() && std::io::stdout().is_terminal()
}

fn watch(ctx: &Context, mut monitor: OutputMonitor, opts: &FollowOptions) -> Result<u8> {
    let stop = monitor::interrupt_flag();
    let json = ctx.json();
    let summary = monitor::follow(&ctx.terminal, &mut monitor, opts, &stop, |line| {
        if !json {
            println!("{line}");
        }
    })?;
    ctx.emit(&summary, String::new)?;
    exit_code(&summary, opts)
}

/// Ctrl+C exits 130. A watch that times out before its first match is `WT060`.
fn exit_code(summary: &FollowSummary, opts: &FollowOptions) -> Result<u8> {
    match summary.reason {
        StopReason::Interrupted => Ok(EXIT_INTERRUPTED),
        StopReason::Timeout if opts.max_matches.is_some() && summary.stats.lines_matched == 0 => {
            Err(WtError::Timeout {
                operation: "watch".to_string(),
                seconds: opts.timeout.map(|t| t.as_secs_f64()).unwrap_or_default(),
            }
            .into())
        }
        _ => Ok(EXIT_OK),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::GlobalArgs;
    use crate::commands::tests::{context, context_with};
    use crate::config::Config;
    use crate::exec::testing::ScriptedRunner;
    use crate::monitor::MonitorStats;
    use crate::pipe::testing::ScriptedPipe;
    use serde_json::json;
    use std::sync::Arc;

    fn summary(reason: StopReason, matched: usize) -> FollowSummary {
        FollowSummary {
            reason,
            stats: MonitorStats {
                lines_total: 10,
                lines_matched: matched,
            },
        }
    }

    #[test]
    fn exit_codes_follow_stop_reason() {
        let follow = FollowOptions::default();
        let watch = FollowOptions {
            max_matches: Some(1),
            timeout: Some(Duration::from_secs(2)),
            ..FollowOptions::default()
        };
        assert_eq!(
            exit_code(&summary(StopReason::Interrupted, 0), &follow).unwrap(),
            EXIT_INTERRUPTED
        );
        assert_eq!(exit_code(&summary(StopReason::Timeout, 0), &follow).unwrap(), EXIT_OK);
        assert_eq!(exit_code(&summary(StopReason::MatchLimit, 1), &watch).unwrap(), EXIT_OK);
        let err = exit_code(&summary(StopReason::Timeout, 0), &watch).unwrap_err();
        assert_eq!(crate::error::find_wt_error(&err).unwrap().code(), "WT060");
    }

    #[test]
    fn filter_choice() {
        assert!(build_filter(None, false).unwrap().is_none());
        let keyword = build_filter(Some("a.b"), false).unwrap().unwrap();
        assert!(keyword.is_match("xA.Bx"));
        assert!(!keyword.is_match("axb"));
        let regex = build_filter(Some("a.b"), true).unwrap().unwrap();
        assert!(regex.is_match("axb"));
        assert!(build_filter(Some("("), true).is_err());
    }

    #[test]
    fn watch_ignores_backlog_and_times_out() {
        let tmp = tempfile::tempdir().unwrap();
        let pipe = ScriptedPipe::new().respond(
            "getOutput",
            json!({"success": true, "output": "building\nBUILD SUCCEEDED\n"}),
        );
        let ctx =
            context(tmp.path(), Arc::new(ScriptedRunner::new()), &pipe, GlobalArgs::default());
        let err = run(
            &ctx,
            MonitorCommand::Watch {
                keyword: "succeeded".into(),
                pane_id: Some("2".into()),
                regex: false,
                count: None,
                timeout: Some(0.2),
            },
        )
        .unwrap_err();
        assert_eq!(crate::error::find_wt_error(&err).unwrap().code(), "WT060");
        assert!(pipe.actions().iter().all(|a| a == "getOutput"));
        assert_eq!(pipe.requests()[0]["paneId"], "2");
    }

    fn tail(follow: bool, no_follow: bool) -> MonitorCommand {
        MonitorCommand::Tail {
            lines: 5,
            pane_id: None,
            follow,
            no_follow,
            timeout: Some(0.2),
        }
    }

    #[test]
    fn configured_follow_keeps_tail_polling() {
        let tmp = tempfile::tempdir().unwrap();
        let pipe =
            ScriptedPipe::new().respond("getOutput", json!({"success": true, "output": "a\nb\n"}));
        let mut config = Config::default();
        config.monitor.follow = true;
        config.monitor.poll_interval_ms = 20;
        let ctx = context_with(
            config,
            tmp.path(),
            Arc::new(ScriptedRunner::new()),
            &pipe,
            GlobalArgs::default(),
        );

        assert_eq!(run(&ctx, tail(false, true)).unwrap(), EXIT_OK);
        assert_eq!(pipe.actions().len(), 1);

        assert_eq!(run(&ctx, tail(false, false)).unwrap(), EXIT_OK);
        assert!(pipe.actions().len() > 2, "{:?}", pipe.actions());
    }

    #[test]
    fn tail_prints_once_by_default() {
        let tmp = tempfile::tempdir().unwrap();
        let pipe =
            ScriptedPipe::new().respond("getOutput", json!({"success": true, "output": "a\n"}));
        let ctx =
            context(tmp.path(), Arc::new(ScriptedRunner::new()), &pipe, GlobalArgs::default());
        run(&ctx, tail(false, false)).unwrap();
        assert_eq!(pipe.actions(), vec!["getOutput"]);
    }
}
