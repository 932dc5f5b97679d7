use anyhow::Result;

use super::{Context, EXIT_OK};
use crate::broadcast::{self as fanout, SendOptions, TargetSelector};
use crate::cli::{BroadcastCommand, BroadcastTargetArgs};
use crate::error::{EXIT_FAILED, WtError};
use crate::history::HistoryEvent;

fn selector(args: &BroadcastTargetArgs) -> TargetSelector {
    TargetSelector::from_flags(args.all, args.panes.as_deref(), args.tabs.as_deref())
}

pub fn run(ctx: &Context, command: BroadcastCommand) -> Result<u8> {
    match command {
        BroadcastCommand::On(args) => {
            let selector = selector(&args);
            if selector == TargetSelector::Saved {
                return Err(WtError::invalid(
                    "targets",
                    "",
                    "pick panes with --all, --panes or --tabs",
                )
                .into());
            }
            let live = if selector.needs_state() {
                Some(ctx.terminal.state()?)
            } else {
                None
            };
            let mut state = ctx.load_state()?;
            let panes = selector.resolve(live.as_ref(), &state.broadcast);
            if panes.is_empty() {
                let reason = "no panes matched the broadcast targets".to_string();
                return Err(WtError::PaneNotFound(reason).into());
            }
            state.broadcast.enable(panes);
            ctx.save_state(&state)?;
            ctx.emit(&state.broadcast, || {
                format!("broadcasting to panes {}", state.broadcast.panes.join(", "))
            })?;
        }
        BroadcastCommand::Off => {
            let mut state = ctx.load_state()?;
            state.broadcast.disable();
            ctx.save_state(&state)?;
            ctx.say("broadcast off");
        }
        BroadcastCommand::Send { command, targets } => {
            if !ctx.config.broadcast.enabled {
                let reason = "while broadcast.enabled is false";
                return Err(WtError::unsupported("broadcast", reason).into());
            }
            let command = command.join(" ");
            let state = ctx.load_state()?;
            let report = fanout::broadcast(
                &ctx.terminal,
                &selector(&targets),
                &state.broadcast,
                &command,
                &SendOptions::from_config(&ctx.config.broadcast, ctx.explicit_shell()),
            )?;
            ctx.record(HistoryEvent::Broadcast {
                command: report.command.clone(),
                sent: report.sent(),
                total: report.total(),
            });
            ctx.emit(&report, || {
                let mut out = format!("sent to {}/{} panes\n", report.sent(), report.total());
                for failed in report.results.iter().filter(|r| !r.success) {
                    out.push_str(&format!(
                        "  pane {}: {}\n",
                        failed.pane,
                        failed.error.as_deref().unwrap_or("failed")
                    ));
                }
                out
            })?;
            if !report.all_sent() {
                return Ok(EXIT_FAILED);
            }
        }
        BroadcastCommand::Status => {
            let state = ctx.load_state()?;
            ctx.emit(&state.broadcast, || {
                if state.broadcast.enabled {
                    format!("broadcast on: panes {}", state.broadcast.panes.join(", "))
                } else {
                    "broadcast off".to_string()
                }
            })?;
        }
    }
    Ok(EXIT_OK)
}
