use anyhow::Result;

use super::{Context, EXIT_OK, table};
use crate::cli::{PaneCommand, SplitArgs};
use crate::wt::{Direction, SplitDirection};

pub fn run(ctx: &Context, command: PaneCommand) -> Result<u8> {
    match command {
        PaneCommand::Split { direction, args } => return split(ctx, direction, args),
        PaneCommand::Vsplit(args) => return split(ctx, SplitDirection::Vertical, args),
        PaneCommand::Close { pane_id, force } => {
            let label = pane_id.as_deref().unwrap_or("the focused pane");
            if !ctx.confirm(&format!("Close {label}?"), force)? {
                ctx.say("aborted");
                return Ok(EXIT_OK);
            }
            ctx.terminal.close_pane(pane_id.as_deref())?;
        }
        PaneCommand::Focus { target } => focus(ctx, &target)?,
        PaneCommand::Resize {
            direction,
            amount,
            pane_id,
        } => ctx.terminal.resize_pane(pane_id.as_deref(), direction, amount)?,
        PaneCommand::List { tab_id } => {
            let panes = ctx.terminal.list_panes(tab_id.as_deref())?;
            ctx.emit(&panes, || {
                let rows: Vec<Vec<String>> = panes
                    .iter()
                    .map(|pane| {
                        vec![
                            pane.id.clone(),
                            if pane.active { "*".into() } else { String::new() },
                            pane.profile.clone().unwrap_or_default(),
                            pane.cwd.clone().unwrap_or_default(),
                            pane.title.clone(),
                        ]
                    })
                    .collect();
                table(&["ID", "ACTIVE", "PROFILE", "CWD", "TITLE"], &rows)
            })?;
        }
        PaneCommand::Zoom { pane_id } => ctx.terminal.toggle_zoom(pane_id.as_deref())?,
        PaneCommand::Swap { direction } => ctx.terminal.swap_pane(direction)?,
        PaneCommand::Split2x2 => {
            let launch = ctx.launch(None, None, None);
            ctx.terminal.split_grid_2x2(&launch)?;
        }
    }
    Ok(EXIT_OK)
}

pub fn split(ctx: &Context, direction: SplitDirection, args: SplitArgs) -> Result<u8> {
    let launch = ctx.launch(args.title, args.command, args.startup_dir);
    ctx.terminal.split_pane(direction, args.size, &launch)?;
    Ok(EXIT_OK)
}

/// A number focuses that pane index; anything else is a direction.
pub fn focus(ctx: &Context, target: &str) -> Result<()> {
    match target.trim().parse::<u32>() {
        Ok(index) => ctx.terminal.focus_pane_id(index),
        Err(_) => ctx.terminal.focus_pane(target.parse::<Direction>()?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::GlobalArgs;
    use crate::commands::tests::context;
    use crate::exec::testing::ScriptedRunner;
    use crate::pipe::testing::ScriptedPipe;
    use std::sync::Arc;

    #[test]
    fn split_shortcuts_map_to_wt_flags() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        let ctx = context(tmp.path(), runner.clone(), &ScriptedPipe::new(), GlobalArgs::default());
        split(
            &ctx,
            SplitDirection::Horizontal,
            SplitArgs {
                size: Some(0.3),
                ..SplitArgs::default()
            },
        )
        .unwrap();
        run(&ctx, PaneCommand::Vsplit(SplitArgs::default())).unwrap();
        assert_eq!(
            runner.lines(),
            vec!["wt.exe -w 0 split-pane -H --size 0.3", "wt.exe -w 0 split-pane -V"]
        );
        assert!(split(
            &ctx,
            SplitDirection::Vertical,
            SplitArgs {
                size: Some(1.5),
                ..SplitArgs::default()
            }
        )
        .is_err());
    }

    #[test]
    fn focus_accepts_index_or_direction() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        let ctx = context(tmp.path(), runner.clone(), &ScriptedPipe::new(), GlobalArgs::default());
        focus(&ctx, "2").unwrap();
        focus(&ctx, "left").unwrap();
        assert_eq!(
            runner.lines(),
            vec!["wt.exe -w 0 focus-pane -t 2", "wt.exe -w 0 move-focus left"]
        );
        let err = focus(&ctx, "sideways").unwrap_err();
        assert_eq!(crate::error::find_wt_error(&err).unwrap().code(), "WT030");
    }

    #[test]
    fn zoom_and_resize_go_through_the_pipe() {
        let tmp = tempfile::tempdir().unwrap();
        let pipe = ScriptedPipe::new();
        let ctx =
            context(tmp.path(), Arc::new(ScriptedRunner::new()), &pipe, GlobalArgs::default());
        run(&ctx, PaneCommand::Zoom { pane_id: None }).unwrap();
        run(
            &ctx,
            PaneCommand::Resize {
                direction: Direction::Down,
                amount: 4,
                pane_id: Some("3".into()),
            },
        )
        .unwrap();
        assert_eq!(pipe.actions(), vec!["togglePaneZoom", "resizePane"]);
    }
}
