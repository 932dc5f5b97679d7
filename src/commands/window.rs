use anyhow::Result;
use tracing::info;

use super::{Context, EXIT_OK, table};
use crate::cli::{ArrangeCommand, NewWindowArgs, WindowCommand};
use crate::error::WtError;
use crate::history::HistoryEvent;
use crate::state::Arrangement;
use crate::wt::WindowLaunch;

pub fn run(ctx: &Context, command: WindowCommand) -> Result<u8> {
    match command {
        WindowCommand::New(args) => new_window(ctx, args),
        WindowCommand::Close { window_id, force } => {
            let label = window_id.as_deref().unwrap_or("the current window");
            if !ctx.confirm(&format!("Close {label}?"), force)? {
                ctx.say("aborted");
                return Ok(EXIT_OK);
            }
            ctx.terminal.close_window(window_id.as_deref())?;
            ctx.say("window closed");
            Ok(EXIT_OK)
        }
        WindowCommand::Focus { window_id } => {
            ctx.terminal.focus_window(&window_id)?;
            Ok(EXIT_OK)
        }
        WindowCommand::List => {
            let windows = ctx.terminal.list_windows()?;
            ctx.emit(&windows, || {
                let rows: Vec<Vec<String>> = windows
                    .iter()
                    .map(|w| {
                        vec![
                            w.id.clone(),
                            if w.active { "*".into() } else { String::new() },
                            w.title.clone(),
                            match (w.width, w.height) {
                                (Some(width), Some(height)) => format!("{width}x{height}"),
                                _ => "-".into(),
                            },
                        ]
                    })
                    .collect();
                table(&["ID", "ACTIVE", "TITLE", "SIZE"], &rows)
            })?;
            Ok(EXIT_OK)
        }
        WindowCommand::Move { x, y, window_id } => {
            ctx.terminal.move_window(window_id.as_deref(), x, y)?;
            Ok(EXIT_OK)
        }
        WindowCommand::Resize {
            width,
            height,
            window_id,
        } => {
            ctx.terminal.resize_window(window_id.as_deref(), width, height)?;
            Ok(EXIT_OK)
        }
        WindowCommand::Fullscreen { state, window_id } => {
            ctx.terminal.set_fullscreen(window_id.as_deref(), state)?;
            Ok(EXIT_OK)
        }
        WindowCommand::Arrange(command) => arrange(ctx, command),
    }
}

pub fn new_window(ctx: &Context, args: NewWindowArgs) -> Result<u8> {
    let launch = ctx.launch(None, args.command, args.startup_dir);
    let window = WindowLaunch {
        window: Some("new".to_string()),
        maximized: args.maximized,
        fullscreen: args.fullscreen,
        pos: args.pos,
        size: args.size,
        ..WindowLaunch::default()
    };
    ctx.terminal.new_window(&launch, &window)?;
    ctx.say("opened new window");
    Ok(EXIT_OK)
}

fn unknown_arrangement(name: &str) -> WtError {
    WtError::invalid("arrangement", name, "no saved arrangement with this name")
}

fn arrange(ctx: &Context, command: ArrangeCommand) -> Result<u8> {
    match command {
        ArrangeCommand::Save { name } => {
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(WtError::invalid("arrangement", name, "name is empty").into());
            }
            let arrangement = Arrangement::capture(&name, &ctx.terminal.state()?);
            let tabs = arrangement.tabs.len();
            let panes = arrangement.pane_count();
            let mut state = ctx.load_state()?;
            state.arrangements.insert(name.clone(), arrangement);
            ctx.save_state(&state)?;
            ctx.record(HistoryEvent::ArrangementSaved {
                name: name.clone(),
                tabs,
            });
            info!(name = %name, tabs, panes, "saved arrangement");
            ctx.say(format!("saved arrangement '{name}' ({tabs} tabs, {panes} panes)"));
        }
        ArrangeCommand::Restore { name } => {
            let state = ctx.load_state()?;
            let arrangement = state
                .arrangements
                .get(&name)
                .ok_or_else(|| unknown_arrangement(&name))?;
            let actions = arrangement.replay_actions();
            if actions.is_empty() {
                return Err(WtError::invalid("arrangement", name, "arrangement has no tabs").into());
            }
            ctx.terminal.wt().run(&WindowLaunch::window("new"), &actions)?;
            ctx.say(format!(
                "restored '{name}' ({} tabs, {} panes)",
                arrangement.tabs.len(),
                arrangement.pane_count()
            ));
        }
        ArrangeCommand::List => {
            let state = ctx.load_state()?;
            let arrangements: Vec<&Arrangement> = state.arrangements.values().collect();
            ctx.emit(&arrangements, || {
                let rows: Vec<Vec<String>> = arrangements
                    .iter()
                    .map(|a| {
                        vec![
                            a.name.clone(),
                            a.tabs.len().to_string(),
                            a.pane_count().to_string(),
                            a.saved_at.format("%Y-%m-%d %H:%M").to_string(),
                        ]
                    })
                    .collect();
                table(&["NAME", "TABS", "PANES", "SAVED"], &rows)
            })?;
        }
        ArrangeCommand::Delete { name, force } => {
            let mut state = ctx.load_state()?;
            if !state.arrangements.contains_key(&name) {
                return Err(unknown_arrangement(&name).into());
            }
            if !ctx.confirm(&format!("Delete arrangement '{name}'?"), force)? {
                ctx.say("aborted");
                return Ok(EXIT_OK);
            }
            state.arrangements.remove(&name);
            ctx.save_state(&state)?;
            ctx.say(format!("deleted arrangement '{name}'"));
        }
    }
    Ok(EXIT_OK)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::GlobalArgs;
    use crate::commands::tests::context;
    use crate::exec::testing::ScriptedRunner;
    use crate::pipe::testing::ScriptedPipe;
    use serde_json::json;
    use std::sync::Arc;

    fn layout() -> serde_json::Value {
        json!({
            "success": true,
            "tabs": [
                {"id": 1, "index": 0, "title": "api", "active": true,
                 "panes": [
                     {"id": 1, "profile": "Ubuntu", "cwd": "/srv/api"},
                     {"id": 2, "profile": "Ubuntu"}
                 ]},
                {"id": 2, "index": 1, "title": "", "panes": [{"id": 3, "profile": "PowerShell"}]}
            ]
        })
    }

    #[test]
    fn new_window_passes_launch_options() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        let ctx = context(
            tmp.path(),
            runner.clone(),
            &ScriptedPipe::new(),
            GlobalArgs {
                profile: Some("Ubuntu".into()),
                ..GlobalArgs::default()
            },
        );
        new_window(
            &ctx,
            NewWindowArgs {
                maximized: true,
                startup_dir: Some("/srv".into()),
                ..NewWindowArgs::default()
            },
        )
        .unwrap();
        assert_eq!(
            runner.lines(),
            vec!["wt.exe -w new --maximized new-tab --profile Ubuntu --startingDirectory /srv"]
        );
    }

    #[test]
    fn arrangement_save_restore_delete() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        let pipe = ScriptedPipe::new().respond("getState", layout());
        let ctx = context(tmp.path(), runner.clone(), &pipe, GlobalArgs::default());

        run(&ctx, WindowCommand::Arrange(ArrangeCommand::Save { name: "dev".into() })).unwrap();
        let state = ctx.load_state().unwrap();
        assert_eq!(state.arrangements["dev"].pane_count(), 3);
        let history = ctx.history.read(None).unwrap();
        assert!(matches!(history[0].event, HistoryEvent::ArrangementSaved { tabs: 2, .. }));

        run(&ctx, WindowCommand::Arrange(ArrangeCommand::Restore { name: "dev".into() })).unwrap();
        let line = &runner.lines()[0];
        let first_tab = "wt.exe -w new new-tab --profile Ubuntu --startingDirectory /srv/api";
        assert!(line.starts_with(&format!("{first_tab} --title api")));
        assert!(line.contains("; split-pane --profile Ubuntu ; new-tab --profile PowerShell"));

        run(
            &ctx,
            WindowCommand::Arrange(ArrangeCommand::Delete {
                name: "dev".into(),
                force: true,
            }),
        )
        .unwrap();
        assert!(ctx.load_state().unwrap().arrangements.is_empty());
        let err = run(
            &ctx,
            WindowCommand::Arrange(ArrangeCommand::Restore { name: "dev".into() }),
        )
        .unwrap_err();
        assert_eq!(crate::error::find_wt_error(&err).unwrap().code(), "WT030");
    }

    #[test]
    fn window_operations_use_the_pipe() {
        let tmp = tempfile::tempdir().unwrap();
        let pipe = ScriptedPipe::new();
        let ctx =
            context(tmp.path(), Arc::new(ScriptedRunner::new()), &pipe, GlobalArgs::default());
        run(
            &ctx,
            WindowCommand::Move {
                x: -1920,
                y: 0,
                window_id: Some("2".into()),
            },
        )
        .unwrap();
        run(
            &ctx,
            WindowCommand::Close {
                window_id: None,
                force: true,
            },
        )
        .unwrap();
        assert_eq!(pipe.actions(), vec!["moveWindow", "closeWindow"]);
        assert_eq!(pipe.requests()[0]["x"], -1920);
    }
}
