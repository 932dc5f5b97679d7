use anyhow::Result;

use super::{Context, EXIT_OK, table};
use crate::cli::{NewTabArgs, TabCommand};
use crate::error::WtError;

pub fn run(ctx: &Context, command: TabCommand) -> Result<u8> {
    match command {
        TabCommand::New(args) => return new_tab(ctx, args),
        TabCommand::Close { tab_id, force } => {
            let tab_id = match tab_id {
                Some(id) => id,
                None => active_tab(ctx)?,
            };
            if !ctx.confirm(&format!("Close tab {tab_id}?"), force)? {
                ctx.say("aborted");
                return Ok(EXIT_OK);
            }
            ctx.terminal.close_tab(&tab_id)?;
            ctx.say(format!("closed tab {tab_id}"));
        }
        TabCommand::Focus { tab_id } => ctx.terminal.focus_tab(&tab_id)?,
        TabCommand::Select { index } => ctx.terminal.select_tab(index)?,
        TabCommand::List { window_id } => {
            let tabs: Vec<_> = ctx
                .terminal
                .list_tabs()?
                .into_iter()
                .filter(|tab| {
                    window_id
                        .as_deref()
                        .is_none_or(|w| tab.window_id.as_deref() == Some(w))
                })
                .collect();
            ctx.emit(&tabs, || {
                let rows: Vec<Vec<String>> = tabs
                    .iter()
                    .map(|tab| {
                        vec![
                            tab.index.to_string(),
                            tab.id.clone(),
                            if tab.active { "*".into() } else { String::new() },
                            tab.panes.len().to_string(),
                            tab.title.clone(),
                        ]
                    })
                    .collect();
                table(&["INDEX", "ID", "ACTIVE", "PANES", "TITLE"], &rows)
            })?;
        }
        TabCommand::Next => ctx.terminal.next_tab()?,
        TabCommand::Prev => ctx.terminal.prev_tab()?,
        TabCommand::Goto { position } => {
            if position == 0 {
                return Err(WtError::invalid("position", "0", "tab positions start at 1").into());
            }
            ctx.terminal.select_tab(position - 1)?;
        }
        TabCommand::Rename { title, tab_id } => {
            ctx.terminal.rename_tab(tab_id.as_deref(), &title)?;
        }
        TabCommand::Move { index, tab_id } => {
            let tab_id = match tab_id {
                Some(id) => id,
                None => active_tab(ctx)?,
            };
            ctx.terminal.move_tab(&tab_id, index)?;
        }
    }
    Ok(EXIT_OK)
}

pub fn new_tab(ctx: &Context, args: NewTabArgs) -> Result<u8> {
    let mut launch = ctx.launch(args.title, args.command, args.startup_dir);
    launch.tab_color = args.color;
    ctx.terminal.new_tab(&launch, args.window_id.as_deref())?;
    ctx.say("opened new tab");
    Ok(EXIT_OK)
}

fn active_tab(ctx: &Context) -> Result<String> {
    let state = ctx.terminal.state()?;
    state
        .active_tab()
        .map(|tab| tab.id.clone())
        .ok_or_else(|| WtError::TabNotFound("no active tab".to_string()).into())
}
