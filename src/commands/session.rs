use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use anyhow::{Context as _, Result};
use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use super::{Context, EXIT_OK, table, timeout_from};
use crate::adapter::ExecOptions;
use crate::cli::{PaneTarget, SessionCommand};
use crate::error::WtError;
use crate::history::HistoryEvent;
use crate::monitor::{self, strip_ansi};
use crate::session::{NewSession, Session, SessionRegistry, SessionState};

/// Lines read for `session capture` without `--history`.
const CAPTURE_SCREEN_LINES: usize = 200;
/// Lines read for `session capture --history`.
const CAPTURE_SCROLLBACK_LINES: usize = 10_000;
/// How often `session cleanup --watch` checks for Ctrl+C.
const WATCH_TICK: Duration = Duration::from_millis(50);

pub fn run(ctx: &Context, command: SessionCommand) -> Result<u8> {
    match command {
        SessionCommand::New { name, cwd } => {
            let request = NewSession {
                shell: ctx.shell(),
                profile: ctx.profile(),
                cwd,
                name,
            };
            let session = ctx.with_sessions(|manager| manager.open_session(request))?;
            ctx.record(HistoryEvent::SessionCreated {
                id: session.id.to_string(),
                shell: session.shell.to_string(),
                name: session.name.clone(),
            });
            ctx.emit(&session, || {
                format!(
                    "session {} opened ({}, profile {})",
                    session.label(),
                    session.shell,
                    session.profile
                )
            })?;
        }
        SessionCommand::Send { text, target } => return send(ctx, &text.join(" "), &target),
        SessionCommand::Run { command, target } => return run_command(ctx, &command, &target),
        SessionCommand::Clear { target } => return clear(ctx, &target),
        SessionCommand::List { state } => return list(ctx, state),
        SessionCommand::Close {
            session: Some(session),
            force,
            ..
        } => {
            if !ctx.confirm(&format!("Close session {session} and its tab?"), force)? {
                ctx.say("aborted");
                return Ok(EXIT_OK);
            }
            let closed = ctx.with_sessions(|manager| manager.close_session(&session))?;
            ctx.record(HistoryEvent::SessionClosed {
                id: closed.id.to_string(),
            });
            ctx.say(format!("closed session {}", closed.label()));
        }
        SessionCommand::Close {
            session: None,
            force,
            ..
        } => {
            if !ctx.confirm("Close every session and its tab?", force)? {
                ctx.say("aborted");
                return Ok(EXIT_OK);
            }
            let closed = ctx.with_sessions(|manager| manager.shutdown())?;
            for session in &closed {
                ctx.record(HistoryEvent::SessionClosed {
                    id: session.id.to_string(),
                });
            }
            ctx.say(format!("closed {} sessions", closed.len()));
        }
        SessionCommand::Restart { target } => match target.session {
            Some(ref key) => ctx.with_sessions(|manager| manager.restart(key))?,
            None => ctx.terminal.restart_pane(target.pane_id.as_deref())?,
        },
        SessionCommand::Focus { target } => focus(ctx, &target)?,
        SessionCommand::Read { lines, target } => {
            let output = read(ctx, &target, lines)?;
            ctx.emit(&output, || output.join("\n"))?;
        }
        SessionCommand::Capture {
            output,
            history,
            target,
        } => {
            let lines = if history {
                CAPTURE_SCROLLBACK_LINES
            } else {
                CAPTURE_SCREEN_LINES
            };
            let captured = read(ctx, &target, lines)?;
            write_capture(&output, &captured)?;
            ctx.say(format!("captured {} lines to {}", captured.len(), output.display()));
        }
        SessionCommand::SetName { name, target } => match target.session {
            Some(ref key) => ctx.with_sessions(|manager| manager.rename(key, &name))?,
            None => ctx.terminal.set_title(target.pane_id.as_deref(), &name)?,
        },
        SessionCommand::GetVar { variable, session } => {
            let value = ctx.with_sessions(|manager| {
                let registry = manager.registry()?;
                Ok(registry.get_var(&session, &variable)?.map(str::to_string))
            })?;
            match value {
                Some(value) => println!("{value}"),
                None => {
                    return Err(WtError::invalid(
                        "variable",
                        variable,
                        format!("not set in session {session}"),
                    )
                    .into());
                }
            }
        }
        SessionCommand::SetVar {
            variable,
            value,
            session,
        } => {
            ctx.with_sessions(|manager| {
                Ok(manager.registry()?.set_var(&session, &variable, &value)?)
            })?;
            ctx.say(format!("{variable} set"));
        }
        SessionCommand::Exec {
            session,
            command,
            timeout,
        } => return exec(ctx, &session, &command, timeout),
        SessionCommand::Stats => {
            let stats = ctx.with_sessions(|manager| Ok(manager.registry()?.stats()))?;
            ctx.emit(&stats, || {
                let mut out = format!(
                    "sessions: {} ({} active, limit {})\n",
                    stats.total, stats.active, stats.max_connections
                );
                for (state, count) in &stats.by_state {
                    out.push_str(&format!("  {state:<12} {count}\n"));
                }
                for (shell, count) in &stats.by_shell {
                    out.push_str(&format!("  {shell:<12} {count}\n"));
                }
                out
            })?;
        }
        SessionCommand::Cleanup { watch, duration } => {
            let removed = if watch {
                watch_cleanup(ctx, timeout_from(duration)?)?
            } else {
                ctx.with_sessions(|manager| {
                    Ok(manager.registry()?.cleanup_inactive(Utc::now()))
                })?
            };
            for session in &removed {
                ctx.record(HistoryEvent::SessionClosed {
                    id: session.id.to_string(),
                });
            }
            ctx.emit(&removed, || format!("removed {} inactive sessions", removed.len()))?;
        }
    }
    Ok(EXIT_OK)
}

/// Type text without Enter into a session's pane or a pane.
pub fn send(ctx: &Context, text: &str, target: &PaneTarget) -> Result<u8> {
    match target.session {
        Some(ref key) => ctx.with_sessions(|manager| manager.send_text(key, text))?,
        None => ctx.terminal.send_text(target.pane_id.as_deref(), text)?,
    }
    ctx.record(HistoryEvent::InputSent {
        target: target_label(target),
        length: text.len(),
    });
    Ok(EXIT_OK)
}

/// Type a command and press Enter.
pub fn run_command(ctx: &Context, command: &str, target: &PaneTarget) -> Result<u8> {
    match target.session {
        Some(ref key) => ctx.with_sessions(|manager| manager.send_command(key, command))?,
        None => ctx.terminal.run_command(target.pane_id.as_deref(), command)?,
    }
    ctx.record(HistoryEvent::InputSent {
        target: target_label(target),
        length: command.len() + 1,
    });
    Ok(EXIT_OK)
}

pub fn clear(ctx: &Context, target: &PaneTarget) -> Result<u8> {
    match target.session {
        Some(ref key) => ctx.with_sessions(|manager| manager.clear(key))?,
        None => ctx.terminal.clear_screen(target.pane_id.as_deref())?,
    }
    Ok(EXIT_OK)
}

pub fn list(ctx: &Context, state: Option<SessionState>) -> Result<u8> {
    let app = ctx.load_state()?;
    let registry = crate::session::SessionRegistry::from_config(&ctx.config.sessions, app.sessions);
    let sessions: Vec<&Session> = registry.list(state, None);
    let now = Utc::now();
    ctx.emit(&sessions, || {
        if sessions.is_empty() {
            return "no sessions".to_string();
        }
        let rows: Vec<Vec<String>> = sessions
            .iter()
            .map(|s| {
                vec![
                    s.short_id(),
                    s.name.clone().unwrap_or_default(),
                    s.shell.to_string(),
                    s.state.to_string(),
                    s.pane_id.clone().unwrap_or_else(|| "-".into()),
                    format!("{}s", s.idle_secs(now)),
                ]
            })
            .collect();
        table(&["ID", "NAME", "SHELL", "STATE", "PANE", "IDLE"], &rows)
    })?;
    Ok(EXIT_OK)
}

fn target_label(target: &PaneTarget) -> String {
    match (&target.session, &target.pane_id) {
        (Some(session), _) => format!("session:{session}"),
        (None, Some(pane)) => format!("pane:{pane}"),
        (None, None) => "pane:focused".to_string(),
    }
}

/// A session key focuses its tab and pane; a bare number focuses a pane index.
fn focus(ctx: &Context, target: &str) -> Result<()> {
    let found = ctx.with_sessions(|manager| Ok(manager.registry()?.resolve(target).is_ok()))?;
    if found {
        return ctx.with_sessions(|manager| manager.focus_session(target));
    }
    match target.trim().parse::<u32>() {
        Ok(index) => ctx.terminal.focus_pane_id(index),
        Err(_) => Err(WtError::SessionNotFound(target.to_string()).into()),
    }
}

fn read(ctx: &Context, target: &PaneTarget, lines: usize) -> Result<Vec<String>> {
    let raw = match target.session {
        Some(ref key) => ctx.with_sessions(|manager| manager.read(key, lines))?,
        None => ctx.terminal.read_output(target.pane_id.as_deref(), lines)?,
    };
    Ok(raw.iter().map(|line| strip_ansi(line)).collect())
}

fn write_capture(path: &Path, lines: &[String]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let mut content = lines.join("\n");
    content.push('\n');
    std::fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))
}

/// Run a command to completion with the session's shell, directory and variables.
fn exec(ctx: &Context, key: &str, command: &str, timeout: Option<f64>) -> Result<u8> {
    let session = ctx.with_sessions(|manager| {
        let mut registry = manager.registry()?;
        Ok(registry.update(key, |_| {})?.clone())
    })?;
    let registry = ctx.adapters();
    let adapter = registry.resolve(Some(session.shell))?;
    let opts = ExecOptions {
        cwd: session.cwd.as_ref().map(PathBuf::from),
        env: session.vars.clone(),
        timeout: timeout_from(timeout)?,
    };
    info!(session = %session.short_id(), shell = %session.shell, "exec in session");
    let output = adapter.execute(command, &opts)?;
    print!("{}", output.stdout);
    if !output.stderr.is_empty() {
        eprint!("{}", output.stderr);
    }
    output.check(adapter.executable())?;
    Ok(EXIT_OK)
}

/// Run the background reaper over the persisted sessions until Ctrl+C or
/// `limit`, then drop whatever it removed from the current state file.
///
/// Sessions created by other invocations while watching are left alone.
fn watch_cleanup(ctx: &Context, limit: Option<Duration>) -> Result<Vec<Session>> {
    let before = ctx.load_state()?.sessions;
    let registry = SessionRegistry::from_config(&ctx.config.sessions, before.clone());
    let mut manager = ctx.session_manager(registry);
    let stop = monitor::interrupt_flag();
    let deadline = limit.map(|limit| Instant::now() + limit);
    manager.start_reaper();
    while !stop.load(Ordering::Relaxed) && deadline.is_none_or(|d| Instant::now() < d) {
        std::thread::sleep(WATCH_TICK);
    }
    manager.stop_reaper();

    let kept: HashSet<Uuid> = manager.registry()?.sessions().iter().map(|s| s.id).collect();
    let removed: Vec<Session> = before.into_iter().filter(|s| !kept.contains(&s.id)).collect();
    if !removed.is_empty() {
        let mut state = ctx.load_state()?;
        state.sessions.retain(|s| !removed.iter().any(|r| r.id == s.id));
        ctx.save_state(&state)?;
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::ShellType;
    use crate::cli::{GlobalArgs, ShellSelection};
    use crate::commands::tests::{context, context_with};
    use crate::config::Config;
    use crate::exec::CommandOutput;
    use crate::exec::testing::ScriptedRunner;
    use crate::pipe::testing::ScriptedPipe;
    use serde_json::json;
    use std::sync::Arc;

    fn opened_state() -> serde_json::Value {
        json!({
            "success": true,
            "tabs": [{"id": 4, "index": 2, "active": true, "panes": [{"id": 9, "active": true}]}]
        })
    }

    fn wsl() -> GlobalArgs {
        GlobalArgs {
            shell: Some(ShellSelection::Shell(ShellType::Wsl)),
            ..GlobalArgs::default()
        }
    }

    #[test]
    fn new_session_persists_and_is_addressable_by_name() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        let pipe = ScriptedPipe::new().respond("getState", opened_state());
        let ctx = context(tmp.path(), runner.clone(), &pipe, wsl());

        run(
            &ctx,
            SessionCommand::New {
                name: Some("api".into()),
                cwd: None,
            },
        )
        .unwrap();
        let state = ctx.load_state().unwrap();
        assert_eq!(state.sessions.len(), 1);
        assert_eq!(state.sessions[0].state, SessionState::Connected);
        assert_eq!(state.sessions[0].pane_id.as_deref(), Some("9"));
        assert!(runner.lines()[0].contains("new-tab --profile WSL --title api"));

        run_command(
            &ctx,
            "make test",
            &PaneTarget {
                session: Some("api".into()),
                pane_id: None,
            },
        )
        .unwrap();
        let last = pipe.requests().pop().unwrap();
        assert_eq!(last, json!({"action": "sendInput", "paneId": "9", "input": "make test\r"}));

        let events: Vec<_> = ctx.history.read(None).unwrap().into_iter().map(|e| e.event).collect();
        assert!(matches!(events[0], HistoryEvent::SessionCreated { .. }));
        assert_eq!(
            events[1],
            HistoryEvent::InputSent {
                target: "session:api".into(),
                length: 10
            }
        );
    }

    fn cleanup() -> SessionCommand {
        SessionCommand::Cleanup {
            watch: false,
            duration: None,
        }
    }

    #[test]
    fn watched_cleanup_reaps_in_the_background() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = Arc::new(
            ScriptedRunner::new().respond("new-tab", CommandOutput::failed(1, "boom")),
        );
        let mut config = Config::default();
        config.sessions.cleanup_interval_secs = 1;
        let ctx =
            context_with(config, tmp.path(), runner, &ScriptedPipe::new(), GlobalArgs::default());
        assert!(run(&ctx, SessionCommand::New { name: None, cwd: None }).is_err());
        assert_eq!(ctx.load_state().unwrap().sessions.len(), 1);

        let watch = SessionCommand::Cleanup {
            watch: true,
            duration: Some(1.5),
        };
        run(&ctx, watch).unwrap();
        assert!(ctx.load_state().unwrap().sessions.is_empty());
        let events: Vec<_> = ctx.history.read(None).unwrap().into_iter().map(|e| e.event).collect();
        assert!(events.iter().any(|e| matches!(e, HistoryEvent::SessionClosed { .. })));
    }

    #[test]
    fn failed_open_is_kept_as_error() {
        let tmp = tempfile::tempdir().unwrap();
        let runner =
            Arc::new(ScriptedRunner::new().respond("new-tab", CommandOutput::failed(1, "boom")));
        let ctx = context(tmp.path(), runner, &ScriptedPipe::new(), GlobalArgs::default());
        assert!(run(&ctx, SessionCommand::New { name: None, cwd: None }).is_err());
        let state = ctx.load_state().unwrap();
        assert_eq!(state.sessions[0].state, SessionState::Error);

        run(&ctx, cleanup()).unwrap();
        assert!(ctx.load_state().unwrap().sessions.is_empty());
    }

    #[test]
    fn variables_round_trip_through_state() {
        let tmp = tempfile::tempdir().unwrap();
        let pipe = ScriptedPipe::new().respond("getState", opened_state());
        let ctx =
            context(tmp.path(), Arc::new(ScriptedRunner::new()), &pipe, GlobalArgs::default());
        run(&ctx, SessionCommand::New { name: Some("db".into()), cwd: None }).unwrap();
        run(
            &ctx,
            SessionCommand::SetVar {
                variable: "PGPORT".into(),
                value: "5433".into(),
                session: "db".into(),
            },
        )
        .unwrap();
        assert_eq!(ctx.load_state().unwrap().sessions[0].vars["PGPORT"], "5433");
        let err = run(
            &ctx,
            SessionCommand::GetVar {
                variable: "MISSING".into(),
                session: "db".into(),
            },
        )
        .unwrap_err();
        assert_eq!(crate::error::find_wt_error(&err).unwrap().code(), "WT030");
    }

    #[test]
    fn close_removes_record_and_tab() {
        let tmp = tempfile::tempdir().unwrap();
        let pipe = ScriptedPipe::new().respond("getState", opened_state());
        let ctx =
            context(tmp.path(), Arc::new(ScriptedRunner::new()), &pipe, GlobalArgs::default());
        run(&ctx, SessionCommand::New { name: Some("web".into()), cwd: None }).unwrap();
        run(
            &ctx,
            SessionCommand::Close {
                session: Some("web".into()),
                all: false,
                force: true,
            },
        )
        .unwrap();
        assert!(ctx.load_state().unwrap().sessions.is_empty());
        assert_eq!(pipe.actions().last().map(String::as_str), Some("closeTab"));
        let err = run(
            &ctx,
            SessionCommand::Close {
                session: Some("web".into()),
                all: false,
                force: true,
            },
        )
        .unwrap_err();
        assert_eq!(crate::error::exit_code_for(&err), crate::error::EXIT_NOT_FOUND);
    }

    #[test]
    fn close_all_shuts_down_every_session() {
        let tmp = tempfile::tempdir().unwrap();
        let pipe = ScriptedPipe::new().respond("getState", opened_state());
        let ctx =
            context(tmp.path(), Arc::new(ScriptedRunner::new()), &pipe, GlobalArgs::default());
        for name in ["api", "db"] {
            run(&ctx, SessionCommand::New { name: Some(name.into()), cwd: None }).unwrap();
        }
        let all = SessionCommand::Close {
            session: None,
            all: true,
            force: true,
        };
        run(&ctx, all).unwrap();
        assert!(ctx.load_state().unwrap().sessions.is_empty());
        let closes = pipe.actions().iter().filter(|a| *a == "closeTab").count();
        assert_eq!(closes, 2);
    }

    #[test]
    fn focus_falls_back_to_pane_index() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        let ctx = context(tmp.path(), runner.clone(), &ScriptedPipe::new(), GlobalArgs::default());
        focus(&ctx, "3").unwrap();
        assert_eq!(runner.lines(), vec!["wt.exe -w 0 focus-pane -t 3"]);
        assert!(focus(&ctx, "ghost").is_err());
    }

    #[test]
    fn capture_writes_stripped_lines() {
        let tmp = tempfile::tempdir().unwrap();
        let pipe = ScriptedPipe::new().respond(
            "getOutput",
            json!({"success": true, "output": "\u{1b}[32mok\u{1b}[0m\nsecond\n"}),
        );
        let ctx =
            context(tmp.path(), Arc::new(ScriptedRunner::new()), &pipe, GlobalArgs::default());
        let out = tmp.path().join("captures/pane.txt");
        run(
            &ctx,
            SessionCommand::Capture {
                output: out.clone(),
                history: true,
                target: PaneTarget::default(),
            },
        )
        .unwrap();
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "ok\nsecond\n");
        assert_eq!(pipe.requests()[0]["lines"], 10_000);
    }

    #[test]
    fn exec_uses_session_shell_and_vars() {
        let tmp = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new().respond("echo", CommandOutput::ok("5433\n")));
        let pipe = ScriptedPipe::new().respond("getState", opened_state());
        let ctx = context(tmp.path(), runner.clone(), &pipe, wsl());
        run(
            &ctx,
            SessionCommand::New { name: Some("db".into()), cwd: Some("/srv".into()) },
        )
        .unwrap();
        run(
            &ctx,
            SessionCommand::SetVar {
                variable: "PGPORT".into(),
                value: "5433".into(),
                session: "db".into(),
            },
        )
        .unwrap();
        run(
            &ctx,
            SessionCommand::Exec {
                session: "db".into(),
                command: "echo $PGPORT".into(),
                timeout: None,
            },
        )
        .unwrap();
        let exec_line = runner.lines().pop().unwrap();
        assert!(exec_line.starts_with("wsl.exe"));
        assert!(exec_line.contains("export PGPORT='5433' && cd '/srv' && echo $PGPORT"));
    }
}
