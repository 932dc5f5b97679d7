//! Shell, WSL, path, history and doctor commands.

use std::sync::Arc;

use anyhow::Result;
use serde_json::json;

use super::{Context, EXIT_OK, table, timeout_from};
use crate::adapter::ExecOptions;
use crate::adapter::wsl::WslAdapter;
use crate::cli::{HistoryCommand, PathCommand, ShellCommand, WslCommand};
use crate::error::EXIT_FAILED;
use crate::path;
use crate::platform::{self, DoctorInputs, EnvVars};

fn yes_no(value: bool) -> String {
    if value { "yes" } else { "no" }.to_string()
}

pub fn run_shell(ctx: &Context, command: ShellCommand) -> Result<u8> {
    match command {
        ShellCommand::List => {
            let infos = ctx.adapters().infos();
            ctx.emit(&infos, || {
                let rows: Vec<Vec<String>> = infos
                    .iter()
                    .map(|info| {
                        vec![
                            info.shell_type.to_string(),
                            yes_no(info.available),
                            info.version.clone().unwrap_or_default(),
                            info.executable.clone(),
                        ]
                    })
                    .collect();
                table(&["SHELL", "AVAILABLE", "VERSION", "EXECUTABLE"], &rows)
            })?;
        }
        ShellCommand::Exec {
            command,
            cwd,
            env,
            timeout,
        } => {
            let registry = ctx.adapters();
            let adapter = registry.resolve(ctx.requested_shell())?;
            let opts = ExecOptions {
                cwd,
                env: env.into_iter().collect(),
                timeout: timeout_from(timeout)?,
            };
            let output = adapter.execute(&command, &opts)?;
            if ctx.json() {
                let report = json!({
                    "status": output.status,
                    "stdout": output.stdout,
                    "stderr": output.stderr,
                });
                ctx.emit(&report, String::new)?;
            } else {
                print!("{}", output.stdout);
                if !output.stderr.is_empty() {
                    eprint!("{}", output.stderr);
                }
            }
            output.check(adapter.executable())?;
        }
    }
    Ok(EXIT_OK)
}

fn wsl(ctx: &Context) -> WslAdapter {
    WslAdapter::new(
        Arc::clone(&ctx.runner),
        ctx.config.wsl.distribution.clone(),
        ctx.config.wsl.user.clone(),
    )
}

pub fn run_wsl(ctx: &Context, command: WslCommand) -> Result<u8> {
    let adapter = wsl(ctx);
    match command {
        WslCommand::Distros => {
            let distros = adapter.distributions()?;
            ctx.emit(&distros, || {
                let rows: Vec<Vec<String>> = distros
                    .iter()
                    .map(|d| {
                        vec![
                            if d.is_default { "*".into() } else { String::new() },
                            d.name.clone(),
                            d.state.clone(),
                            d.version.map(|v| v.to_string()).unwrap_or_default(),
                        ]
                    })
                    .collect();
                table(&["DEFAULT", "NAME", "STATE", "VERSION"], &rows)
            })?;
        }
        WslCommand::Default { name: Some(name) } => {
            adapter.set_default_distribution(WslAdapter::require_name(&name)?)?;
            ctx.say(format!("default distribution is now {name}"));
        }
        WslCommand::Default { name: None } => {
            let name = adapter.default_distribution()?;
            ctx.emit(&json!({ "default": name }), || {
                name.clone().unwrap_or_else(|| "no default distribution".to_string())
            })?;
        }
        WslCommand::Shutdown { force } => {
            if !ctx.confirm("Shut down every WSL distribution?", force)? {
                ctx.say("aborted");
                return Ok(EXIT_OK);
            }
            adapter.shutdown()?;
            ctx.say("WSL shut down");
        }
        WslCommand::Terminate { distribution } => {
            adapter.terminate(distribution.as_deref())?;
        }
        WslCommand::Home { windows } => {
            let home = if windows {
                adapter.windows_home()?
            } else {
                adapter.linux_home()?
            };
            ctx.emit(&json!({ "home": home }), || home.clone())?;
        }
        WslCommand::Mounts => {
            let mounts = adapter.mount_points()?;
            ctx.emit(&mounts, || {
                let rows: Vec<Vec<String>> = mounts
                    .iter()
                    .map(|(mount, source)| vec![mount.clone(), source.clone()])
                    .collect();
                table(&["MOUNT", "SOURCE"], &rows)
            })?;
        }
        WslCommand::Export { name, file } => {
            adapter.export_distribution(WslAdapter::require_name(&name)?, &file)?;
            ctx.say(format!("exported {name} to {file}"));
        }
        WslCommand::Import {
            name,
            install_dir,
            tarball,
        } => {
            adapter.import_distribution(WslAdapter::require_name(&name)?, &install_dir, &tarball)?;
            ctx.say(format!("imported {name} into {install_dir}"));
        }
    }
    Ok(EXIT_OK)
}

pub fn run_path(ctx: &Context, command: PathCommand) -> Result<u8> {
    let converted = match command {
        PathCommand::ToWsl { path } => path::windows_to_wsl(&path),
        PathCommand::ToWindows { path, distro } => {
            let distro = distro.or_else(|| ctx.config.wsl.distribution.clone());
            path::wsl_to_windows(&path, distro.as_deref())
        }
        PathCommand::Normalize { path, windows } => {
            path::normalize_path(&path, !windows, ctx.config.wsl.distribution.as_deref())
        }
    };
    ctx.emit(&json!({ "path": converted }), || converted.clone())?;
    Ok(EXIT_OK)
}

pub fn run_history(ctx: &Context, command: HistoryCommand) -> Result<u8> {
    match command {
        HistoryCommand::Show { limit } => {
            let entries = ctx.history.read(Some(limit))?;
            ctx.emit(&entries, || {
                entries
                    .iter()
                    .map(|entry| format!("{}  {}", entry.timestamp, entry.event.summary()))
                    .collect::<Vec<_>>()
                    .join("\n")
            })?;
        }
        HistoryCommand::Clear { force } => {
            if !ctx.confirm("Clear the command history?", force)? {
                ctx.say("aborted");
                return Ok(EXIT_OK);
            }
            if !ctx.dry_run() {
                ctx.history.clear()?;
            }
            ctx.say("history cleared");
        }
    }
    Ok(EXIT_OK)
}

pub fn doctor(ctx: &Context) -> Result<u8> {
    let env = EnvVars::from_process();
    let report = platform::doctor(DoctorInputs {
        runner: ctx.runner.as_ref(),
        terminal: &ctx.terminal,
        shells: ctx.adapters().infos(),
        env: &env,
        settings_path: platform::find_settings_file(),
        config_path: ctx.config_path.clone(),
    });
    ctx.emit(&report, || report.render())?;
    Ok(if report.healthy() { EXIT_OK } else { EXIT_FAILED })
}
