use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result, bail};
use serde_json::json;
use tracing::info;

use super::{Context, EXIT_OK};
use crate::cli::ConfigCommand;
use crate::config::{Config, render_value};
use crate::error::WtError;
use crate::history::HistoryEvent;

pub fn run(ctx: &Context, command: ConfigCommand) -> Result<u8> {
    match command {
        ConfigCommand::Path => {
            let report = json!({
                "path": ctx.config_path,
                "default_save_path": ctx.roots.default_save_path(),
                "candidates": ctx.roots.candidates(),
            });
            ctx.emit(&report, || match ctx.config_path {
                Some(ref path) => path.display().to_string(),
                None => format!(
                    "no config file; defaults in use (would write {})",
                    ctx.roots.default_save_path().display()
                ),
            })?;
        }
        ConfigCommand::Init { path, force } => {
            let path = path.unwrap_or_else(|| ctx.roots.default_save_path());
            if path.exists() && !force {
                return Err(WtError::invalid(
                    "path",
                    path.display().to_string(),
                    "file exists; pass --force to overwrite",
                )
                .into());
            }
            write(ctx, &Config::default(), &path)?;
        }
        ConfigCommand::Show => {
            ctx.emit(&ctx.config, || ctx.config.to_yaml().unwrap_or_default())?;
        }
        ConfigCommand::Get { key } => {
            let value = ctx.config.get_value(&key)?;
            let rendered = render_value(&value)?;
            ctx.emit(&value, || rendered.clone())?;
        }
        ConfigCommand::Set { key, value } => {
            let mut config = ctx.config.clone();
            config.set_value(&key, &value)?;
            let path = active_path(ctx);
            config.check(&path)?;
            write(ctx, &config, &path)?;
            ctx.record(HistoryEvent::ConfigChanged { key, value });
        }
        ConfigCommand::Load { path } => {
            let mut config = Config::from_file(&path)?;
            config.check(&path)?;
            if let Some(ref profile) = ctx.global.profile {
                if config.find_profile(profile).is_none() {
                    return Err(WtError::invalid(
                        "profile",
                        profile,
                        format!("not defined in {}", path.display()),
                    )
                    .into());
                }
                config.general.default_profile = Some(profile.clone());
            }
            let target = active_path(ctx);
            write(ctx, &config, &target)?;
            ctx.record(HistoryEvent::ConfigChanged {
                key: "file".to_string(),
                value: path.display().to_string(),
            });
        }
        ConfigCommand::Save { path } => {
            let path = path.unwrap_or_else(|| active_path(ctx));
            write(ctx, &ctx.config, &path)?;
        }
        ConfigCommand::Edit => edit(ctx)?,
    }
    Ok(EXIT_OK)
}

/// The file in use, or where a new one goes.
fn active_path(ctx: &Context) -> PathBuf {
    ctx.config_path
        .clone()
        .unwrap_or_else(|| ctx.roots.default_save_path())
}

fn write(ctx: &Context, config: &Config, path: &Path) -> Result<()> {
    if ctx.dry_run() {
        ctx.say(format!("would write {}", path.display()));
        return Ok(());
    }
    config.save(path)?;
    info!(path = %path.display(), "config written");
    ctx.say(format!("wrote {}", path.display()));
    Ok(())
}

fn editor() -> String {
    std::env::var("VISUAL")
        .or_else(|_| std::env::var("EDITOR"))
        .ok()
        .filter(|e| !e.trim().is_empty())
        .unwrap_or_else(|| {
            if cfg!(windows) { "notepad" } else { "vi" }.to_string()
        })
}

fn edit(ctx: &Context) -> Result<()> {
    let path = active_path(ctx);
    if !path.exists() {
        write(ctx, &Config::default(), &path)?;
    }
    let editor = editor();
    if ctx.dry_run() {
        ctx.say(format!("{editor} {}", path.display()));
        return Ok(());
    }
    let mut words = editor.split_whitespace();
    let Some(program) = words.next() else {
        bail!("no editor configured");
    };
    let status = std::process::Command::new(program)
        .args(words)
        .arg(&path)
        .status()
        .with_context(|| format!("failed to start editor '{editor}'"))?;
    if !status.success() {
        return Err(WtError::CommandFailed {
            program: program.to_string(),
            status: status.code(),
            stderr: String::new(),
        }
        .into());
    }
    let config = Config::from_file(&path)?;
    config.check(&path)?;
    ctx.say(format!("{} is valid", path.display()));
    Ok(())
}
