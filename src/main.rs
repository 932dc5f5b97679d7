use std::process::ExitCode;

use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use winterm2::cli::Cli;
use winterm2::commands::{self, Context, log_filter};
use winterm2::error::{exit_code_for, suggestion_for};
use winterm2::history::HistoryEvent;

fn main() -> ExitCode {
    let cli = Cli::parse();
    let args: Vec<String> = std::env::args().skip(1).collect();

    // The config can raise the level, so it is loaded first.
    let loaded = Context::from_args(cli.global.clone());
    let filter = match loaded {
        Ok(ref ctx) => ctx.log_filter(cli.verbose),
        Err(_) => log_filter(cli.verbose),
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let ctx = match loaded {
        Ok(ctx) => ctx,
        Err(err) => return ExitCode::from(report(&err)),
    };

    let code = match commands::run(&ctx, cli.command) {
        Ok(code) => code,
        Err(err) => report(&err),
    };
    debug!(code, "finished");
    ctx.record(HistoryEvent::Command {
        args,
        exit_code: code,
    });
    ExitCode::from(code)
}

fn report(err: &anyhow::Error) -> u8 {
    eprintln!("error: {err:#}");
    if let Some(hint) = suggestion_for(err) {
        eprintln!("hint: {hint}");
    }
    exit_code_for(err)
}
