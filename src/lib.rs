//! Drive Windows Terminal and its shells from one command line.
//!
//! The `wt2` binary is a thin layer over [`commands`]; everything else is
//! usable on its own: [`terminal::Terminal`] wraps `wt.exe` and the JSON
//! pipe, [`adapter`] runs commands in PowerShell, CMD and WSL, and
//! [`session`] tracks named sessions across invocations.

pub mod adapter;
pub mod broadcast;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod exec;
pub mod history;
pub mod monitor;
pub mod path;
pub mod paths;
pub mod pipe;
pub mod platform;
pub mod session;
pub mod shell_completion;
pub mod state;
pub mod terminal;
pub mod wt;

pub use adapter::{AdapterRegistry, ShellAdapter, ShellType, adapter_from_shell as adapter_for};
pub use config::Config;
pub use error::WtError;
pub use terminal::Terminal;
