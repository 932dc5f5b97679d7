//! Completion scripts for `wt2 completions <shell>`.

use std::io::{self, Write};

use anyhow::Result;
use clap::CommandFactory;
use clap_complete::{Shell, generate};

use crate::cli::{Cli, CompletionShell};

fn to_clap_shell(shell: CompletionShell) -> Shell {
    match shell {
        CompletionShell::Bash => Shell::Bash,
        CompletionShell::Zsh => Shell::Zsh,
        CompletionShell::Fish => Shell::Fish,
        CompletionShell::PowerShell => Shell::PowerShell,
    }
}

pub fn write(shell: CompletionShell, out: &mut dyn Write) -> Result<()> {
    let mut cmd = Cli::command();
    generate(to_clap_shell(shell), &mut cmd, "wt2", out);
    Ok(())
}

pub fn print(shell: CompletionShell) -> Result<()> {
    write(shell, &mut io::stdout())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_all_supported_shell_variants() {
        assert_eq!(to_clap_shell(CompletionShell::Bash), Shell::Bash);
        assert_eq!(to_clap_shell(CompletionShell::Zsh), Shell::Zsh);
        assert_eq!(to_clap_shell(CompletionShell::Fish), Shell::Fish);
        assert_eq!(to_clap_shell(CompletionShell::PowerShell), Shell::PowerShell);
    }

    #[test]
    fn powershell_script_registers_wt2() {
        let mut buf = Vec::new();
        write(CompletionShell::PowerShell, &mut buf).unwrap();
        let script = String::from_utf8(buf).unwrap();
        assert!(script.contains("Register-ArgumentCompleter"));
        assert!(script.contains("wt2"));
    }
}
