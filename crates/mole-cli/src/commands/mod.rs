//! CLI command definitions and dispatch.

pub mod rm;
pub mod run;

use clap::{Parser, Subcommand};

/// mole: pull, assemble and run container images without a daemon.
#[derive(Parser, Debug)]
#[command(name = "mole", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Pull an image into a directory and run it, or rerun a directory.
    Run(run::RunArgs),
    /// Unmount and delete a container directory.
    Rm(rm::RmArgs),
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn execute(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Run(args) => run::execute(args),
        Command::Rm(args) => rm::execute(args),
    }
}
