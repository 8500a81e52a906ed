//! `mole rm`: tear down a container directory.

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use mole_common::config::MoleConfig;
use mole_runtime::engine::Engine;

/// Arguments for the `rm` command.
#[derive(Args, Debug)]
pub struct RmArgs {
    /// Target directory passed to `mole run`.
    pub target: PathBuf,
}

/// Executes the `rm` command.
///
/// # Errors
///
/// Returns an error if a mount cannot be detached or a directory cannot be
/// removed.
pub fn execute(args: RmArgs) -> anyhow::Result<()> {
    let engine = Engine::new(MoleConfig::default());
    engine
        .remove(&args.target)
        .with_context(|| format!("removing {}", args.target.display()))?;
    tracing::info!(target = %args.target.display(), "removed");
    Ok(())
}
