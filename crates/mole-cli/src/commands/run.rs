//! `mole run`: pull and run an image, or rerun an assembled directory.

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use mole_common::config::MoleConfig;
use mole_image::reference::ImageReference;
use mole_runtime::engine::{Engine, PreparedContainer};

use crate::output;

/// Arguments for the `run` command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Image reference (`name[:tag]`), or the target directory when it is
    /// the only argument.
    #[arg(value_name = "IMAGE|TARGET")]
    pub first: String,

    /// Directory to assemble the image into and run it from.
    pub target: Option<PathBuf>,
}

/// Executes the `run` command.
///
/// # Errors
///
/// Returns an error if pulling, mounting or launching fails, including a
/// non-zero exit of the container.
pub fn execute(args: RunArgs) -> anyhow::Result<()> {
    let engine = Engine::new(MoleConfig::default());
    if !engine.is_available() {
        anyhow::bail!("mole needs Linux namespaces to run containers");
    }

    let container: PreparedContainer = match args.target {
        Some(target) => {
            let image = ImageReference::parse(&args.first)?;
            output::print_pulling(&image, &target);
            let pulled = engine
                .pull(&image, &target)
                .with_context(|| format!("pulling {image}"))?;
            output::print_pull_summary(&pulled);
            pulled.into()
        }
        None => {
            let target = PathBuf::from(&args.first);
            engine
                .open(&target)
                .with_context(|| format!("opening {}", target.display()))?
        }
    };

    engine.start(&container)?;
    Ok(())
}
