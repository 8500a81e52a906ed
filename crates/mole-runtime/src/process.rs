//! Container launcher.
//!
//! Turns an image config and an assembled root filesystem into an
//! [`IsolatedCommand`], hands it to an isolation backend and waits for the
//! container process to finish.

use std::path::{Path, PathBuf};

use mole_common::constants::DEFAULT_WORKING_DIR;
use mole_common::error::{MoleError, Result};
use mole_common::types::{ImageConfig, LaunchPhase};
use mole_core::namespace::NamespaceConfig;
use mole_core::namespace::uts::hostname_for;

use crate::backend::{IsolatedCommand, IsolationBackend};
use crate::identity;

/// Builds the container process description for `config` rooted at `rootfs`.
///
/// Resolves `config.user` against the image's own databases, so nothing is
/// started when the identity is unknown.
///
/// # Errors
///
/// Returns [`MoleError::Config`] for an empty command line and
/// [`MoleError::UserNotFound`] / [`MoleError::GroupNotFound`] for an
/// unknown identity.
pub fn prepare(config: &ImageConfig, rootfs: &Path) -> Result<IsolatedCommand> {
    let argv = config.command_line();
    if argv.is_empty() {
        return Err(MoleError::Config {
            message: "image defines neither an entrypoint nor a command".into(),
        });
    }

    let credential = match config.user_spec() {
        Some(spec) => {
            let credential = identity::resolve_user_spec(rootfs, spec)?;
            tracing::info!(
                user = spec,
                credential = %credential,
                phase = %LaunchPhase::IdentityResolved,
                "container identity resolved"
            );
            Some(credential)
        }
        None => None,
    };

    let working_dir = if config.working_dir.is_empty() {
        PathBuf::from(DEFAULT_WORKING_DIR)
    } else {
        PathBuf::from(&config.working_dir)
    };
    let hostname = rootfs
        .file_name()
        .map_or_else(|| hostname_for(""), |n| hostname_for(&n.to_string_lossy()));

    Ok(IsolatedCommand {
        argv,
        env: config.env.clone(),
        rootfs: rootfs.to_path_buf(),
        working_dir,
        hostname,
        namespaces: NamespaceConfig::default(),
        credential,
    })
}

/// Runs the container described by `config` in `rootfs`, blocking until it
/// exits.
///
/// Standard streams are inherited; the environment is exactly
/// `config.env`.
///
/// # Errors
///
/// Returns any preparation or backend error, and
/// [`MoleError::ChildExit`] carrying the exit code when the container
/// process exits non-zero.
pub fn launch(config: &ImageConfig, rootfs: &Path, backend: &dyn IsolationBackend) -> Result<()> {
    tracing::info!(
        rootfs = %rootfs.display(),
        backend = backend.name(),
        phase = %LaunchPhase::Created,
        "launching container"
    );
    let command = prepare(config, rootfs).inspect_err(|e| {
        tracing::warn!(phase = %LaunchPhase::Failed, error = %e, "launch aborted");
    })?;

    tracing::debug!(
        argv = ?command.argv,
        backend = backend.name(),
        "handing command to backend"
    );
    let code = backend.run(&command).inspect_err(|e| {
        tracing::warn!(phase = %LaunchPhase::Failed, error = %e, "container failed to start");
    })?;

    tracing::info!(phase = %LaunchPhase::Exited(code), "container exited");
    if code == 0 {
        Ok(())
    } else {
        Err(MoleError::ChildExit { code })
    }
}
