//! On-disk layout of a container next to its target directory.
//!
//! For a target `.../name` the runtime keeps:
//! - `.../.name.backing`: the assembled root filesystem, bind-mounted onto
//!   the target while the container exists;
//! - `.../.name.config`: the image config as JSON, so the target can be
//!   relaunched without contacting the registry.

use std::path::{Path, PathBuf};

use mole_common::error::{MoleError, Result};
use mole_common::types::ImageConfig;

/// Paths belonging to one container target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerPaths {
    /// Directory the container is run in (the bind-mount target).
    pub target: PathBuf,
    /// Assembled root filesystem.
    pub backing: PathBuf,
    /// Persisted image config.
    pub sidecar: PathBuf,
}

impl ContainerPaths {
    /// Derives the sibling paths of `target`.
    ///
    /// # Errors
    ///
    /// Returns [`MoleError::Config`] if `target` has no final component
    /// (`/`, `..`).
    pub fn for_target(target: &Path) -> Result<Self> {
        let name = target
            .file_name()
            .and_then(|n| n.to_str())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| MoleError::Config {
                message: format!("target directory has no usable name: {}", target.display()),
            })?;
        let parent = target.parent().unwrap_or_else(|| Path::new(""));
        Ok(Self {
            target: target.to_path_buf(),
            backing: parent.join(format!(".{name}.backing")),
            sidecar: parent.join(format!(".{name}.config")),
        })
    }

    /// Container name, the final component of the target.
    #[must_use]
    pub fn name(&self) -> &str {
        self.target
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
    }
}

/// Writes `config` to the sidecar file.
///
/// # Errors
///
/// Returns an error if serialization or the write fails.
pub fn store_config(paths: &ContainerPaths, config: &ImageConfig) -> Result<()> {
    let body = serde_json::to_vec_pretty(config)?;
    std::fs::write(&paths.sidecar, body).map_err(|e| MoleError::io(&paths.sidecar, e))?;
    tracing::debug!(path = %paths.sidecar.display(), "image config stored");
    Ok(())
}

/// Reads the image config from the sidecar file.
///
/// # Errors
///
/// Returns [`MoleError::NotFound`] if no config was stored for the target,
/// or an error if the file cannot be read or decoded.
pub fn load_config(paths: &ContainerPaths) -> Result<ImageConfig> {
    let body = match std::fs::read(&paths.sidecar) {
        Ok(body) => body,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(MoleError::NotFound {
                kind: "container config",
                id: paths.sidecar.display().to_string(),
            });
        }
        Err(e) => return Err(MoleError::io(&paths.sidecar, e)),
    };
    Ok(serde_json::from_slice(&body)?)
}
