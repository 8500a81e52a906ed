//! Runtime engine that orchestrates `run` and `rm`.

use std::path::Path;

use mole_common::config::MoleConfig;
use mole_common::error::{MoleError, Result};
use mole_common::types::ImageConfig;
use mole_core::filesystem::mount;
use mole_image::assembler::{AssemblyOutcome, ImageAssembler};
use mole_image::cache::LayerCache;
use mole_image::reference::ImageReference;
use mole_image::registry::RegistryClient;

use crate::backend::{self, IsolationBackend};
use crate::process;
use crate::state::{self, ContainerPaths};

/// Result of pulling an image into a target's backing directory.
#[derive(Debug, Clone)]
pub struct PulledImage {
    /// Image that was pulled.
    pub image: ImageReference,
    /// Paths of the container.
    pub paths: ContainerPaths,
    /// Runtime configuration of the image.
    pub config: ImageConfig,
    /// What the assembler did.
    pub outcome: AssemblyOutcome,
}

/// A container ready to be started: assembled root plus config.
#[derive(Debug, Clone)]
pub struct PreparedContainer {
    /// Paths of the container.
    pub paths: ContainerPaths,
    /// Runtime configuration to launch with.
    pub config: ImageConfig,
}

impl From<PulledImage> for PreparedContainer {
    fn from(pulled: PulledImage) -> Self {
        Self {
            paths: pulled.paths,
            config: pulled.config,
        }
    }
}

/// The runtime engine that coordinates all container operations.
///
/// Pulls and assembles images through the layer cache, persists the image
/// config next to the target, and delegates process isolation to the
/// platform backend.
pub struct Engine {
    backend: Box<dyn IsolationBackend>,
    config: MoleConfig,
}

impl Engine {
    /// Creates an engine with the platform backend.
    #[must_use]
    pub fn new(config: MoleConfig) -> Self {
        Self::with_backend(config, backend::detect_backend())
    }

    /// Creates an engine with an explicit backend.
    #[must_use]
    pub fn with_backend(config: MoleConfig, backend: Box<dyn IsolationBackend>) -> Self {
        Self { backend, config }
    }

    /// Pulls `image` and assembles it into the backing directory of `target`.
    ///
    /// The registry is always asked for the manifest and config; layers
    /// are only fetched when the backing directory does not exist yet. The
    /// config is (re)written to the sidecar file.
    ///
    /// # Errors
    ///
    /// Returns any registry, cache, merge or I/O error.
    pub fn pull(&self, image: &ImageReference, target: &Path) -> Result<PulledImage> {
        let paths = ContainerPaths::for_target(target)?;
        let registry = RegistryClient::new(self.config.registry.clone())?;
        let token = registry.token(image)?;
        let manifest = registry.manifest(&token, image)?;
        let config = registry.config(&token, image, &manifest.config_digest)?;

        let cache = LayerCache::open(self.config.layers_dir())?;
        let session = registry.session(image.clone(), token);
        let outcome = ImageAssembler::new(&cache, &session).assemble(&manifest, &paths.backing)?;
        state::store_config(&paths, &config)?;

        tracing::info!(
            image = %image,
            backing = %paths.backing.display(),
            layers = manifest.layers.len(),
            "image ready"
        );
        Ok(PulledImage {
            image: image.clone(),
            paths,
            config,
            outcome,
        })
    }

    /// Loads a previously pulled container from its sidecar config.
    ///
    /// # Errors
    ///
    /// Returns [`MoleError::NotFound`] if the sidecar or the backing
    /// directory is missing.
    pub fn open(&self, target: &Path) -> Result<PreparedContainer> {
        let paths = ContainerPaths::for_target(target)?;
        let config = state::load_config(&paths)?;
        if !paths.backing.is_dir() {
            return Err(MoleError::NotFound {
                kind: "container root filesystem",
                id: paths.backing.display().to_string(),
            });
        }
        Ok(PreparedContainer { paths, config })
    }

    /// Mounts the backing directory onto the target and runs the container,
    /// blocking until it exits.
    ///
    /// # Errors
    ///
    /// Returns a mount or launch error, or [`MoleError::ChildExit`] for a
    /// non-zero exit.
    pub fn start(&self, container: &PreparedContainer) -> Result<()> {
        let paths = &container.paths;
        std::fs::create_dir_all(&paths.target).map_err(|e| MoleError::io(&paths.target, e))?;
        if mount::is_mount_point(&paths.target)? {
            tracing::debug!(container = paths.name(), "target already mounted");
        } else {
            mount::bind_mount(&paths.backing, &paths.target)?;
        }
        tracing::info!(
            container = paths.name(),
            target = %paths.target.display(),
            "starting container"
        );
        process::launch(&container.config, &paths.target, self.backend.as_ref())
    }

    /// Pulls `image` into `target` and runs it.
    ///
    /// # Errors
    ///
    /// Returns the first error of [`Engine::pull`] or [`Engine::start`].
    pub fn run_image(&self, image: &ImageReference, target: &Path) -> Result<()> {
        let pulled = self.pull(image, target)?;
        self.start(&pulled.into())
    }

    /// Relaunches an already pulled `target`.
    ///
    /// # Errors
    ///
    /// Returns the first error of [`Engine::open`] or [`Engine::start`].
    pub fn run_existing(&self, target: &Path) -> Result<()> {
        let container = self.open(target)?;
        self.start(&container)
    }

    /// Tears down `target`: unmounts everything under it, then deletes the
    /// target, its backing directory and its sidecar config.
    ///
    /// Missing pieces are skipped. Nothing is deleted if an unmount fails,
    /// so a still-mounted backing store is never removed through the
    /// target.
    ///
    /// # Errors
    ///
    /// Returns the first unmount or removal error.
    pub fn remove(&self, target: &Path) -> Result<()> {
        let paths = ContainerPaths::for_target(target)?;

        let mounts = mount::mount_points_under(&paths.target)?;
        for point in &mounts {
            mount::unmount(point)?;
        }

        remove_tree(&paths.target)?;
        remove_tree(&paths.backing)?;
        match std::fs::remove_file(&paths.sidecar) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(MoleError::io(&paths.sidecar, e)),
        }

        tracing::info!(
            container = paths.name(),
            target = %paths.target.display(),
            unmounted = mounts.len(),
            "container removed"
        );
        Ok(())
    }

    /// Returns the engine configuration.
    #[must_use]
    pub const fn config(&self) -> &MoleConfig {
        &self.config
    }

    /// Returns whether the backend can run containers on this platform.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.backend.is_available()
    }
}

fn remove_tree(path: &Path) -> Result<()> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(MoleError::io(path, e)),
    }
}

#[cfg(test)]
mod tests {
    use crate::backend::unsupported::UnsupportedBackend;

    use super::*;

    fn engine(data_dir: &Path) -> Engine {
        Engine::with_backend(
            MoleConfig::with_data_dir(data_dir),
            Box::new(UnsupportedBackend),
        )
    }

    #[test]
    fn open_without_sidecar_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = engine(dir.path())
            .open(&dir.path().join("web"))
            .expect_err("no sidecar");
        assert!(matches!(err, MoleError::NotFound { .. }));
    }

    #[test]
    fn open_without_backing_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = ContainerPaths::for_target(&dir.path().join("web")).expect("paths");
        state::store_config(&paths, &ImageConfig::default()).expect("store");

        let err = engine(dir.path())
            .open(&paths.target)
            .expect_err("no backing");
        assert!(matches!(
            err,
            MoleError::NotFound { kind: "container root filesystem", .. }
        ));
    }

    #[test]
    fn open_returns_stored_config() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = ContainerPaths::for_target(&dir.path().join("web")).expect("paths");
        std::fs::create_dir_all(&paths.backing).expect("backing");
        let config = ImageConfig {
            cmd: vec!["/bin/sh".into()],
            ..ImageConfig::default()
        };
        state::store_config(&paths, &config).expect("store");

        let container = engine(dir.path()).open(&paths.target).expect("open");
        assert_eq!(container.config, config);
        assert_eq!(container.paths, paths);
    }

    #[test]
    fn remove_deletes_target_backing_and_sidecar() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = ContainerPaths::for_target(&dir.path().join("web")).expect("paths");
        std::fs::create_dir_all(paths.target.join("etc")).expect("target");
        std::fs::create_dir_all(paths.backing.join("bin")).expect("backing");
        state::store_config(&paths, &ImageConfig::default()).expect("store");

        engine(dir.path()).remove(&paths.target).expect("remove");
        assert!(!paths.target.exists());
        assert!(!paths.backing.exists());
        assert!(!paths.sidecar.exists());
    }

    #[test]
    fn remove_tolerates_missing_pieces() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("never-created");
        engine(dir.path()).remove(&target).expect("remove");
    }

    #[test]
    fn engine_reports_backend_availability() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(!engine(dir.path()).is_available());
        assert_eq!(engine(dir.path()).config().data_dir(), dir.path());
    }
}
