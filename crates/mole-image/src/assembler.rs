//! Root filesystem assembly.
//!
//! Fetches every layer of a manifest through the cache and merges them,
//! bottom to top, into a destination directory.

use std::fs;
use std::path::Path;

use mole_common::error::{MoleError, Result};
use mole_common::types::ImageManifest;

use crate::cache::{CachedLayer, LayerCache};
use crate::merge;
use crate::source::BlobSource;

/// What [`ImageAssembler::assemble`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssemblyOutcome {
    /// The destination already existed and was left untouched.
    Skipped,
    /// Layers were fetched and merged, in application order.
    Assembled(Vec<CachedLayer>),
}

impl AssemblyOutcome {
    /// Total compressed bytes downloaded during assembly.
    #[must_use]
    pub fn downloaded_bytes(&self) -> u64 {
        match self {
            Self::Skipped => 0,
            Self::Assembled(layers) => layers.iter().filter_map(|l| l.downloaded_bytes).sum(),
        }
    }
}

/// Builds root filesystems from a layer cache and a blob source.
pub struct ImageAssembler<'a> {
    cache: &'a LayerCache,
    source: &'a dyn BlobSource,
}

impl<'a> ImageAssembler<'a> {
    /// Creates an assembler pulling missing layers from `source`.
    #[must_use]
    pub fn new(cache: &'a LayerCache, source: &'a dyn BlobSource) -> Self {
        Self { cache, source }
    }

    /// Materializes `manifest` at `dest`.
    ///
    /// An existing `dest` is treated as already assembled: nothing is
    /// fetched and nothing is merged. Otherwise layers are processed in
    /// order, each one fetched then merged before the next is fetched.
    ///
    /// # Errors
    ///
    /// Returns the first fetch or merge error. A partially assembled `dest`
    /// is left in place, which makes a later call skip it; remove it to
    /// retry.
    pub fn assemble(&self, manifest: &ImageManifest, dest: &Path) -> Result<AssemblyOutcome> {
        if fs::symlink_metadata(dest).is_ok() {
            tracing::info!(dest = %dest.display(), "root filesystem exists, skipping assembly");
            return Ok(AssemblyOutcome::Skipped);
        }

        let mut applied = Vec::with_capacity(manifest.layers.len());
        for digest in manifest.bottom_up() {
            let layer = self.cache.fetch_layer(digest, self.source)?;
            if applied.is_empty() {
                fs::create_dir_all(dest).map_err(|e| MoleError::io(dest, e))?;
            }
            merge::merge(&layer.path, &layer.implied_dirs, dest)?;
            tracing::debug!(
                digest = %digest.short(),
                cached = layer.was_cached(),
                "layer applied"
            );
            applied.push(layer);
        }

        if applied.is_empty() {
            fs::create_dir_all(dest).map_err(|e| MoleError::io(dest, e))?;
        }
        tracing::info!(
            dest = %dest.display(),
            layers = applied.len(),
            "root filesystem assembled"
        );
        Ok(AssemblyOutcome::Assembled(applied))
    }
}
