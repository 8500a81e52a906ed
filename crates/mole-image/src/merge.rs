//! Whiteout-aware union merge of one extracted layer onto a root filesystem.
//!
//! The layer tree is walked once. All deletions (whiteouts) are applied
//! before any addition, so a layer that removes a path and recreates it
//! under a different type always ends with the recreated version, whatever
//! order the walk produced.
//!
//! Paths are resolved inside the destination only: a symlink left there by
//! a lower layer is never followed while deleting or writing below it.

use std::collections::BTreeSet;
use std::fs;
use std::os::unix::fs::{MetadataExt, PermissionsExt, lchown, symlink};
use std::path::{Path, PathBuf};

use mole_common::constants::{OPAQUE_WHITEOUT, WHITEOUT_PREFIX};
use mole_common::error::{MoleError, Result};

use crate::archive::symlink_ancestor;

/// Meaning of a whiteout marker found in a layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Whiteout {
    /// `<dir>/.wh..wh..opq`: reset the contents of `<dir>`.
    Opaque(PathBuf),
    /// `<dir>/.wh.<name>`: delete `<dir>/<name>`.
    Remove(PathBuf),
}

impl Whiteout {
    /// Classifies a layer-relative path; `None` for ordinary entries.
    #[must_use]
    pub fn classify(rel: &Path) -> Option<Self> {
        let name = rel.file_name()?.to_str()?;
        let parent = rel.parent().unwrap_or_else(|| Path::new(""));
        if name == OPAQUE_WHITEOUT {
            Some(Self::Opaque(parent.to_path_buf()))
        } else {
            name.strip_prefix(WHITEOUT_PREFIX)
                .filter(|target| !target.is_empty())
                .map(|target| Self::Remove(parent.join(target)))
        }
    }
}

/// One path of the extracted layer.
#[derive(Debug)]
struct LayerEntry {
    rel: PathBuf,
    source: PathBuf,
    metadata: fs::Metadata,
}

/// Applies the layer at `layer` onto `dest`.
///
/// Pass 1 deletes: every explicit whiteout removes its target (deepest
/// first), then every opaque marker empties its directory. Pass 2 copies
/// every non-marker entry: directories are created or kept, regular files
/// overwrite whatever is there, symlinks are recreated verbatim; mode and
/// ownership come from the layer. `implied_dirs` lists layer-relative
/// directories the archive had no entry for; an existing destination
/// directory keeps its own mode and ownership for those.
///
/// A whiteout whose path runs through a symlink in `dest` names nothing
/// inside the root filesystem: an explicit one is treated as missing, an
/// opaque one as a no-op.
///
/// # Errors
///
/// Returns [`MoleError::DeletionTargetMissing`] when an explicit whiteout
/// names a path absent from `dest`, [`MoleError::Extraction`] when an
/// addition would be written through a symlink, and an I/O error for any
/// filesystem failure. No rollback is attempted: `dest` is left as far as
/// the merge progressed.
pub fn merge(layer: &Path, implied_dirs: &BTreeSet<PathBuf>, dest: &Path) -> Result<()> {
    let entries = walk(layer)?;
    apply_deletions(&entries, dest)?;
    apply_additions(&entries, implied_dirs, dest)?;
    tracing::debug!(
        layer = %layer.display(),
        dest = %dest.display(),
        entries = entries.len(),
        "layer merged"
    );
    Ok(())
}

fn walk(layer: &Path) -> Result<Vec<LayerEntry>> {
    let mut entries = Vec::new();
    for item in walkdir::WalkDir::new(layer).min_depth(1).follow_links(false) {
        let item = item.map_err(|e| {
            let path = e.path().unwrap_or(layer).to_path_buf();
            MoleError::io(path, e.into())
        })?;
        let metadata = item
            .metadata()
            .map_err(|e| MoleError::io(item.path(), e.into()))?;
        let rel = item
            .path()
            .strip_prefix(layer)
            .map_err(|_| MoleError::Config {
                message: format!("{} escapes layer root", item.path().display()),
            })?
            .to_path_buf();
        entries.push(LayerEntry {
            rel,
            source: item.into_path(),
            metadata,
        });
    }
    Ok(entries)
}

fn apply_deletions(entries: &[LayerEntry], dest: &Path) -> Result<()> {
    let mut removals = Vec::new();
    let mut opaque = Vec::new();
    for entry in entries {
        match Whiteout::classify(&entry.rel) {
            Some(Whiteout::Remove(target)) => removals.push(target),
            Some(Whiteout::Opaque(dir)) => opaque.push(dir),
            None => {}
        }
    }

    // Deepest first, so removing a directory never strands a nested whiteout.
    removals.sort_by_key(|p| std::cmp::Reverse(p.components().count()));
    for target in removals {
        let path = dest.join(&target);
        if let Some(link) = symlink_ancestor(dest, &target) {
            tracing::warn!(
                path = %path.display(),
                link = %link.display(),
                "whiteout runs through symlink"
            );
            return Err(MoleError::DeletionTargetMissing { path });
        }
        if fs::symlink_metadata(&path).is_err() {
            return Err(MoleError::DeletionTargetMissing { path });
        }
        remove_any(&path)?;
        tracing::trace!(path = %path.display(), "whiteout removed");
    }

    for dir in opaque {
        let path = dest.join(&dir);
        if let Some(link) = symlink_ancestor(dest, &dir) {
            tracing::warn!(
                path = %path.display(),
                link = %link.display(),
                "opaque marker runs through symlink"
            );
            continue;
        }
        clear_dir(&path)?;
        tracing::trace!(path = %path.display(), "opaque directory reset");
    }
    Ok(())
}

fn apply_additions(
    entries: &[LayerEntry],
    implied_dirs: &BTreeSet<PathBuf>,
    dest: &Path,
) -> Result<()> {
    let mut dir_modes = Vec::new();
    for entry in entries {
        if Whiteout::classify(&entry.rel).is_some() {
            continue;
        }
        let target = dest.join(&entry.rel);
        // Parents come first in the walk, so a symlink here was not replaced.
        if let Some(link) = symlink_ancestor(dest, &entry.rel) {
            return Err(MoleError::Extraction {
                path: target,
                message: format!("entry would be written through symlink {}", link.display()),
            });
        }
        let kind = entry.metadata.file_type();
        let mode = entry.metadata.mode() & 0o7777;

        if kind.is_dir() {
            let existed = fs::symlink_metadata(&target).is_ok_and(|m| m.is_dir());
            ensure_dir(&target)?;
            if existed && implied_dirs.contains(&entry.rel) {
                continue;
            }
            chown(&target, &entry.metadata)?;
            dir_modes.push((target, mode));
        } else if kind.is_symlink() {
            let link = fs::read_link(&entry.source).map_err(|e| MoleError::io(&entry.source, e))?;
            replace(&target)?;
            symlink(&link, &target).map_err(|e| MoleError::io(&target, e))?;
            chown(&target, &entry.metadata)?;
        } else if kind.is_file() {
            replace(&target)?;
            let _ = fs::copy(&entry.source, &target).map_err(|e| MoleError::io(&target, e))?;
            chown(&target, &entry.metadata)?;
            set_mode(&target, mode)?;
        } else {
            return Err(MoleError::Extraction {
                path: entry.source.clone(),
                message: format!("unsupported file type {kind:?} in layer"),
            });
        }
    }

    for (dir, mode) in dir_modes.iter().rev() {
        set_mode(dir, *mode)?;
    }
    Ok(())
}

/// Removes a file, symlink or whole directory tree.
fn remove_any(path: &Path) -> Result<()> {
    let meta = fs::symlink_metadata(path).map_err(|e| MoleError::io(path, e))?;
    if meta.is_dir() {
        fs::remove_dir_all(path).map_err(|e| MoleError::io(path, e))
    } else {
        fs::remove_file(path).map_err(|e| MoleError::io(path, e))
    }
}

/// Empties a directory but keeps it; absent or non-directory is a no-op.
fn clear_dir(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => {}
        _ => return Ok(()),
    }
    for child in fs::read_dir(path).map_err(|e| MoleError::io(path, e))? {
        let child = child.map_err(|e| MoleError::io(path, e))?;
        remove_any(&child.path())?;
    }
    Ok(())
}

/// Makes `path` a directory, replacing a file or symlink in the way.
fn ensure_dir(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => {
            fs::remove_file(path).map_err(|e| MoleError::io(path, e))?;
            fs::create_dir(path).map_err(|e| MoleError::io(path, e))
        }
        Err(_) => fs::create_dir_all(path).map_err(|e| MoleError::io(path, e)),
    }
}

/// Clears the way for a file or symlink at `path`.
fn replace(path: &Path) -> Result<()> {
    if fs::symlink_metadata(path).is_ok() {
        remove_any(path)?;
    }
    Ok(())
}

fn chown(target: &Path, from: &fs::Metadata) -> Result<()> {
    lchown(target, Some(from.uid()), Some(from.gid())).map_err(|e| MoleError::io(target, e))
}

fn set_mode(target: &Path, mode: u32) -> Result<()> {
    fs::set_permissions(target, fs::Permissions::from_mode(mode))
        .map_err(|e| MoleError::io(target, e))
}
