//! Layer archive extraction.
//!
//! Unpacks one layer blob into its staging directory, reproducing mode,
//! ownership, symlink targets and hard links exactly as the archive
//! records them, independent of the process umask.

use std::collections::BTreeSet;
use std::fs;
use std::io::Read;
use std::os::unix::fs::{PermissionsExt, lchown, symlink};
use std::path::{Component, Path, PathBuf};

use mole_common::error::{MoleError, Result};

/// Decompresses a gzip stream and extracts the tar archive inside it.
///
/// # Errors
///
/// See [`extract`].
pub fn extract_gzip<R: Read>(compressed: R, target: &Path) -> Result<BTreeSet<PathBuf>> {
    extract(flate2::read::GzDecoder::new(compressed), target)
}

/// Extracts a tar stream into `target`.
///
/// Directories, regular files, symbolic links and hard links are
/// supported; any other entry type aborts the extraction. Directory modes
/// are applied once every entry is written so that read-only directories
/// can still be populated.
///
/// Returns the relative paths of directories that were only created as
/// parents of other entries. Their mode and owner are whatever this
/// process produced, not something the archive recorded.
///
/// # Errors
///
/// Returns [`MoleError::Extraction`] on archive corruption, an unsupported
/// entry type, an unsafe path, or any filesystem failure (including
/// permission denial when changing ownership).
pub fn extract<R: Read>(stream: R, target: &Path) -> Result<BTreeSet<PathBuf>> {
    tracing::debug!(target = %target.display(), "extracting layer archive");

    fs::create_dir_all(target).map_err(|e| failed(target, "create target", &e))?;

    let mut archive = tar::Archive::new(stream);
    let entries = archive
        .entries()
        .map_err(|e| failed(target, "read archive", &e))?;

    let mut dir_modes = Vec::new();
    let mut implied = BTreeSet::new();
    for entry in entries {
        let mut entry = entry.map_err(|e| failed(target, "read entry", &e))?;
        if let Some(dir) = extract_entry(&mut entry, target, &mut implied)? {
            dir_modes.push(dir);
        }
    }

    for (dir, mode) in dir_modes.iter().rev() {
        set_mode(dir, *mode)?;
    }
    if !implied.is_empty() {
        tracing::debug!(count = implied.len(), "layer has directories without entries");
    }
    Ok(implied)
}

/// Writes one entry; returns the directory and its mode for deferred chmod.
fn extract_entry<R: Read>(
    entry: &mut tar::Entry<'_, R>,
    root: &Path,
    implied: &mut BTreeSet<PathBuf>,
) -> Result<Option<(PathBuf, u32)>> {
    // pax global headers carry archive metadata, not a filesystem entry
    if entry.header().entry_type() == tar::EntryType::XGlobalHeader {
        return Ok(None);
    }
    let raw_path = entry
        .path()
        .map_err(|e| failed(root, "decode entry path", &e))?
        .into_owned();
    let rel = sanitize(&raw_path, root)?;
    let target = root.join(&rel);
    ensure_no_symlink_ancestor(root, &rel)?;

    let header = entry.header();
    let mode = header.mode().map_err(|e| failed(&target, "read mode", &e))? & 0o7777;
    let uid = id_field(header.uid(), &target, "uid")?;
    let gid = id_field(header.gid(), &target, "gid")?;
    let kind = header.entry_type();

    if let Some(parent) = rel.parent() {
        note_missing_dirs(root, parent, implied);
        let parent = root.join(parent);
        fs::create_dir_all(&parent).map_err(|e| failed(&parent, "create parent", &e))?;
    }

    match kind {
        tar::EntryType::Directory => {
            match fs::symlink_metadata(&target) {
                Ok(meta) if meta.is_dir() => {}
                Ok(_) => {
                    fs::remove_file(&target).map_err(|e| failed(&target, "replace", &e))?;
                    fs::create_dir(&target).map_err(|e| failed(&target, "create dir", &e))?;
                }
                Err(_) => {
                    fs::create_dir(&target).map_err(|e| failed(&target, "create dir", &e))?;
                }
            }
            chown(&target, uid, gid)?;
            let _ = implied.remove(&rel);
            return Ok(Some((target, mode)));
        }
        tar::EntryType::Regular | tar::EntryType::Continuous => {
            remove_if_link(&target)?;
            let mut file =
                fs::File::create(&target).map_err(|e| failed(&target, "create file", &e))?;
            let _ = std::io::copy(entry, &mut file)
                .map_err(|e| failed(&target, "write file", &e))?;
            drop(file);
            chown(&target, uid, gid)?;
            set_mode(&target, mode)?;
        }
        tar::EntryType::Symlink => {
            let link = link_name(entry, &target)?;
            remove_non_dir(&target)?;
            symlink(&link, &target).map_err(|e| failed(&target, "create symlink", &e))?;
            chown(&target, uid, gid)?;
        }
        tar::EntryType::Link => {
            let link = link_name(entry, &target)?;
            let source = root.join(sanitize(&link, root)?);
            remove_non_dir(&target)?;
            fs::hard_link(&source, &target).map_err(|e| {
                failed(&target, &format!("hard link to {}", source.display()), &e)
            })?;
        }
        other => {
            return Err(MoleError::Extraction {
                path: target,
                message: format!("unsupported entry type {other:?}"),
            });
        }
    }
    tracing::trace!(path = %rel.display(), ?kind, mode, uid, gid, "entry extracted");
    Ok(None)
}

/// Normalises an entry path, rejecting absolute paths and `..`.
fn sanitize(path: &Path, root: &Path) -> Result<PathBuf> {
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(MoleError::Extraction {
                    path: root.join(path),
                    message: format!("unsafe entry path {}", path.display()),
                });
            }
        }
    }
    Ok(clean)
}

/// Records the ancestors of `dir` (relative to `root`) that do not exist yet.
fn note_missing_dirs(root: &Path, dir: &Path, implied: &mut BTreeSet<PathBuf>) {
    for ancestor in dir.ancestors().filter(|a| !a.as_os_str().is_empty()) {
        if fs::symlink_metadata(root.join(ancestor)).is_ok() {
            break;
        }
        let _ = implied.insert(ancestor.to_path_buf());
    }
}

/// Returns the first proper ancestor of `root/rel` that is a symlink.
///
/// Any such path resolves outside the tree rooted at `root`, so nothing
/// below it may be written or deleted.
pub(crate) fn symlink_ancestor(root: &Path, rel: &Path) -> Option<PathBuf> {
    let mut current = root.to_path_buf();
    let mut components = rel.components().peekable();
    while let Some(component) = components.next() {
        if components.peek().is_none() {
            break;
        }
        current.push(component);
        if fs::symlink_metadata(&current).is_ok_and(|m| m.file_type().is_symlink()) {
            return Some(current);
        }
    }
    None
}

/// Refuses to write through a symlink planted by an earlier entry.
fn ensure_no_symlink_ancestor(root: &Path, rel: &Path) -> Result<()> {
    match symlink_ancestor(root, rel) {
        Some(link) => Err(MoleError::Extraction {
            path: root.join(rel),
            message: format!("entry path traverses symlink {}", link.display()),
        }),
        None => Ok(()),
    }
}

fn link_name<R: Read>(entry: &tar::Entry<'_, R>, target: &Path) -> Result<PathBuf> {
    entry
        .link_name()
        .map_err(|e| failed(target, "decode link target", &e))?
        .map(std::borrow::Cow::into_owned)
        .ok_or_else(|| MoleError::Extraction {
            path: target.to_path_buf(),
            message: "link entry without target".into(),
        })
}

fn id_field(value: std::io::Result<u64>, target: &Path, what: &str) -> Result<u32> {
    let value = value.map_err(|e| failed(target, what, &e))?;
    u32::try_from(value).map_err(|_| MoleError::Extraction {
        path: target.to_path_buf(),
        message: format!("{what} {value} out of range"),
    })
}

fn remove_if_link(target: &Path) -> Result<()> {
    match fs::symlink_metadata(target) {
        Ok(meta) if meta.file_type().is_symlink() => {
            fs::remove_file(target).map_err(|e| failed(target, "replace", &e))
        }
        _ => Ok(()),
    }
}

fn remove_non_dir(target: &Path) -> Result<()> {
    match fs::symlink_metadata(target) {
        Ok(meta) if !meta.is_dir() => {
            fs::remove_file(target).map_err(|e| failed(target, "replace", &e))
        }
        _ => Ok(()),
    }
}

fn chown(target: &Path, uid: u32, gid: u32) -> Result<()> {
    lchown(target, Some(uid), Some(gid)).map_err(|e| failed(target, "change ownership", &e))
}

fn set_mode(target: &Path, mode: u32) -> Result<()> {
    fs::set_permissions(target, fs::Permissions::from_mode(mode))
        .map_err(|e| failed(target, "set mode", &e))
}

fn failed(path: &Path, action: &str, err: &dyn std::fmt::Display) -> MoleError {
    MoleError::Extraction {
        path: path.to_path_buf(),
        message: format!("{action}: {err}"),
    }
}
