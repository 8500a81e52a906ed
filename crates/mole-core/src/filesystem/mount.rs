//! Mount utilities for container filesystem setup.
//!
//! Handles the bind mount of a backing root filesystem onto its target
//! directory, `/proc` inside the container's mount namespace, and the
//! mount-table scan used to tear a target down.

use std::path::{Path, PathBuf};

use mole_common::error::{MoleError, Result};

/// Path of the calling process's mount table.
pub const MOUNTINFO_PATH: &str = "/proc/self/mountinfo";

/// Bind-mounts `source` onto `target`.
///
/// # Errors
///
/// Returns an error if the `mount(2)` syscall fails.
#[cfg(target_os = "linux")]
pub fn bind_mount(source: &Path, target: &Path) -> Result<()> {
    use nix::mount::{MsFlags, mount};

    mount(
        Some(source),
        target,
        None::<&str>,
        MsFlags::MS_BIND | MsFlags::MS_REC,
        None::<&str>,
    )
    .map_err(|e| MoleError::NamespaceSetup {
        message: format!(
            "bind mount {} -> {} failed: {e}",
            source.display(),
            target.display()
        ),
    })?;
    tracing::info!(
        source = %source.display(),
        target = %target.display(),
        "bind mount created"
    );
    Ok(())
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error: bind mounts require Linux.
#[cfg(not(target_os = "linux"))]
pub fn bind_mount(_source: &Path, _target: &Path) -> Result<()> {
    Err(MoleError::Unsupported {
        message: "bind mounts require Linux".into(),
    })
}

/// Lazily detaches the mount at `target`.
///
/// # Errors
///
/// Returns an error if `umount2(2)` fails.
#[cfg(target_os = "linux")]
pub fn unmount(target: &Path) -> Result<()> {
    nix::mount::umount2(target, nix::mount::MntFlags::MNT_DETACH).map_err(|e| {
        MoleError::NamespaceSetup {
            message: format!("unmount {} failed: {e}", target.display()),
        }
    })?;
    tracing::info!(path = %target.display(), "unmounted");
    Ok(())
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Always returns an error: unmounting requires Linux.
#[cfg(not(target_os = "linux"))]
pub fn unmount(_target: &Path) -> Result<()> {
    Err(MoleError::Unsupported {
        message: "unmount requires Linux".into(),
    })
}

/// Marks every mount in the calling process's namespace as private.
///
/// Runs in the cloned child right after `CLONE_NEWNS`, so mounts it
/// creates do not propagate back to the host.
///
/// # Errors
///
/// Returns the errno if `mount(2)` fails.
#[cfg(target_os = "linux")]
pub fn make_mounts_private() -> nix::Result<()> {
    use nix::mount::{MsFlags, mount};

    mount(
        None::<&str>,
        "/",
        None::<&str>,
        MsFlags::MS_REC | MsFlags::MS_PRIVATE,
        None::<&str>,
    )
}

/// Mounts a fresh `proc` filesystem at `target`.
///
/// Runs in the cloned child, so the new instance reflects the child's PID
/// namespace.
///
/// # Errors
///
/// Returns the errno if `mount(2)` fails.
#[cfg(target_os = "linux")]
pub fn mount_proc(target: &Path) -> nix::Result<()> {
    use nix::mount::{MsFlags, mount};

    mount(
        Some("proc"),
        target,
        Some("proc"),
        MsFlags::MS_NOSUID | MsFlags::MS_NODEV | MsFlags::MS_NOEXEC,
        None::<&str>,
    )
}

/// Returns every mount point at or below `root`, deepest first.
///
/// A path with stacked mounts appears once per mount.
///
/// # Errors
///
/// Returns an error if the mount table cannot be read.
pub fn mount_points_under(root: &Path) -> Result<Vec<PathBuf>> {
    let table = std::fs::read_to_string(MOUNTINFO_PATH)
        .map_err(|e| MoleError::io(MOUNTINFO_PATH, e))?;
    let root = std::fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
    let mut points: Vec<PathBuf> = parse_mount_points(&table)
        .into_iter()
        .filter(|p| p.starts_with(&root))
        .collect();
    points.sort_by_key(|p| std::cmp::Reverse(p.components().count()));
    Ok(points)
}

/// Returns whether `path` is itself a mount point.
///
/// # Errors
///
/// Returns an error if the mount table cannot be read.
pub fn is_mount_point(path: &Path) -> Result<bool> {
    let path = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    Ok(mount_points_under(&path)?.iter().any(|p| *p == path))
}

/// Extracts the mount point column from `/proc/<pid>/mountinfo` content.
#[must_use]
pub fn parse_mount_points(table: &str) -> Vec<PathBuf> {
    table
        .lines()
        .filter_map(|line| line.split(' ').nth(4))
        .map(|field| PathBuf::from(unescape_octal(field)))
        .collect()
}

/// Decodes the `\ooo` escapes the kernel uses for space, tab, newline and
/// backslash in mount paths.
fn unescape_octal(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() && is_octal_escape(&bytes[i + 1..i + 4]) {
            let value =
                (bytes[i + 1] - b'0') * 64 + (bytes[i + 2] - b'0') * 8 + (bytes[i + 3] - b'0');
            out.push(value);
            i += 4;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn is_octal_escape(digits: &[u8]) -> bool {
    digits.len() == 3 && digits[0] <= b'3' && digits.iter().all(|d| (b'0'..=b'7').contains(d))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = "\
22 1 8:1 / / rw,relatime shared:1 - ext4 /dev/sda1 rw
35 22 0:30 / /proc rw,nosuid shared:12 - proc proc rw
81 22 8:1 /home/u/.web.backing /home/u/web rw,relatime shared:1 - ext4 /dev/sda1 rw
82 81 0:52 / /home/u/web/proc rw,nosuid - proc proc rw
83 22 8:1 /srv /home/u/my\\040app rw - ext4 /dev/sda1 rw
";

    #[test]
    fn parse_extracts_mount_point_column() {
        let points = parse_mount_points(TABLE);
        assert_eq!(points.len(), 5);
        assert_eq!(points[0], PathBuf::from("/"));
        assert_eq!(points[2], PathBuf::from("/home/u/web"));
    }

    #[test]
    fn parse_decodes_escaped_spaces() {
        let points = parse_mount_points(TABLE);
        assert_eq!(points[4], PathBuf::from("/home/u/my app"));
    }

    #[test]
    fn unescape_leaves_plain_backslashes() {
        assert_eq!(unescape_octal("a\\b"), "a\\b");
        assert_eq!(unescape_octal("tab\\011x"), "tab\tx");
    }

    #[test]
    fn mount_points_under_fresh_tempdir_is_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        if !Path::new(MOUNTINFO_PATH).exists() {
            return;
        }
        let points = mount_points_under(dir.path()).expect("mountinfo");
        assert!(points.is_empty());
        assert!(!is_mount_point(dir.path()).expect("mountinfo"));
    }
}
