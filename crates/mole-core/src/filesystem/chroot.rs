//! Root filesystem switching via `chroot(2)`.
//!
//! Confines the container process to the assembled root filesystem. Both
//! calls run inside the cloned child.

use std::path::Path;

/// Changes the calling process's root to `new_root` and moves to `/`.
///
/// # Errors
///
/// Returns the errno if `chroot(2)` or the follow-up `chdir(2)` fails.
#[cfg(target_os = "linux")]
pub fn change_root(new_root: &Path) -> nix::Result<()> {
    nix::unistd::chroot(new_root)?;
    nix::unistd::chdir("/")
}

/// Changes into the container's working directory.
///
/// `dir` is interpreted inside the new root.
///
/// # Errors
///
/// Returns the errno if `chdir(2)` fails.
#[cfg(target_os = "linux")]
pub fn enter_working_dir(dir: &Path) -> nix::Result<()> {
    nix::unistd::chdir(dir)
}
