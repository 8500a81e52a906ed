//! Linux namespace management for container isolation.
//!
//! The launcher creates the child with `clone(2)` so the entrypoint itself
//! is the first process of the new PID namespace; this module turns the
//! requested isolation into the matching clone flags.

pub mod uts;

/// Which namespaces a container process gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamespaceConfig {
    /// Isolate the PID namespace (entrypoint becomes PID 1).
    pub pid: bool,
    /// Isolate the mount namespace.
    pub mount: bool,
    /// Isolate the UTS (hostname) namespace.
    pub uts: bool,
}

impl Default for NamespaceConfig {
    fn default() -> Self {
        Self {
            pid: true,
            mount: true,
            uts: true,
        }
    }
}

impl NamespaceConfig {
    /// Returns a configuration requesting no isolation at all.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            pid: false,
            mount: false,
            uts: false,
        }
    }

    /// Returns the `clone(2)` flags for the requested namespaces.
    #[cfg(target_os = "linux")]
    #[must_use]
    pub fn clone_flags(&self) -> nix::sched::CloneFlags {
        use nix::sched::CloneFlags;

        let mut flags = CloneFlags::empty();
        if self.uts {
            flags |= CloneFlags::CLONE_NEWUTS;
        }
        if self.pid {
            flags |= CloneFlags::CLONE_NEWPID;
        }
        if self.mount {
            flags |= CloneFlags::CLONE_NEWNS;
        }
        flags
    }
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use nix::sched::CloneFlags;

    use super::*;

    #[test]
    fn default_requests_uts_pid_and_mount() {
        let flags = NamespaceConfig::default().clone_flags();
        assert!(flags.contains(CloneFlags::CLONE_NEWUTS));
        assert!(flags.contains(CloneFlags::CLONE_NEWPID));
        assert!(flags.contains(CloneFlags::CLONE_NEWNS));
        assert!(!flags.contains(CloneFlags::CLONE_NEWNET));
    }

    #[test]
    fn none_has_no_flags() {
        assert!(NamespaceConfig::none().clone_flags().is_empty());
    }

    #[test]
    fn single_namespace_maps_to_single_flag() {
        let config = NamespaceConfig {
            pid: true,
            ..NamespaceConfig::none()
        };
        assert_eq!(config.clone_flags(), CloneFlags::CLONE_NEWPID);
    }
}
