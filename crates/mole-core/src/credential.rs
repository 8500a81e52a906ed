//! Credential dropping for the container process.
//!
//! The entrypoint runs with the uid/gid resolved from the image config
//! instead of the launcher's own identity.

use std::fmt;

/// Numeric identity the container process runs as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Credential {
    /// User id.
    pub uid: u32,
    /// Primary group id.
    pub gid: u32,
}

impl Credential {
    /// Creates a credential from numeric ids.
    #[must_use]
    pub const fn new(uid: u32, gid: u32) -> Self {
        Self { uid, gid }
    }

    /// Drops the calling process to this identity.
    ///
    /// Supplementary groups are replaced by the primary group, then the
    /// group id is set before the user id, since changing the uid first
    /// would forfeit the right to change groups.
    ///
    /// # Errors
    ///
    /// Returns the errno of the first failing syscall.
    #[cfg(target_os = "linux")]
    pub fn apply(self) -> nix::Result<()> {
        use nix::unistd::{Gid, Uid, setgid, setgroups, setuid};

        let gid = Gid::from_raw(self.gid);
        setgroups(&[gid])?;
        setgid(gid)?;
        setuid(Uid::from_raw(self.uid))
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.uid, self.gid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_displays_as_uid_gid() {
        assert_eq!(Credential::new(1001, 100).to_string(), "1001:100");
    }
}
