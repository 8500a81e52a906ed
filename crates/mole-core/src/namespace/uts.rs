//! UTS namespace isolation.
//!
//! Lets the container carry its own hostname.

/// Sets the hostname inside the calling process's UTS namespace.
///
/// Runs in the cloned child, after `CLONE_NEWUTS`.
///
/// # Errors
///
/// Returns the errno if `sethostname(2)` fails.
#[cfg(target_os = "linux")]
pub fn set_hostname(hostname: &str) -> nix::Result<()> {
    nix::unistd::sethostname(hostname)
}

/// Derives a valid hostname from a target directory name.
///
/// Keeps ASCII alphanumerics and `-`, maps everything else to `-`, trims
/// leading/trailing dashes, and caps the length at 63 bytes.
#[must_use]
pub fn hostname_for(name: &str) -> String {
    let mapped: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .take(63)
        .collect();
    let trimmed = mapped.trim_matches('-');
    if trimmed.is_empty() {
        mole_common::constants::APP_NAME.to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hostname_keeps_simple_names() {
        assert_eq!(hostname_for("nginx"), "nginx");
    }

    #[test]
    fn hostname_replaces_invalid_characters() {
        assert_eq!(hostname_for("my_app.v2"), "my-app-v2");
    }

    #[test]
    fn hostname_falls_back_when_nothing_valid() {
        assert_eq!(hostname_for("..."), "mole");
    }

    #[test]
    fn hostname_is_capped() {
        assert_eq!(hostname_for(&"a".repeat(100)).len(), 63);
    }
}
