//! Image reference parsing.
//!
//! Accepts the short Docker Hub form `name[:tag]`, e.g. `alpine`,
//! `nginx:1.27` or `bitnami/redis:7.2`.

use std::fmt;
use std::str::FromStr;

use mole_common::constants::{DEFAULT_NAMESPACE, DEFAULT_TAG};
use mole_common::error::{MoleError, Result};

/// A repository plus tag, normalized for the registry API.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    /// Repository path, always with a namespace (`library/alpine`).
    pub repository: String,
    /// Tag to pull.
    pub tag: String,
}

impl ImageReference {
    /// Parses `name[:tag]`.
    ///
    /// # Errors
    ///
    /// Returns [`MoleError::Config`] for an empty name or tag, embedded
    /// whitespace, or a digest reference (`name@sha256:...`).
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = |why: &str| MoleError::Config {
            message: format!("invalid image reference '{input}': {why}"),
        };

        if input.chars().any(char::is_whitespace) {
            return Err(invalid("whitespace is not allowed"));
        }
        if input.contains('@') {
            return Err(invalid("digest references are not supported"));
        }

        // A ':' after the last '/' separates the tag; one before it would be a port.
        let (name, tag) = match input.rfind(':') {
            Some(idx) if !input[idx..].contains('/') => (&input[..idx], &input[idx + 1..]),
            _ => (input, DEFAULT_TAG),
        };
        if name.is_empty() || name.starts_with('/') || name.ends_with('/') {
            return Err(invalid("missing repository name"));
        }
        if tag.is_empty() {
            return Err(invalid("empty tag"));
        }

        let repository = if name.contains('/') {
            name.to_string()
        } else {
            format!("{DEFAULT_NAMESPACE}/{name}")
        };
        Ok(Self {
            repository,
            tag: tag.to_string(),
        })
    }

    /// Last path segment of the repository (`alpine` for `library/alpine`).
    #[must_use]
    pub fn short_name(&self) -> &str {
        self.repository
            .rsplit('/')
            .next()
            .unwrap_or(&self.repository)
    }
}

impl FromStr for ImageReference {
    type Err = MoleError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repository, self.tag)
    }
}
