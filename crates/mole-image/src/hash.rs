//! SHA-256 content verification.
//!
//! Checks a freshly downloaded blob against the digest it was requested by.

use std::path::Path;

use mole_common::error::{MoleError, Result};
use mole_common::types::LayerDigest;
use sha2::{Digest, Sha256};

/// Computes the hex-encoded SHA-256 hash of a file.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn hash_file(path: &Path) -> Result<String> {
    tracing::debug!(path = %path.display(), "computing SHA-256 hash");
    let mut file = std::fs::File::open(path).map_err(|e| MoleError::io(path, e))?;
    let mut hasher = Sha256::new();
    let _ = std::io::copy(&mut file, &mut hasher).map_err(|e| MoleError::io(path, e))?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Validates that a file matches `expected`.
///
/// Only `sha256:` digests are checked; other algorithms are accepted as-is.
///
/// # Errors
///
/// Returns [`MoleError::HashMismatch`] if the hashes differ.
pub fn validate_digest(path: &Path, expected: &LayerDigest) -> Result<()> {
    if expected.algorithm() != Some("sha256") {
        tracing::debug!(digest = %expected, "digest algorithm not verified");
        return Ok(());
    }
    let actual = hash_file(path)?;
    if !actual.eq_ignore_ascii_case(expected.encoded()) {
        return Err(MoleError::HashMismatch {
            resource: path.display().to_string(),
            expected: expected.to_string(),
            actual: format!("sha256:{actual}"),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[test]
    fn hash_file_matches_known_vector() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("blob");
        std::fs::write(&path, b"hello").expect("write");
        assert_eq!(hash_file(&path).expect("hash"), HELLO_SHA256);
    }

    #[test]
    fn validate_accepts_matching_digest() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("blob");
        std::fs::write(&path, b"hello").expect("write");
        let digest = LayerDigest::new(format!("sha256:{HELLO_SHA256}"));
        validate_digest(&path, &digest).expect("should match");
    }

    #[test]
    fn validate_rejects_mismatch() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("blob");
        std::fs::write(&path, b"tampered").expect("write");
        let digest = LayerDigest::new(format!("sha256:{HELLO_SHA256}"));
        let err = validate_digest(&path, &digest).expect_err("mismatch");
        assert!(matches!(err, MoleError::HashMismatch { .. }));
    }

    #[test]
    fn validate_skips_unknown_algorithms() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("blob");
        std::fs::write(&path, b"anything").expect("write");
        validate_digest(&path, &LayerDigest::new("sha512:abc")).expect("skipped");
    }

    #[test]
    fn hash_missing_file_is_io_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(matches!(
            hash_file(&dir.path().join("missing")),
            Err(MoleError::Io { .. })
        ));
    }
}
